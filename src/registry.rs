//! Catalogue of the available mutators.
//!
//! Each mutator is registered under its stable name alongside a predicate telling whether it
//! can be bound to a given target and a constructor. The predicate must be callable without an
//! instance, which is why both are stored as plain function pointers.

use log::debug;

use crate::config::Config;
use crate::error::*;
use crate::model::{DataModel, ElementId};
use crate::mutator::{selection_weight, Mutator};
use crate::mutators::action::*;
use crate::mutators::array::*;
use crate::mutators::blob::*;
use crate::mutators::double::*;
use crate::mutators::element::*;
use crate::mutators::encoding::*;
use crate::mutators::number::*;
use crate::mutators::sized::*;
use crate::mutators::string::*;
use crate::state::StateModel;
use crate::utils::{Random, WeightedList};

/// Registry entry of a mutator bound to a data model element.
#[derive(Clone, Copy)]
pub struct Entry {
    pub name: &'static str,
    pub supported: fn(&DataModel, ElementId) -> bool,
    pub create: fn(&DataModel, ElementId) -> Result<Box<dyn Mutator>>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("name", &self.name).finish()
    }
}

/// Registry entry of a mutator bound to a state model.
#[derive(Clone, Copy)]
pub struct StateEntry {
    pub name: &'static str,
    pub supported: fn(&StateModel) -> bool,
    pub create: fn(&StateModel) -> Result<Box<dyn Mutator>>,
}

impl std::fmt::Debug for StateEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateEntry")
            .field("name", &self.name)
            .finish()
    }
}

macro_rules! data_entry {
    ($ty:ty) => {
        Entry {
            name: <$ty>::NAME,
            supported: <$ty>::supported,
            create: |model, id| Ok(Box::new(<$ty>::new(model, id)?) as Box<dyn Mutator>),
        }
    };
    ($ty:ty, $strategy:expr) => {
        Entry {
            name: $strategy.name(),
            supported: |model, id| <$ty>::supported($strategy, model, id),
            create: |model, id| Ok(Box::new(<$ty>::new($strategy, model, id)?) as Box<dyn Mutator>),
        }
    };
}

macro_rules! state_entry {
    ($ty:ty) => {
        StateEntry {
            name: <$ty>::NAME,
            supported: <$ty>::supported,
            create: |model| Ok(Box::new(<$ty>::new(model)?) as Box<dyn Mutator>),
        }
    };
}

/// Returns every mutator operating on data model elements.
pub fn data_mutators() -> Vec<Entry> {
    vec![
        data_entry!(ArrayRandomizeOrder),
        data_entry!(ArrayReverseOrder),
        data_entry!(ArrayEdgeCase),
        data_entry!(ArrayVariance),
        data_entry!(DataElementDuplicate),
        data_entry!(DataElementRemove),
        data_entry!(DataElementSwapNear),
        data_entry!(DataElementBitFlipper),
        data_entry!(BlobMutator, BlobStrategy::ChangeToNull),
        data_entry!(BlobMutator, BlobStrategy::ChangeRandom),
        data_entry!(BlobMutator, BlobStrategy::ChangeSpecial),
        data_entry!(BlobMutator, BlobStrategy::ExpandSingleIncrementing),
        data_entry!(BlobMutator, BlobStrategy::ExpandSingleRandom),
        data_entry!(BlobMutator, BlobStrategy::ExpandAllRandom),
        data_entry!(BlobMutator, BlobStrategy::ExpandZero),
        data_entry!(NumberEdgeCase),
        data_entry!(NumberVariance),
        data_entry!(NumberRandom),
        data_entry!(ExtraValues),
        data_entry!(NumericStringEdgeCase),
        data_entry!(NumericStringVariance),
        data_entry!(DoubleEdgeCase),
        data_entry!(DoubleVariance),
        data_entry!(DoubleRandom),
        data_entry!(SizedMutator, SizedStrategy::DataEdgeCase),
        data_entry!(SizedMutator, SizedStrategy::DataVariance),
        data_entry!(SizedMutator, SizedStrategy::EdgeCase),
        data_entry!(SizedMutator, SizedStrategy::Variance),
        data_entry!(StringCase, CaseStrategy::Lower),
        data_entry!(StringCase, CaseStrategy::Upper),
        data_entry!(StringCase, CaseStrategy::Random),
        data_entry!(StringLengthEdgeCase),
        data_entry!(StringLengthVariance),
        data_entry!(StringTable, TableStrategy::Static),
        data_entry!(StringTable, TableStrategy::SqlInjection),
        data_entry!(StringUnicodePlane, UnicodePlane::Plane0),
        data_entry!(StringUnicodePlane, UnicodePlane::Plane1),
        data_entry!(StringUnicodePlane, UnicodePlane::Plane2),
        data_entry!(StringUnicodePlane, UnicodePlane::Plane14),
        data_entry!(StringUnicodePlane, UnicodePlane::Plane15And16),
        data_entry!(StringUtf8ExtraBytes),
        data_entry!(StringUtf8Invalid),
        data_entry!(StringBomStatic, BomFamily::Utf8),
        data_entry!(StringBomStatic, BomFamily::Utf16),
        data_entry!(StringBomStatic, BomFamily::Utf32),
    ]
}

/// Returns every mutator operating on state models.
pub fn state_mutators() -> Vec<StateEntry> {
    vec![
        state_entry!(ActionDuplicate),
        state_entry!(ActionRemove),
        state_entry!(ActionSwap),
        state_entry!(StateChangeRandom),
    ]
}

/// Looks up a data model mutator by name.
pub fn find(name: &str) -> Option<Entry> {
    data_mutators().into_iter().find(|e| e.name == name)
}

/// Looks up a state model mutator by name.
pub fn find_state(name: &str) -> Option<StateEntry> {
    state_mutators().into_iter().find(|e| e.name == name)
}

/// Returns the enabled mutators that support element `id`.
pub fn supported_for(model: &DataModel, id: ElementId, config: &Config) -> Vec<Entry> {
    data_mutators()
        .into_iter()
        .filter(|e| config.mutator_enabled(e.name) && (e.supported)(model, id))
        .collect()
}

/// Instantiates the enabled mutators supporting element `id`.
pub fn instantiate(
    model: &DataModel,
    id: ElementId,
    config: &Config,
) -> Result<Vec<Box<dyn Mutator>>> {
    let mutators = supported_for(model, id, config)
        .iter()
        .map(|e| (e.create)(model, id))
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "{} mutator(s) bound to '{}'",
        mutators.len(),
        model.full_name(id)
    );
    Ok(mutators)
}

/// Instantiates the enabled mutators supporting a state model.
pub fn instantiate_state(model: &StateModel, config: &Config) -> Result<Vec<Box<dyn Mutator>>> {
    state_mutators()
        .iter()
        .filter(|e| config.mutator_enabled(e.name) && (e.supported)(model))
        .map(|e| (e.create)(model))
        .collect()
}

/// Picks one of the mutators bound to element `id`, proportionally to its selection weight.
/// Returns its index in `mutators`.
pub fn pick(
    mutators: &[Box<dyn Mutator>],
    model: &DataModel,
    id: ElementId,
    rand: &mut Random,
) -> Option<usize> {
    let mut list = WeightedList::new();
    for (i, m) in mutators.iter().enumerate() {
        list.add(selection_weight(model, id, m.weight()), i);
    }
    list.pick(rand).copied()
}

// -----------------------------------------------------------------------------------------------
// Tests
