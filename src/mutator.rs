//! Mutator abstraction shared by every mutation strategy.
//!
//! # Role of a Mutator
//!
//! A mutator is bound to exactly one element of a [`DataModel`] (or to one [`StateModel`]) for
//! the duration of a fuzzing session against that target. When it is created, it computes the
//! exact number of mutations it can produce ([`Mutator::count`]) from the current shape of the
//! target, and this number never changes afterwards. The engine then repeatedly:
//!
//!  1. assigns a mutation index in `[0; count[` using [`Mutator::set_mutation`];
//!  2. applies either [`Mutator::sequential_mutation`], which must be a pure function of the
//!     index and of the random generator state it is given, or [`Mutator::random_mutation`],
//!     which draws from the random generator;
//!  3. reads back the mutated value from the returned [`MutationResult`] or from the model.
//!
//! Whether a mutator can be instantiated for an element at all is decided by a free function
//! stored alongside its constructor in the [`registry`](crate::registry).
//!
//! # Skipped mutations
//!
//! Generic algorithms running against arbitrary models regularly hit conditions where a
//! mutation cannot be applied (the output would exceed the configured maximum size, a size
//! indicator could not represent the new length, no new value is left to emit). These return
//! [`MutationResult::Skipped`] and leave the model untouched. Errors are reserved for
//! configuration and programming defects.

use std::sync::OnceLock;

use log::{debug, log_enabled, trace, Level};
use regex::Regex;

use crate::bits::BitStream;
use crate::error::*;
use crate::model::{DataModel, ElementId};
use crate::state::{ActionId, State, StateId, StateModel};
use crate::utils::Random;

pub use crate::model::MutationFlags;

/// Hint disabling the mutators that bypass an element's type encoding when set to `false`.
pub const TYPE_TRANSFORM_HINT: &str = "TypeTransform";

// -----------------------------------------------------------------------------------------------
// Mutator - Results & targets

/// Effect of a mutation.
#[derive(Clone, PartialEq, Debug)]
pub enum MutationResult {
    /// The target element was mutated. `value` is the new serialized value of the element that
    /// changed (the parent or the array itself for structural mutations) and `flags` tells the
    /// model which processing steps the new value overrides.
    Mutated {
        value: BitStream,
        flags: MutationFlags,
    },
    /// A state model mutator armed its hooks for the next run.
    Scheduled,
    /// The mutation could not be applied to the current model and nothing was changed.
    Skipped,
}

impl MutationResult {
    pub fn is_skipped(&self) -> bool {
        matches!(self, MutationResult::Skipped)
    }

    /// Returns the mutated value, if any.
    pub fn value(&self) -> Option<&BitStream> {
        match self {
            MutationResult::Mutated { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// What a mutator is applied to.
pub enum Target<'a> {
    Element(&'a mut DataModel, ElementId),
    StateModel(&'a mut StateModel),
}

impl<'a> Target<'a> {
    /// Unwraps an element target, failing for mutator `name` otherwise.
    pub fn element(self, name: &'static str) -> Result<(&'a mut DataModel, ElementId)> {
        match self {
            Target::Element(model, id) => Ok((model, id)),
            Target::StateModel(_) => Err(Error::Mutator(MutatorError::WrongTarget(name))),
        }
    }

    /// Unwraps a state model target, failing for mutator `name` otherwise.
    pub fn state_model(self, name: &'static str) -> Result<&'a mut StateModel> {
        match self {
            Target::StateModel(model) => Ok(model),
            Target::Element(..) => Err(Error::Mutator(MutatorError::WrongTarget(name))),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Mutator - Trait

/// A mutation strategy bound to a single target.
pub trait Mutator {
    /// Stable name of the mutator, used by the registry and in hints.
    fn name(&self) -> &'static str;

    /// Number of mutations this mutator can produce. Fixed at construction.
    fn count(&self) -> usize;

    /// Current mutation index.
    fn mutation(&self) -> usize;

    /// Sets the mutation index used by the next sequential mutation.
    fn set_mutation(&mut self, mutation: usize);

    /// Relative weight of the mutator when the engine picks one at random.
    fn weight(&self) -> usize {
        self.count()
    }

    fn affects_data_model(&self) -> bool {
        true
    }

    fn affects_state_model(&self) -> bool {
        false
    }

    /// Applies the mutation selected by the current index.
    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult>;

    /// Applies a randomly selected mutation.
    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult>;

    /// Called when the protocol is about to transition from `current` to `proposed` after
    /// executing `action`. Returns the state to actually move to.
    fn change_state(
        &mut self,
        _model: &StateModel,
        _current: StateId,
        _action: ActionId,
        proposed: StateId,
        _rand: &mut Random,
    ) -> StateId {
        proposed
    }

    /// Called before each action of `state` is executed. `proposed` is the action at the
    /// state's cursor. Returns the action to execute, consuming the cursor as needed, or `None`
    /// to leave the state.
    fn next_action(
        &mut self,
        state: &mut State,
        _last: Option<ActionId>,
        _proposed: Option<ActionId>,
    ) -> Option<ActionId> {
        state.pop_action()
    }
}

/// Implements the bookkeeping methods of [`Mutator`] for a struct with `count` and `mutation`
/// fields.
macro_rules! mutator_index {
    ($name:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn count(&self) -> usize {
            self.count
        }

        fn mutation(&self) -> usize {
            self.mutation
        }

        fn set_mutation(&mut self, mutation: usize) {
            self.mutation = mutation;
        }
    };
}
pub(crate) use mutator_index;

// -----------------------------------------------------------------------------------------------
// Mutator - Helpers

/// Weight used to pick a mutator bound to `id`. Elements tied to others by a size relation are
/// mutated by several strategies at once, so their weight is flattened.
pub fn selection_weight(model: &DataModel, id: ElementId, weight: usize) -> u64 {
    if model.has_relation(id) {
        ((weight as f64).sqrt().round() as u64).max(1)
    } else {
        weight as u64
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[0-9]+\s*$").expect("invalid hint regex"))
}

/// Parses an unsigned hint value.
pub fn parse_hint_number(key: &str, value: &str) -> Result<usize> {
    if number_re().is_match(value) {
        if let Ok(n) = value.trim().parse::<usize>() {
            return Ok(n);
        }
    }
    Err(Error::Config(ConfigError::InvalidHintNumber(
        key.to_string(),
        value.to_string(),
    )))
}

/// Reads the first `<name>-N` hint found for the given names, or returns `default`.
pub fn hint_n(model: &DataModel, id: ElementId, names: &[&str], default: usize) -> Result<usize> {
    for name in names {
        let key = format!("{}-N", name);
        if let Some(value) = model.hint(id, &key) {
            return parse_hint_number(&key, value);
        }
    }
    Ok(default)
}

/// Reads a boolean hint.
pub fn hint_bool(model: &DataModel, id: ElementId, key: &str) -> Result<Option<bool>> {
    match model.hint(id, key) {
        None => Ok(None),
        Some(v) if v.trim().eq_ignore_ascii_case("true") => Ok(Some(true)),
        Some(v) if v.trim().eq_ignore_ascii_case("false") => Ok(Some(false)),
        Some(v) => Err(Error::Config(ConfigError::InvalidHintBool(
            key.to_string(),
            v.to_string(),
        ))),
    }
}

/// Returns `false` if the element opted out of mutations bypassing its type encoding.
pub fn type_transform_hint(model: &DataModel, id: ElementId) -> Result<bool> {
    Ok(hint_bool(model, id, TYPE_TRANSFORM_HINT)?.unwrap_or(true))
}

/// Builds the result of a mutation applied to `id`.
pub fn applied(
    name: &str,
    model: &DataModel,
    id: ElementId,
    flags: MutationFlags,
) -> Result<MutationResult> {
    let value = model.value(id)?;
    if log_enabled!(Level::Trace) {
        trace!("{} mutated '{}':\n{}", name, model.full_name(id), value);
    }
    Ok(MutationResult::Mutated { value, flags })
}

/// Builds the result of a mutation that could not be applied.
pub fn skipped(name: &str, model: &DataModel, id: ElementId, reason: &str) -> MutationResult {
    debug!("{} skipped '{}': {}", name, model.full_name(id), reason);
    MutationResult::Skipped
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, SizeRelation};

    #[test]
    fn mutator_hints() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let a = dm
            .add(
                root,
                Element::blob("A", b"a")
                    .hint("BlobMutator-N", " 12 ")
                    .hint(TYPE_TRANSFORM_HINT, "False"),
            )
            .unwrap();
        let b = dm
            .add(
                root,
                Element::blob("B", b"b")
                    .hint("Custom-N", "-1")
                    .hint(TYPE_TRANSFORM_HINT, "nope"),
            )
            .unwrap();
        assert_eq!(hint_n(&dm, a, &["Custom", "BlobMutator"], 50).unwrap(), 12);
        assert_eq!(hint_n(&dm, a, &["Custom"], 50).unwrap(), 50);
        assert!(matches!(
            hint_n(&dm, b, &["Custom"], 50),
            Err(Error::Config(ConfigError::InvalidHintNumber(..)))
        ));
        assert!(!type_transform_hint(&dm, a).unwrap());
        assert!(type_transform_hint(&dm, root).unwrap());
        assert!(matches!(
            type_transform_hint(&dm, b),
            Err(Error::Config(ConfigError::InvalidHintBool(..)))
        ));
    }

    #[test]
    fn mutator_selection_weight() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let data = dm.add(root, Element::blob("Data", b"abc")).unwrap();
        let other = dm.add(root, Element::blob("Other", b"abc")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
        assert_eq!(selection_weight(&dm, len, 100), 10);
        assert_eq!(selection_weight(&dm, data, 16), 4);
        assert_eq!(selection_weight(&dm, other, 16), 16);
        assert_eq!(selection_weight(&dm, data, 0), 1);
    }

    #[test]
    fn mutator_target_kind() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let mut sm = StateModel::new("SM");
        assert!(Target::Element(&mut dm, root).element("Test").is_ok());
        assert_eq!(
            Target::StateModel(&mut sm).element("Test").err(),
            Some(Error::Mutator(MutatorError::WrongTarget("Test")))
        );
        assert!(Target::Element(&mut dm, root).state_model("Test").is_err());
    }
}
