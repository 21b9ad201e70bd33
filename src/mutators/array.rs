//! Mutators changing the number and order of an array's elements.

use crate::edgecases::IntegerEdgeCases;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags};
use crate::mutator::*;
use crate::mutators::{ensure_supported, is_mutable};
use crate::sized::max_duplication;
use crate::utils::Random;
use crate::variance::VarianceGenerator;

/// Seed from which sequential shuffles are derived.
const SHUFFLE_SEED: u64 = 0x5eed_0a77_a750_47ed;

/// Upper bound of the number of orderings tried by [`ArrayRandomizeOrder`].
const MAX_ORDERINGS: usize = 100;

fn is_array(model: &DataModel, id: ElementId) -> bool {
    is_mutable(model, id)
        && matches!(
            model.get(id).map(|e| &e.kind),
            Some(ElementKind::Array { .. })
        )
}

/// Element replicated when an array grows: its last element or its template.
fn representative(model: &DataModel, array: ElementId) -> Option<ElementId> {
    match model.get(array).map(|e| &e.kind) {
        Some(ElementKind::Array { template, .. }) => model
            .children(array)
            .ok()
            .and_then(|c| c.last().copied())
            .or(*template),
        _ => None,
    }
}

/// Resizes `array` to hold `count` elements. Shrinking drops trailing elements, growing
/// replicates the representative's value.
fn resize(model: &mut DataModel, array: ElementId, count: usize) -> Result<()> {
    let children = model.children(array)?.len();
    let value = match representative(model, array) {
        Some(r) => model.value(r)?,
        None => return Ok(()),
    };
    model.begin_update();
    if count <= children {
        model.truncate_children(array, count)?;
        model.clear_count_override(array)?;
    } else {
        model.set_count_override(array, count, value)?;
    }
    model.end_update();
    Ok(())
}

/// Largest count the array can be resized to.
fn max_count(model: &DataModel, array: ElementId) -> Result<i128> {
    let current = model.array_count(array)? as i128;
    let dup = match representative(model, array) {
        Some(r) => max_duplication(model, r)? as i128,
        None => 0,
    };
    Ok(dup.max(current))
}

// -----------------------------------------------------------------------------------------------
// ArrayRandomizeOrder

/// Shuffles the elements of an array.
pub struct ArrayRandomizeOrder {
    count: usize,
    mutation: usize,
}

impl ArrayRandomizeOrder {
    pub const NAME: &'static str = "ArrayRandomizeOrder";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_array(model, id) && model.children(id).map(|c| c.len() > 1).unwrap_or(false)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = model.children(id)?.len();
        // n! saturating at the maximum number of orderings.
        let mut count = 1usize;
        for i in 2..=n {
            count = count.saturating_mul(i);
            if count >= MAX_ORDERINGS {
                count = MAX_ORDERINGS;
                break;
            }
        }
        Ok(Self { count, mutation: 0 })
    }

    fn perform(model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let mut order = (0..model.children(id)?.len()).collect::<Vec<_>>();
        rand.shuffle(&mut order);
        model.reorder_children(id, &order)?;
        model.add_flags(id, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

impl Mutator for ArrayRandomizeOrder {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let mut rand = Random::for_iteration(SHUFFLE_SEED, self.mutation as u64);
        Self::perform(model, id, &mut rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// ArrayReverseOrder

/// Reverses the elements of an array.
pub struct ArrayReverseOrder {
    count: usize,
    mutation: usize,
}

impl ArrayReverseOrder {
    pub const NAME: &'static str = "ArrayReverseOrder";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        ArrayRandomizeOrder::supported(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: 1,
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId) -> Result<MutationResult> {
        let order = (0..model.children(id)?.len()).rev().collect::<Vec<_>>();
        model.reorder_children(id, &order)?;
        model.add_flags(id, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

impl Mutator for ArrayReverseOrder {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id)
    }

    fn random_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id)
    }
}

// -----------------------------------------------------------------------------------------------
// ArrayEdgeCase

/// Resizes an array to counts close to the integer boundaries falling in
/// `[0; max count]`.
pub struct ArrayEdgeCase {
    count: usize,
    mutation: usize,
    cases: IntegerEdgeCases,
}

impl ArrayEdgeCase {
    pub const NAME: &'static str = "ArrayEdgeCase";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_array(model, id) && representative(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let cases = IntegerEdgeCases::new(0, max_count(model, id)?, n);
        Ok(Self {
            count: cases.count(),
            mutation: 0,
            cases,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, count: i128) -> Result<MutationResult> {
        resize(model, id, count as usize)?;
        model.add_flags(id, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

impl Mutator for ArrayEdgeCase {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let count = self.cases.sequential(self.mutation).ok_or(Error::Mutator(
            MutatorError::IndexOutOfRange(Self::NAME, self.mutation, self.count),
        ))?;
        Self::perform(model, id, count)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let count = self.cases.random(rand);
        Self::perform(model, id, count)
    }
}

// -----------------------------------------------------------------------------------------------
// ArrayVariance

/// Resizes an array to counts close to its current one.
pub struct ArrayVariance {
    count: usize,
    mutation: usize,
    variance: VarianceGenerator,
}

impl ArrayVariance {
    pub const NAME: &'static str = "ArrayVariance";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        ArrayEdgeCase::supported(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let current = model.array_count(id)? as i128;
        let variance = VarianceGenerator::new(current, 0, max_count(model, id)?, n, false);
        Ok(Self {
            count: variance.count(),
            mutation: 0,
            variance,
        })
    }
}

impl Mutator for ArrayVariance {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let count = self.variance.sequential(self.mutation).ok_or(Error::Mutator(
            MutatorError::IndexOutOfRange(Self::NAME, self.mutation, self.count),
        ))?;
        ArrayEdgeCase::perform(model, id, count)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        match self.variance.random(rand) {
            Some(count) => ArrayEdgeCase::perform(model, id, count),
            None => Ok(skipped(Self::NAME, model, id, "no count left to try")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests
