//! Mutators rewriting or growing the content of blobs.
//!
//! All of them share the same skeleton: a length `k` is chosen, sequentially as
//! `mutation + 1` or randomly following the positive half of a gaussian curve, then either `k`
//! bytes are rewritten in place (`BlobChange*`) or `k` bytes are inserted at a random position
//! (`BlobExpand*`).

use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags, Variant};
use crate::mutator::*;
use crate::mutators::{ensure_supported, is_mutable};
use crate::sized::max_size;
use crate::utils::Random;

/// Byte values the `BlobChangeSpecial` mutator fills regions with.
pub const SPECIAL_BYTES: &[u8] = &[0x00, 0x01, 0xfe, 0xff];

/// Default number of bytes rewritten at most by the in-place mutators.
const DEFAULT_CHANGE_VARIANCE: usize = 100;
/// Default number of bytes inserted at most by the expanding mutators.
const DEFAULT_EXPAND_VARIANCE: usize = 255;

/// How a [`BlobMutator`] rewrites its target.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BlobStrategy {
    /// Zeroes a region.
    ChangeToNull,
    /// Fills a region with random bytes.
    ChangeRandom,
    /// Fills a region with a byte from [`SPECIAL_BYTES`].
    ChangeSpecial,
    /// Inserts bytes counting up from a random value.
    ExpandSingleIncrementing,
    /// Inserts a single random byte repeated.
    ExpandSingleRandom,
    /// Inserts random bytes.
    ExpandAllRandom,
    /// Inserts zeros.
    ExpandZero,
}

impl BlobStrategy {
    pub const ALL: [BlobStrategy; 7] = [
        BlobStrategy::ChangeToNull,
        BlobStrategy::ChangeRandom,
        BlobStrategy::ChangeSpecial,
        BlobStrategy::ExpandSingleIncrementing,
        BlobStrategy::ExpandSingleRandom,
        BlobStrategy::ExpandAllRandom,
        BlobStrategy::ExpandZero,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BlobStrategy::ChangeToNull => "BlobChangeToNull",
            BlobStrategy::ChangeRandom => "BlobChangeRandom",
            BlobStrategy::ChangeSpecial => "BlobChangeSpecial",
            BlobStrategy::ExpandSingleIncrementing => "BlobExpandSingleIncrementing",
            BlobStrategy::ExpandSingleRandom => "BlobExpandSingleRandom",
            BlobStrategy::ExpandAllRandom => "BlobExpandAllRandom",
            BlobStrategy::ExpandZero => "BlobExpandZero",
        }
    }

    /// Returns `true` for strategies rewriting bytes in place.
    pub fn in_place(&self) -> bool {
        matches!(
            self,
            BlobStrategy::ChangeToNull | BlobStrategy::ChangeRandom | BlobStrategy::ChangeSpecial
        )
    }

    /// Produces `len` bytes for the region being rewritten or inserted.
    fn fill(&self, len: usize, rand: &mut Random) -> Vec<u8> {
        match self {
            BlobStrategy::ChangeToNull | BlobStrategy::ExpandZero => vec![0; len],
            BlobStrategy::ChangeRandom | BlobStrategy::ExpandAllRandom => rand.bytes(len),
            BlobStrategy::ChangeSpecial => {
                let b = *rand.choose(SPECIAL_BYTES).unwrap_or(&0);
                vec![b; len]
            }
            BlobStrategy::ExpandSingleIncrementing => {
                let start = rand.u64() as u8;
                (0..len).map(|i| start.wrapping_add(i as u8)).collect()
            }
            BlobStrategy::ExpandSingleRandom => vec![rand.u64() as u8; len],
        }
    }
}

/// A blob mutator following one of the [`BlobStrategy`]s.
pub struct BlobMutator {
    strategy: BlobStrategy,
    count: usize,
    mutation: usize,
    /// Largest region length.
    variance: usize,
}

impl BlobMutator {
    pub fn supported(strategy: BlobStrategy, model: &DataModel, id: ElementId) -> bool {
        let is_blob = is_mutable(model, id)
            && matches!(model.get(id).map(|e| &e.kind), Some(ElementKind::Blob));
        if strategy.in_place() {
            is_blob && model.bytes_value(id).map(|b| !b.is_empty()).unwrap_or(false)
        } else {
            is_blob
        }
    }

    pub fn new(strategy: BlobStrategy, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(
            Self::supported(strategy, model, id),
            strategy.name(),
            model,
            id,
        )?;
        let variance = if strategy.in_place() {
            let len = model.bytes_value(id)?.len();
            hint_n(model, id, &[strategy.name(), "BlobMutator"], DEFAULT_CHANGE_VARIANCE)?.min(len)
        } else {
            hint_n(model, id, &[strategy.name(), "BlobMutator"], DEFAULT_EXPAND_VARIANCE)?
        };
        Ok(Self {
            strategy,
            count: variance,
            mutation: 0,
            variance,
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, len: usize, rand: &mut Random) -> Result<MutationResult> {
        let name = self.strategy.name();
        let mut data = model.bytes_value(id)?;
        if self.strategy.in_place() {
            if len == 0 || len > data.len() {
                return Ok(skipped(name, model, id, "region does not fit in the blob"));
            }
            let start = rand.usize_range(0, data.len() - len + 1);
            let fill = self.strategy.fill(len, rand);
            data[start..start + len].copy_from_slice(&fill);
        } else {
            if (data.len() + len) as u64 > max_size(model, id)? {
                return Ok(skipped(name, model, id, "output would exceed its maximum size"));
            }
            let pos = rand.usize_range(0, data.len() + 1);
            let fill = self.strategy.fill(len, rand);
            data.splice(pos..pos, fill);
        }
        model.set_mutated_value(id, Variant::Bytes(data), MutationFlags::DEFAULT)?;
        applied(name, model, id, MutationFlags::DEFAULT)
    }
}

impl Mutator for BlobMutator {
    fn name(&self) -> &'static str {
        self.strategy.name()
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

    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(self.strategy.name())?;
        self.perform(model, id, self.mutation + 1, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(self.strategy.name())?;
        let stddev = self.variance as f64 / 3.0;
        let len = (rand.next_gaussian(0.0, stddev).round().abs() as usize + 1).min(self.variance.max(1));
        self.perform(model, id, len, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, SizeRelation};

    fn blob(data: &[u8], max: Option<u64>) -> (DataModel, ElementId) {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(max);
        let root = dm.root();
        let id = dm.add(root, Element::blob("Blob", data)).unwrap();
        (dm, id)
    }

    #[test]
    fn blob_counts() {
        let (dm, id) = blob(&[0x41; 10], None);
        let m = BlobMutator::new(BlobStrategy::ChangeToNull, &dm, id).unwrap();
        assert_eq!(m.count(), 10);
        assert_eq!(m.name(), "BlobChangeToNull");
        let (dm, id) = blob(&[0x41; 500], None);
        let m = BlobMutator::new(BlobStrategy::ChangeToNull, &dm, id).unwrap();
        assert_eq!(m.count(), 100);
        for s in BlobStrategy::ALL.iter().filter(|s| !s.in_place()) {
            assert_eq!(BlobMutator::new(*s, &dm, id).unwrap().count(), 255);
        }
        let (dm, id) = blob(b"", None);
        assert!(!BlobMutator::supported(BlobStrategy::ChangeRandom, &dm, id));
        assert!(BlobMutator::supported(BlobStrategy::ExpandZero, &dm, id));
    }

    #[test]
    fn blob_shared_hint() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let id = dm
            .add(root, Element::blob("Blob", b"abc").hint("BlobMutator-N", "10"))
            .unwrap();
        for s in BlobStrategy::ALL.iter().filter(|s| !s.in_place()) {
            assert_eq!(BlobMutator::new(*s, &dm, id).unwrap().count(), 10);
        }
        // In-place strategies are still clamped to the blob length.
        let m = BlobMutator::new(BlobStrategy::ChangeRandom, &dm, id).unwrap();
        assert_eq!(m.count(), 3);
        // The strategy's own hint takes precedence.
        let id = dm
            .add(
                root,
                Element::blob("Other", b"abc")
                    .hint("BlobMutator-N", "10")
                    .hint("BlobExpandZero-N", "4"),
            )
            .unwrap();
        let m = BlobMutator::new(BlobStrategy::ExpandZero, &dm, id).unwrap();
        assert_eq!(m.count(), 4);
    }

    #[test]
    fn blob_change_keeps_length() {
        let (dm, id) = blob(&[0x41; 20], None);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut m = BlobMutator::new(BlobStrategy::ChangeToNull, &dm, id).unwrap();
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            let r = m
                .sequential_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes().to_vec();
            assert_eq!(out.len(), 20);
            assert_eq!(out.iter().filter(|b| **b == 0).count(), i + 1);
        }
        let mut m = BlobMutator::new(BlobStrategy::ChangeSpecial, &dm, id).unwrap();
        for _ in 0..100 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes();
            assert_eq!(out.len(), 20);
            assert!(out
                .iter()
                .all(|b| *b == 0x41 || SPECIAL_BYTES.contains(b)));
        }
    }

    #[test]
    fn blob_expand_lengths() {
        let (dm, id) = blob(b"abc", None);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut m = BlobMutator::new(BlobStrategy::ExpandSingleIncrementing, &dm, id).unwrap();
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            let r = m
                .sequential_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes().to_vec();
            assert_eq!(out.len(), 3 + i + 1);
        }
        let mut dm = dm.clone();
        let mut m = BlobMutator::new(BlobStrategy::ExpandZero, &dm, id).unwrap();
        m.set_mutation(4);
        let r = m
            .sequential_mutation(Target::Element(&mut dm, id), &mut rand)
            .unwrap();
        let out = r.value().unwrap().as_bytes().to_vec();
        assert_eq!(out.iter().filter(|b| **b == 0).count(), 5);
    }

    #[test]
    fn blob_expand_respects_relation() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let data = dm.add(root, Element::blob("Data", &[0x41; 250])).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut m = BlobMutator::new(BlobStrategy::ExpandAllRandom, &dm, data).unwrap();
        let mut applied = 0;
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            let r = m
                .sequential_mutation(Target::Element(&mut dm, data), &mut rand)
                .unwrap();
            if r.is_skipped() {
                continue;
            }
            applied += 1;
            let out = dm.serialize().unwrap();
            assert_eq!(out.as_bytes()[0] as u64, out.len_bytes() - 1);
        }
        assert_eq!(applied, 5);
    }
}
