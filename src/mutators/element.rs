//! Structural mutators duplicating, removing, swapping or bit flipping an element.

use crate::bits::BitStream;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags};
use crate::mutator::*;
use crate::mutators::{ensure_supported, is_mutable};
use crate::sized::max_duplication;
use crate::utils::Random;

/// Returns `true` if the element sits in a container whose children can be added, removed or
/// moved around.
fn in_mutable_container(model: &DataModel, id: ElementId) -> bool {
    let Some(parent) = model.parent(id) else {
        return false;
    };
    if !model.is_attached(id) {
        return false;
    }
    let Some(e) = model.get(id) else {
        return false;
    };
    e.mutable
        && !matches!(e.kind, ElementKind::Flag { .. })
        && !matches!(
            model.get(parent).map(|p| &p.kind),
            Some(ElementKind::Choice { .. })
        )
}

/// Returns a name derived from `name` that no child of `parent` uses yet.
fn unique_name(model: &DataModel, parent: ElementId, name: &str, idx: usize) -> String {
    let mut base = name.to_string();
    loop {
        let candidate = format!("{}_{}", base, idx);
        if model.child_named(parent, &candidate).is_none() {
            return candidate;
        }
        base.push('_');
    }
}

// -----------------------------------------------------------------------------------------------
// DataElementDuplicate

/// Inserts copies of an element right after it.
pub struct DataElementDuplicate {
    count: usize,
    mutation: usize,
    /// Maximum number of copies inserted by a random mutation.
    variance: usize,
}

impl DataElementDuplicate {
    pub const NAME: &'static str = "DataElementDuplicate";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        in_mutable_container(model, id) && model.length_bits(id).map(|l| l > 0).unwrap_or(false)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let max_dup = max_duplication(model, id)? as usize;
        let variance = hint_n(model, id, &[Self::NAME], max_dup.min(50))?;
        Ok(Self {
            count: variance,
            mutation: 0,
            variance,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, copies: usize) -> Result<MutationResult> {
        let Some(parent) = model.parent(id) else {
            return Ok(skipped(Self::NAME, model, id, "element has no parent"));
        };
        if copies as u64 > max_duplication(model, id)? {
            return Ok(skipped(Self::NAME, model, id, "output would exceed its maximum size"));
        }
        let idx = model
            .index_in_parent(id)
            .ok_or_else(|| Error::Model(ModelError::NoParent(model.full_name(id))))?;
        let name = model.element(id)?.name.clone();
        model.begin_update();
        for i in 0..copies {
            let copy = model.deep_clone(id)?;
            model.element_mut(copy)?.name = unique_name(model, parent, &name, i);
            model.insert_child(parent, idx + 1 + i, copy)?;
        }
        model.end_update();
        model.add_flags(parent, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, parent, MutationFlags::DEFAULT)
    }
}

impl Mutator for DataElementDuplicate {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id, self.mutation + 1)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let stddev = self.variance as f64 / 3.0;
        let copies = rand.next_gaussian(0.0, stddev).round().abs() as usize + 1;
        Self::perform(model, id, copies)
    }
}

// -----------------------------------------------------------------------------------------------
// DataElementRemove

/// Removes an element from its parent.
pub struct DataElementRemove {
    count: usize,
    mutation: usize,
}

impl DataElementRemove {
    pub const NAME: &'static str = "DataElementRemove";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        in_mutable_container(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: 1,
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId) -> Result<MutationResult> {
        let Some(parent) = model.parent(id) else {
            return Ok(skipped(Self::NAME, model, id, "element has no parent"));
        };
        model.remove(id)?;
        model.add_flags(parent, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, parent, MutationFlags::DEFAULT)
    }
}

impl Mutator for DataElementRemove {
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
// DataElementSwapNear

/// Swaps an element with its next sibling.
pub struct DataElementSwapNear {
    count: usize,
    mutation: usize,
}

impl DataElementSwapNear {
    pub const NAME: &'static str = "DataElementSwapNear";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        in_mutable_container(model, id) && model.next_sibling(id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: 1,
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId) -> Result<MutationResult> {
        let (Some(parent), Some(idx)) = (model.parent(id), model.index_in_parent(id)) else {
            return Ok(skipped(Self::NAME, model, id, "element has no parent"));
        };
        if model.next_sibling(id).is_none() {
            return Ok(skipped(Self::NAME, model, id, "element has no next sibling"));
        }
        model.swap_children(parent, idx, idx + 1)?;
        model.add_flags(parent, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, parent, MutationFlags::DEFAULT)
    }
}

impl Mutator for DataElementSwapNear {
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
// DataElementBitFlipper

/// Flips up to six distinct bits of an element's serialized value.
///
/// Leaves are flipped before their type encoding is bypassed, containers are flipped after
/// their transformer ran. Containers without a transformer are left to the mutators of their
/// children.
pub struct DataElementBitFlipper {
    count: usize,
    mutation: usize,
}

impl DataElementBitFlipper {
    pub const NAME: &'static str = "DataElementBitFlipper";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        let Some(e) = model.get(id) else {
            return false;
        };
        let eligible = match e.kind {
            ElementKind::Block {
                transformer: Some(_),
            } => true,
            ref k => !k.is_container(),
        };
        is_mutable(model, id)
            && eligible
            && type_transform_hint(model, id).unwrap_or(false)
            && model.length_bits(id).map(|l| l > 0).unwrap_or(false)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let bits = model.length_bits(id)?;
        Ok(Self {
            count: bits.min(i32::MAX as u64) as usize,
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let mut data: BitStream = model.value(id)?;
        if data.is_empty() {
            return Ok(skipped(Self::NAME, model, id, "element is empty"));
        }
        let bits = data.len_bits() as usize;
        let flips = rand.pick_six().min(bits);
        for idx in rand.sorted_permutation(bits, flips) {
            data.flip_bit(idx as u64 - 1);
        }
        let mut flags = MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM;
        if model.element(id)?.kind.is_container() {
            flags |= MutationFlags::TRANSFORMER;
        }
        model.set_mutated_raw(id, data, flags)?;
        applied(Self::NAME, model, id, flags)
    }
}

impl Mutator for DataElementBitFlipper {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        Self::perform(model, id, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::model::{Element, SizeRelation, StringEncoding, Transformer};

    fn model(max: Option<u64>) -> (DataModel, ElementId, ElementId) {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(max);
        let root = dm.root();
        let a = dm
            .add(root, Element::string("Str", StringEncoding::Ascii, "Hello World"))
            .unwrap();
        let b = dm.add(root, Element::blob("Blob", b"!")).unwrap();
        (dm, a, b)
    }

    #[test]
    fn element_duplicate_counts() {
        let (dm, a, _) = model(Some(100));
        // (800 - 96) / 88 copies fit.
        assert_eq!(DataElementDuplicate::new(&dm, a).unwrap().count(), 8);
        let (dm, a, _) = model(Some(5));
        assert_eq!(DataElementDuplicate::new(&dm, a).unwrap().count(), 0);
        let (dm, a, _) = model(None);
        assert_eq!(DataElementDuplicate::new(&dm, a).unwrap().count(), 50);
        let (dm, _, _) = model(None);
        assert!(!DataElementDuplicate::supported(&dm, dm.root()));
    }

    #[test]
    fn element_duplicate_unique_names() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let a = dm
            .add(root, Element::string("Str", StringEncoding::Ascii, "x"))
            .unwrap();
        dm.add(root, Element::string("Str_0", StringEncoding::Ascii, "y"))
            .unwrap();
        let mut m = DataElementDuplicate::new(&dm, a).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        m.set_mutation(2);
        m.sequential_mutation(Target::Element(&mut dm, a), &mut rand)
            .unwrap();
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"xxxxy");
        let names = dm
            .children(root)
            .unwrap()
            .iter()
            .map(|c| dm.element(*c).unwrap().name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 5);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 5);
    }

    #[test]
    fn element_duplicate_respects_bounds() {
        let (dm, a, _) = model(Some(100));
        let mut m = DataElementDuplicate::new(&dm, a).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..200 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, a), &mut rand)
                .unwrap();
            if !r.is_skipped() {
                assert!(dm.serialize().unwrap().len_bytes() <= 100);
            }
        }
    }

    #[test]
    fn element_remove_and_swap() {
        let (mut dm, a, b) = model(None);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut swap = DataElementSwapNear::new(&dm, a).unwrap();
        assert!(!DataElementSwapNear::supported(&dm, b));
        let mut swapped = dm.clone();
        let r = swap
            .sequential_mutation(Target::Element(&mut swapped, a), &mut rand)
            .unwrap();
        assert_eq!(r.value().unwrap().as_bytes(), b"!Hello World");

        let mut remove = DataElementRemove::new(&dm, a).unwrap();
        remove
            .sequential_mutation(Target::Element(&mut dm, a), &mut rand)
            .unwrap();
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"!");
    }

    #[test]
    fn element_remove_updates_relations() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let data = dm.add(root, Element::blob("Data", b"abc")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
        let mut m = DataElementRemove::new(&dm, data).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        m.sequential_mutation(Target::Element(&mut dm, data), &mut rand)
            .unwrap();
        // The relation is out of scope, the length falls back to its default value.
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x00");
    }

    #[test]
    fn element_bit_flipper() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let text = "A".repeat(100);
        let s = dm
            .add(root, Element::string("Str", StringEncoding::Ascii, &text))
            .unwrap();
        let mut m = DataElementBitFlipper::new(&dm, s).unwrap();
        assert_eq!(m.count(), 800);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..100 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, s), &mut rand)
                .unwrap();
            let out = r.value().unwrap();
            assert_eq!(out.len_bits(), 800);
            let flipped = out
                .as_bytes()
                .iter()
                .map(|b| (b ^ b'A').count_ones())
                .sum::<u32>();
            assert!((1..=6).contains(&flipped));
        }
    }

    #[test]
    fn element_bit_flipper_flags() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let leaf = dm.add(root, Element::blob("Blob", b"Hello World")).unwrap();
        let hex = dm
            .add(root, Element::block("Hex").transformer(Transformer::Hex))
            .unwrap();
        dm.add(hex, Element::blob("B", b"b")).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let flags_of = |dm: &DataModel, id: ElementId, rand: &mut Random| {
            let mut dm = dm.clone();
            let mut m = DataElementBitFlipper::new(&dm, id).unwrap();
            match m.random_mutation(Target::Element(&mut dm, id), rand).unwrap() {
                MutationResult::Mutated { flags, .. } => flags,
                r => panic!("unexpected result {:?}", r),
            }
        };
        assert_eq!(
            flags_of(&dm, leaf, &mut rand),
            MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM
        );
        assert_eq!(
            flags_of(&dm, hex, &mut rand),
            MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM | MutationFlags::TRANSFORMER
        );
    }

    #[test]
    fn element_bit_flipper_support() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let plain = dm.add(root, Element::block("Plain")).unwrap();
        dm.add(plain, Element::blob("A", b"a")).unwrap();
        let hex = dm
            .add(root, Element::block("Hex").transformer(Transformer::Hex))
            .unwrap();
        dm.add(hex, Element::blob("B", b"b")).unwrap();
        let opt_out = dm
            .add(root, Element::blob("C", b"c").hint(TYPE_TRANSFORM_HINT, "false"))
            .unwrap();
        let empty = dm.add(root, Element::blob("D", b"")).unwrap();
        assert!(!DataElementBitFlipper::supported(&dm, plain));
        assert!(DataElementBitFlipper::supported(&dm, hex));
        assert!(!DataElementBitFlipper::supported(&dm, opt_out));
        assert!(!DataElementBitFlipper::supported(&dm, empty));
        // Transformed containers are flipped after the transformer ran.
        assert_eq!(DataElementBitFlipper::new(&dm, hex).unwrap().count(), 16);
    }
}
