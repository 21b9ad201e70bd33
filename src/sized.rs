//! Size computations keeping mutated models within their output bounds.
//!
//! Every mutator growing an element asks these helpers how far it can go. Two bounds apply:
//!
//!  * the maximum output size configured on the [`DataModel`], minus what the rest of the model
//!    already uses;
//!  * the largest length each in-scope size indicator can represent, for the element itself and
//!    for every ancestor whose length grows with it.
//!
//! Expansions are additionally capped at [`MAX_EXPANSION`] bytes to keep memory usage sane.

use log::debug;

use crate::bits::BitStream;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags, Variant};

/// Upper bound, in bytes, of any expansion.
pub const MAX_EXPANSION: u64 = u16::MAX as u64;

/// Largest length in bits that the size indicators of `ancestor` allow `ancestor` to reach.
fn relation_cap_bits(model: &DataModel, ancestor: ElementId) -> Result<Option<u64>> {
    let mut cap: Option<u64> = None;
    for indicator in model.relations_of(ancestor) {
        let Some(rel) = model.element(indicator)?.relation else {
            continue;
        };
        let (_, max) = model.numeric_range(indicator)?;
        let bits = rel.to_bits(max.min(u64::MAX as i128) as u64);
        cap = Some(cap.map_or(bits, |c| c.min(bits)));
    }
    Ok(cap)
}

/// How many output bits each bit of `id` turns into once its ancestors' transformers are
/// applied.
fn transform_factor(model: &DataModel, id: ElementId) -> u64 {
    let mut factor = 1;
    let mut cur = id;
    while let Some(p) = model.parent(cur) {
        if let Some(ElementKind::Block {
            transformer: Some(t),
        }) = model.get(p).map(|e| &e.kind)
        {
            factor *= t.growth_factor();
        }
        cur = p;
    }
    factor
}

/// Returns `id` and its attached ancestors.
fn self_and_ancestors(model: &DataModel, id: ElementId) -> Vec<ElementId> {
    let mut out = vec![id];
    let mut cur = id;
    while let Some(p) = model.parent(cur) {
        out.push(p);
        cur = p;
    }
    out
}

/// Returns the maximum length in bytes that `id` can be given without exceeding the model's
/// maximum output size or the range of a size indicator depending on it.
///
/// When the element alone is already larger than the remaining budget, its current size is
/// returned so that mutations keeping the size unchanged remain possible.
pub fn max_size(model: &DataModel, id: ElementId) -> Result<u64> {
    let size = model.length_bits(id)?;
    let mut limit = match model.max_output_size() {
        None | Some(0) => MAX_EXPANSION,
        Some(max) => {
            let max = max as i128 * 8;
            let used = model.total_bits()? as i128;
            let factor = transform_factor(model, id) as i128;
            let limit = ((max - used) / factor + size as i128).max(size as i128);
            (((limit + 7) / 8) as u64).min(MAX_EXPANSION)
        }
    };
    for a in self_and_ancestors(model, id) {
        if let Some(cap) = relation_cap_bits(model, a)? {
            let others = model.length_bits(a)?.saturating_sub(size);
            limit = limit.min(cap.saturating_sub(others) / 8);
        }
    }
    Ok(limit)
}

/// Returns how many more copies of `id` can be added next to it without exceeding the model's
/// maximum output size or the range of a size indicator depending on an ancestor.
pub fn max_duplication(model: &DataModel, id: ElementId) -> Result<u64> {
    let size = model.length_bits(id)?;
    let mut avail = match model.max_output_size() {
        None | Some(0) => MAX_EXPANSION,
        Some(_) if size == 0 => return Ok(0),
        Some(max) => {
            let max = max.saturating_mul(8);
            let used = model.total_bits()?;
            if max < used {
                return Ok(0);
            }
            ((max - used) / (size * transform_factor(model, id))).min(MAX_EXPANSION)
        }
    };
    if size == 0 {
        return Ok(avail);
    }
    for a in self_and_ancestors(model, id).into_iter().skip(1) {
        if let Some(cap) = relation_cap_bits(model, a)? {
            avail = avail.min(cap.saturating_sub(model.length_bits(a)?) / size);
        }
    }
    Ok(avail)
}

/// Returns `true` if `id` can be given a value of `bits` bits without exceeding
/// [`max_size`].
pub fn fits(model: &DataModel, id: ElementId, bits: u64) -> Result<bool> {
    Ok((bits + 7) / 8 <= max_size(model, id)?)
}

/// Grows or shrinks `value` to exactly `length` characters by repeating it. Empty strings are
/// grown with `A`s.
pub fn expand_string(value: &str, length: usize) -> String {
    let chars = value.chars().count();
    if chars == 0 {
        return "A".repeat(length);
    }
    value.chars().cycle().take(length).collect()
}

/// Sets the value of the string `id` to its current value grown or shrunk to `length`
/// characters.
pub fn expand_string_to(model: &mut DataModel, id: ElementId, length: usize) -> Result<()> {
    let value = model.string_value(id)?;
    model.set_mutated_value(
        id,
        Variant::String(expand_string(&value, length)),
        MutationFlags::DEFAULT,
    )
}

/// Grows or shrinks `data` to exactly `bits` bits by repeating its content. Empty data is
/// grown with zeros.
fn grow_to(data: &BitStream, bits: u64) -> BitStream {
    if data.len_bits() >= bits {
        let mut out = data.clone();
        out.truncate(bits);
        return out;
    }
    let mut out = BitStream::new();
    if data.is_empty() {
        out.push_bytes(&vec![0; (bits / 8) as usize]);
        out.push_bits(0, (bits % 8) as u32);
        return out;
    }
    while out.len_bits() + data.len_bits() <= bits {
        out.extend(data);
    }
    for i in 0..bits - out.len_bits() {
        out.push_bit(data.bit(i));
    }
    out
}

/// Grows or shrinks the element sized by the size indicator `indicator` to `length`, expressed
/// in the relation's unit.
///
/// Arrays are resized by replicating their last element (or their template) through a count
/// override. Any other element gets a raw value made of its current value repeated and
/// truncated.
///
/// When `override_relation` is set, the indicator keeps its current value even though the data
/// it describes changed, producing a declared size inconsistent with the actual one.
///
/// Returns `false` if the indicator has no in-scope relation.
pub fn expand_to(
    model: &mut DataModel,
    indicator: ElementId,
    length: u64,
    override_relation: bool,
) -> Result<bool> {
    let Some(rel) = model.element(indicator)?.relation else {
        debug!("'{}' has no size relation", model.full_name(indicator));
        return Ok(false);
    };
    if !model.is_attached(indicator) || !model.is_attached(rel.of) {
        debug!("size relation of '{}' is out of scope", model.full_name(indicator));
        return Ok(false);
    }
    if override_relation {
        let current = model.number_value(indicator)?;
        let signed = matches!(
            model.element(indicator)?.kind,
            ElementKind::Number { signed: true, .. }
        );
        model.set_mutated_value(
            indicator,
            Variant::from_i128(current, signed),
            MutationFlags::DEFAULT | MutationFlags::RELATIONS,
        )?;
    }
    let target_bits = rel.to_bits(length);
    let of = rel.of;
    let representative = match &model.element(of)?.kind {
        ElementKind::Array { template, .. } => model.children(of)?.last().copied().or(*template),
        _ => None,
    };
    match representative {
        Some(item) => {
            let value = model.value(item)?;
            let per = value.len_bits().max(1);
            let count = (target_bits / per) as usize;
            model.begin_update();
            let kept = model.children(of)?.len().min(count);
            model.truncate_children(of, kept)?;
            model.set_count_override(of, count, value)?;
            model.end_update();
            model.add_flags(of, MutationFlags::DEFAULT)?;
        }
        None => {
            let data = grow_to(&model.value(of)?, target_bits);
            model.set_mutated_raw(
                of,
                data,
                MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM | MutationFlags::TRANSFORMER,
            )?;
        }
    }
    Ok(true)
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, SizeRelation, StringEncoding, Transformer};

    fn strings(max: Option<u64>, values: &[&str]) -> (DataModel, Vec<ElementId>) {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(max);
        let root = dm.root();
        let ids = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                dm.add(root, Element::string(&format!("S{}", i), StringEncoding::Ascii, v))
                    .unwrap()
            })
            .collect();
        (dm, ids)
    }

    #[test]
    fn sized_max_size() {
        let (dm, ids) = strings(None, &["Hello World"]);
        assert_eq!(max_size(&dm, ids[0]).unwrap(), MAX_EXPANSION);
        let (dm, ids) = strings(Some(50), &["Hello World"]);
        assert_eq!(max_size(&dm, ids[0]).unwrap(), 50);
        // The budget is shared with the rest of the model, but never below the element's size.
        let (dm, ids) = strings(Some(5), &["Hello!", "World!"]);
        assert_eq!(max_size(&dm, ids[0]).unwrap(), 6);
        assert_eq!(max_size(&dm, ids[1]).unwrap(), 6);
    }

    #[test]
    fn sized_max_size_relation() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let block = dm.add(root, Element::block("Block")).unwrap();
        dm.add(block, Element::blob("Head", b"1234")).unwrap();
        let data = dm.add(block, Element::blob("Data", b"abc")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(block));
        // The block can hold 255 bytes, 4 of which are used by the head.
        assert_eq!(max_size(&dm, data).unwrap(), 251);
        assert_eq!(max_duplication(&dm, data).unwrap(), (255 - 7) / 3);
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bits(block));
        assert_eq!(max_size(&dm, data).unwrap(), (255 - 32) / 8);
    }

    #[test]
    fn sized_max_duplication() {
        let (dm, ids) = strings(Some(1024), &["Hello World"]);
        assert_eq!(max_duplication(&dm, ids[0]).unwrap(), 92);
        let (dm, ids) = strings(Some(100), &["Hello World"]);
        assert_eq!(max_duplication(&dm, ids[0]).unwrap(), 8);
        let (dm, ids) = strings(Some(5), &["Hello!", "World!"]);
        assert_eq!(max_duplication(&dm, ids[0]).unwrap(), 0);
        let (dm, ids) = strings(Some(5), &[""]);
        assert_eq!(max_duplication(&dm, ids[0]).unwrap(), 0);
        let (dm, ids) = strings(None, &["Hello"]);
        assert_eq!(max_duplication(&dm, ids[0]).unwrap(), MAX_EXPANSION);
    }

    #[test]
    fn sized_transformed_budget() {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(Some(100));
        let root = dm.root();
        let block = dm
            .add(root, Element::block("Hex").transformer(Transformer::Hex))
            .unwrap();
        let data = dm.add(block, Element::blob("Data", b"0123456789")).unwrap();
        // 20 bytes are used, the 80 remaining ones hold 40 bytes of hex encoded data.
        assert_eq!(max_size(&dm, data).unwrap(), 50);
        assert_eq!(max_duplication(&dm, data).unwrap(), 4);
        assert!(fits(&dm, data, 400).unwrap());
        assert!(!fits(&dm, data, 401).unwrap());
    }

    #[test]
    fn sized_expand_string() {
        assert_eq!(expand_string("", 3), "AAA");
        assert_eq!(expand_string("abc", 2), "ab");
        assert_eq!(expand_string("abc", 7), "abcabca");
        assert_eq!(expand_string("abc", 0), "");
    }

    #[test]
    fn sized_expand_to() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let data = dm.add(root, Element::blob("Data", b"abc")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));

        let mut grown = dm.clone();
        assert!(expand_to(&mut grown, len, 7, false).unwrap());
        assert_eq!(grown.serialize().unwrap().as_bytes(), b"\x07abcabca");

        let mut lying = dm.clone();
        assert!(expand_to(&mut lying, len, 7, true).unwrap());
        assert_eq!(lying.serialize().unwrap().as_bytes(), b"\x03abcabca");

        let mut shrunk = dm.clone();
        assert!(expand_to(&mut shrunk, len, 1, false).unwrap());
        assert_eq!(shrunk.serialize().unwrap().as_bytes(), b"\x01a");

        assert!(!expand_to(&mut dm, data, 1, false).unwrap());
    }

    #[test]
    fn sized_expand_array() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        let array = dm.add(root, Element::array("Items")).unwrap();
        dm.add(array, Element::blob("A", b"ab")).unwrap();
        dm.add(array, Element::blob("B", b"cd")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(array));
        assert!(expand_to(&mut dm, len, 8, false).unwrap());
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x08abcdcdcd");
        assert!(expand_to(&mut dm, len, 2, false).unwrap());
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x02ab");
    }
}
