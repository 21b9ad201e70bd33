//! Mutators producing integers, either for number elements or for strings holding numbers.

use std::sync::OnceLock;

use regex::Regex;

use crate::edgecases::IntegerEdgeCases;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags, Variant};
use crate::mutator::*;
use crate::mutators::{ensure_supported, is_mutable, string_encoding};
use crate::sized::fits;
use crate::utils::Random;
use crate::variance::VarianceGenerator;

/// Hint listing, separated by `;`, values worth trying for an element.
pub const EXTRA_VALUES_HINT: &str = "ExtraValues";
/// Alternative name of [`EXTRA_VALUES_HINT`].
pub const VALID_VALUES_HINT: &str = "ValidValues";
/// Hint marking a string as holding a number.
pub const NUMERICAL_STRING_HINT: &str = "NumericalString";

/// Number of draws a uniform random mutator is worth.
const RANDOM_COUNT: usize = 5000;

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?[0-9]+$").expect("invalid numeric regex"))
}

/// Returns `true` for mutable numbers that are not size indicators. Those are left to the
/// mutators of the [`sized`](crate::mutators::sized) module.
fn is_plain_number(model: &DataModel, id: ElementId) -> bool {
    match model.get(id) {
        Some(e) => {
            e.mutable
                && e.relation.is_none()
                && matches!(e.kind, ElementKind::Number { .. })
        }
        None => false,
    }
}

fn is_signed(model: &DataModel, id: ElementId) -> Result<bool> {
    Ok(matches!(
        model.element(id)?.kind,
        ElementKind::Number { signed: true, .. }
    ))
}

fn set_number(name: &str, model: &mut DataModel, id: ElementId, value: i128) -> Result<MutationResult> {
    let signed = is_signed(model, id)?;
    model.set_mutated_value(id, Variant::from_i128(value, signed), MutationFlags::DEFAULT)?;
    applied(name, model, id, MutationFlags::DEFAULT)
}

fn out_of_range(name: &'static str, idx: usize, count: usize) -> Error {
    Error::Mutator(MutatorError::IndexOutOfRange(name, idx, count))
}

// -----------------------------------------------------------------------------------------------
// NumberEdgeCase

/// Sets a number to values close to the integer boundaries of its range.
pub struct NumberEdgeCase {
    count: usize,
    mutation: usize,
    cases: IntegerEdgeCases,
}

impl NumberEdgeCase {
    pub const NAME: &'static str = "NumberEdgeCase";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_plain_number(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let (min, max) = model.numeric_range(id)?;
        let cases = IntegerEdgeCases::new(min, max, n);
        Ok(Self {
            count: cases.count(),
            mutation: 0,
            cases,
        })
    }
}

impl Mutator for NumberEdgeCase {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self
            .cases
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        set_number(Self::NAME, model, id, v)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self.cases.random(rand);
        set_number(Self::NAME, model, id, v)
    }
}

// -----------------------------------------------------------------------------------------------
// NumberVariance

/// Sets a number to values close to its current one.
pub struct NumberVariance {
    count: usize,
    mutation: usize,
    variance: VarianceGenerator,
}

impl NumberVariance {
    pub const NAME: &'static str = "NumberVariance";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_plain_number(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let (min, max) = model.numeric_range(id)?;
        let variance = VarianceGenerator::new(model.number_value(id)?, min, max, n, false);
        Ok(Self {
            count: variance.count(),
            mutation: 0,
            variance,
        })
    }
}

impl Mutator for NumberVariance {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self
            .variance
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        set_number(Self::NAME, model, id, v)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        match self.variance.random(rand) {
            Some(v) => set_number(Self::NAME, model, id, v),
            None => Ok(skipped(Self::NAME, model, id, "no value left to try")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// NumberRandom

/// Sets a number to uniformly random values of its range.
pub struct NumberRandom {
    count: usize,
    mutation: usize,
}

impl NumberRandom {
    pub const NAME: &'static str = "NumberRandom";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_plain_number(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: RANDOM_COUNT,
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let (min, max) = model.numeric_range(id)?;
        let v = rand.i128_inclusive(min, max);
        set_number(Self::NAME, model, id, v)
    }
}

impl Mutator for NumberRandom {
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
// ExtraValues

/// Sets an element to one of the values listed in its `ExtraValues` (or `ValidValues`) hint.
pub struct ExtraValues {
    count: usize,
    mutation: usize,
    values: Vec<Variant>,
}

impl ExtraValues {
    pub const NAME: &'static str = "ExtraValues";

    fn hint(model: &DataModel, id: ElementId) -> Option<(&'static str, &str)> {
        [EXTRA_VALUES_HINT, VALID_VALUES_HINT]
            .into_iter()
            .find_map(|k| model.hint(id, k).map(|v| (k, v)))
            .filter(|(_, v)| !v.trim().is_empty())
    }

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_mutable(model, id)
            && matches!(
                model.get(id).map(|e| &e.kind),
                Some(ElementKind::Number { .. } | ElementKind::String { .. } | ElementKind::Blob)
            )
            && Self::hint(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let Some((key, hint)) = Self::hint(model, id) else {
            return Err(Error::Mutator(MutatorError::Unsupported(
                Self::NAME,
                model.full_name(id),
            )));
        };
        let invalid =
            |v: &str| Error::Config(ConfigError::InvalidHintValue(key.to_string(), v.to_string()));
        let mut values = vec![];
        for v in hint.split(';').filter(|v| !v.is_empty()) {
            let value = match model.element(id)?.kind {
                ElementKind::Number { signed, .. } => {
                    let n = v.trim().parse::<i128>().map_err(|_| invalid(v))?;
                    let (min, max) = model.numeric_range(id)?;
                    if !(min..=max).contains(&n) {
                        return Err(invalid(v));
                    }
                    Variant::from_i128(n, signed)
                }
                ElementKind::Blob => Variant::Bytes(v.as_bytes().to_vec()),
                _ => Variant::String(v.to_string()),
            };
            values.push(value);
        }
        Ok(Self {
            count: values.len(),
            mutation: 0,
            values,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, value: Variant) -> Result<MutationResult> {
        let bits = match &value {
            Variant::String(s) => match model.element(id)?.kind {
                ElementKind::String { encoding } => encoding.encode(s).len() as u64 * 8,
                _ => s.len() as u64 * 8,
            },
            Variant::Bytes(b) => b.len() as u64 * 8,
            _ => model.length_bits(id)?,
        };
        if !fits(model, id, bits)? {
            return Ok(skipped(Self::NAME, model, id, "output would exceed its maximum size"));
        }
        model.set_mutated_value(id, value, MutationFlags::DEFAULT)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

impl Mutator for ExtraValues {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let value = self
            .values
            .get(self.mutation)
            .cloned()
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        Self::perform(model, id, value)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        match rand.choose(&self.values).cloned() {
            Some(value) => Self::perform(model, id, value),
            None => Ok(skipped(Self::NAME, model, id, "no value listed")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// NumericString

/// Returns `true` for mutable strings holding a 32-bit integer, or hinted as doing so.
fn is_numeric_string(model: &DataModel, id: ElementId) -> bool {
    if string_encoding(model, id).is_none() {
        return false;
    }
    if hint_bool(model, id, NUMERICAL_STRING_HINT).ok().flatten() == Some(true) {
        return true;
    }
    model
        .string_value(id)
        .map(|s| numeric_re().is_match(&s))
        .unwrap_or(false)
}

/// Current integer held by a numeric string, clamped to the 32-bit range.
fn numeric_string_value(model: &DataModel, id: ElementId) -> Result<i128> {
    let s = model.string_value(id)?;
    Ok(s.trim()
        .parse::<i128>()
        .unwrap_or(0)
        .clamp(i32::MIN as i128, i32::MAX as i128))
}

fn set_numeric_string(name: &str, model: &mut DataModel, id: ElementId, value: i128) -> Result<MutationResult> {
    let s = value.to_string();
    let bits = match model.element(id)?.kind {
        ElementKind::String { encoding } => encoding.encode(&s).len() as u64 * 8,
        _ => s.len() as u64 * 8,
    };
    if !fits(model, id, bits)? {
        return Ok(skipped(name, model, id, "output would exceed its maximum size"));
    }
    model.set_mutated_value(id, Variant::String(s), MutationFlags::DEFAULT)?;
    applied(name, model, id, MutationFlags::DEFAULT)
}

/// Sets a numeric string to the 32-bit integer edge cases.
pub struct NumericStringEdgeCase {
    count: usize,
    mutation: usize,
    cases: IntegerEdgeCases,
}

impl NumericStringEdgeCase {
    pub const NAME: &'static str = "NumericStringEdgeCase";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_numeric_string(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let cases = IntegerEdgeCases::new(i32::MIN as i128, i32::MAX as i128, n);
        Ok(Self {
            count: cases.count(),
            mutation: 0,
            cases,
        })
    }
}

impl Mutator for NumericStringEdgeCase {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self
            .cases
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        set_numeric_string(Self::NAME, model, id, v)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self.cases.random(rand);
        set_numeric_string(Self::NAME, model, id, v)
    }
}

/// Sets a numeric string to integers close to the one it holds.
pub struct NumericStringVariance {
    count: usize,
    mutation: usize,
    variance: VarianceGenerator,
}

impl NumericStringVariance {
    pub const NAME: &'static str = "NumericStringVariance";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_numeric_string(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let variance = VarianceGenerator::new(
            numeric_string_value(model, id)?,
            i32::MIN as i128,
            i32::MAX as i128,
            n,
            false,
        );
        Ok(Self {
            count: variance.count(),
            mutation: 0,
            variance,
        })
    }
}

impl Mutator for NumericStringVariance {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = self
            .variance
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        set_numeric_string(Self::NAME, model, id, v)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        match self.variance.random(rand) {
            Some(v) => set_numeric_string(Self::NAME, model, id, v),
            None => Ok(skipped(Self::NAME, model, id, "no value left to try")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, SizeRelation, StringEncoding};

    #[test]
    fn number_edge_case_domains() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let byte = dm.add(root, Element::number("Byte", 8, false, 0)).unwrap();
        let int = dm.add(root, Element::number("Int", 32, true, 0)).unwrap();
        let len = dm.add(root, Element::number("Len", 8, false, 0)).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(byte));
        assert_eq!(NumberEdgeCase::new(&dm, byte).unwrap().count(), 256);
        assert!(!NumberEdgeCase::supported(&dm, len));

        let mut m = NumberEdgeCase::new(&dm, int).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut seen = vec![];
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            m.sequential_mutation(Target::Element(&mut dm, int), &mut rand)
                .unwrap();
            seen.push(dm.number_value(int).unwrap());
        }
        assert!(seen.contains(&(i32::MIN as i128)));
        assert!(seen.contains(&(i32::MAX as i128)));
        assert!(seen.contains(&(u16::MAX as i128 + 1)));
        for _ in 0..500 {
            let mut dm = dm.clone();
            m.random_mutation(Target::Element(&mut dm, int), &mut rand)
                .unwrap();
            let v = dm.number_value(int).unwrap();
            assert!((i32::MIN as i128..=i32::MAX as i128).contains(&v));
        }
    }

    #[test]
    fn number_variance_and_random() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let id = dm.add(root, Element::number("Num", 32, false, 1000)).unwrap();
        let mut m = NumberVariance::new(&dm, id).unwrap();
        assert_eq!(m.count(), 100);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..500 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            assert!(!r.is_skipped());
            assert_ne!(dm.number_value(id).unwrap(), 1000);
        }
        let mut m = NumberRandom::new(&dm, id).unwrap();
        assert_eq!(m.count(), 5000);
        let mut dm = dm.clone();
        let r = m
            .random_mutation(Target::Element(&mut dm, id), &mut rand)
            .unwrap();
        assert_eq!(r.value().unwrap().len_bits(), 32);
    }

    #[test]
    fn extra_values() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let id = dm
            .add(
                root,
                Element::number("Num", 32, false, 0).hint(EXTRA_VALUES_HINT, "111;222;333;444"),
            )
            .unwrap();
        let bad = dm
            .add(
                root,
                Element::number("Bad", 8, false, 0).hint(VALID_VALUES_HINT, "1;1000"),
            )
            .unwrap();
        let none = dm
            .add(root, Element::number("None", 8, false, 0).hint(EXTRA_VALUES_HINT, " "))
            .unwrap();
        let mut m = ExtraValues::new(&dm, id).unwrap();
        assert_eq!(m.count(), 4);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut outputs = vec![];
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            let r = m
                .sequential_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            outputs.push(r.value().unwrap().as_bytes().to_vec());
        }
        assert_eq!(
            outputs,
            vec![
                111u32.to_be_bytes().to_vec(),
                222u32.to_be_bytes().to_vec(),
                333u32.to_be_bytes().to_vec(),
                444u32.to_be_bytes().to_vec(),
            ]
        );
        assert!(matches!(
            ExtraValues::new(&dm, bad).err(),
            Some(Error::Config(ConfigError::InvalidHintValue(..)))
        ));
        assert!(!ExtraValues::supported(&dm, none));
    }

    #[test]
    fn numeric_strings() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let num = dm
            .add(root, Element::string("Num", StringEncoding::Ascii, "100"))
            .unwrap();
        let text = dm
            .add(root, Element::string("Text", StringEncoding::Ascii, "abc"))
            .unwrap();
        let hinted = dm
            .add(
                root,
                Element::string("Hinted", StringEncoding::Ascii, "abc")
                    .hint(NUMERICAL_STRING_HINT, "true"),
            )
            .unwrap();
        assert!(NumericStringEdgeCase::supported(&dm, num));
        assert!(!NumericStringEdgeCase::supported(&dm, text));
        assert!(NumericStringVariance::supported(&dm, hinted));

        let mut m = NumericStringVariance::new(&dm, num).unwrap();
        assert_eq!(m.count(), 100);
        m.set_mutation(0);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut dm = dm.clone();
        m.sequential_mutation(Target::Element(&mut dm, num), &mut rand)
            .unwrap();
        assert_eq!(dm.string_value(num).unwrap(), "99");
    }
}
