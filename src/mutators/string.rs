//! Mutators rewriting the characters of string elements.

use crate::edgecases::IntegerEdgeCases;
use crate::error::*;
use crate::model::{DataModel, ElementId, MutationFlags, StringEncoding, Variant};
use crate::mutator::*;
use crate::mutators::{ensure_supported, string_encoding, widest_char};
use crate::sized::{expand_string_to, fits, max_size};
use crate::utils::Random;
use crate::variance::VarianceGenerator;

/// Strings known to upset parsers: format specifiers, path traversals, markup, shell
/// metacharacters, numeric corner cases and special code points.
pub const STRING_STATIC: &[&str] = &[
    "",
    " ",
    "\0",
    "\r\n",
    "\n",
    "\t",
    "%s",
    "%n",
    "%d",
    "%x%x%x%x",
    "%s%s%s%s%s%s%s%s",
    "%n%n%n%n%n%n%n%n",
    "%99999999999s",
    "%.1024d",
    "%@",
    "{0}",
    "{{",
    "${HOME}",
    "$(id)",
    "`id`",
    ";id",
    "|id",
    "&&",
    "../",
    "../../../../../../../../etc/passwd",
    "..\\..\\..\\..\\..\\..\\windows\\win.ini",
    "/",
    "\\",
    "//",
    "C:\\",
    "\\\\?\\C:\\",
    "file:///etc/passwd",
    "http://127.0.0.1/",
    "<script>alert(1)</script>",
    "<!--",
    "]]>",
    "<![CDATA[",
    "&#0;",
    "&amp;",
    "%00",
    "%0d%0a",
    "%25",
    "%u0000",
    "true",
    "false",
    "null",
    "NULL",
    "nil",
    "undefined",
    "NaN",
    "Infinity",
    "-Infinity",
    "0",
    "-0",
    "-1",
    "1e308",
    "1e-324",
    "0x7fffffff",
    "2147483648",
    "-2147483649",
    "4294967296",
    "18446744073709551616",
    "\u{7f}",
    "\u{ff}",
    "\u{feff}",
    "\u{fffd}",
    "\u{fffe}",
    "\u{ffff}",
    "\u{202e}",
    "\u{200b}",
    "\u{10ffff}",
];

/// Injection tokens for SQL backed targets.
pub const SQL_INJECTIONS: &[&str] = &[
    "'",
    "\"",
    "' OR 1=1",
    "\" OR 1=1",
    "' OR '1'='1",
    "'--",
    "\"--",
    "' AND 1=1--",
    "' AND 1=2--",
    "'; DROP TABLE users--",
    "' UNION SELECT NULL--",
    "'; WAITFOR DELAY '0:0:59'--",
    "' AND IF(1=1, SLEEP(59), 0)--",
    "' AND (SELECT 1 FROM pg_sleep(59))--",
    "' AND (SELECT 1/0 WHERE 1=1)--",
];

fn out_of_range(name: &'static str, idx: usize, count: usize) -> Error {
    Error::Mutator(MutatorError::IndexOutOfRange(name, idx, count))
}

/// Sets a string to `value`, unless the output would grow past its maximum size.
fn set_string(name: &str, model: &mut DataModel, id: ElementId, value: String) -> Result<MutationResult> {
    let encoding = string_encoding(model, id).unwrap_or(StringEncoding::Utf8);
    if !fits(model, id, encoding.encode(&value).len() as u64 * 8)? {
        return Ok(skipped(name, model, id, "output would exceed its maximum size"));
    }
    model.set_mutated_value(id, Variant::String(value), MutationFlags::DEFAULT)?;
    applied(name, model, id, MutationFlags::DEFAULT)
}

/// Largest number of characters a string can hold, given the encoded size of its widest
/// character.
fn max_chars(model: &DataModel, id: ElementId, char_size: u64) -> Result<i128> {
    Ok((max_size(model, id)? / char_size.max(1)) as i128)
}

// -----------------------------------------------------------------------------------------------
// Case mutators

/// Which case change a [`StringCase`] mutator applies.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CaseStrategy {
    Lower,
    Upper,
    Random,
}

impl CaseStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CaseStrategy::Lower => "StringCaseLower",
            CaseStrategy::Upper => "StringCaseUpper",
            CaseStrategy::Random => "StringCaseRandom",
        }
    }
}

/// Changes the case of a string: entirely to lower or upper case, or for up to six random
/// characters.
pub struct StringCase {
    strategy: CaseStrategy,
    count: usize,
    mutation: usize,
}

impl StringCase {
    pub fn supported(strategy: CaseStrategy, model: &DataModel, id: ElementId) -> bool {
        if string_encoding(model, id).is_none() {
            return false;
        }
        let Ok(value) = model.string_value(id) else {
            return false;
        };
        match strategy {
            CaseStrategy::Lower => value.to_lowercase() != value,
            CaseStrategy::Upper => value.to_uppercase() != value,
            CaseStrategy::Random => value.chars().any(|c| c.is_lowercase() || c.is_uppercase()),
        }
    }

    pub fn new(strategy: CaseStrategy, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(
            Self::supported(strategy, model, id),
            strategy.name(),
            model,
            id,
        )?;
        let count = match strategy {
            CaseStrategy::Random => model.string_value(id)?.chars().count(),
            _ => 1,
        };
        Ok(Self {
            strategy,
            count,
            mutation: 0,
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let value = model.string_value(id)?;
        let out = match self.strategy {
            CaseStrategy::Lower => value.to_lowercase(),
            CaseStrategy::Upper => value.to_uppercase(),
            CaseStrategy::Random => {
                let chars = value.chars().collect::<Vec<_>>();
                let k = rand.pick_six();
                let picked = rand.permutation(chars.len(), k);
                let mut out = String::with_capacity(value.len());
                for (i, c) in chars.iter().enumerate() {
                    if !picked.contains(&(i + 1)) {
                        out.push(*c);
                    } else if c.is_uppercase() {
                        out.extend(c.to_lowercase());
                    } else {
                        out.extend(c.to_uppercase());
                    }
                }
                out
            }
        };
        set_string(self.strategy.name(), model, id, out)
    }
}

impl Mutator for StringCase {
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
        self.perform(model, id, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(self.strategy.name())?;
        self.perform(model, id, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// Length mutators

/// Grows or shrinks a string to lengths around the integer boundaries.
pub struct StringLengthEdgeCase {
    count: usize,
    mutation: usize,
    cases: IntegerEdgeCases,
}

impl StringLengthEdgeCase {
    pub const NAME: &'static str = "StringLengthEdgeCase";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        string_encoding(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        let encoding = string_encoding(model, id);
        ensure_supported(encoding.is_some(), Self::NAME, model, id)?;
        let encoding = encoding.unwrap_or(StringEncoding::Utf8);
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let value = model.string_value(id)?;
        let max = max_chars(model, id, widest_char(encoding, &value))?;
        let cases = IntegerEdgeCases::new(0, max, n);
        Ok(Self {
            count: cases.count(),
            mutation: 0,
            cases,
        })
    }
}

impl Mutator for StringLengthEdgeCase {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let len = self
            .cases
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        expand_string_to(model, id, len as usize)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let len = self.cases.random(rand);
        expand_string_to(model, id, len as usize)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

/// Grows or shrinks a string to lengths around its current one.
pub struct StringLengthVariance {
    count: usize,
    mutation: usize,
    variance: VarianceGenerator,
}

impl StringLengthVariance {
    pub const NAME: &'static str = "StringLengthVariance";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        string_encoding(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        let encoding = string_encoding(model, id);
        ensure_supported(encoding.is_some(), Self::NAME, model, id)?;
        let encoding = encoding.unwrap_or(StringEncoding::Utf8);
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        let value = model.string_value(id)?;
        let max = max_chars(model, id, widest_char(encoding, &value))?;
        let current = value.chars().count() as i128;
        let variance = VarianceGenerator::new(current, 0, max.max(current), n, false);
        Ok(Self {
            count: variance.count(),
            mutation: 0,
            variance,
        })
    }
}

impl Mutator for StringLengthVariance {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let len = self
            .variance
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(Self::NAME, self.mutation, self.count))?;
        expand_string_to(model, id, len as usize)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let Some(len) = self.variance.random(rand) else {
            return Ok(skipped(Self::NAME, model, id, "no length left to try"));
        };
        expand_string_to(model, id, len as usize)?;
        applied(Self::NAME, model, id, MutationFlags::DEFAULT)
    }
}

// -----------------------------------------------------------------------------------------------
// Table mutators

/// Which table a [`StringTable`] mutator draws from.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TableStrategy {
    /// [`STRING_STATIC`].
    Static,
    /// [`SQL_INJECTIONS`].
    SqlInjection,
}

impl TableStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            TableStrategy::Static => "StringStatic",
            TableStrategy::SqlInjection => "StringSqlInjection",
        }
    }

    pub fn table(&self) -> &'static [&'static str] {
        match self {
            TableStrategy::Static => STRING_STATIC,
            TableStrategy::SqlInjection => SQL_INJECTIONS,
        }
    }
}

/// Replaces a string with the entries of a fixed table.
pub struct StringTable {
    strategy: TableStrategy,
    count: usize,
    mutation: usize,
}

impl StringTable {
    pub fn supported(_strategy: TableStrategy, model: &DataModel, id: ElementId) -> bool {
        string_encoding(model, id).is_some()
    }

    pub fn new(strategy: TableStrategy, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(
            Self::supported(strategy, model, id),
            strategy.name(),
            model,
            id,
        )?;
        Ok(Self {
            strategy,
            count: strategy.table().len(),
            mutation: 0,
        })
    }
}

impl Mutator for StringTable {
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

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let name = self.strategy.name();
        let (model, id) = target.element(name)?;
        let value = self
            .strategy
            .table()
            .get(self.mutation)
            .ok_or_else(|| out_of_range(name, self.mutation, self.count))?;
        set_string(name, model, id, value.to_string())
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let name = self.strategy.name();
        let (model, id) = target.element(name)?;
        let value = rand.choose(self.strategy.table()).copied().unwrap_or_default();
        set_string(name, model, id, value.to_string())
    }
}

// -----------------------------------------------------------------------------------------------
// Unicode planes

/// A group of Unicode planes a [`StringUnicodePlane`] mutator draws characters from.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UnicodePlane {
    /// Basic Multilingual Plane.
    Plane0,
    /// Supplementary Multilingual Plane.
    Plane1,
    /// Supplementary Ideographic Plane.
    Plane2,
    /// Supplementary Special-purpose Plane.
    Plane14,
    /// Supplementary Private Use Areas.
    Plane15And16,
}

impl UnicodePlane {
    pub const ALL: [UnicodePlane; 5] = [
        UnicodePlane::Plane0,
        UnicodePlane::Plane1,
        UnicodePlane::Plane2,
        UnicodePlane::Plane14,
        UnicodePlane::Plane15And16,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UnicodePlane::Plane0 => "StringUnicodePlane0",
            UnicodePlane::Plane1 => "StringUnicodePlane1",
            UnicodePlane::Plane2 => "StringUnicodePlane2",
            UnicodePlane::Plane14 => "StringUnicodePlane14",
            UnicodePlane::Plane15And16 => "StringUnicodePlane15And16",
        }
    }

    /// Inclusive range of code points.
    pub fn range(&self) -> (u32, u32) {
        match self {
            UnicodePlane::Plane0 => (0x0000, 0xffff),
            UnicodePlane::Plane1 => (0x10000, 0x1ffff),
            UnicodePlane::Plane2 => (0x20000, 0x2ffff),
            UnicodePlane::Plane14 => (0xe0000, 0xeffff),
            UnicodePlane::Plane15And16 => (0xf0000, 0x10ffff),
        }
    }

    /// Draws a character of the plane. Surrogates are not characters and are redrawn.
    fn random_char(&self, rand: &mut Random) -> char {
        let (lo, hi) = self.range();
        loop {
            let cp = rand.i128_inclusive(lo as i128, hi as i128) as u32;
            if let Some(c) = char::from_u32(cp) {
                return c;
            }
        }
    }
}

/// Replaces a string with random characters of a Unicode plane, with a length close to the
/// current one.
pub struct StringUnicodePlane {
    plane: UnicodePlane,
    count: usize,
    mutation: usize,
    lengths: VarianceGenerator,
}

impl StringUnicodePlane {
    /// Encoded size of the widest character of any plane.
    const CHAR_SIZE: u64 = 4;

    pub fn supported(_plane: UnicodePlane, model: &DataModel, id: ElementId) -> bool {
        string_encoding(model, id)
            .map(|e| e.is_unicode())
            .unwrap_or(false)
    }

    pub fn new(plane: UnicodePlane, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(plane, model, id), plane.name(), model, id)?;
        let n = hint_n(model, id, &[plane.name()], 50)?;
        let current = model.string_value(id)?.chars().count() as i128;
        let max = max_chars(model, id, Self::CHAR_SIZE)?.max(1);
        let lengths = VarianceGenerator::new(current, 1, max, n, true);
        Ok(Self {
            plane,
            count: lengths.count(),
            mutation: 0,
            lengths,
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, len: i128, rand: &mut Random) -> Result<MutationResult> {
        let value = (0..len.max(0))
            .map(|_| self.plane.random_char(rand))
            .collect::<String>();
        set_string(self.plane.name(), model, id, value)
    }
}

impl Mutator for StringUnicodePlane {
    fn name(&self) -> &'static str {
        self.plane.name()
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
        let name = self.plane.name();
        let (model, id) = target.element(name)?;
        let len = self
            .lengths
            .sequential(self.mutation)
            .ok_or_else(|| out_of_range(name, self.mutation, self.count))?;
        self.perform(model, id, len, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let name = self.plane.name();
        let (model, id) = target.element(name)?;
        match self.lengths.random(rand) {
            Some(len) => self.perform(model, id, len, rand),
            None => Ok(skipped(name, model, id, "no length left to try")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Element;

    fn string(encoding: StringEncoding, value: &str, max: Option<u64>) -> (DataModel, ElementId) {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(max);
        let root = dm.root();
        let id = dm.add(root, Element::string("Str", encoding, value)).unwrap();
        (dm, id)
    }

    #[test]
    fn string_case() {
        let (dm, id) = string(StringEncoding::Ascii, "Hello World", None);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut m = StringCase::new(CaseStrategy::Lower, &dm, id).unwrap();
        let mut lower = dm.clone();
        m.sequential_mutation(Target::Element(&mut lower, id), &mut rand)
            .unwrap();
        assert_eq!(lower.string_value(id).unwrap(), "hello world");
        let mut m = StringCase::new(CaseStrategy::Upper, &dm, id).unwrap();
        let mut upper = dm.clone();
        m.sequential_mutation(Target::Element(&mut upper, id), &mut rand)
            .unwrap();
        assert_eq!(upper.string_value(id).unwrap(), "HELLO WORLD");
        assert!(!StringCase::supported(CaseStrategy::Lower, &lower, id));

        let mut m = StringCase::new(CaseStrategy::Random, &dm, id).unwrap();
        assert_eq!(m.count(), 11);
        for _ in 0..100 {
            let mut dm = dm.clone();
            m.random_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let v = dm.string_value(id).unwrap();
            assert_eq!(v.to_lowercase(), "hello world");
        }
        let (dm, id) = string(StringEncoding::Ascii, "100", None);
        assert!(!StringCase::supported(CaseStrategy::Random, &dm, id));
    }

    #[test]
    fn string_length_variance_counts() {
        let (dm, id) = string(StringEncoding::Ascii, "Hello", None);
        assert_eq!(StringLengthVariance::new(&dm, id).unwrap().count(), 55);
        let (dm, id) = string(StringEncoding::Ascii, "", None);
        assert_eq!(StringLengthVariance::new(&dm, id).unwrap().count(), 50);
        let (dm, id) = string(StringEncoding::Ascii, &"A".repeat(300), None);
        assert_eq!(StringLengthVariance::new(&dm, id).unwrap().count(), 100);
        let (dm, id) = string(StringEncoding::Ascii, "Hello World", Some(50));
        assert_eq!(StringLengthVariance::new(&dm, id).unwrap().count(), 50);
    }

    #[test]
    fn string_length_respects_bound() {
        let mut dm = DataModel::new("Root");
        dm.set_max_output_size(Some(5));
        let root = dm.root();
        let a = dm
            .add(root, Element::string("A", StringEncoding::Ascii, "Hello!"))
            .unwrap();
        dm.add(root, Element::string("B", StringEncoding::Ascii, "World!"))
            .unwrap();
        let mut m = StringLengthVariance::new(&dm, a).unwrap();
        // The model is already over its bound, the string can only shrink.
        assert_eq!(m.count(), 6);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            m.sequential_mutation(Target::Element(&mut dm, a), &mut rand)
                .unwrap();
            assert!(dm.string_value(a).unwrap().len() < 6);
        }
    }

    #[test]
    fn string_tables() {
        let (dm, id) = string(StringEncoding::Utf8, "abc", None);
        let mut m = StringTable::new(TableStrategy::SqlInjection, &dm, id).unwrap();
        assert_eq!(m.count(), SQL_INJECTIONS.len());
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut dm2 = dm.clone();
        m.set_mutation(2);
        let r = m
            .sequential_mutation(Target::Element(&mut dm2, id), &mut rand)
            .unwrap();
        assert_eq!(r.value().unwrap().as_bytes(), b"' OR 1=1");
        let m = StringTable::new(TableStrategy::Static, &dm, id).unwrap();
        assert_eq!(m.count(), STRING_STATIC.len());
        assert_eq!(m.name(), "StringStatic");
    }

    #[test]
    fn string_unicode_planes() {
        let (dm, id) = string(StringEncoding::Utf16Le, "Hello", None);
        let (ascii, ascii_id) = string(StringEncoding::Ascii, "Hello", None);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for plane in UnicodePlane::ALL {
            assert!(!StringUnicodePlane::supported(plane, &ascii, ascii_id));
            let mut m = StringUnicodePlane::new(plane, &dm, id).unwrap();
            // The current length, four shorter ones and 50 longer ones.
            assert_eq!(m.count(), 55);
            let (lo, hi) = plane.range();
            for _ in 0..20 {
                let mut dm = dm.clone();
                let r = m
                    .random_mutation(Target::Element(&mut dm, id), &mut rand)
                    .unwrap();
                assert!(!r.is_skipped());
                let v = dm.string_value(id).unwrap();
                assert!(!v.is_empty());
                assert!(v.chars().all(|c| (lo..=hi).contains(&(c as u32))));
            }
        }
    }
}
