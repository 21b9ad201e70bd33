//! Mutators producing malformed or unusual Unicode encodings of strings.
//!
//! They all bypass the element's type encoding and emit raw bytes, so they honor the
//! [`TYPE_TRANSFORM_HINT`] opt-out.

use bitfield::bitfield;

use crate::bits::BitStream;
use crate::error::*;
use crate::model::{DataModel, ElementId, MutationFlags, StringEncoding};
use crate::mutator::*;
use crate::mutators::string::STRING_STATIC;
use crate::mutators::{ensure_supported, string_encoding};
use crate::sized::fits;
use crate::utils::Random;

bitfield! {
    /// A byte of an UTF-8 sequence.
    ///
    ///  - **High**: clear for single byte characters
    ///  - **Marker**: `0b10` for continuation bytes
    ///  - **Payload**: code point bits carried by a continuation byte
    ///
    /// # Example
    ///
    /// ```
    /// use structmut::mutators::encoding::Utf8Byte;
    ///
    /// let byte = Utf8Byte::new(0xa9);
    /// assert!(byte.is_continuation());
    /// assert_eq!(byte.get_payload(), 0x29);
    /// ```
    #[derive(Copy, Clone, Eq, Hash, PartialEq)]
    pub struct Utf8Byte(u8);
    impl Debug;
    pub get_high, set_high: 7;
    pub get_marker, set_marker: 7, 6;
    pub get_payload, set_payload: 5, 0;
}

impl Utf8Byte {
    /// Marker of continuation bytes.
    pub const CONTINUATION: u8 = 0b10;

    pub fn new(byte: u8) -> Self {
        Utf8Byte(byte)
    }

    pub fn byte(&self) -> u8 {
        self.0
    }

    /// Builds the continuation byte carrying `payload`.
    pub fn continuation(payload: u8) -> Self {
        let mut byte = Utf8Byte(0);
        byte.set_marker(Self::CONTINUATION);
        byte.set_payload(payload & 0x3f);
        byte
    }

    /// Builds the lead byte of an `n`-byte sequence carrying the high bits of `payload`.
    pub fn lead(n: u32, payload: u32) -> Self {
        let prefix = !(0xffu8 >> n);
        let bits = 7 - n;
        Utf8Byte(prefix | (payload as u8 & ((1u8 << bits) - 1)))
    }

    pub fn is_continuation(&self) -> bool {
        self.get_marker() == Self::CONTINUATION
    }

    /// Number of leading bits identifying the kind of byte. Flipping any of them corrupts the
    /// sequence the byte belongs to.
    pub fn structural_bits(&self) -> u32 {
        if !self.get_high() {
            1
        } else if self.is_continuation() {
            2
        } else {
            (self.0.leading_ones() + 1).min(8)
        }
    }

    /// Flips the `idx`-th structural bit, counting from the most significant one.
    pub fn flip_structural(&mut self, idx: u32) {
        if self.is_continuation() {
            let marker = self.get_marker();
            self.set_marker(marker ^ (0b10 >> idx.min(1)));
        } else {
            self.0 ^= 0x80 >> idx.min(7);
        }
    }
}

/// Number of bytes the shortest UTF-8 encoding of a code point takes.
fn utf8_len(cp: u32) -> u32 {
    match cp {
        0..=0x7f => 1,
        0x80..=0x7ff => 2,
        0x800..=0xffff => 3,
        0x10000..=0x1fffff => 4,
        0x200000..=0x3ffffff => 5,
        _ => 6,
    }
}

/// Encodes a code point over `n` bytes, which is an overlong encoding if `n` is larger than
/// needed.
fn encode_utf8(cp: u32, n: u32, out: &mut Vec<u8>) {
    if n == 1 {
        out.push(cp as u8);
        return;
    }
    out.push(Utf8Byte::lead(n, cp >> (6 * (n - 1))).0);
    for i in (0..n - 1).rev() {
        out.push(Utf8Byte::continuation((cp >> (6 * i)) as u8).0);
    }
}

/// Returns `true` for mutable, non-empty ASCII or UTF-8 strings allowing type transforms.
fn is_utf8_string(model: &DataModel, id: ElementId) -> bool {
    matches!(
        string_encoding(model, id),
        Some(StringEncoding::Ascii | StringEncoding::Utf8)
    ) && type_transform_hint(model, id).unwrap_or(false)
        && model.string_value(id).map(|s| !s.is_empty()).unwrap_or(false)
}

fn set_raw(name: &str, model: &mut DataModel, id: ElementId, data: Vec<u8>) -> Result<MutationResult> {
    if !fits(model, id, data.len() as u64 * 8)? {
        return Ok(skipped(name, model, id, "output would exceed its maximum size"));
    }
    let flags = MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM;
    model.set_mutated_raw(id, BitStream::from(data), flags)?;
    applied(name, model, id, flags)
}

// -----------------------------------------------------------------------------------------------
// StringUtf8ExtraBytes

/// Encodes up to six characters of a string with overlong UTF-8 sequences.
pub struct StringUtf8ExtraBytes {
    count: usize,
    mutation: usize,
}

impl StringUtf8ExtraBytes {
    pub const NAME: &'static str = "StringUtf8ExtraBytes";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_utf8_string(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: model.string_value(id)?.chars().count(),
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let value = model.string_value(id)?;
        let chars = value.chars().collect::<Vec<_>>();
        let k = rand.pick_six();
        let picked = rand.permutation(chars.len(), k);
        let mut out = Vec::with_capacity(value.len() + 6 * picked.len());
        for (i, c) in chars.iter().enumerate() {
            let cp = *c as u32;
            let mut n = utf8_len(cp);
            if picked.contains(&(i + 1)) && n < 6 {
                n = rand.next(n as i64 + 1, 7) as u32;
            }
            encode_utf8(cp, n, &mut out);
        }
        set_raw(Self::NAME, model, id, out)
    }
}

impl Mutator for StringUtf8ExtraBytes {
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
// StringUtf8Invalid

/// Corrupts up to six bytes of the UTF-8 encoding of a string by flipping the bits that
/// identify single, lead and continuation bytes.
pub struct StringUtf8Invalid {
    count: usize,
    mutation: usize,
}

impl StringUtf8Invalid {
    pub const NAME: &'static str = "StringUtf8Invalid";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        is_utf8_string(model, id)
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(model, id), Self::NAME, model, id)?;
        Ok(Self {
            count: model.string_value(id)?.len(),
            mutation: 0,
        })
    }

    fn perform(model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let mut data = model.string_value(id)?.into_bytes();
        let k = rand.pick_six();
        let picked = rand.permutation(data.len(), k);
        for idx in picked {
            let mut byte = Utf8Byte(data[idx - 1]);
            let bit = rand.usize_range(0, byte.structural_bits() as usize);
            byte.flip_structural(bit as u32);
            data[idx - 1] = byte.0;
        }
        set_raw(Self::NAME, model, id, data)
    }
}

impl Mutator for StringUtf8Invalid {
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
// Byte order marks

/// Unicode encoding family whose byte order marks a [`StringBomStatic`] mutator inserts.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BomFamily {
    Utf8,
    Utf16,
    Utf32,
}

impl BomFamily {
    pub const ALL: [BomFamily; 3] = [BomFamily::Utf8, BomFamily::Utf16, BomFamily::Utf32];

    pub fn name(&self) -> &'static str {
        match self {
            BomFamily::Utf8 => "StringUtf8BomStatic",
            BomFamily::Utf16 => "StringUtf16BomStatic",
            BomFamily::Utf32 => "StringUtf32BomStatic",
        }
    }

    /// Byte order marks of the family.
    pub fn boms(&self) -> &'static [&'static [u8]] {
        match self {
            BomFamily::Utf8 => &[&[0xef, 0xbb, 0xbf]],
            BomFamily::Utf16 => &[&[0xff, 0xfe], &[0xfe, 0xff]],
            BomFamily::Utf32 => &[&[0xff, 0xfe, 0x00, 0x00], &[0x00, 0x00, 0xfe, 0xff]],
        }
    }

    /// Encoding of the family used for an element encoded with `current`. The element's byte
    /// order is kept when it belongs to the family.
    fn encoding(&self, current: StringEncoding) -> StringEncoding {
        match (self, current) {
            (BomFamily::Utf8, _) => StringEncoding::Utf8,
            (BomFamily::Utf16, StringEncoding::Utf16Be) => StringEncoding::Utf16Be,
            (BomFamily::Utf16, _) => StringEncoding::Utf16Le,
            (BomFamily::Utf32, StringEncoding::Utf32Be) => StringEncoding::Utf32Be,
            (BomFamily::Utf32, _) => StringEncoding::Utf32Le,
        }
    }
}

/// Replaces a string with an entry of [`STRING_STATIC`] encoded in the family's encoding, with
/// up to six byte order marks inserted at code unit boundaries.
pub struct StringBomStatic {
    family: BomFamily,
    count: usize,
    mutation: usize,
}

impl StringBomStatic {
    pub fn supported(_family: BomFamily, model: &DataModel, id: ElementId) -> bool {
        string_encoding(model, id)
            .map(|e| e.is_unicode())
            .unwrap_or(false)
            && type_transform_hint(model, id).unwrap_or(false)
    }

    pub fn new(family: BomFamily, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(Self::supported(family, model, id), family.name(), model, id)?;
        Ok(Self {
            family,
            count: STRING_STATIC.len(),
            mutation: 0,
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, value: &str, rand: &mut Random) -> Result<MutationResult> {
        let current = string_encoding(model, id).unwrap_or(StringEncoding::Utf8);
        let encoding = self.family.encoding(current);
        let mut data = encoding.encode(value);
        let unit = encoding.code_unit();
        let units = data.len() / unit;
        let mut positions = (0..rand.pick_six())
            .map(|_| rand.usize_range(0, units + 1) * unit)
            .collect::<Vec<_>>();
        // Inserting from the end keeps the remaining positions on code unit boundaries.
        positions.sort_unstable_by(|a, b| b.cmp(a));
        for pos in positions {
            let bom = rand.choose(self.family.boms()).copied().unwrap_or_default();
            let tail = data.split_off(pos);
            data.extend_from_slice(bom);
            data.extend(tail);
        }
        set_raw(self.family.name(), model, id, data)
    }
}

impl Mutator for StringBomStatic {
    fn name(&self) -> &'static str {
        self.family.name()
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
        let name = self.family.name();
        let (model, id) = target.element(name)?;
        let value = STRING_STATIC.get(self.mutation).ok_or(Error::Mutator(
            MutatorError::IndexOutOfRange(name, self.mutation, self.count),
        ))?;
        self.perform(model, id, value, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let name = self.family.name();
        let (model, id) = target.element(name)?;
        let value = *rand.choose(STRING_STATIC).unwrap_or(&"");
        self.perform(model, id, value, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Element;

    fn string(encoding: StringEncoding, value: &str) -> (DataModel, ElementId) {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let id = dm.add(root, Element::string("Str", encoding, value)).unwrap();
        (dm, id)
    }

    /// Decodes UTF-8, overlong sequences included.
    fn decode_lenient(data: &[u8]) -> Option<String> {
        let mut out = String::new();
        let mut i = 0;
        while i < data.len() {
            let n = data[i].leading_ones() as usize;
            if n == 0 {
                out.push(data[i] as char);
                i += 1;
                continue;
            }
            if n == 1 || n > 6 || i + n > data.len() {
                return None;
            }
            let mut cp = (data[i] & (0x7f >> n)) as u32;
            for b in &data[i + 1..i + n] {
                if !Utf8Byte(*b).is_continuation() {
                    return None;
                }
                cp = (cp << 6) | Utf8Byte(*b).get_payload() as u32;
            }
            out.push(char::from_u32(cp)?);
            i += n;
        }
        Some(out)
    }

    #[test]
    fn encoding_utf8_bytes() {
        let mut out = vec![];
        encode_utf8('A' as u32, 2, &mut out);
        assert_eq!(out, vec![0xc1, 0x81]);
        out.clear();
        encode_utf8('é' as u32, 2, &mut out);
        assert_eq!(out, "é".as_bytes());
        out.clear();
        encode_utf8('A' as u32, 6, &mut out);
        assert_eq!(out, vec![0xfc, 0x80, 0x80, 0x80, 0x81, 0x81]);
        assert_eq!(Utf8Byte(b'A').structural_bits(), 1);
        assert_eq!(Utf8Byte(0x81).structural_bits(), 2);
        assert_eq!(Utf8Byte(0xe2).structural_bits(), 4);
        let mut byte = Utf8Byte(0x81);
        byte.flip_structural(1);
        assert_eq!(byte.0, 0xc1);
    }

    #[test]
    fn encoding_extra_bytes_roundtrip() {
        let (dm, id) = string(StringEncoding::Utf8, "Hello wörld €");
        let mut m = StringUtf8ExtraBytes::new(&dm, id).unwrap();
        assert_eq!(m.count(), 13);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..200 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes();
            assert!(out.len() > "Hello wörld €".len());
            assert_eq!(decode_lenient(out).unwrap(), "Hello wörld €");
        }
        let (dm, id) = string(StringEncoding::Utf16Le, "Hello");
        assert!(!StringUtf8ExtraBytes::supported(&dm, id));
    }

    #[test]
    fn encoding_utf8_invalid() {
        let (dm, id) = string(StringEncoding::Ascii, "HelloWorld");
        let mut m = StringUtf8Invalid::new(&dm, id).unwrap();
        assert_eq!(m.count(), 10);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..200 {
            let mut dm = dm.clone();
            let r = m
                .random_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes();
            assert_eq!(out.len(), 10);
            assert!(std::str::from_utf8(out).is_err());
        }
    }

    #[test]
    fn encoding_bom_static() {
        let (dm, id) = string(StringEncoding::Utf16Le, "Hello");
        let mut m = StringBomStatic::new(BomFamily::Utf32, &dm, id).unwrap();
        assert_eq!(m.count(), STRING_STATIC.len());
        let contains = |data: &[u8], token: &[u8]| data.windows(token.len()).any(|w| w == token);
        let (le, be) = (BomFamily::Utf32.boms()[0], BomFamily::Utf32.boms()[1]);
        let (mut cnt_le, mut cnt_be, mut cnt_both) = (0, 0, 0);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for i in 0..m.count() {
            let mut dm = dm.clone();
            m.set_mutation(i);
            let r = m
                .sequential_mutation(Target::Element(&mut dm, id), &mut rand)
                .unwrap();
            let out = r.value().unwrap().as_bytes();
            assert_eq!(out.len() % 4, 0);
            match (contains(out, le), contains(out, be)) {
                (true, true) => cnt_both += 1,
                (true, false) => cnt_le += 1,
                (false, true) => cnt_be += 1,
                (false, false) => panic!("missing byte order mark"),
            }
        }
        assert!(cnt_le > 0);
        assert!(cnt_be > 0);
        assert!(cnt_both > 0);

        let (dm, id) = string(StringEncoding::Ascii, "Hello");
        assert!(!StringBomStatic::supported(BomFamily::Utf8, &dm, id));
    }
}
