//! Data model tree consumed by the mutators.
//!
//! A [`DataModel`] describes the structure of a message: numbers, strings, blobs and flags are
//! the leaves, while blocks, choices and arrays group them. Every element lives in an arena owned
//! by the model and is addressed by an [`ElementId`]. Parents are plain indices, so they never
//! keep anything alive and cloning a model is a simple deep copy of the arena.
//!
//! ## Values
//!
//! Each element has a default typed value ([`Variant`]) and an optional mutated value. A mutated
//! value is either typed, in which case it is encoded according to the element's kind, or raw
//! ([`Value::Raw`]), in which case it is emitted as-is. The [`MutationFlags`] attached to the
//! element tell the model which of its usual processing steps the mutation overrides.
//!
//! ## Size relations
//!
//! A number can declare that its value is the length of another element (a [`SizeRelation`]).
//! The value is computed lazily from the live length of the sized element when the model is
//! serialized, and saturates at the largest value the number can represent. Lengths are computed
//! without serializing numbers, so a number sizing one of its own ancestors is fine.
//!
//! ## Example
//!
//! ```
//! use structmut::model::*;
//!
//! let mut dm = DataModel::new("Packet");
//! let root = dm.root();
//! let len = dm.add(root, Element::number("Length", 8, false, 0)).unwrap();
//! let data = dm.add(root, Element::blob("Data", b"hello")).unwrap();
//! dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
//!
//! assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x05hello");
//! ```

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::bits::BitStream;
use crate::error::*;

// -----------------------------------------------------------------------------------------------
// Identifiers & flags

/// Index of an element in its model's arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Flags attached to a mutated value telling the model which processing steps are overridden.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Debug)]
pub struct MutationFlags(u32);

impl MutationFlags {
    /// No override.
    pub const NONE: MutationFlags = MutationFlags(0);
    /// Fixups are not applied to the value.
    pub const DEFAULT: MutationFlags = MutationFlags(0x01);
    /// The value is already transformed.
    pub const TRANSFORMER: MutationFlags = MutationFlags(0x02);
    /// Type constraints (fixed lengths, padding) are ignored.
    pub const TYPE_CONSTRAINTS: MutationFlags = MutationFlags(0x04);
    /// Relations do not recompute the value.
    pub const RELATIONS: MutationFlags = MutationFlags(0x08);
    /// The value bypasses the element's type encoding.
    pub const TYPE_TRANSFORM: MutationFlags = MutationFlags(0x20);

    #[inline]
    pub fn contains(&self, other: MutationFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for MutationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        MutationFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for MutationFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for MutationFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        MutationFlags(self.0 & rhs.0)
    }
}

// -----------------------------------------------------------------------------------------------
// Values

/// Typed value of an element.
#[derive(Clone, PartialEq, Debug)]
pub enum Variant {
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Variant {
    /// Builds the numeric variant matching an element's signedness.
    pub fn from_i128(value: i128, signed: bool) -> Self {
        if signed {
            Variant::Int(value as i64)
        } else {
            Variant::UInt(value as u64)
        }
    }

    /// Returns the value as an integer, parsing strings if needed.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Variant::Int(v) => Some(*v as i128),
            Variant::UInt(v) => Some(*v as i128),
            Variant::Double(v) => Some(*v as i128),
            Variant::String(s) => s.trim().parse::<i128>().ok(),
            Variant::Bytes(_) => None,
        }
    }

    /// Returns the value as a double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Int(v) => Some(*v as f64),
            Variant::UInt(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            Variant::String(s) => s.trim().parse::<f64>().ok(),
            Variant::Bytes(_) => None,
        }
    }
}

/// A mutated value.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    /// Encoded according to the element's kind.
    Typed(Variant),
    /// Emitted as-is.
    Raw(BitStream),
}

/// Encoding used to serialize a string element.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StringEncoding {
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl StringEncoding {
    /// Returns `true` if the encoding can represent any Unicode code point.
    pub fn is_unicode(&self) -> bool {
        !matches!(self, StringEncoding::Ascii)
    }

    /// Size of a code unit in bytes.
    pub fn code_unit(&self) -> usize {
        match self {
            StringEncoding::Ascii | StringEncoding::Utf8 => 1,
            StringEncoding::Utf16Le | StringEncoding::Utf16Be => 2,
            StringEncoding::Utf32Le | StringEncoding::Utf32Be => 4,
        }
    }

    /// Encodes a string. Characters outside of the ASCII range are replaced by `?` when encoding
    /// ASCII strings.
    pub fn encode(&self, s: &str) -> Vec<u8> {
        match self {
            StringEncoding::Ascii => s
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            StringEncoding::Utf8 => s.as_bytes().to_vec(),
            StringEncoding::Utf16Le => s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect(),
            StringEncoding::Utf16Be => s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect(),
            StringEncoding::Utf32Le => s.chars().flat_map(|c| (c as u32).to_le_bytes()).collect(),
            StringEncoding::Utf32Be => s.chars().flat_map(|c| (c as u32).to_be_bytes()).collect(),
        }
    }
}

/// Encoding applied to the serialized children of a container.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Transformer {
    /// ASCII hexadecimal encoding.
    Hex,
}

impl Transformer {
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Transformer::Hex => hex::encode(data).into_bytes(),
        }
    }

    /// Upper bound of the ratio between output and input lengths.
    pub fn growth_factor(&self) -> u64 {
        match self {
            Transformer::Hex => 2,
        }
    }

    /// Length in bits of the transformed output given the length of the input.
    fn encoded_len(&self, bits: u64) -> u64 {
        match self {
            Transformer::Hex => (bits + 7) / 8 * 16,
        }
    }
}

/// Unit of a size relation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LengthUnit {
    Bits,
    Bytes,
}

/// Declares that a number's value is the length of the element `of`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SizeRelation {
    pub of: ElementId,
    pub unit: LengthUnit,
}

impl SizeRelation {
    pub fn bytes(of: ElementId) -> Self {
        Self {
            of,
            unit: LengthUnit::Bytes,
        }
    }

    pub fn bits(of: ElementId) -> Self {
        Self {
            of,
            unit: LengthUnit::Bits,
        }
    }

    /// Converts a length in bits to the relation's unit, rounding up.
    pub fn from_bits(&self, bits: u64) -> u64 {
        match self.unit {
            LengthUnit::Bits => bits,
            LengthUnit::Bytes => (bits + 7) / 8,
        }
    }

    /// Converts a value expressed in the relation's unit to bits.
    pub fn to_bits(&self, value: u64) -> u64 {
        match self.unit {
            LengthUnit::Bits => value,
            LengthUnit::Bytes => value.saturating_mul(8),
        }
    }
}

/// Stores "`count` elements, the extra ones all equal to `value`" for an array without
/// materializing the copies.
#[derive(Clone, PartialEq, Debug)]
pub struct CountOverride {
    pub count: usize,
    pub value: BitStream,
}

// -----------------------------------------------------------------------------------------------
// Elements

/// Type of an element and its type-specific parameters.
#[derive(Clone, PartialEq, Debug)]
pub enum ElementKind {
    Number {
        bits: u32,
        signed: bool,
        little_endian: bool,
    },
    Double {
        bits: u32,
    },
    String {
        encoding: StringEncoding,
    },
    Blob,
    Flag {
        bits: u32,
    },
    Block {
        transformer: Option<Transformer>,
    },
    Choice {
        selected: usize,
    },
    Array {
        template: Option<ElementId>,
        count_override: Option<CountOverride>,
    },
}

impl ElementKind {
    /// Returns `true` if elements of this kind hold children.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ElementKind::Block { .. } | ElementKind::Choice { .. } | ElementKind::Array { .. }
        )
    }

    /// Name of the kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementKind::Number { .. } => "number",
            ElementKind::Double { .. } => "double",
            ElementKind::String { .. } => "string",
            ElementKind::Blob => "blob",
            ElementKind::Flag { .. } => "flag",
            ElementKind::Block { .. } => "block",
            ElementKind::Choice { .. } => "choice",
            ElementKind::Array { .. } => "array",
        }
    }
}

/// A node of the data model.
#[derive(Clone, Debug)]
pub struct Element {
    /// Name of the element, unique among its siblings.
    pub name: String,
    pub kind: ElementKind,
    /// Value used when the element is not mutated.
    pub default_value: Variant,
    /// Whether mutators may target this element.
    pub mutable: bool,
    /// Per-mutator configuration.
    pub hints: BTreeMap<String, String>,
    /// Size relation declared by this element.
    pub relation: Option<SizeRelation>,
    /// Value set by a mutator.
    mutated: Option<Value>,
    /// Overrides applying to the mutated value.
    flags: MutationFlags,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

impl Element {
    fn with_kind(name: &str, kind: ElementKind, default_value: Variant) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default_value,
            mutable: true,
            hints: BTreeMap::new(),
            relation: None,
            mutated: None,
            flags: MutationFlags::NONE,
            parent: None,
            children: vec![],
        }
    }

    /// Creates a big-endian integer of `bits` bits.
    pub fn number(name: &str, bits: u32, signed: bool, value: i128) -> Self {
        assert!((1..=64).contains(&bits), "invalid number size: {}", bits);
        Self::with_kind(
            name,
            ElementKind::Number {
                bits,
                signed,
                little_endian: false,
            },
            Variant::from_i128(value, signed),
        )
    }

    /// Creates a 32-bit or 64-bit floating point number.
    pub fn double(name: &str, bits: u32, value: f64) -> Self {
        assert!(bits == 32 || bits == 64, "invalid double size: {}", bits);
        Self::with_kind(name, ElementKind::Double { bits }, Variant::Double(value))
    }

    pub fn string(name: &str, encoding: StringEncoding, value: &str) -> Self {
        Self::with_kind(
            name,
            ElementKind::String { encoding },
            Variant::String(value.to_string()),
        )
    }

    pub fn blob(name: &str, value: &[u8]) -> Self {
        Self::with_kind(name, ElementKind::Blob, Variant::Bytes(value.to_vec()))
    }

    pub fn flag(name: &str, bits: u32, value: u64) -> Self {
        assert!((1..=64).contains(&bits), "invalid flag size: {}", bits);
        Self::with_kind(name, ElementKind::Flag { bits }, Variant::UInt(value))
    }

    pub fn block(name: &str) -> Self {
        Self::with_kind(
            name,
            ElementKind::Block { transformer: None },
            Variant::Bytes(vec![]),
        )
    }

    pub fn choice(name: &str) -> Self {
        Self::with_kind(
            name,
            ElementKind::Choice { selected: 0 },
            Variant::Bytes(vec![]),
        )
    }

    pub fn array(name: &str) -> Self {
        Self::with_kind(
            name,
            ElementKind::Array {
                template: None,
                count_override: None,
            },
            Variant::Bytes(vec![]),
        )
    }

    /// Makes a number little-endian.
    pub fn little_endian(mut self) -> Self {
        if let ElementKind::Number { little_endian, .. } = &mut self.kind {
            *little_endian = true;
        }
        self
    }

    /// Sets the transformer of a block.
    pub fn transformer(mut self, t: Transformer) -> Self {
        if let ElementKind::Block { transformer } = &mut self.kind {
            *transformer = Some(t);
        }
        self
    }

    /// Adds a hint.
    pub fn hint(mut self, key: &str, value: &str) -> Self {
        self.hints.insert(key.to_string(), value.to_string());
        self
    }

    /// Marks the element as not mutable.
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn parent(&self) -> Option<ElementId> {
        self.parent
    }

    pub fn children(&self) -> &[ElementId] {
        &self.children
    }

    pub fn mutated(&self) -> Option<&Value> {
        self.mutated.as_ref()
    }

    pub fn flags(&self) -> MutationFlags {
        self.flags
    }

    /// Typed value of the element: the mutated one if any, the default one otherwise.
    pub fn internal_value(&self) -> &Variant {
        match &self.mutated {
            Some(Value::Typed(v)) => v,
            _ => &self.default_value,
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Data model

/// An arena-backed tree of elements.
#[derive(Clone, Debug)]
pub struct DataModel {
    elements: Vec<Element>,
    root: ElementId,
    /// Maximum size of the serialized model in bytes.
    max_output_size: Option<u64>,
    /// Nesting level of [`DataModel::begin_update`] calls.
    update_depth: usize,
    /// Cached total length in bits.
    cached_len: Cell<Option<u64>>,
}

impl DataModel {
    /// Creates a model whose root is an empty block named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            elements: vec![Element::block(name)],
            root: ElementId(0),
            max_output_size: None,
            update_depth: 0,
            cached_len: Cell::new(None),
        }
    }

    #[inline]
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Maximum size of the serialized model in bytes, if any.
    #[inline]
    pub fn max_output_size(&self) -> Option<u64> {
        self.max_output_size
    }

    pub fn set_max_output_size(&mut self, size: Option<u64>) {
        self.max_output_size = size;
    }

    #[inline]
    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0)
    }

    pub fn element(&self, id: ElementId) -> Result<&Element> {
        self.elements
            .get(id.0)
            .ok_or(Error::Model(ModelError::InvalidElement(id.0)))
    }

    pub fn element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.invalidate();
        self.elements
            .get_mut(id.0)
            .ok_or(Error::Model(ModelError::InvalidElement(id.0)))
    }

    /// Adds `element` as the last child of `parent`.
    pub fn add(&mut self, parent: ElementId, element: Element) -> Result<ElementId> {
        let idx = self.children(parent)?.len();
        let id = self.alloc(element);
        self.insert_child(parent, idx, id)?;
        Ok(id)
    }

    /// Sets the element an array replicates when it has no element left.
    pub fn set_array_template(&mut self, array: ElementId, element: Element) -> Result<ElementId> {
        let id = self.alloc(element);
        self.elements[id.0].parent = Some(array);
        match &mut self.element_mut(array)?.kind {
            ElementKind::Array { template, .. } => *template = Some(id),
            _ => return Err(self.not_a_container(array)),
        }
        Ok(id)
    }

    /// Selects the option of a choice.
    pub fn select(&mut self, choice: ElementId, option: usize) -> Result<()> {
        let n = self.children(choice)?.len();
        let name = self.element(choice)?.name.clone();
        match &mut self.element_mut(choice)?.kind {
            ElementKind::Choice { selected } if option < n => *selected = option,
            ElementKind::Choice { .. } => {
                return Err(Error::Model(ModelError::ChildOutOfBounds(name, option)))
            }
            _ => return Err(Error::Model(ModelError::NotAContainer(name))),
        }
        Ok(())
    }

    fn alloc(&mut self, element: Element) -> ElementId {
        self.elements.push(element);
        ElementId(self.elements.len() - 1)
    }

    fn not_a_container(&self, id: ElementId) -> Error {
        let name = self.get(id).map(|e| e.name.clone()).unwrap_or_default();
        Error::Model(ModelError::NotAContainer(name))
    }

    // -------------------------------------------------------------------------------------------
    // Navigation

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.get(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: ElementId) -> Result<&[ElementId]> {
        Ok(&self.element(id)?.children)
    }

    /// Position of the element among its parent's children.
    pub fn index_in_parent(&self, id: ElementId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.get(parent)?.children.iter().position(|c| *c == id)
    }

    pub fn next_sibling(&self, id: ElementId) -> Option<ElementId> {
        let parent = self.parent(id)?;
        let idx = self.index_in_parent(id)?;
        self.get(parent)?.children.get(idx + 1).copied()
    }

    pub fn child_named(&self, parent: ElementId, name: &str) -> Option<ElementId> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).map(|e| e.name == name).unwrap_or(false))
    }

    /// Returns `true` if the element can be reached from the root.
    pub fn is_attached(&self, id: ElementId) -> bool {
        let mut cur = id;
        while cur != self.root {
            match self.parent(cur) {
                Some(p) if self.get(p).map(|e| e.children.contains(&cur)) == Some(true) => cur = p,
                _ => return false,
            }
        }
        true
    }

    /// Dot-separated path of the element from the root.
    pub fn full_name(&self, id: ElementId) -> String {
        let mut names = vec![];
        let mut cur = Some(id);
        while let Some(c) = cur {
            match self.get(c) {
                Some(e) => names.push(e.name.as_str()),
                None => break,
            }
            cur = self.parent(c);
        }
        names.reverse();
        names.join(".")
    }

    /// Finds an element from its dot-separated path. The root's name is optional.
    pub fn find(&self, path: &str) -> Result<ElementId> {
        let mut parts = path.split('.').peekable();
        if parts.peek() == Some(&self.element(self.root)?.name.as_str()) {
            parts.next();
        }
        let mut cur = self.root;
        for part in parts {
            cur = self
                .child_named(cur, part)
                .ok_or_else(|| Error::Model(ModelError::PathNotFound(path.to_string())))?;
        }
        Ok(cur)
    }

    /// Iterates over the attached elements, depth first, root included.
    pub fn walk(&self) -> Vec<ElementId> {
        let mut out = vec![];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(e) = self.get(id) {
                stack.extend(e.children.iter().rev());
            }
        }
        out
    }

    /// Returns the in-scope numbers whose value is the length of `id`.
    pub fn relations_of(&self, id: ElementId) -> Vec<ElementId> {
        if !self.is_attached(id) {
            return vec![];
        }
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.relation.map(|r| r.of == id).unwrap_or(false))
            .map(|(i, _)| ElementId(i))
            .filter(|i| self.is_attached(*i))
            .collect()
    }

    /// Returns `true` if the element declares a size relation or is sized by another element.
    pub fn has_relation(&self, id: ElementId) -> bool {
        self.get(id).map(|e| e.relation.is_some()).unwrap_or(false)
            || !self.relations_of(id).is_empty()
    }

    // -------------------------------------------------------------------------------------------
    // Tree updates

    /// Starts a batch of updates. Length caches are only invalidated once the outermost batch
    /// ends.
    pub fn begin_update(&mut self) {
        self.update_depth += 1;
    }

    pub fn end_update(&mut self) {
        self.update_depth = self.update_depth.saturating_sub(1);
        if self.update_depth == 0 {
            self.cached_len.set(None);
        }
    }

    fn invalidate(&mut self) {
        if self.update_depth == 0 {
            self.cached_len.set(None);
        }
    }

    /// Attaches a detached element as the `index`-th child of `parent`.
    pub fn insert_child(&mut self, parent: ElementId, index: usize, child: ElementId) -> Result<()> {
        if !self.element(parent)?.kind.is_container() {
            return Err(self.not_a_container(parent));
        }
        let len = self.children(parent)?.len();
        if index > len {
            let name = self.element(parent)?.name.clone();
            return Err(Error::Model(ModelError::ChildOutOfBounds(name, index)));
        }
        self.element_mut(child)?.parent = Some(parent);
        self.element_mut(parent)?.children.insert(index, child);
        Ok(())
    }

    /// Detaches an element from its parent.
    pub fn remove(&mut self, id: ElementId) -> Result<()> {
        let parent = self
            .parent(id)
            .ok_or_else(|| Error::Model(ModelError::NoParent(self.full_name(id))))?;
        let children = &mut self.element_mut(parent)?.children;
        children.retain(|c| *c != id);
        self.element_mut(id)?.parent = None;
        Ok(())
    }

    /// Removes the children of `parent` past the first `len` ones.
    pub fn truncate_children(&mut self, parent: ElementId, len: usize) -> Result<()> {
        let removed = {
            let e = self.element_mut(parent)?;
            if len >= e.children.len() {
                return Ok(());
            }
            e.children.split_off(len)
        };
        for c in removed {
            self.element_mut(c)?.parent = None;
        }
        Ok(())
    }

    /// Swaps two children of `parent`.
    pub fn swap_children(&mut self, parent: ElementId, a: usize, b: usize) -> Result<()> {
        let len = self.children(parent)?.len();
        if a >= len || b >= len {
            let name = self.element(parent)?.name.clone();
            return Err(Error::Model(ModelError::ChildOutOfBounds(name, a.max(b))));
        }
        self.element_mut(parent)?.children.swap(a, b);
        Ok(())
    }

    /// Reorders the children of `parent` in place. `order` holds the previous index of each
    /// child in its new position.
    pub fn reorder_children(&mut self, parent: ElementId, order: &[usize]) -> Result<()> {
        let children = self.children(parent)?.to_vec();
        if order.len() != children.len() || order.iter().any(|i| *i >= children.len()) {
            let name = self.element(parent)?.name.clone();
            return Err(Error::Model(ModelError::ChildOutOfBounds(name, order.len())));
        }
        self.element_mut(parent)?.children = order.iter().map(|i| children[*i]).collect();
        Ok(())
    }

    /// Deep copies an element and its descendants. The copy is detached. Relations between
    /// elements of the copied subtree point to their copies.
    pub fn deep_clone(&mut self, id: ElementId) -> Result<ElementId> {
        let mut map = BTreeMap::new();
        let copy = self.clone_rec(id, &mut map)?;
        for new in map.values() {
            if let Some(rel) = self.elements[new.0].relation {
                if let Some(target) = map.get(&rel.of) {
                    self.elements[new.0].relation = Some(SizeRelation { of: *target, ..rel });
                }
            }
        }
        self.elements[copy.0].parent = None;
        Ok(copy)
    }

    fn clone_rec(
        &mut self,
        id: ElementId,
        map: &mut BTreeMap<ElementId, ElementId>,
    ) -> Result<ElementId> {
        let mut element = self.element(id)?.clone();
        let children = std::mem::take(&mut element.children);
        let copy = self.alloc(element);
        map.insert(id, copy);
        for c in children {
            let cc = self.clone_rec(c, map)?;
            self.elements[cc.0].parent = Some(copy);
            self.elements[copy.0].children.push(cc);
        }
        Ok(copy)
    }

    /// Sets the count override of an array.
    pub fn set_count_override(&mut self, array: ElementId, count: usize, value: BitStream) -> Result<()> {
        match &mut self.element_mut(array)?.kind {
            ElementKind::Array { count_override, .. } => {
                *count_override = Some(CountOverride { count, value });
                Ok(())
            }
            _ => Err(self.not_a_container(array)),
        }
    }

    /// Removes the count override of an array.
    pub fn clear_count_override(&mut self, array: ElementId) -> Result<()> {
        match &mut self.element_mut(array)?.kind {
            ElementKind::Array { count_override, .. } => {
                *count_override = None;
                Ok(())
            }
            _ => Err(self.not_a_container(array)),
        }
    }

    // -------------------------------------------------------------------------------------------
    // Values

    pub fn hint(&self, id: ElementId, key: &str) -> Option<&str> {
        self.get(id)?.hints.get(key).map(|s| s.as_str())
    }

    pub fn internal_value(&self, id: ElementId) -> Result<&Variant> {
        Ok(self.element(id)?.internal_value())
    }

    /// Sets a typed mutated value. The value goes through the element's usual encoding.
    pub fn set_mutated_value(&mut self, id: ElementId, value: Variant, flags: MutationFlags) -> Result<()> {
        let e = self.element_mut(id)?;
        e.mutated = Some(Value::Typed(value));
        e.flags = flags;
        Ok(())
    }

    /// Sets a raw mutated value emitted as-is.
    pub fn set_mutated_raw(&mut self, id: ElementId, value: BitStream, flags: MutationFlags) -> Result<()> {
        let e = self.element_mut(id)?;
        e.mutated = Some(Value::Raw(value));
        e.flags = flags;
        Ok(())
    }

    /// Adds flags to the element's current overrides.
    pub fn add_flags(&mut self, id: ElementId, flags: MutationFlags) -> Result<()> {
        self.element_mut(id)?.flags |= flags;
        Ok(())
    }

    /// Current numeric value of a number or flag, taking size relations into account.
    pub fn number_value(&self, id: ElementId) -> Result<i128> {
        let e = self.element(id)?;
        match (&e.kind, &e.mutated, e.relation) {
            (ElementKind::Number { .. }, Some(Value::Typed(v)), _)
            | (ElementKind::Flag { .. }, Some(Value::Typed(v)), _) => v
                .as_i128()
                .ok_or_else(|| Error::Model(ModelError::TypeMismatch(e.name.clone(), "integer"))),
            (ElementKind::Number { .. }, _, Some(rel))
                if !e.flags.contains(MutationFlags::RELATIONS)
                    && self.is_attached(id)
                    && self.is_attached(rel.of) =>
            {
                let len = rel.from_bits(self.length_bits(rel.of)?) as i128;
                let (_, max) = self.numeric_range(id)?;
                Ok(len.min(max))
            }
            (ElementKind::Number { .. }, _, _) | (ElementKind::Flag { .. }, _, _) => e
                .default_value
                .as_i128()
                .ok_or_else(|| Error::Model(ModelError::TypeMismatch(e.name.clone(), "integer"))),
            _ => Err(Error::Model(ModelError::TypeMismatch(e.name.clone(), "integer"))),
        }
    }

    /// Inclusive numeric range of a number or flag.
    pub fn numeric_range(&self, id: ElementId) -> Result<(i128, i128)> {
        let e = self.element(id)?;
        match e.kind {
            ElementKind::Number { bits, signed, .. } => Ok(if signed {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            } else {
                (0, (1i128 << bits) - 1)
            }),
            ElementKind::Flag { bits } => Ok((0, (1i128 << bits) - 1)),
            _ => Err(Error::Model(ModelError::TypeMismatch(e.name.clone(), "integer"))),
        }
    }

    /// Current value of a string element.
    pub fn string_value(&self, id: ElementId) -> Result<String> {
        let e = self.element(id)?;
        match e.internal_value() {
            Variant::String(s) => Ok(s.clone()),
            Variant::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            Variant::Int(v) => Ok(v.to_string()),
            Variant::UInt(v) => Ok(v.to_string()),
            Variant::Double(v) => Ok(v.to_string()),
        }
    }

    /// Current value of a blob element.
    pub fn bytes_value(&self, id: ElementId) -> Result<Vec<u8>> {
        let e = self.element(id)?;
        match e.internal_value() {
            Variant::Bytes(b) => Ok(b.clone()),
            Variant::String(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(Error::Model(ModelError::TypeMismatch(e.name.clone(), "bytes"))),
        }
    }

    /// Current value of a double element.
    pub fn double_value(&self, id: ElementId) -> Result<f64> {
        let e = self.element(id)?;
        e.internal_value()
            .as_f64()
            .ok_or_else(|| Error::Model(ModelError::TypeMismatch(e.name.clone(), "double")))
    }

    /// Serialized value of an element, after transformers.
    pub fn value(&self, id: ElementId) -> Result<BitStream> {
        let e = self.element(id)?;
        if let Some(Value::Raw(raw)) = &e.mutated {
            return Ok(raw.clone());
        }
        let mut out = self.encode(id)?;
        if let ElementKind::Block {
            transformer: Some(t),
        } = &e.kind
        {
            out = BitStream::from(t.encode(out.as_bytes()));
        }
        Ok(out)
    }

    /// Serialized value of an element before transformers. Only differs from
    /// [`DataModel::value`] for containers declaring a transformer.
    pub fn pre_transform_value(&self, id: ElementId) -> Result<BitStream> {
        match &self.element(id)?.mutated {
            Some(Value::Raw(raw)) => Ok(raw.clone()),
            _ => self.encode(id),
        }
    }

    /// Serialized value of the whole model.
    pub fn serialize(&self) -> Result<BitStream> {
        self.value(self.root)
    }

    fn encode(&self, id: ElementId) -> Result<BitStream> {
        let e = self.element(id)?;
        let mut out = BitStream::new();
        match &e.kind {
            ElementKind::Number {
                bits,
                little_endian,
                ..
            } => {
                let v = self.number_value(id)?;
                let mask = if *bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                let raw = (v as u64) & mask;
                if *little_endian && bits % 8 == 0 {
                    let bytes = raw.to_le_bytes();
                    out.push_bytes(&bytes[..(*bits / 8) as usize]);
                } else {
                    out.push_bits(raw, *bits);
                }
            }
            ElementKind::Flag { bits } => {
                let v = self.number_value(id)?;
                out.push_bits(v as u64, *bits);
            }
            ElementKind::Double { bits } => {
                let v = self.double_value(id)?;
                if *bits == 32 {
                    out.push_bytes(&(v as f32).to_be_bytes());
                } else {
                    out.push_bytes(&v.to_be_bytes());
                }
            }
            ElementKind::String { encoding } => {
                out.push_bytes(&encoding.encode(&self.string_value(id)?));
            }
            ElementKind::Blob => out.push_bytes(&self.bytes_value(id)?),
            ElementKind::Block { .. } => {
                for c in e.children.iter() {
                    out.extend(&self.value(*c)?);
                }
            }
            ElementKind::Choice { selected } => {
                if let Some(c) = e.children.get(*selected) {
                    out.extend(&self.value(*c)?);
                }
            }
            ElementKind::Array { count_override, .. } => {
                let shown = count_override
                    .as_ref()
                    .map(|o| o.count.min(e.children.len()))
                    .unwrap_or(e.children.len());
                for c in e.children[..shown].iter() {
                    out.extend(&self.value(*c)?);
                }
                if let Some(o) = count_override {
                    for _ in shown..o.count {
                        out.extend(&o.value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Length of the serialized element in bits. Numbers are never serialized to compute it.
    pub fn length_bits(&self, id: ElementId) -> Result<u64> {
        let e = self.element(id)?;
        if let Some(Value::Raw(raw)) = &e.mutated {
            return Ok(raw.len_bits());
        }
        let len = match &e.kind {
            ElementKind::Number { bits, .. } | ElementKind::Flag { bits } => *bits as u64,
            ElementKind::Double { bits } => *bits as u64,
            ElementKind::String { encoding } => {
                encoding.encode(&self.string_value(id)?).len() as u64 * 8
            }
            ElementKind::Blob => self.bytes_value(id)?.len() as u64 * 8,
            ElementKind::Block { transformer } => {
                let inner = e
                    .children
                    .iter()
                    .map(|c| self.length_bits(*c))
                    .sum::<Result<u64>>()?;
                match transformer {
                    Some(t) => t.encoded_len(inner),
                    None => inner,
                }
            }
            ElementKind::Choice { selected } => match e.children.get(*selected) {
                Some(c) => self.length_bits(*c)?,
                None => 0,
            },
            ElementKind::Array { count_override, .. } => {
                let shown = count_override
                    .as_ref()
                    .map(|o| o.count.min(e.children.len()))
                    .unwrap_or(e.children.len());
                let mut len = e.children[..shown]
                    .iter()
                    .map(|c| self.length_bits(*c))
                    .sum::<Result<u64>>()?;
                if let Some(o) = count_override {
                    len += (o.count - shown) as u64 * o.value.len_bits();
                }
                len
            }
        };
        Ok(len)
    }

    /// Length of the serialized model in bits.
    pub fn total_bits(&self) -> Result<u64> {
        if let Some(len) = self.cached_len.get() {
            return Ok(len);
        }
        let len = self.length_bits(self.root)?;
        if self.update_depth == 0 {
            self.cached_len.set(Some(len));
        }
        Ok(len)
    }

    /// Number of elements an array currently holds, count override included.
    pub fn array_count(&self, id: ElementId) -> Result<usize> {
        let e = self.element(id)?;
        match &e.kind {
            ElementKind::Array { count_override, .. } => Ok(count_override
                .as_ref()
                .map(|o| o.count)
                .unwrap_or(e.children.len())),
            _ => Err(self.not_a_container(id)),
        }
    }
}

impl std::fmt::Display for DataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.serialize() {
            Ok(v) => write!(f, "{}", v),
            Err(e) => write!(f, "<{}>", e),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> (DataModel, ElementId, ElementId) {
        let mut dm = DataModel::new("Packet");
        let root = dm.root();
        let len = dm.add(root, Element::number("Length", 8, false, 0)).unwrap();
        let data = dm.add(root, Element::blob("Data", b"hello")).unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
        (dm, len, data)
    }

    #[test]
    fn model_numbers_encoding() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        dm.add(root, Element::number("A", 16, false, 0x1234)).unwrap();
        dm.add(root, Element::number("B", 16, false, 0x1234).little_endian())
            .unwrap();
        dm.add(root, Element::number("C", 8, true, -1)).unwrap();
        dm.add(root, Element::flag("D", 4, 0xa)).unwrap();
        dm.add(root, Element::flag("E", 4, 0x5)).unwrap();
        assert_eq!(
            dm.serialize().unwrap().as_bytes(),
            &[0x12, 0x34, 0x34, 0x12, 0xff, 0xa5]
        );
        let c = dm.find("Root.C").unwrap();
        assert_eq!(dm.numeric_range(c).unwrap(), (-128, 127));
        assert_eq!(dm.full_name(c), "Root.C");
    }

    #[test]
    fn model_strings_encoding() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        dm.add(root, Element::string("A", StringEncoding::Utf16Be, "hi"))
            .unwrap();
        dm.add(root, Element::string("B", StringEncoding::Utf32Le, "h"))
            .unwrap();
        dm.add(root, Element::string("C", StringEncoding::Ascii, "é"))
            .unwrap();
        assert_eq!(
            dm.serialize().unwrap().as_bytes(),
            b"\x00h\x00ih\x00\x00\x00?"
        );
    }

    #[test]
    fn model_size_relation() {
        let (mut dm, len, data) = packet();
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x05hello");
        assert!(dm.has_relation(data));
        assert_eq!(dm.relations_of(data), vec![len]);
        // Relation values saturate at the size of the number.
        dm.set_mutated_value(data, Variant::Bytes(vec![0x41; 300]), MutationFlags::DEFAULT)
            .unwrap();
        assert_eq!(dm.number_value(len).unwrap(), 0xff);
        assert_eq!(dm.serialize().unwrap().len_bytes(), 301);
        // Out of scope relations are ignored.
        dm.remove(data).unwrap();
        assert!(dm.relations_of(data).is_empty());
        assert_eq!(dm.number_value(len).unwrap(), 0);
    }

    #[test]
    fn model_relation_on_ancestor() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let block = dm.add(root, Element::block("Block")).unwrap();
        let len = dm
            .add(block, Element::number("Length", 16, false, 0))
            .unwrap();
        dm.add(block, Element::string("Str", StringEncoding::Ascii, "abc"))
            .unwrap();
        dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(block));
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"\x00\x05abc");
    }

    #[test]
    fn model_array_count_override() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let array = dm.add(root, Element::array("Array")).unwrap();
        dm.add(array, Element::string("Foo", StringEncoding::Ascii, "Foo"))
            .unwrap();
        dm.set_count_override(array, 3, BitStream::from_bytes(b"Bar"))
            .unwrap();
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"FooBarBar");
        assert_eq!(dm.length_bits(array).unwrap(), 72);
        assert_eq!(dm.array_count(array).unwrap(), 3);
        dm.set_count_override(array, 0, BitStream::from_bytes(b"Bar"))
            .unwrap();
        assert!(dm.serialize().unwrap().is_empty());
    }

    #[test]
    fn model_transformer_and_choice() {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        let block = dm
            .add(root, Element::block("Hex").transformer(Transformer::Hex))
            .unwrap();
        dm.add(block, Element::blob("Data", b"\x01\xab")).unwrap();
        let choice = dm.add(root, Element::choice("Choice")).unwrap();
        dm.add(choice, Element::blob("A", b"a")).unwrap();
        dm.add(choice, Element::blob("B", b"b")).unwrap();
        dm.select(choice, 1).unwrap();
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"01abb");
        assert_eq!(dm.length_bits(block).unwrap(), 32);
        assert_eq!(dm.pre_transform_value(block).unwrap().as_bytes(), b"\x01\xab");
        assert!(dm.select(choice, 2).is_err());
    }

    #[test]
    fn model_deep_clone_and_reorder() {
        let (mut dm, len, _) = packet();
        let root = dm.root();
        let block = dm.add(root, Element::block("Inner")).unwrap();
        let ilen = dm.add(block, Element::number("L", 8, false, 0)).unwrap();
        let idata = dm.add(block, Element::blob("D", b"xy")).unwrap();
        dm.element_mut(ilen).unwrap().relation = Some(SizeRelation::bytes(idata));

        let copy = dm.deep_clone(block).unwrap();
        assert!(!dm.is_attached(copy));
        dm.element_mut(copy).unwrap().name = "Inner2".to_string();
        dm.insert_child(root, 3, copy).unwrap();
        let copied_len = dm.find("Inner2.L").unwrap();
        let copied_data = dm.find("Inner2.D").unwrap();
        assert_eq!(
            dm.element(copied_len).unwrap().relation,
            Some(SizeRelation::bytes(copied_data))
        );
        assert_eq!(
            dm.serialize().unwrap().as_bytes(),
            b"\x05hello\x02xy\x02xy"
        );

        dm.reorder_children(root, &[1, 0, 2, 3]).unwrap();
        assert_eq!(dm.index_in_parent(len), Some(1));
        assert_eq!(dm.next_sibling(len), Some(block));
        assert!(dm.reorder_children(root, &[0]).is_err());
    }

    #[test]
    fn model_update_batches_cache() {
        let (mut dm, _, data) = packet();
        assert_eq!(dm.total_bits().unwrap(), 48);
        dm.begin_update();
        dm.set_mutated_value(data, Variant::Bytes(vec![0; 10]), MutationFlags::DEFAULT)
            .unwrap();
        dm.end_update();
        assert_eq!(dm.total_bits().unwrap(), 88);
    }
}
