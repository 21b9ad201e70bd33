//! Concrete mutation strategies.
//!
//! Every data model mutator exposes the same three entry points, which the
//! [`registry`](crate::registry) wires together:
//!
//!  * `supported(model, id)`, deciding whether the mutator can be bound to an element;
//!  * `new(model, id)`, computing the mutation count from the element's current shape;
//!  * the [`Mutator`](crate::mutator::Mutator) implementation itself.
//!
//! State model mutators follow the same pattern with a [`StateModel`](crate::state::StateModel)
//! in place of the element.

pub mod action;
pub mod array;
pub mod blob;
pub mod double;
pub mod element;
pub mod encoding;
pub mod number;
pub mod sized;
pub mod string;

use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, StringEncoding};

/// Fails with [`MutatorError::Unsupported`] if `supported` is `false`.
pub(crate) fn ensure_supported(
    supported: bool,
    name: &'static str,
    model: &DataModel,
    id: ElementId,
) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(Error::Mutator(MutatorError::Unsupported(
            name,
            model.full_name(id),
        )))
    }
}

/// Returns `true` if the element exists and is mutable.
pub(crate) fn is_mutable(model: &DataModel, id: ElementId) -> bool {
    model.get(id).map(|e| e.mutable).unwrap_or(false)
}

/// Returns the encoding of a mutable string element.
pub(crate) fn string_encoding(model: &DataModel, id: ElementId) -> Option<StringEncoding> {
    match model.get(id) {
        Some(e) if e.mutable => match e.kind {
            ElementKind::String { encoding } => Some(encoding),
            _ => None,
        },
        _ => None,
    }
}

/// Number of bytes the widest character of `value` takes once encoded. Empty strings are
/// grown with `A`s, which take a single code unit.
pub(crate) fn widest_char(encoding: StringEncoding, value: &str) -> u64 {
    let mut buf = [0u8; 4];
    value
        .chars()
        .map(|c| encoding.encode(c.encode_utf8(&mut buf)).len() as u64)
        .max()
        .unwrap_or(encoding.code_unit() as u64)
        .max(1)
}
