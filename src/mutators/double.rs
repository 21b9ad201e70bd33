//! Mutators producing floating point values.

use crate::bits::BitStream;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, MutationFlags, Variant};
use crate::mutator::*;
use crate::mutators::ensure_supported;
use crate::utils::Random;
use crate::variance::DoubleVarianceGenerator;

/// Special single precision values.
pub const SPECIAL_FLOATS: &[f64] = &[
    0.0,
    -0.0,
    f32::MIN as f64,
    f32::MAX as f64,
    f32::EPSILON as f64,
    -(f32::EPSILON as f64),
    f32::MIN_POSITIVE as f64,
    1.401298464324817e-45, // Smallest subnormal single.
    f32::INFINITY as f64,
    f32::NEG_INFINITY as f64,
    f64::NAN,
    1.0,
    -1.0,
    0.5,
    16777216.0,
    16777217.0,
];

/// Special double precision values.
pub const SPECIAL_DOUBLES: &[f64] = &[
    0.0,
    -0.0,
    f64::MIN,
    f64::MAX,
    f64::EPSILON,
    -f64::EPSILON,
    f64::MIN_POSITIVE,
    5e-324, // Smallest subnormal double.
    f64::INFINITY,
    f64::NEG_INFINITY,
    f64::NAN,
    1.0,
    -1.0,
    0.5,
    9007199254740992.0,
    9007199254740993.0,
];

/// Number of draws a uniform random mutator is worth.
const RANDOM_COUNT: usize = 5000;

/// Probability for [`DoubleRandom`] to emit a special value instead of a random bit pattern.
const SPECIAL_PROBABILITY: f64 = 0.1;

/// Returns the width of a mutable double element.
fn double_bits(model: &DataModel, id: ElementId) -> Option<u32> {
    match model.get(id) {
        Some(e) if e.mutable => match e.kind {
            ElementKind::Double { bits } => Some(bits),
            _ => None,
        },
        _ => None,
    }
}

/// Table of special values used for a double of the given width.
/// 32-bit elements draw from the double precision table and 64-bit ones from the single
/// precision table.
fn special_table(bits: u32) -> &'static [f64] {
    if bits == 32 {
        SPECIAL_DOUBLES
    } else {
        SPECIAL_FLOATS
    }
}

fn set_double(name: &str, model: &mut DataModel, id: ElementId, value: f64) -> Result<MutationResult> {
    model.set_mutated_value(id, Variant::Double(value), MutationFlags::DEFAULT)?;
    applied(name, model, id, MutationFlags::DEFAULT)
}

// -----------------------------------------------------------------------------------------------
// DoubleEdgeCase

/// Sets a double to special values: zeros, limits, infinities, NaN and precision boundaries.
pub struct DoubleEdgeCase {
    count: usize,
    mutation: usize,
    table: &'static [f64],
}

impl DoubleEdgeCase {
    pub const NAME: &'static str = "DoubleEdgeCase";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        double_bits(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        let bits = double_bits(model, id);
        ensure_supported(bits.is_some(), Self::NAME, model, id)?;
        let table = special_table(bits.unwrap_or(64));
        Ok(Self {
            count: table.len(),
            mutation: 0,
            table,
        })
    }
}

impl Mutator for DoubleEdgeCase {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = *self.table.get(self.mutation).ok_or(Error::Mutator(
            MutatorError::IndexOutOfRange(Self::NAME, self.mutation, self.count),
        ))?;
        set_double(Self::NAME, model, id, v)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        let v = *rand.choose(self.table).unwrap_or(&0.0);
        set_double(Self::NAME, model, id, v)
    }
}

// -----------------------------------------------------------------------------------------------
// DoubleVariance

/// Sets a double to values close to its current one.
pub struct DoubleVariance {
    count: usize,
    mutation: usize,
    bits: u32,
}

impl DoubleVariance {
    pub const NAME: &'static str = "DoubleVariance";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        double_bits(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        let bits = double_bits(model, id);
        ensure_supported(bits.is_some(), Self::NAME, model, id)?;
        let n = hint_n(model, id, &[Self::NAME], 50)?;
        Ok(Self {
            count: 2 * n,
            mutation: 0,
            bits: bits.unwrap_or(64),
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        let value = model.double_value(id)?;
        let (min, max) = if self.bits == 32 {
            (f32::MIN as f64, f32::MAX as f64)
        } else {
            (f64::MIN, f64::MAX)
        };
        let generator = DoubleVarianceGenerator::new(value, min, max);
        // Narrowing to single precision can round a draw back to the current value.
        let current = if self.bits == 32 { value as f32 as f64 } else { value };
        for _ in 0..16 {
            let Some(v) = generator.random(rand) else {
                break;
            };
            let v = if self.bits == 32 { v as f32 as f64 } else { v };
            if v != current {
                return set_double(Self::NAME, model, id, v);
            }
        }
        Ok(skipped(Self::NAME, model, id, "no distinct value found"))
    }
}

impl Mutator for DoubleVariance {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        self.perform(model, id, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        self.perform(model, id, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// DoubleRandom

/// Sets a double to a random bit pattern of its width, NaNs and subnormals included.
pub struct DoubleRandom {
    count: usize,
    mutation: usize,
    bits: u32,
}

impl DoubleRandom {
    pub const NAME: &'static str = "DoubleRandom";

    pub fn supported(model: &DataModel, id: ElementId) -> bool {
        double_bits(model, id).is_some()
    }

    pub fn new(model: &DataModel, id: ElementId) -> Result<Self> {
        let bits = double_bits(model, id);
        ensure_supported(bits.is_some(), Self::NAME, model, id)?;
        Ok(Self {
            count: RANDOM_COUNT,
            mutation: 0,
            bits: bits.unwrap_or(64),
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, rand: &mut Random) -> Result<MutationResult> {
        if rand.next_double() < SPECIAL_PROBABILITY {
            let v = *rand.choose(special_table(self.bits)).unwrap_or(&0.0);
            return set_double(Self::NAME, model, id, v);
        }
        let pattern = BitStream::from_bits(rand.u64(), self.bits);
        let flags = MutationFlags::DEFAULT | MutationFlags::TYPE_TRANSFORM;
        model.set_mutated_raw(id, pattern, flags)?;
        applied(Self::NAME, model, id, flags)
    }
}

impl Mutator for DoubleRandom {
    mutator_index!(Self::NAME);

    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        self.perform(model, id, rand)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(Self::NAME)?;
        self.perform(model, id, rand)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests
