//! Mutators bound to size indicators, changing the length of the data they describe.
//!
//! The `SizedData*` mutators resize the data and let the indicator follow, testing how a
//! target copes with unusual but consistent lengths. The `Sized*` mutators resize the data
//! while the indicator keeps its previous value, testing inconsistent lengths.

use crate::edgecases::IntegerEdgeCases;
use crate::error::*;
use crate::model::{DataModel, ElementId, ElementKind, LengthUnit};
use crate::mutator::*;
use crate::mutators::ensure_supported;
use crate::sized::{expand_to, max_size};
use crate::utils::Random;
use crate::variance::VarianceGenerator;

/// How the new lengths are produced.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SizedStrategy {
    /// Lengths around the integer boundaries, the indicator follows.
    DataEdgeCase,
    /// Lengths around the current one, the indicator follows.
    DataVariance,
    /// Lengths around the integer boundaries, the indicator keeps its value.
    EdgeCase,
    /// Lengths around the current one, the indicator keeps its value.
    Variance,
}

impl SizedStrategy {
    pub const ALL: [SizedStrategy; 4] = [
        SizedStrategy::DataEdgeCase,
        SizedStrategy::DataVariance,
        SizedStrategy::EdgeCase,
        SizedStrategy::Variance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SizedStrategy::DataEdgeCase => "SizedDataEdgeCase",
            SizedStrategy::DataVariance => "SizedDataVariance",
            SizedStrategy::EdgeCase => "SizedEdgeCase",
            SizedStrategy::Variance => "SizedVariance",
        }
    }

    /// Returns `true` if the indicator keeps its value.
    pub fn overrides_relation(&self) -> bool {
        matches!(self, SizedStrategy::EdgeCase | SizedStrategy::Variance)
    }
}

enum Lengths {
    Edges(IntegerEdgeCases),
    Variance(VarianceGenerator),
}

/// A size indicator mutator following one of the [`SizedStrategy`]s.
pub struct SizedMutator {
    strategy: SizedStrategy,
    count: usize,
    mutation: usize,
    lengths: Lengths,
}

impl SizedMutator {
    /// Returns `true` for mutable numbers whose size relation is in scope.
    pub fn supported(_strategy: SizedStrategy, model: &DataModel, id: ElementId) -> bool {
        match model.get(id) {
            Some(e) => {
                e.mutable
                    && matches!(e.kind, ElementKind::Number { .. })
                    && e.relation
                        .map(|r| model.is_attached(id) && model.is_attached(r.of))
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    pub fn new(strategy: SizedStrategy, model: &DataModel, id: ElementId) -> Result<Self> {
        ensure_supported(
            Self::supported(strategy, model, id),
            strategy.name(),
            model,
            id,
        )?;
        let Some(rel) = model.element(id)?.relation else {
            return Err(Error::Mutator(MutatorError::Unsupported(
                strategy.name(),
                model.full_name(id),
            )));
        };
        let n = hint_n(model, id, &[strategy.name()], 50)?;
        let max_bytes = max_size(model, rel.of)? as i128;
        let max = match rel.unit {
            LengthUnit::Bytes => max_bytes,
            LengthUnit::Bits => max_bytes * 8,
        };
        let current = (rel.from_bits(model.length_bits(rel.of)?) as i128).min(max);
        let lengths = match strategy {
            SizedStrategy::DataEdgeCase | SizedStrategy::EdgeCase => {
                Lengths::Edges(IntegerEdgeCases::new(0, max, n))
            }
            SizedStrategy::DataVariance | SizedStrategy::Variance => {
                Lengths::Variance(VarianceGenerator::new(current, 0, max, n, false))
            }
        };
        let count = match &lengths {
            Lengths::Edges(e) => e.count(),
            Lengths::Variance(v) => v.count(),
        };
        Ok(Self {
            strategy,
            count,
            mutation: 0,
            lengths,
        })
    }

    fn perform(&self, model: &mut DataModel, id: ElementId, length: i128) -> Result<MutationResult> {
        let name = self.strategy.name();
        if length < 0 {
            return Ok(skipped(name, model, id, "negative length"));
        }
        if !expand_to(model, id, length as u64, self.strategy.overrides_relation())? {
            return Ok(skipped(name, model, id, "size relation is out of scope"));
        }
        let of = model
            .element(id)?
            .relation
            .map(|r| r.of)
            .unwrap_or(id);
        let flags = model.element(of)?.flags();
        applied(name, model, of, flags)
    }
}

impl Mutator for SizedMutator {
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
        let (model, id) = target.element(self.strategy.name())?;
        let length = match &self.lengths {
            Lengths::Edges(e) => e.sequential(self.mutation),
            Lengths::Variance(v) => v.sequential(self.mutation),
        }
        .ok_or(Error::Mutator(MutatorError::IndexOutOfRange(
            self.strategy.name(),
            self.mutation,
            self.count,
        )))?;
        self.perform(model, id, length)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let (model, id) = target.element(self.strategy.name())?;
        let length = match &self.lengths {
            Lengths::Edges(e) => Some(e.random(rand)),
            Lengths::Variance(v) => v.random(rand),
        };
        match length {
            Some(length) => self.perform(model, id, length),
            None => Ok(skipped(self.strategy.name(), model, id, "no length left to try")),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Tests
