//! Drives a single mutator against a model.
//!
//! The runner instantiates a mutator by name on the element found at a given path and applies
//! its mutations, each one on a fresh copy of the model, so that the outputs can be inspected
//! independently. This is how mutators are exercised outside of a full fuzzing engine.
//!
//! # Example
//!
//! ```
//! use structmut::model::{DataModel, Element, StringEncoding};
//! use structmut::runner::MutatorRunner;
//!
//! let mut dm = DataModel::new("Root");
//! let root = dm.root();
//! dm.add(root, Element::string("Str", StringEncoding::Ascii, "Hello")).unwrap();
//!
//! let runner = MutatorRunner::new("StringCaseUpper").unwrap();
//! assert!(runner.is_supported(&dm, "Root.Str").unwrap());
//! let mutations = runner.sequential(&dm, "Root.Str").unwrap();
//! assert_eq!(mutations.len(), 1);
//! assert_eq!(mutations[0].value().unwrap().as_bytes(), b"HELLO");
//! ```

use log::{info, trace};

use crate::bits::BitStream;
use crate::config::Config;
use crate::error::*;
use crate::model::{DataModel, ElementId};
use crate::mutator::{MutationResult, Mutator, Target};
use crate::registry::{self, Entry};
use crate::utils::Random;

/// Outcome of a single mutation applied by a [`MutatorRunner`].
#[derive(Clone, Debug)]
pub struct Mutation {
    /// Mutation index for sequential runs, iteration number for random ones.
    pub index: usize,
    pub result: MutationResult,
    /// The mutated copy of the model.
    pub model: DataModel,
    /// The element the mutator is bound to.
    pub element: ElementId,
}

impl Mutation {
    /// New value of the mutated element, if the mutation was applied.
    pub fn value(&self) -> Option<&BitStream> {
        self.result.value()
    }

    /// Serialization of the whole mutated model.
    pub fn output(&self) -> Result<BitStream> {
        self.model.serialize()
    }

    pub fn is_skipped(&self) -> bool {
        self.result.is_skipped()
    }
}

/// Applies the mutations of a data model mutator.
pub struct MutatorRunner {
    entry: Entry,
    config: Config,
}

impl MutatorRunner {
    /// Creates a runner for the mutator registered as `name`, using the default configuration.
    pub fn new(name: &str) -> Result<Self> {
        Self::with_config(name, Config::default())
    }

    pub fn with_config(name: &str, config: Config) -> Result<Self> {
        let entry = registry::find(name)
            .ok_or_else(|| Error::Config(ConfigError::UnknownMutator(name.to_string())))?;
        Ok(Self { entry, config })
    }

    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copies the model with the session's output bound installed and resolves `path`.
    fn prepare(&self, model: &DataModel, path: &str) -> Result<(DataModel, ElementId)> {
        let mut model = model.clone();
        self.config.apply(&mut model);
        let id = model.find(path)?;
        Ok((model, id))
    }

    /// Returns `true` if the mutator can be bound to the element at `path`.
    pub fn is_supported(&self, model: &DataModel, path: &str) -> Result<bool> {
        let (model, id) = self.prepare(model, path)?;
        Ok((self.entry.supported)(&model, id))
    }

    /// Instantiates the mutator for the element at `path`.
    pub fn create(&self, model: &DataModel, path: &str) -> Result<Box<dyn Mutator>> {
        let (model, id) = self.prepare(model, path)?;
        (self.entry.create)(&model, id)
    }

    fn record(&self, index: usize, result: MutationResult, model: DataModel, element: ElementId) -> Mutation {
        if self.config.trace_mutations() {
            trace!("{} #{}:\n{}", self.entry.name, index, model);
        }
        Mutation {
            index,
            result,
            model,
            element,
        }
    }

    /// Applies every sequential mutation, in order. The random generator of mutation `i` is
    /// derived from the session's seed and `i + 1`.
    pub fn sequential(&self, model: &DataModel, path: &str) -> Result<Vec<Mutation>> {
        let (model, id) = self.prepare(model, path)?;
        let mut mutator = (self.entry.create)(&model, id)?;
        info!("{}: {} sequential mutation(s)", self.entry.name, mutator.count());
        let mut mutations = Vec::with_capacity(mutator.count());
        for i in 0..mutator.count() {
            let mut copy = model.clone();
            let mut rand = Random::for_iteration(self.config.seed(), i as u64 + 1);
            mutator.set_mutation(i);
            let result = mutator.sequential_mutation(Target::Element(&mut copy, id), &mut rand)?;
            mutations.push(self.record(i, result, copy, id));
        }
        Ok(mutations)
    }

    /// Applies `n` random mutations drawn from a single random generator seeded with the
    /// session's seed.
    pub fn random(&self, n: usize, model: &DataModel, path: &str) -> Result<Vec<Mutation>> {
        let (model, id) = self.prepare(model, path)?;
        let mut mutator = (self.entry.create)(&model, id)?;
        info!("{}: {} random mutation(s)", self.entry.name, n);
        let mut rand = Random::new(self.config.seed());
        let mut mutations = Vec::with_capacity(n);
        for i in 0..n {
            let mut copy = model.clone();
            let result = mutator.random_mutation(Target::Element(&mut copy, id), &mut rand)?;
            mutations.push(self.record(i, result, copy, id));
        }
        Ok(mutations)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, StringEncoding};

    fn model() -> DataModel {
        let mut dm = DataModel::new("Root");
        let root = dm.root();
        dm.add(root, Element::string("Str", StringEncoding::Ascii, "Hello"))
            .unwrap();
        dm.add(root, Element::number("Num", 8, false, 7)).unwrap();
        dm
    }

    fn config() -> Config {
        Config::builder().seed(0xa5a5a5a5a5a5a5).build()
    }

    #[test]
    fn runner_unknown_mutator() {
        assert_eq!(
            MutatorRunner::new("Nope").err(),
            Some(Error::Config(ConfigError::UnknownMutator("Nope".to_string())))
        );
    }

    #[test]
    fn runner_support_and_paths() {
        let dm = model();
        let runner = MutatorRunner::with_config("NumberEdgeCase", config()).unwrap();
        assert!(runner.is_supported(&dm, "Root.Num").unwrap());
        assert!(!runner.is_supported(&dm, "Root.Str").unwrap());
        assert!(runner.is_supported(&dm, "Root.Missing").is_err());
        assert!(runner.create(&dm, "Root.Str").is_err());
    }

    #[test]
    fn runner_sequential_is_reproducible() {
        let dm = model();
        let runner = MutatorRunner::with_config("StringCaseRandom", config()).unwrap();
        let a = runner.sequential(&dm, "Root.Str").unwrap();
        let b = runner.sequential(&dm, "Root.Str").unwrap();
        assert_eq!(a.len(), 5);
        for (ma, mb) in a.iter().zip(b.iter()) {
            assert_eq!(ma.index, mb.index);
            assert_eq!(ma.result, mb.result);
            let out = ma.output().unwrap();
            assert_eq!(out.len_bytes(), 6);
            assert_eq!(&out.as_bytes()[..5], ma.value().unwrap().as_bytes());
            assert_eq!(out.as_bytes()[5], 7);
        }
        // The original model is left untouched.
        assert_eq!(dm.serialize().unwrap().as_bytes(), b"Hello\x07");
    }

    #[test]
    fn runner_random() {
        let dm = model();
        let runner = MutatorRunner::with_config("NumberRandom", config()).unwrap();
        let mutations = runner.random(20, &dm, "Root.Num").unwrap();
        assert_eq!(mutations.len(), 20);
        assert!(mutations.iter().all(|m| !m.is_skipped()));
        assert!(mutations
            .iter()
            .all(|m| m.output().unwrap().as_bytes()[..5] == *b"Hello"));
    }
}
