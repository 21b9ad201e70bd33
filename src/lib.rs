//! Structure-aware mutation engine for model-based fuzzers.
//!
//! Inputs are described by a [`DataModel`](model::DataModel), a tree of typed elements (numbers,
//! strings, blobs, blocks, choices and arrays) that may be tied together by size relations, and
//! protocols by a [`StateModel`](state::StateModel), a list of states made of actions. Mutators
//! bind to a single element (or to the state model), announce how many distinct mutations they
//! can produce and apply them either sequentially or at random, while keeping the serialized
//! model within a configured maximum size.
//!
//! ## Internals
//!
//! It is recommended to read the documentation in the following order.
//!
//! 1. Models
//!     1. [Bit Streams](bits::BitStream)
//!     2. [Data Model](model::DataModel)
//!     3. [State Model](state::StateModel)
//!  2. [Random Source](utils::Random)
//!  3. [Mutator](mutator::Mutator)
//!  4. Generators
//!     1. [Size Helpers](sized)
//!     2. [Edge Cases](edgecases)
//!     3. [Variance](variance)
//!  5. [Mutators](mutators)
//!  6. [Registry](registry)
//!  7. [Config](config::Config)
//!  8. [Runner](runner::MutatorRunner)
//!
//! ## Getting Started
//!
//! The following example builds a length-prefixed packet and lists the values produced by the
//! `SizedDataVariance` mutator bound to the length field. The length always describes the data
//! that follows it, which grows and shrinks around its current size.
//!
//! ```
//! use structmut::config::Config;
//! use structmut::model::{DataModel, Element, SizeRelation};
//! use structmut::runner::MutatorRunner;
//!
//! let mut dm = DataModel::new("Packet");
//! let root = dm.root();
//! let len = dm.add(root, Element::number("Length", 8, false, 0)).unwrap();
//! let data = dm.add(root, Element::blob("Data", b"hello")).unwrap();
//! dm.element_mut(len).unwrap().relation = Some(SizeRelation::bytes(data));
//!
//! let config = Config::builder().seed(0xdeadbeef).build();
//! let runner = MutatorRunner::with_config("SizedDataVariance", config).unwrap();
//! for mutation in runner.sequential(&dm, "Packet.Length").unwrap() {
//!     let output = mutation.output().unwrap();
//!     if !mutation.is_skipped() {
//!         assert_eq!(output.as_bytes()[0] as u64 + 1, output.len_bytes());
//!     }
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade. Skipped mutations are reported at the `debug`
//! level and every applied mutation is dumped at the `trace` level. Any logger implementation
//! can be installed by the application, for example `env_logger`:
//!
//! ```console
//! RUST_LOG=structmut=trace cargo test
//! ```

pub mod bits;
pub mod config;
pub mod edgecases;
pub mod error;
pub mod model;
pub mod mutator;
pub mod mutators;
pub mod registry;
pub mod runner;
pub mod sized;
pub mod state;
pub mod utils;
pub mod variance;
