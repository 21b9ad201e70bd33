//! Contains all error types that can be returned by this crate.
//!
//! A mutation that cannot be applied to the current shape of a model (output budget exhausted,
//! size indicator too narrow, no value left to emit) is not an error: it is reported as
//! [`MutationResult::Skipped`](crate::mutator::MutationResult::Skipped). The errors below are
//! configuration or programming defects that abort the current iteration.

use std::error;
use std::fmt;

/// Convenient `Result` type for custom errors.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// Errors - General
// -----------------------------------------------------------------------------------------------

/// Main error structure which is just a simple wrapper for all errors that can be returned by the
/// mutation engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Configuration-related errors.
    Config(ConfigError),
    /// Data model-related errors.
    Model(ModelError),
    /// Mutator-related errors.
    Mutator(MutatorError),
    /// State model-related errors.
    State(StateError),
    /// Generic user-defined errors.
    Generic(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "[Config error] {}", e),
            Error::Model(e) => write!(f, "[Model error] {}", e),
            Error::Mutator(e) => write!(f, "[Mutator error] {}", e),
            Error::State(e) => write!(f, "[State error] {}", e),
            Error::Generic(e) => write!(f, "[Error] {}", e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<ModelError> for Error {
    fn from(error: ModelError) -> Self {
        Error::Model(error)
    }
}

impl From<MutatorError> for Error {
    fn from(error: MutatorError) -> Self {
        Error::Mutator(error)
    }
}

impl From<StateError> for Error {
    fn from(error: StateError) -> Self {
        Error::State(error)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(error: std::string::FromUtf8Error) -> Self {
        Error::Model(ModelError::InvalidEncoding(format!("{}", error)))
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Config
// -----------------------------------------------------------------------------------------------

/// Configuration-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A hint expected to hold an unsigned integer holds something else (hint name, value).
    InvalidHintNumber(String, String),
    /// A hint expected to hold a boolean holds something else (hint name, value).
    InvalidHintBool(String, String),
    /// An entry of a value list hint could not be converted to the element's type
    /// (hint name, entry).
    InvalidHintValue(String, String),
    /// No mutator is registered under this name.
    UnknownMutator(String),
    /// User-defined config error.
    Generic(String),
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidHintNumber(h, v) => write!(
                f,
                "hint '{}' has an invalid value '{}', must be an unsigned integer",
                h, v
            ),
            ConfigError::InvalidHintBool(h, v) => write!(
                f,
                "hint '{}' has an invalid value '{}', must be a boolean",
                h, v
            ),
            ConfigError::InvalidHintValue(h, v) => {
                write!(f, "hint '{}' contains an invalid entry '{}'", h, v)
            }
            ConfigError::UnknownMutator(n) => write!(f, "could not find mutator named '{}'", n),
            ConfigError::Generic(s) => write!(f, "{}", s),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Model
// -----------------------------------------------------------------------------------------------

/// Data model-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelError {
    /// The element identifier does not belong to this model.
    InvalidElement(usize),
    /// The operation requires a container element.
    NotAContainer(String),
    /// The element has no parent.
    NoParent(String),
    /// The child index is out of bounds (element, index).
    ChildOutOfBounds(String, usize),
    /// No element can be found at this path.
    PathNotFound(String),
    /// The value does not match the element's type (element, expected type).
    TypeMismatch(String, &'static str),
    /// A string value could not be decoded.
    InvalidEncoding(String),
    /// User-defined model error.
    Generic(String),
}

impl error::Error for ModelError {}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidElement(i) => write!(f, "invalid element identifier #{}", i),
            ModelError::NotAContainer(n) => write!(f, "element '{}' is not a container", n),
            ModelError::NoParent(n) => write!(f, "element '{}' has no parent", n),
            ModelError::ChildOutOfBounds(n, i) => {
                write!(f, "child index {} out of bounds for element '{}'", i, n)
            }
            ModelError::PathNotFound(p) => write!(f, "no element found at '{}'", p),
            ModelError::TypeMismatch(n, t) => {
                write!(f, "element '{}' expects a value of type {}", n, t)
            }
            ModelError::InvalidEncoding(s) => write!(f, "invalid string encoding: {}", s),
            ModelError::Generic(s) => write!(f, "{}", s),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - Mutator
// -----------------------------------------------------------------------------------------------

/// Mutator-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MutatorError {
    /// The mutator was invoked with a target kind it does not operate on (mutator name).
    WrongTarget(&'static str),
    /// The mutator was instantiated for an element it does not support (mutator name, element).
    Unsupported(&'static str, String),
    /// The mutation index is out of the mutator's range (mutator name, index, count).
    IndexOutOfRange(&'static str, usize, usize),
    /// User-defined mutator error.
    Generic(String),
}

impl error::Error for MutatorError {}

impl fmt::Display for MutatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutatorError::WrongTarget(n) => {
                write!(f, "mutator '{}' was invoked with the wrong target kind", n)
            }
            MutatorError::Unsupported(n, e) => {
                write!(f, "mutator '{}' does not support element '{}'", n, e)
            }
            MutatorError::IndexOutOfRange(n, i, c) => write!(
                f,
                "mutation index {} is out of range for mutator '{}' (count: {})",
                i, n, c
            ),
            MutatorError::Generic(s) => write!(f, "{}", s),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// Errors - State
// -----------------------------------------------------------------------------------------------

/// State model-related errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateError {
    /// The state identifier does not belong to this model.
    InvalidState(usize),
    /// The action identifier does not belong to this model.
    InvalidAction(usize),
    /// The state model has no state to start from.
    Empty,
    /// User-defined state error.
    Generic(String),
}

impl error::Error for StateError {}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::InvalidState(i) => write!(f, "invalid state identifier #{}", i),
            StateError::InvalidAction(i) => write!(f, "invalid action identifier #{}", i),
            StateError::Empty => write!(f, "the state model is empty"),
            StateError::Generic(s) => write!(f, "{}", s),
        }
    }
}
