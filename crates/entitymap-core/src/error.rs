//! Error types shared by every entitymap crate.

use std::error::Error as StdError;
use std::fmt;

/// Result alias used throughout entitymap.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the repository engine and by backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid model/backend configuration, detected at registration time.
    Configuration(String),
    /// No record matched.
    NotFound {
        /// Model name.
        model: String,
        /// What was looked up.
        detail: String,
    },
    /// More than one record matched where exactly one was required.
    AmbiguousMatch {
        /// Model name.
        model: String,
        /// Number of matches.
        count: usize,
    },
    /// An identity disagrees with the identity-map entry it belongs to.
    IndexMismatch {
        /// Model name.
        model: String,
        /// Identity the caller asked for or the map holds.
        expected: String,
        /// Identity found in the data.
        actual: String,
    },
    /// The instance is not owned by this repository.
    NotBound(String),
    /// A property that the model config does not declare.
    UnknownProperty {
        /// Model name.
        model: String,
        /// Property name.
        property: String,
    },
    /// The operation is not valid in the instance's current lifecycle state.
    InvalidState(String),
    /// Reload refused because the instance has unsaved modifications.
    PendingChanges {
        /// Model name.
        model: String,
        /// Identity of the instance.
        index: String,
        /// Columns that differ from the last known backend data.
        columns: Vec<String>,
    },
    /// Storage failure reported by a backend; forwarded verbatim.
    Backend {
        /// Backend identifier.
        backend: String,
        /// Backend message.
        message: String,
    },
    /// (De)serialization of configuration or values failed.
    Serialization(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Shorthand for a backend error.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(model: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::NotFound {
            model: model.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for an unknown-property error.
    pub fn unknown_property(model: impl Into<String>, property: impl Into<String>) -> Self {
        Error::UnknownProperty {
            model: model.into(),
            property: property.into(),
        }
    }

    /// True for `NotFound`.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Error::NotFound { model, detail } => {
                write!(f, "{} not found: {}", model, detail)
            }
            Error::AmbiguousMatch { model, count } => {
                write!(f, "expected one {}, found {}", model, count)
            }
            Error::IndexMismatch {
                model,
                expected,
                actual,
            } => write!(
                f,
                "identity mismatch for {}: expected {}, got {}",
                model, expected, actual
            ),
            Error::NotBound(msg) => write!(f, "instance not bound to this repository: {}", msg),
            Error::UnknownProperty { model, property } => {
                write!(f, "unknown property {}.{}", model, property)
            }
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::PendingChanges {
                model,
                index,
                columns,
            } => write!(
                f,
                "{} {} has unsaved changes ({})",
                model,
                index,
                columns.join(", ")
            ),
            Error::Backend { backend, message } => {
                write!(f, "backend {} failed: {}", backend, message)
            }
            Error::Serialization(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl StdError for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
