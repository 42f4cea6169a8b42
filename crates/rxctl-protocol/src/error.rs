//! Error types for wire parsing and value selection

use thiserror::Error;

/// Errors that can occur while parsing a reply line
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Reply contained no tokens at all
    #[error("empty reply")]
    Empty,

    /// Wrong number of fields after splitting the payload
    #[error("expected {expected} fields, got {actual} in {payload:?}")]
    Arity {
        expected: usize,
        actual: usize,
        payload: String,
    },

    /// A field could not be converted to a number
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    /// A `min:max:step` triple was malformed
    #[error("invalid range: {0:?}")]
    InvalidRange(String),

    /// A module identifier was malformed
    #[error("invalid module id: {0:?}")]
    InvalidModuleId(String),

    /// An `[iface:]ip:port` destination was malformed
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A name was not found in an enumerated list
    #[error("unknown name {name:?}, expected one of {choices:?}")]
    UnknownName { name: String, choices: Vec<String> },
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Radio answered with an `ERR` sentinel
    #[error("command failed: {reply:?}")]
    CommandFailure { reply: String },

    /// Requested value is not admissible
    #[error("invalid value {value}: {reason}")]
    InvalidValue { value: f64, reason: String },
}
