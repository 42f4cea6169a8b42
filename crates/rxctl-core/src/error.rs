//! Error types for the controller

use rxctl_protocol::{ParseError, ProtocolError};
use thiserror::Error;

use crate::transport::Phase;

/// Result alias used throughout the controller
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur while controlling a radio
#[derive(Debug, Error)]
pub enum ControlError {
    /// No echo or no reply within the transport timeout
    #[error("timed out in {phase} for `{command}`")]
    TransportTimeout {
        /// Request line, without terminator
        command: String,
        /// Phase that timed out
        phase: Phase,
    },

    /// The radio answered with `ERR`
    #[error("{module} {verb} failed: {reply}")]
    CommandFailure {
        /// Module id
        module: String,
        /// Opcode
        verb: String,
        /// Literal reply
        reply: String,
    },

    /// A reply could not be decoded
    #[error("{module} {verb}: cannot parse {reply:?}: {reason}")]
    ParseFailure {
        /// Module id
        module: String,
        /// Opcode
        verb: String,
        /// Literal reply
        reply: String,
        /// Decoder message
        reason: String,
    },

    /// A set produced output where none was expected
    #[error("unexpected output for `{command}`: {reply:?}")]
    UnexpectedOutput {
        /// Request line, without terminator
        command: String,
        /// Literal reply
        reply: String,
    },

    /// A requested value is not admissible
    #[error("{module} {verb}: invalid value {value}: {reason}")]
    InvalidValue {
        /// Module id
        module: String,
        /// Opcode
        verb: String,
        /// Requested value as given
        value: String,
        /// Why it was refused
        reason: String,
    },

    /// The radio's network link is slower than required
    #[error("{module} link rate {rate} bit/s is below the required {minimum} bit/s")]
    ConnectionRateFailure {
        /// Network module id
        module: String,
        /// Reported rate
        rate: u64,
        /// Configured minimum
        minimum: u64,
    },

    /// A validated set never read back the requested value
    #[error("{module} {verb} did not read back {requested}")]
    ValidationFailed {
        /// Module id
        module: String,
        /// Opcode
        verb: String,
        /// Requested value as given
        requested: String,
    },

    /// The module class has no such capability
    #[error("{module} does not implement {verb}")]
    NotImplemented {
        /// Module id
        module: String,
        /// Opcode or capability
        verb: String,
    },

    /// No module with this id
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// No channel with this index
    #[error("channel not found: {0}")]
    ChannelNotFound(usize),

    /// A resource pool has no free entries
    #[error("no free {0} available")]
    PoolExhausted(&'static str),

    /// The dataflow graph does not allow the requested change
    #[error("topology error: {0}")]
    Topology(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error outside a module context
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ControlError {
    /// Attach a module context to a protocol-level error
    pub fn from_protocol(module: &str, verb: &str, reply: &str, err: ProtocolError) -> Self {
        match err {
            ProtocolError::CommandFailure { reply } => Self::CommandFailure {
                module: module.into(),
                verb: verb.into(),
                reply,
            },
            ProtocolError::Parse(e) => Self::parse(module, verb, reply, e),
            ProtocolError::InvalidValue { value, reason } => Self::InvalidValue {
                module: module.into(),
                verb: verb.into(),
                value: value.to_string(),
                reason,
            },
        }
    }

    /// Build a parse failure
    pub fn parse(module: &str, verb: &str, reply: &str, err: ParseError) -> Self {
        Self::ParseFailure {
            module: module.into(),
            verb: verb.into(),
            reply: reply.into(),
            reason: err.to_string(),
        }
    }

    /// Build an invalid-value error
    pub fn invalid(
        module: &str,
        verb: &str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            module: module.into(),
            verb: verb.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the radio could not be reached at all
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransportTimeout { .. })
    }

    /// Whether construction must stop on this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportTimeout { .. } | Self::ConnectionRateFailure { .. } | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_gain_context() {
        let err = ControlError::from_protocol(
            "RCV:1",
            "FRQ",
            "RCV:1 FRQ ERR E_RANGE",
            ProtocolError::CommandFailure {
                reply: "RCV:1 FRQ ERR E_RANGE".into(),
            },
        );
        assert!(matches!(err, ControlError::CommandFailure { ref module, .. } if module == "RCV:1"));
        assert_eq!(err.to_string(), "RCV:1 FRQ failed: RCV:1 FRQ ERR E_RANGE");

        let err = ControlError::from_protocol(
            "WBDDC:1",
            "DEC",
            "",
            ProtocolError::InvalidValue {
                value: 3.0,
                reason: "not declared".into(),
            },
        );
        assert!(matches!(err, ControlError::InvalidValue { ref value, .. } if value == "3"));
    }

    #[test]
    fn test_fatal_classification() {
        let timeout = ControlError::TransportTimeout {
            command: "CON IDN?".into(),
            phase: Phase::AwaitingEcho,
        };
        assert!(timeout.is_fatal());
        assert!(timeout.is_timeout());
        assert!(timeout.to_string().contains("echo"));
        assert!(!ControlError::ModuleNotFound("OUT:9".into()).is_fatal());
    }
}
