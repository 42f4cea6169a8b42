//! Simulator errors

use thiserror::Error;

/// Errors from serving a simulated radio
#[derive(Debug, Error)]
pub enum SimError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A holder of the radio state panicked
    #[error("simulated radio state poisoned")]
    Poisoned,

    /// The serving task panicked or was cancelled
    #[error("simulated radio task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SimError>;
