//! Error types for corral

use thiserror::Error;

/// Main error type for corral
#[derive(Error, Debug)]
pub enum CorralError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler lifecycle misuse: start() called twice
    #[error("Scheduler already started")]
    AlreadyStarted,

    /// Task body failure, surfaced out of band by the engine
    #[error("Task error: {0}")]
    Task(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for corral operations
pub type CorralResult<T> = Result<T, CorralError>;

impl From<toml::de::Error> for CorralError {
    fn from(err: toml::de::Error) -> Self {
        CorralError::Config(err.to_string())
    }
}
