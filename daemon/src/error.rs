//! Error types for the host process

use thiserror::Error;

/// Errors raised by the HTTP host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Server error: {0}")]
    Server(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] spica_core::EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;
