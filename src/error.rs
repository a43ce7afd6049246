//! Error type shared by every subsystem
//!
//! All variants are fatal to the subsystem that raised them. Nothing in the
//! crate retries: a bad argument, a buffer/topology mismatch, or a broken
//! viewport is a programming or configuration error, not a transient fault.

use thiserror::Error;

/// Errors raised by generation, buffer sync, scheduling, and rendering
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter was outside its accepted range (node count, extent, config value)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer capacity, link indices, or target size disagree with the topology
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// The pipeline could not be initialised (viewport, GPU adapter, device)
    #[error("setup failed: {0}")]
    SetupFailure(String),

    /// An I/O error occurred while reading or writing a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file extension is not one we can read
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A config file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
