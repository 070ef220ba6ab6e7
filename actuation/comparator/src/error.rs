use std::io;

use thiserror::Error;

/// Errors raised by the comparator core.
#[derive(Debug, Error)]
pub enum ComparatorError {
    /// Configuration rejected at load or validation time.
    #[error("configuration error: {0}")]
    Config(String),
    /// An envelope could not be decoded into the requested message.
    #[error("decode error: {0}")]
    Decode(String),
    /// The report sink failed; fatal for the sampler.
    #[error("report sink failed: {0}")]
    Sink(#[source] io::Error),
    /// The transport rejected a subscription or publish.
    #[error("transport error: {0}")]
    Transport(String),
    /// Any other I/O failure (configuration files, logs).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for comparator operations.
pub type Result<T, E = ComparatorError> = std::result::Result<T, E>;
