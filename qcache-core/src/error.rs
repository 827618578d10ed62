//! Errors raised while constructing storages and tokens.
//!
//! Per-operation failures are never reported through these types. They reach
//! the caller as [`CacheResult::Error`](crate::CacheResult::Error) in the
//! operation's callback.

use thiserror::Error;

/// Synchronous failure of a storage or token construction.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The location arguments could not be parsed.
    #[error("expected arguments of HOST:PORT format, got '{0}'")]
    InvalidArguments(String),

    /// The port part of the location is not a positive integer.
    #[error("the provided arguments '{0}' do not translate into a valid host:port combination")]
    InvalidPort(String),

    /// The remote store could not be reached.
    #[error("could not connect to {endpoint}: {source}")]
    Connection {
        /// Location that was tried.
        endpoint: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No async runtime is available to run the blocking pool on.
    #[error("a tokio runtime is required to run storage operations")]
    NoRuntime,

    /// Any other construction failure.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}
