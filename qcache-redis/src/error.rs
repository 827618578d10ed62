//! Error types for the Redis storage.
//!
//! [`ConnectionError`] describes why a round-trip with the store failed. It
//! never reaches the cache filter directly: operations turn it into
//! [`CacheResult::Error`](qcache_core::CacheResult::Error), and token creation
//! wraps it into a [`StorageError`].

use qcache_core::StorageError;
use redis::RedisError;

use crate::connection::Endpoint;

/// Failure to exchange data with the store.
///
/// The variants follow the failure classes of the wire client, each with a
/// human readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Reading from or writing to the socket failed.
    #[error("redis I/O error: {0}")]
    Io(String),

    /// The server closed the connection.
    #[error("server closed the connection")]
    Eof,

    /// The byte stream could not be parsed as replies.
    #[error("error while parsing the protocol: {0}")]
    Protocol(String),

    /// Anything else, including failures to resolve the host.
    #[error("unspecified error (possibly unresolved hostname): {0}")]
    Other(String),
}

impl From<RedisError> for ConnectionError {
    fn from(error: RedisError) -> Self {
        if error.is_connection_dropped() {
            ConnectionError::Eof
        } else if error.is_io_error() || error.is_timeout() {
            ConnectionError::Io(error.to_string())
        } else if error.is_connection_refusal() {
            ConnectionError::Other(error.to_string())
        } else {
            ConnectionError::Protocol(error.to_string())
        }
    }
}

impl ConnectionError {
    /// Wraps the error for a failed token or storage construction.
    pub fn into_storage_error(self, endpoint: &Endpoint) -> StorageError {
        StorageError::Connection {
            endpoint: endpoint.to_string(),
            source: Box::new(self),
        }
    }
}
