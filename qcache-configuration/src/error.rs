use qcache_core::StorageError;
use thiserror::Error;

/// Failure to turn configuration into a live storage.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML, or does not match the schema.
    #[error("invalid cache configuration: {0}")]
    Parse(String),

    /// The `storage` names an implementation that is not available.
    #[error("storage '{0}' is not available")]
    UnsupportedStorage(String),

    /// The storage rejected its configuration.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
