//! Cache storage section.

use std::sync::Arc;
use std::time::Duration;

use qcache_core::{
    DEFAULT_INVALIDATE_ATTEMPTS, DEFAULT_POOL_THREADS, Storage, StorageConfig, ThreadModel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Name of the Redis storage implementation.
pub const STORAGE_REDIS: &str = "storage_redis";

fn default_pool_threads() -> usize {
    DEFAULT_POOL_THREADS
}

fn default_invalidate_attempts() -> u32 {
    DEFAULT_INVALIDATE_ATTEMPTS
}

/// Configuration of one cache and the storage backing it.
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CacheStorage {
    /// Name of the cache.
    pub name: String,
    /// Storage implementation, e.g. `storage_redis`.
    pub storage: String,
    /// Implementation specific arguments; `HOST:PORT` for Redis.
    #[serde(default)]
    pub storage_options: String,
    /// Age after which a value must not be served; zero means never.
    #[serde(default)]
    pub hard_ttl: u64,
    /// Age after which a value is stale; defaults to `hard_ttl`.
    #[serde(default)]
    pub soft_ttl: Option<u64>,
    /// Cap on total value size in bytes; zero means none.
    #[serde(default)]
    pub max_size: u64,
    /// Cap on number of values; zero means none.
    #[serde(default)]
    pub max_count: u64,
    /// How the cache filter shares the storage.
    #[serde(default)]
    pub thread_model: ThreadModel,
    /// Limit on establishing a connection; the storage's default when unset.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    /// Limit on each read and write of a connection; the storage's default
    /// when unset.
    #[serde(default)]
    pub io_timeout: Option<u64>,
    /// Number of store operations running at once.
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,
    /// Attempts of an invalidation racing with writers.
    #[serde(default = "default_invalidate_attempts")]
    pub invalidate_attempts: u32,
}

impl CacheStorage {
    /// Parses a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_saphyr::from_str(yaml).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Configuration handed to the storage.
    pub fn storage_config(&self) -> StorageConfig {
        let hard_ttl = Duration::from_millis(self.hard_ttl);
        StorageConfig {
            thread_model: self.thread_model,
            soft_ttl: self.soft_ttl.map_or(hard_ttl, Duration::from_millis),
            hard_ttl,
            max_count: self.max_count,
            max_size: self.max_size,
        }
    }

    /// Creates the configured storage.
    ///
    /// Must be called within a tokio runtime.
    pub fn into_storage(self) -> Result<Arc<dyn Storage>, ConfigError> {
        debug!(name = %self.name, storage = %self.storage, "creating cache storage");
        match self.storage.as_str() {
            STORAGE_REDIS => self.into_redis(),
            other => Err(ConfigError::UnsupportedStorage(other.to_owned())),
        }
    }

    #[cfg(feature = "redis")]
    fn into_redis(self) -> Result<Arc<dyn Storage>, ConfigError> {
        use qcache_redis::RedisStorage;

        let config = self.storage_config();
        let mut builder = RedisStorage::builder()
            .pool_threads(self.pool_threads)
            .invalidate_attempts(self.invalidate_attempts);
        if let Some(ms) = self.connect_timeout {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.io_timeout {
            builder = builder.io_timeout(Duration::from_millis(ms));
        }

        let storage = builder.build(&self.name, config, &self.storage_options)?;
        Ok(Arc::new(storage))
    }

    #[cfg(not(feature = "redis"))]
    fn into_redis(self) -> Result<Arc<dyn Storage>, ConfigError> {
        Err(ConfigError::UnsupportedStorage(self.storage))
    }
}
