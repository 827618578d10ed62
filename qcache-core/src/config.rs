//! Storage configuration and capability reporting.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Number of times an invalidation is attempted when the watched tags keep
/// changing underneath it.
pub const DEFAULT_INVALIDATE_ATTEMPTS: u32 = 3;

/// How the owning filter uses a storage instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadModel {
    /// Each worker gets its own storage instance.
    #[serde(alias = "st")]
    SingleThreaded,
    /// One storage instance shared by all workers.
    #[default]
    #[serde(alias = "mt")]
    MultiThreaded,
}

/// Whether a storage's content is private to one worker or shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Content is visible only to the worker that created the storage.
    Private,
    /// Content is visible to every worker, and to other proxies using the same store.
    Shared,
}

bitflags! {
    /// What a storage implementation supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Usable from a single thread.
        const ST = 0x01;
        /// Usable from multiple threads concurrently.
        const MT = 0x02;
        /// Enforces LRU eviction.
        const LRU = 0x04;
        /// Can cap the number of items.
        const MAX_COUNT = 0x08;
        /// Can cap the total size of items.
        const MAX_SIZE = 0x10;
        /// Supports tag based invalidation.
        const INVALIDATION = 0x20;
    }
}

/// Configuration fixed when a storage instance is created.
///
/// A zero duration means "no expiry"; a zero cap means "no cap".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// How the owning filter shares the instance.
    pub thread_model: ThreadModel,
    /// Age after which a value is stale, but may still be served.
    pub soft_ttl: Duration,
    /// Age after which a value must not be served.
    pub hard_ttl: Duration,
    /// Maximum number of items.
    pub max_count: u64,
    /// Maximum total size of items, in bytes.
    pub max_size: u64,
}

impl StorageConfig {
    /// Configuration using the same soft and hard time-to-live.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            soft_ttl: ttl,
            hard_ttl: ttl,
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            thread_model: ThreadModel::MultiThreaded,
            soft_ttl: Duration::ZERO,
            hard_ttl: Duration::ZERO,
            max_count: 0,
            max_size: 0,
        }
    }
}
