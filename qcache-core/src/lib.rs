#![warn(missing_docs)]
//! # qcache-core
//!
//! Core traits and types for pluggable query-result cache storages.
//!
//! A database proxy's query cache computes a result once, stores it under a
//! fingerprint of the query, and serves it to later identical queries. When
//! tables change, every result depending on them is invalidated in bulk
//! through tags.
//!
//! This crate defines the contract between the cache filter and a storage:
//!
//! - **Identify** results ([`CacheKey`]) and their dependencies ([`InvalidationTag`])
//! - **Create** per-session handles ([`Storage`], [`Token`])
//! - **Offload** blocking store I/O ([`BlockingPool`])
//! - **Return** completions to the owning session ([`worker::Worker`])

pub mod config;
pub mod error;
pub mod key;
pub mod offload;
pub mod result;
pub mod storage;
pub mod worker;

pub use config::{
    Capabilities, DEFAULT_INVALIDATE_ATTEMPTS, StorageConfig, StorageKind, ThreadModel,
};
pub use error::StorageError;
pub use key::{CacheKey, InvalidationTag};
pub use offload::{BlockingPool, DEFAULT_POOL_THREADS};
pub use result::{CacheResult, LookupFlags};
pub use storage::{GetCallback, ResultCallback, Storage, Token};
pub use worker::{Task, Worker, WorkerHandle, WorkerQueue};

/// A stored query result, kept verbatim.
///
/// Using `Bytes` makes handing the payload to a pool thread a reference-count
/// increment rather than a copy.
pub type CachedValue = bytes::Bytes;
