//! Storage and token traits.
//!
//! A [`Storage`] is created once per configured cache and hands out one
//! [`Token`] per session. Tokens carry out the operations.
//!
//! ## Asynchronous completion
//!
//! Every token operation:
//!
//! 1. validates its input and captures what it needs by value,
//! 2. returns [`CacheResult::Pending`] immediately,
//! 3. later invokes its callback, exactly once, on the session's [`Worker`].
//!
//! If the session drops its token before the operation completes, the
//! callback is never invoked and any fetched payload is released instead.
//!
//! [`Worker`]: crate::worker::Worker

use std::sync::Arc;
use std::time::Duration;

use crate::worker::Worker;
use crate::{
    CacheKey, CacheResult, CachedValue, Capabilities, InvalidationTag, LookupFlags, StorageConfig,
    StorageError, StorageKind,
};

/// Callback receiving the outcome of [`Token::get_value`].
///
/// The value is present only with [`CacheResult::Ok`].
pub type GetCallback = Box<dyn FnOnce(CacheResult, Option<CachedValue>) + Send + 'static>;

/// Callback receiving the outcome of a mutating operation.
pub type ResultCallback = Box<dyn FnOnce(CacheResult) + Send + 'static>;

/// Per-session handle through which cache operations are issued.
///
/// Dropping the token ends the session: results of operations still in
/// flight are discarded.
pub trait Token: Send {
    /// Fetches the value stored under `key`.
    ///
    /// Completes with `Ok` and the value, `NotFound`, or `Error`.
    fn get_value(
        &self,
        key: &CacheKey,
        flags: LookupFlags,
        soft_ttl: Option<Duration>,
        hard_ttl: Option<Duration>,
        callback: GetCallback,
    ) -> CacheResult;

    /// Stores `value` under `key` and indexes the key under every tag.
    ///
    /// The value and the index entries are written atomically.
    fn put_value(
        &self,
        key: &CacheKey,
        tags: &[InvalidationTag],
        value: &CachedValue,
        callback: ResultCallback,
    ) -> CacheResult;

    /// Removes the value stored under `key`.
    ///
    /// Completes with `Ok` if a value was removed, `NotFound` otherwise.
    fn del_value(&self, key: &CacheKey, callback: ResultCallback) -> CacheResult;

    /// Removes every value indexed under any of `tags`.
    ///
    /// Invalidating tags that index nothing succeeds and changes nothing.
    fn invalidate(&self, tags: &[InvalidationTag], callback: ResultCallback) -> CacheResult;
}

impl<T: Token + ?Sized> Token for Box<T> {
    fn get_value(
        &self,
        key: &CacheKey,
        flags: LookupFlags,
        soft_ttl: Option<Duration>,
        hard_ttl: Option<Duration>,
        callback: GetCallback,
    ) -> CacheResult {
        (**self).get_value(key, flags, soft_ttl, hard_ttl, callback)
    }

    fn put_value(
        &self,
        key: &CacheKey,
        tags: &[InvalidationTag],
        value: &CachedValue,
        callback: ResultCallback,
    ) -> CacheResult {
        (**self).put_value(key, tags, value, callback)
    }

    fn del_value(&self, key: &CacheKey, callback: ResultCallback) -> CacheResult {
        (**self).del_value(key, callback)
    }

    fn invalidate(&self, tags: &[InvalidationTag], callback: ResultCallback) -> CacheResult {
        (**self).invalidate(tags, callback)
    }
}

/// A configured cache storage; factory of [`Token`]s.
pub trait Storage: Send + Sync {
    /// Name of the cache this storage was created for.
    fn name(&self) -> &str;

    /// Whether the content is private to a worker or shared.
    fn kind(&self) -> StorageKind;

    /// What the implementation supports.
    fn capabilities(&self) -> Capabilities;

    /// The configuration the storage was created with.
    fn config(&self) -> &StorageConfig;

    /// Creates a token for a new session.
    ///
    /// Completions of the token's operations are posted to `worker`.
    fn create_token(&self, worker: Arc<dyn Worker>) -> Result<Box<dyn Token>, StorageError>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> StorageKind {
        (**self).kind()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn config(&self) -> &StorageConfig {
        (**self).config()
    }

    fn create_token(&self, worker: Arc<dyn Worker>) -> Result<Box<dyn Token>, StorageError> {
        (**self).create_token(worker)
    }
}
