//! Test session: a token plus the worker its callbacks run on.

use std::sync::Arc;

use qcache_core::{
    CacheKey, CacheResult, CachedValue, InvalidationTag, LookupFlags, Storage, StorageError,
    Token, worker,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A session whose worker queue runs on a tokio task.
///
/// Each helper issues one operation, checks that it returned `Pending`, and
/// awaits the callback.
pub struct Session {
    token: Box<dyn Token>,
    worker: JoinHandle<()>,
}

impl Session {
    /// Opens a session on `storage`. Must be called within a tokio runtime.
    pub fn open(storage: &dyn Storage) -> Result<Self, StorageError> {
        let (handle, queue) = worker::channel();
        let token = storage.create_token(Arc::new(handle))?;
        let worker = tokio::spawn(queue.run());
        Ok(Self { token, worker })
    }

    /// The session's token.
    pub fn token(&self) -> &dyn Token {
        self.token.as_ref()
    }

    /// Fetches `key`.
    pub async fn get(&self, key: &CacheKey) -> (CacheResult, Option<CachedValue>) {
        let (tx, rx) = oneshot::channel();
        let pending = self.token.get_value(
            key,
            LookupFlags::empty(),
            None,
            None,
            Box::new(move |result, value| {
                let _ = tx.send((result, value));
            }),
        );
        assert_eq!(pending, CacheResult::Pending);
        rx.await.expect("get_value callback was not invoked")
    }

    /// Stores `value` under `key`, indexed by `tags`.
    pub async fn put(&self, key: &CacheKey, tags: &[InvalidationTag], value: &[u8]) -> CacheResult {
        let value = CachedValue::copy_from_slice(value);
        let (tx, rx) = oneshot::channel();
        let pending = self.token.put_value(key, tags, &value, result_callback(tx));
        assert_eq!(pending, CacheResult::Pending);
        rx.await.expect("put_value callback was not invoked")
    }

    /// Deletes `key`.
    pub async fn del(&self, key: &CacheKey) -> CacheResult {
        let (tx, rx) = oneshot::channel();
        let pending = self.token.del_value(key, result_callback(tx));
        assert_eq!(pending, CacheResult::Pending);
        rx.await.expect("del_value callback was not invoked")
    }

    /// Invalidates `tags`.
    pub async fn invalidate(&self, tags: &[InvalidationTag]) -> CacheResult {
        let (tx, rx) = oneshot::channel();
        let pending = self.token.invalidate(tags, result_callback(tx));
        assert_eq!(pending, CacheResult::Pending);
        rx.await.expect("invalidate callback was not invoked")
    }

    /// Ends the session and waits until its worker has run every completion
    /// still in flight.
    pub async fn close(self) {
        drop(self.token);
        let _ = self.worker.await;
    }
}

fn result_callback(tx: oneshot::Sender<CacheResult>) -> qcache_core::ResultCallback {
    Box::new(move |result| {
        let _ = tx.send(result);
    })
}

/// Key of `user@127.0.0.1` with data hash `n`.
pub fn key(n: u64) -> CacheKey {
    CacheKey::new("user", "127.0.0.1", n, n.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// Tags from names.
pub fn tags(names: &[&str]) -> Vec<InvalidationTag> {
    names.iter().copied().map(InvalidationTag::from).collect()
}
