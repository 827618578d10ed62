//! Redis storage engine.

use std::sync::Arc;
use std::time::Duration;

pub use qcache_core::DEFAULT_INVALIDATE_ATTEMPTS;
use qcache_core::{
    BlockingPool, Capabilities, DEFAULT_POOL_THREADS, Storage, StorageConfig, StorageError,
    StorageKind, Token, Worker,
};
use smol_str::SmolStr;
use tracing::{debug, error, warn};

use crate::connection::{Connector, Endpoint, RedisConnector};
use crate::token::{RedisToken, TokenParts};

/// Storage keeping cached results in a Redis server shared by every worker
/// and proxy pointing at it.
///
/// # Examples
/// ```no_run
/// use qcache_core::{StorageConfig, StorageKind};
/// use qcache_redis::RedisStorage;
///
/// let (kind, _capabilities) = RedisStorage::initialize();
/// assert_eq!(kind, StorageKind::Shared);
///
/// # #[tokio::main]
/// # async fn main() {
/// let storage = RedisStorage::builder()
///     .connect_timeout(std::time::Duration::from_secs(1))
///     .pool_threads(4)
///     .build("query_cache", StorageConfig::default(), "cache.local:6379")
///     .unwrap();
/// # }
/// ```
pub struct RedisStorage<C = RedisConnector> {
    name: SmolStr,
    config: StorageConfig,
    endpoint: Endpoint,
    connector: Arc<C>,
    ttl: Duration,
    invalidate_attempts: u32,
    pool: BlockingPool,
}

impl RedisStorage<RedisConnector> {
    /// Kind and capabilities shared by every Redis storage.
    pub fn initialize() -> (StorageKind, Capabilities) {
        (
            StorageKind::Shared,
            Capabilities::ST | Capabilities::MT | Capabilities::INVALIDATION,
        )
    }

    /// Creates a storage with default settings.
    ///
    /// `arguments` is the `HOST:PORT` of the server. Must be called within a
    /// tokio runtime, whose blocking threads carry the store I/O.
    pub fn create(
        name: &str,
        config: StorageConfig,
        arguments: &str,
    ) -> Result<Self, StorageError> {
        Self::builder().build(name, config, arguments)
    }

    /// Creates a builder with default settings.
    #[must_use]
    pub fn builder() -> RedisStorageBuilder<RedisConnector> {
        RedisStorageBuilder::default()
    }
}

impl<C: Connector> RedisStorage<C> {
    /// Server location.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Expiry applied to stored values; zero means none.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Pool running the store I/O.
    pub fn pool(&self) -> &BlockingPool {
        &self.pool
    }

    /// Connects a new token whose completions are posted to `worker`.
    pub fn connect_token(&self, worker: Arc<dyn Worker>) -> Result<RedisToken<C>, StorageError> {
        let parts = TokenParts {
            storage: self.name.clone(),
            endpoint: self.endpoint.clone(),
            connector: self.connector.clone(),
            ttl: self.ttl,
            invalidate_attempts: self.invalidate_attempts,
            pool: self.pool.clone(),
        };

        RedisToken::connect(parts, worker).map_err(|err| {
            error!(
                storage = %self.name,
                endpoint = %self.endpoint,
                error = %err,
                "could not connect to redis"
            );
            err.into_storage_error(&self.endpoint)
        })
    }
}

impl<C: Connector> Storage for RedisStorage<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Shared
    }

    fn capabilities(&self) -> Capabilities {
        RedisStorage::initialize().1
    }

    fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn create_token(&self, worker: Arc<dyn Worker>) -> Result<Box<dyn Token>, StorageError> {
        Ok(Box::new(self.connect_token(worker)?))
    }
}

impl<C> std::fmt::Debug for RedisStorage<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Part of builder pattern implementation for RedisStorage.
pub struct RedisStorageBuilder<C = RedisConnector> {
    connector: C,
    pool: Option<BlockingPool>,
    pool_threads: usize,
    invalidate_attempts: u32,
}

impl Default for RedisStorageBuilder<RedisConnector> {
    fn default() -> Self {
        Self {
            connector: RedisConnector::default(),
            pool: None,
            pool_threads: DEFAULT_POOL_THREADS,
            invalidate_attempts: DEFAULT_INVALIDATE_ATTEMPTS,
        }
    }
}

impl RedisStorageBuilder<RedisConnector> {
    /// Limit on establishing a connection, [`DEFAULT_CONNECT_TIMEOUT`] unless set.
    ///
    /// [`DEFAULT_CONNECT_TIMEOUT`]: crate::connection::DEFAULT_CONNECT_TIMEOUT
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connector.connect_timeout = Some(timeout);
        self
    }

    /// Limit on every read and write of an established connection,
    /// [`DEFAULT_IO_TIMEOUT`](crate::connection::DEFAULT_IO_TIMEOUT) unless set.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.connector.io_timeout = Some(timeout);
        self
    }
}

impl<C: Connector> RedisStorageBuilder<C> {
    /// Replaces the way connections are opened.
    pub fn connector<NewC: Connector>(self, connector: NewC) -> RedisStorageBuilder<NewC> {
        RedisStorageBuilder {
            connector,
            pool: self.pool,
            pool_threads: self.pool_threads,
            invalidate_attempts: self.invalidate_attempts,
        }
    }

    /// Runs store I/O on an existing pool.
    pub fn pool(mut self, pool: BlockingPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Size of the pool created when none is given.
    pub fn pool_threads(mut self, threads: usize) -> Self {
        self.pool_threads = threads;
        self
    }

    /// How many times an invalidation racing with writers is attempted.
    pub fn invalidate_attempts(mut self, attempts: u32) -> Self {
        self.invalidate_attempts = attempts.max(1);
        self
    }

    /// Creates the storage for the cache `name`.
    ///
    /// Fails on malformed `HOST:PORT` arguments, or when no pool was given
    /// and no tokio runtime is running.
    pub fn build(
        self,
        name: &str,
        config: StorageConfig,
        arguments: &str,
    ) -> Result<RedisStorage<C>, StorageError> {
        let endpoint = Endpoint::parse(arguments).inspect_err(|err| {
            error!(storage = name, arguments, error = %err, "invalid storage_redis arguments");
        })?;

        if config.max_size != 0 {
            warn!(
                storage = name,
                max_size = config.max_size,
                "storage_redis does not support max_size, ignored"
            );
        }
        if config.max_count != 0 {
            warn!(
                storage = name,
                max_count = config.max_count,
                "storage_redis does not support max_count, ignored"
            );
        }
        if config.soft_ttl != config.hard_ttl {
            warn!(
                storage = name,
                soft_ttl = ?config.soft_ttl,
                hard_ttl = ?config.hard_ttl,
                "storage_redis does not distinguish between soft and hard ttl, hard ttl used"
            );
        }

        let pool = match self.pool {
            Some(pool) => pool,
            None => BlockingPool::current(self.pool_threads)?,
        };

        debug!(storage = name, %endpoint, "redis storage created");
        Ok(RedisStorage {
            name: SmolStr::new(name),
            ttl: config.hard_ttl,
            config,
            endpoint,
            connector: Arc::new(self.connector),
            invalidate_attempts: self.invalidate_attempts,
            pool,
        })
    }
}

#[cfg(test)]
mod tests {
    use qcache_core::worker;

    use super::*;
    use crate::ConnectionError;
    use crate::connection::tests::ScriptedTransport;

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        type Transport = ScriptedTransport;

        fn connect(&self, _endpoint: &Endpoint) -> Result<ScriptedTransport, ConnectionError> {
            Err(ConnectionError::Other("connection refused".to_owned()))
        }
    }

    struct ScriptedConnector;

    impl Connector for ScriptedConnector {
        type Transport = ScriptedTransport;

        fn connect(&self, _endpoint: &Endpoint) -> Result<ScriptedTransport, ConnectionError> {
            Ok(ScriptedTransport::default())
        }
    }

    #[test]
    fn initialize_reports_shared_invalidating_storage() {
        let (kind, capabilities) = RedisStorage::initialize();
        assert_eq!(kind, StorageKind::Shared);
        assert!(capabilities.contains(Capabilities::MT | Capabilities::INVALIDATION));
        assert!(!capabilities.contains(Capabilities::LRU));
    }

    #[tokio::test]
    async fn malformed_arguments_are_rejected() {
        assert!(matches!(
            RedisStorage::create("c", StorageConfig::default(), "localhost"),
            Err(StorageError::InvalidArguments(_))
        ));
        assert!(matches!(
            RedisStorage::create("c", StorageConfig::default(), "localhost:0"),
            Err(StorageError::InvalidPort(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_caps_only_warn() {
        let config = StorageConfig {
            max_count: 10,
            max_size: 1024,
            ..StorageConfig::default()
        };
        let storage = RedisStorage::create("c", config.clone(), "localhost:6379").unwrap();
        assert_eq!(storage.config(), &config);
    }

    #[tokio::test]
    async fn hard_ttl_wins() {
        let config = StorageConfig {
            soft_ttl: Duration::from_secs(10),
            hard_ttl: Duration::from_secs(60),
            ..StorageConfig::default()
        };
        let storage = RedisStorage::create("c", config, "localhost:6379").unwrap();
        assert_eq!(storage.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn creation_outside_a_runtime_needs_a_pool() {
        assert!(matches!(
            RedisStorage::create("c", StorageConfig::default(), "localhost:6379"),
            Err(StorageError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn token_creation_fails_when_the_server_is_unreachable() {
        let storage = RedisStorage::builder()
            .connector(RefusingConnector)
            .build("c", StorageConfig::default(), "localhost:6379")
            .unwrap();
        let (handle, _queue) = worker::channel();

        let err = storage.create_token(Arc::new(handle)).err().unwrap();
        assert!(matches!(err, StorageError::Connection { ref endpoint, .. } if endpoint == "localhost:6379"));
    }

    #[tokio::test]
    async fn tokens_share_the_storage_pool() {
        let storage = RedisStorage::builder()
            .connector(ScriptedConnector)
            .pool_threads(3)
            .build("c", StorageConfig::default(), "localhost:6379")
            .unwrap();
        let (handle, _queue) = worker::channel();

        let token = storage.connect_token(Arc::new(handle)).unwrap();
        assert_eq!(token.endpoint(), storage.endpoint());
        assert_eq!(storage.pool().max_threads(), 3);
    }
}
