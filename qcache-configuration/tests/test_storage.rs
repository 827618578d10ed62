use std::time::Duration;

use pretty_assertions::assert_eq;
use qcache_configuration::{CacheStorage, ConfigError};
use qcache_core::{
    Capabilities, DEFAULT_INVALIDATE_ATTEMPTS, Storage, StorageError, StorageKind, ThreadModel,
};

#[test]
fn test_redis_storage_deserialize() {
    let yaml = r#"
name: query_cache
storage: storage_redis
storage_options: "127.0.0.1:6379"
hard_ttl: 60000
soft_ttl: 30000
max_count: 100
thread_model: st
connect_timeout: 1000
io_timeout: 5000
pool_threads: 4
invalidate_attempts: 5
"#;

    let config = CacheStorage::from_yaml(yaml).expect("failed to deserialize");

    assert_eq!(
        config,
        CacheStorage {
            name: "query_cache".to_string(),
            storage: "storage_redis".to_string(),
            storage_options: "127.0.0.1:6379".to_string(),
            hard_ttl: 60000,
            soft_ttl: Some(30000),
            max_size: 0,
            max_count: 100,
            thread_model: ThreadModel::SingleThreaded,
            connect_timeout: Some(1000),
            io_timeout: Some(5000),
            pool_threads: 4,
            invalidate_attempts: 5,
        }
    );
}

#[test]
fn test_defaults() {
    let yaml = r#"
name: query_cache
storage: storage_redis
storage_options: "localhost:6379"
hard_ttl: 2000
"#;

    let config = CacheStorage::from_yaml(yaml).expect("failed to deserialize");
    assert_eq!(config.thread_model, ThreadModel::MultiThreaded);
    assert_eq!(config.pool_threads, 8);
    assert_eq!(config.invalidate_attempts, 3);

    let storage_config = config.storage_config();
    assert_eq!(storage_config.hard_ttl, Duration::from_secs(2));
    assert_eq!(storage_config.soft_ttl, Duration::from_secs(2));
}

#[cfg(feature = "redis")]
#[test]
fn test_defaults_match_redis_storage() {
    let config = CacheStorage::from_yaml("name: c\nstorage: storage_redis\n")
        .expect("failed to deserialize");
    assert_eq!(config.invalidate_attempts, DEFAULT_INVALIDATE_ATTEMPTS);
    assert_eq!(config.invalidate_attempts, qcache_redis::DEFAULT_INVALIDATE_ATTEMPTS);
    assert_eq!(config.connect_timeout, None);
    assert_eq!(config.io_timeout, None);
}

#[test]
fn test_roundtrip_yaml() {
    let yaml = r#"
name: c
storage: storage_redis
storage_options: "h:1"
"#;
    let config = CacheStorage::from_yaml(yaml).expect("failed to deserialize");
    let serialized = serde_saphyr::to_string(&config).expect("failed to serialize");
    let restored = CacheStorage::from_yaml(&serialized).expect("failed to deserialize");
    assert_eq!(config, restored);
}

#[test]
fn test_missing_name_is_rejected() {
    let result = CacheStorage::from_yaml("storage: storage_redis\n");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[tokio::test]
async fn test_into_redis_storage() {
    let yaml = r#"
name: query_cache
storage: storage_redis
storage_options: "localhost:6379"
hard_ttl: 1000
"#;

    let storage = CacheStorage::from_yaml(yaml)
        .unwrap()
        .into_storage()
        .expect("storage is created without connecting");

    assert_eq!(storage.name(), "query_cache");
    assert_eq!(storage.kind(), StorageKind::Shared);
    assert!(storage.capabilities().contains(Capabilities::INVALIDATION));
    assert_eq!(storage.config().hard_ttl, Duration::from_secs(1));
}

#[tokio::test]
async fn test_unknown_storage() {
    let yaml = r#"
name: query_cache
storage: storage_inmemory
"#;

    let err = CacheStorage::from_yaml(yaml).unwrap().into_storage().err().unwrap();
    assert!(matches!(err, ConfigError::UnsupportedStorage(name) if name == "storage_inmemory"));
}

#[tokio::test]
async fn test_bad_storage_options() {
    let yaml = r#"
name: query_cache
storage: storage_redis
storage_options: "localhost"
"#;

    let err = CacheStorage::from_yaml(yaml).unwrap().into_storage().err().unwrap();
    assert!(matches!(
        err,
        ConfigError::Storage(StorageError::InvalidArguments(_))
    ));
}
