//! Tests against a real Redis server started with testcontainers.
//!
//! Ignored by default; run with `cargo test -p qcache-test -- --ignored`.

use std::time::Duration;

use qcache_core::{CacheResult, StorageConfig};
use qcache_redis::RedisStorage;
use qcache_test::tracing::init_logging;
use qcache_test::{Session, key, tags};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn start_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start Redis container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("container port");
    (container, format!("{host}:{port}"))
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires docker"]
async fn operations_against_redis() {
    init_logging();
    let (_container, address) = start_redis().await;

    let storage = RedisStorage::builder()
        .connect_timeout(Duration::from_secs(5))
        .io_timeout(Duration::from_secs(5))
        .build(
            "redis_cache",
            StorageConfig::with_ttl(Duration::from_secs(60)),
            &address,
        )
        .unwrap();
    let session = Session::open(&storage).unwrap();

    assert_eq!(session.get(&key(1)).await.0, CacheResult::NotFound);
    assert_eq!(session.put(&key(1), &tags(&["db.t1", "db.t2"]), b"rows").await, CacheResult::Ok);
    assert_eq!(session.put(&key(2), &tags(&["db.t2"]), b"more rows").await, CacheResult::Ok);
    assert_eq!(session.put(&key(3), &tags(&["db.t3"]), b"other").await, CacheResult::Ok);

    let (result, value) = session.get(&key(1)).await;
    assert_eq!(result, CacheResult::Ok);
    assert_eq!(value.as_deref(), Some(&b"rows"[..]));

    assert_eq!(session.invalidate(&tags(&["db.t2"])).await, CacheResult::Ok);
    assert_eq!(session.get(&key(1)).await.0, CacheResult::NotFound);
    assert_eq!(session.get(&key(2)).await.0, CacheResult::NotFound);
    assert_eq!(session.get(&key(3)).await.0, CacheResult::Ok);

    assert_eq!(session.del(&key(3)).await, CacheResult::Ok);
    assert_eq!(session.del(&key(3)).await, CacheResult::NotFound);
    assert_eq!(session.invalidate(&tags(&["db.unknown"])).await, CacheResult::Ok);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires docker"]
async fn zero_ttl_is_accepted_by_redis() {
    init_logging();
    let (_container, address) = start_redis().await;

    let storage = RedisStorage::create("redis_cache", StorageConfig::default(), &address).unwrap();
    let session = Session::open(&storage).unwrap();

    assert_eq!(session.put(&key(1), &[], b"forever").await, CacheResult::Ok);
    assert_eq!(session.get(&key(1)).await.0, CacheResult::Ok);
}
