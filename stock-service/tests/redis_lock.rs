//! Reservation lock tests against a throwaway Redis container.
//!
//! Run with: cargo test -p stock-service --test redis_lock -- --ignored --nocapture

use std::time::Duration;
use stock_service::lock::{DistributedLock, LockError, RedisLock};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage,
};

async fn start_redis() -> (ContainerAsync<GenericImage>, RedisLock) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start redis container");

    let host = container.get_host().await.expect("Failed to get container host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get mapped port");

    let lock = RedisLock::connect(&format!("redis://{host}:{port}"))
        .await
        .expect("Failed to connect to redis");
    (container, lock)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn second_holder_is_refused_until_release() {
    let (_container, lock) = start_redis().await;
    let ttl = Duration::from_secs(30);

    let guard = lock.acquire("reserve_stock_a_b", ttl).await.unwrap();
    let err = lock.acquire("reserve_stock_a_b", ttl).await.unwrap_err();
    assert_eq!(err, LockError::Contended { key: "reserve_stock_a_b".into() });

    lock.acquire("reserve_stock_a", ttl)
        .await
        .expect("other key stays free");

    lock.release(guard).await.unwrap();
    lock.acquire("reserve_stock_a_b", ttl).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expired_guard_cannot_release_a_newer_holder() {
    let (_container, lock) = start_redis().await;

    let stale = lock.acquire("reserve_stock_p", Duration::from_millis(200)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let _current = lock
        .acquire("reserve_stock_p", Duration::from_secs(30))
        .await
        .expect("expired lock is free again");

    lock.release(stale).await.unwrap();
    assert!(matches!(
        lock.acquire("reserve_stock_p", Duration::from_secs(30)).await,
        Err(LockError::Contended { .. })
    ));
}
