//! TTL boundary conditions for `MemoryBackend` under a paused clock.
//!
//! Entries expire at exactly `set time + ttl`: a read one tick before the
//! boundary sees the value, a read at the boundary does not.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use bytes::Bytes;
use geogate_cache::{CacheBackend, MemoryBackend, assert_cache_ok};
use tokio::time::advance;

const TTL: Duration = Duration::from_secs(300);

#[tokio::test(start_paused = true)]
async fn value_visible_until_boundary() {
    let backend = MemoryBackend::new();
    backend.set(b"verify".to_vec(), b"record".to_vec(), TTL).await.expect("set");

    advance(TTL - Duration::from_millis(1)).await;
    assert_eq!(assert_cache_ok!(backend.get(b"verify").await), Some(Bytes::from("record")));

    advance(Duration::from_millis(1)).await;
    assert_eq!(assert_cache_ok!(backend.get(b"verify").await), None);
}

#[tokio::test(start_paused = true)]
async fn take_after_expiry_is_absent_even_if_never_read() {
    let backend = MemoryBackend::new();
    backend.set(b"action".to_vec(), b"record".to_vec(), TTL).await.expect("set");

    advance(TTL + Duration::from_secs(1)).await;
    assert_eq!(assert_cache_ok!(backend.take(b"action").await), None);
}

#[tokio::test(start_paused = true)]
async fn expired_key_can_be_reissued() {
    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"first".to_vec(), Duration::from_secs(1)).await.expect("set");
    advance(Duration::from_secs(2)).await;

    backend.set(b"k".to_vec(), b"second".to_vec(), TTL).await.expect("set");
    assert_eq!(assert_cache_ok!(backend.take(b"k").await), Some(Bytes::from("second")));
}

#[tokio::test(start_paused = true)]
async fn set_replaces_remaining_ttl() {
    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(10)).await.expect("set");
    advance(Duration::from_secs(8)).await;

    backend.set(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(10)).await.expect("set");
    advance(Duration::from_secs(8)).await;
    assert!(assert_cache_ok!(backend.get(b"k").await).is_some());
}

#[tokio::test(start_paused = true)]
async fn counter_expires_with_its_window() {
    let backend = MemoryBackend::new();
    let window = Duration::from_secs(60);

    for expected in 1..=5 {
        assert_eq!(assert_cache_ok!(backend.increment(b"ctr", 1, window).await), expected);
        advance(Duration::from_secs(10)).await;
    }
    // Created at t=0, now t=50.
    advance(Duration::from_secs(10)).await;
    assert_eq!(assert_cache_ok!(backend.increment(b"ctr", 1, window).await), 1);
}

#[tokio::test(start_paused = true)]
async fn very_long_ttl_does_not_overflow() {
    let backend = MemoryBackend::new();
    let long = Duration::from_secs(60 * 60 * 24 * 365);
    backend.set(b"k".to_vec(), b"v".to_vec(), long).await.expect("set");
    advance(Duration::from_secs(60 * 60 * 24)).await;
    assert!(assert_cache_ok!(backend.get(b"k").await).is_some());
}
