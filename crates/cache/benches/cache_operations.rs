#![allow(clippy::expect_used)]

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use geogate_cache::{
    CacheBackend, CacheConfig, FallbackBackend, FixedWindowLimiter, MemoryBackend,
    RateLimitConfig, testutil::make_key,
};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime")
}

/// Creates a backend pre-populated with `count` keys `prefix:000000..count`.
fn populated_backend(rt: &Runtime, prefix: &str, count: usize) -> MemoryBackend {
    let backend = MemoryBackend::with_capacity(count * 2 + 16);
    rt.block_on(async {
        for i in 0..count {
            backend.set(make_key(prefix, i), vec![0xAB; 128], TTL).await.expect("populate set failed");
        }
    });
    backend
}

// ---------------------------------------------------------------------------
// 1. set_then_take: the token lifecycle on each backend
// ---------------------------------------------------------------------------

fn set_then_take(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_then_take");
    let rt = rt();

    let memory = MemoryBackend::new();
    group.bench_function("memory", |b| {
        b.to_async(&rt).iter(|| {
            let be = memory.clone();
            async move {
                be.set(b"token:bench".to_vec(), vec![0xAB; 128], TTL).await.expect("set failed");
                be.take(b"token:bench").await.expect("take failed");
            }
        });
    });

    let fallback = FallbackBackend::new(MemoryBackend::new(), &CacheConfig::default())
        .expect("valid config");
    group.bench_function("fallback_healthy", |b| {
        b.to_async(&rt).iter(|| {
            let be = fallback.clone();
            async move {
                be.set(b"token:bench".to_vec(), vec![0xAB; 128], TTL).await.expect("set failed");
                be.take(b"token:bench").await.expect("take failed");
            }
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. take_miss: lookups of absent keys in a populated store
// ---------------------------------------------------------------------------

fn take_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("take_miss");
    let rt = rt();

    for &count in &[100, 10_000] {
        let backend = populated_backend(&rt, "token", count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.to_async(&rt).iter(|| {
                let be = backend.clone();
                async move {
                    be.take(b"token:missing").await.expect("take failed");
                }
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. rate_limit_check
// ---------------------------------------------------------------------------

fn rate_limit_check(c: &mut Criterion) {
    let rt = rt();
    let config = RateLimitConfig::builder().limit(u32::MAX).build().expect("valid config");
    let limiter = std::sync::Arc::new(FixedWindowLimiter::new(MemoryBackend::new(), config));

    c.bench_function("rate_limit_check", |b| {
        b.to_async(&rt).iter(|| {
            let limiter = std::sync::Arc::clone(&limiter);
            async move { limiter.allow("203.0.113.7").await }
        });
    });
}

criterion_group!(benches, set_then_take, take_miss, rate_limit_check);
criterion_main!(benches);
