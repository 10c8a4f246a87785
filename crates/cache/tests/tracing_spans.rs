//! Verifies that `#[instrument]` annotations produce the expected spans on
//! cache operations, including the degraded-mode warning event.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use geogate_cache::{
    CacheBackend, CacheConfig, FallbackBackend, FixedWindowLimiter, MemoryBackend,
    RateLimitConfig, testutil::FlakyBackend,
};
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names and degraded-mode events
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Collector {
    spans: Arc<Mutex<Vec<String>>>,
    degraded_events: Arc<Mutex<usize>>,
}

#[derive(Default)]
struct DegradedFlag(bool);

impl Visit for DegradedFlag {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "backend_degraded" && value {
            self.0 = true;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S> tracing_subscriber::Layer<S> for Collector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut flag = DegradedFlag::default();
        event.record(&mut flag);
        if flag.0 {
            *self.degraded_events.lock().expect("lock poisoned") += 1;
        }
    }
}

fn install() -> (Collector, tracing::subscriber::DefaultGuard) {
    let collector = Collector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (collector, guard)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_operations_create_spans() {
    let (collector, _guard) = install();

    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(5)).await.expect("set");
    let _ = backend.get(b"k").await;
    let _ = backend.take(b"k").await;
    let _ = backend.increment(b"n", 1, Duration::from_secs(5)).await;
    backend.delete(b"n").await.expect("delete");
    let _ = backend.health_check().await;

    let recorded = collector.spans.lock().expect("lock poisoned");
    for name in ["set", "get", "take", "increment", "delete", "health_check"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn limiter_check_creates_span() {
    let (collector, _guard) = install();

    let limiter = FixedWindowLimiter::new(MemoryBackend::new(), RateLimitConfig::default());
    assert!(limiter.allow("client").await);

    let recorded = collector.spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "check"), "expected a 'check' span, got: {recorded:?}");
}

#[tokio::test]
async fn fallback_emits_degraded_event_once_per_failure() {
    let (collector, _guard) = install();

    let primary = FlakyBackend::new();
    primary.set_down(true);
    let cache = FallbackBackend::new(primary, &CacheConfig::default()).expect("valid config");

    cache.set(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(5)).await.expect("set");
    // Breaker is open now; further calls go straight to local without a new warning.
    let _ = cache.get(b"k").await;

    assert_eq!(*collector.degraded_events.lock().expect("lock poisoned"), 1);
}
