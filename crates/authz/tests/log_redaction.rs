//! Token ids are credentials: they must never reach the logs in full.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    fmt::Write as _,
    sync::{Arc, Mutex},
};

use geogate_authz::{
    Command,
    testutil::{FAR_AWAY, GATE, PRECISE_M, TEST_OWNER, test_flow},
};
use geogate_cache::MemoryBackend;
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: renders every span field and event field to text
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Collector {
    lines: Arc<Mutex<Vec<String>>>,
    spans: Arc<Mutex<Vec<String>>>,
}

struct Render<'a>(&'a mut String);

impl Visit for Render<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, " {}={value:?}", field.name());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        let _ = write!(self.0, " {}={value}", field.name());
    }
}

impl<S> tracing_subscriber::Layer<S> for Collector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut line = String::new();
        attrs.record(&mut Render(&mut line));
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
        self.lines.lock().expect("lock poisoned").push(line);
    }

    fn on_record(
        &self,
        _id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut line = String::new();
        values.record(&mut Render(&mut line));
        self.lines.lock().expect("lock poisoned").push(line);
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut line = String::new();
        event.record(&mut Render(&mut line));
        self.lines.lock().expect("lock poisoned").push(line);
    }
}

fn install() -> (Collector, tracing::subscriber::DefaultGuard) {
    let collector = Collector::default();
    let subscriber = tracing_subscriber::registry().with(collector.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (collector, guard)
}

#[tokio::test]
async fn full_flow_never_logs_a_full_token() {
    let (collector, _guard) = install();
    let (flow, _) = test_flow(MemoryBackend::new());

    let rejected = flow.request_action(TEST_OWNER).await.unwrap();
    let _ = flow.submit_location(rejected.token.as_str(), FAR_AWAY.0, FAR_AWAY.1, PRECISE_M).await;

    let ticket = flow.request_action(TEST_OWNER).await.unwrap();
    let choice =
        flow.submit_location(ticket.token.as_str(), GATE.0, GATE.1, PRECISE_M).await.unwrap();
    flow.submit_action(choice.open.as_str(), Command::Open).await.unwrap();
    let _ = flow.submit_action(choice.close.as_str(), Command::Close).await;

    let lines = collector.lines.lock().expect("lock poisoned").join("\n");
    assert!(!lines.is_empty());
    for secret in [&rejected.token, &ticket.token, &choice.open, &choice.close] {
        assert!(!lines.contains(secret.as_str()), "full token found in logs:\n{lines}");
    }
    // The redacted prefix is what correlates log lines.
    assert!(lines.contains(ticket.token.redacted()));
}

#[tokio::test]
async fn flow_operations_create_spans() {
    let (collector, _guard) = install();
    let (flow, _) = test_flow(MemoryBackend::new());

    let ticket = flow.request_action(TEST_OWNER).await.unwrap();
    let choice =
        flow.submit_location(ticket.token.as_str(), GATE.0, GATE.1, PRECISE_M).await.unwrap();
    flow.submit_action(choice.open.as_str(), Command::Open).await.unwrap();

    let spans = collector.spans.lock().expect("lock poisoned");
    for expected in
        ["request_action", "start_verification", "submit_location", "consume", "issue_pair", "redeem_action", "revoke_group"]
    {
        assert!(spans.iter().any(|s| s == expected), "missing span {expected}: {spans:?}");
    }
}
