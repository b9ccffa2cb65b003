//! Lightweight in-memory pipeline metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct PipelineMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    queries_routed: AtomicU64,
    replies_routed: AtomicU64,
    forwarding_violations: AtomicU64,
    session_failures: AtomicU64,
}

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

fn metrics() -> &'static PipelineMetrics {
    PIPELINE_METRICS.get_or_init(PipelineMetrics::default)
}

pub fn record_session_opened() {
    metrics().sessions_opened.fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_closed() {
    metrics().sessions_closed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_query() {
    metrics().queries_routed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reply() {
    metrics().replies_routed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_forwarding_violation() {
    metrics()
        .forwarding_violations
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_session_failure() {
    metrics().session_failures.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_active: u64,
    pub queries_routed: u64,
    pub replies_routed: u64,
    pub forwarding_violations: u64,
    pub session_failures: u64,
}

pub fn snapshot() -> PipelineMetricsSnapshot {
    let metrics = metrics();
    let opened = metrics.sessions_opened.load(Ordering::Relaxed);
    let closed = metrics.sessions_closed.load(Ordering::Relaxed);

    PipelineMetricsSnapshot {
        sessions_opened: opened,
        sessions_closed: closed,
        sessions_active: opened.saturating_sub(closed),
        queries_routed: metrics.queries_routed.load(Ordering::Relaxed),
        replies_routed: metrics.replies_routed.load(Ordering::Relaxed),
        forwarding_violations: metrics.forwarding_violations.load(Ordering::Relaxed),
        session_failures: metrics.session_failures.load(Ordering::Relaxed),
    }
}
