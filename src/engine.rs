//! Boundary types for the external load-generation engine.
//!
//! The engine itself (HTTP traffic, percentile math, race detection)
//! lives outside this crate. The orchestrator consumes it through the
//! [`LoadEngine`] trait: one async call per step that resolves with an
//! [`AggregateResult`], plus a live channel of fine-grained
//! [`ProgressEvent`]s consumed by the progress batcher.

use crate::model::TestMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fully-resolved configuration for one load-test invocation.
///
/// Built from a [`crate::model::ScenarioStep`] after variable
/// resolution; the engine never sees `{{...}}` placeholders that had a
/// referent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub virtual_users: u32,
    pub mode: TestMode,
    pub timeout_ms: u64,
    pub think_time_ms: u64,
    pub duration_secs: Option<u32>,
    pub iterations: Option<u32>,
}

/// Outcome of one individual request, as reported on the live channel
/// and in the aggregate timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: u32,
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub error: Option<String>,
    pub response_size_bytes: usize,
    #[serde(default)]
    pub response_body: Option<String>,
}

/// One fine-grained live update: overall progress percentage plus the
/// request that just finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub progress: f32,
    pub result: RequestEvent,
}

/// Aggregate result of one load-test invocation. Immutable once
/// returned by the engine.
///
/// `status_distribution` is keyed by both status-class strings
/// ("2xx") and exact-code strings ("200"); the assertion evaluator
/// reads only the exact-code keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration_ms: f64,
    pub requests_per_second: f64,
    pub latency_min_ms: f64,
    pub latency_max_ms: f64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    #[serde(default)]
    pub error_types: HashMap<String, u32>,
    #[serde(default)]
    pub status_distribution: HashMap<String, u64>,
    #[serde(default)]
    pub timeline: Vec<RequestEvent>,
    #[serde(default)]
    pub was_cancelled: bool,
}

impl AggregateResult {
    /// Percentage of requests that succeeded, 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_requests as f64 * 100.0
    }
}

/// The external load engine, consumed as an opaque async operation.
///
/// Implementations emit zero or more [`ProgressEvent`]s on `events`
/// before resolving, and honor `cancel` on a best-effort basis; the
/// orchestrator discards late results from superseded runs either way.
#[async_trait]
pub trait LoadEngine: Send + Sync {
    async fn run_load_test(
        &self,
        config: LoadConfig,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<AggregateResult>;
}
