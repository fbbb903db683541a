//! Shared test doubles for in-crate unit tests.

use crate::engine::{AggregateResult, LoadConfig, LoadEngine, ProgressEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Engine that resolves immediately with an empty result and emits
/// no events.
pub struct NullEngine;

#[async_trait]
impl LoadEngine for NullEngine {
    async fn run_load_test(
        &self,
        _config: LoadConfig,
        _events: mpsc::Sender<ProgressEvent>,
        _cancel: CancellationToken,
    ) -> anyhow::Result<AggregateResult> {
        Ok(AggregateResult::default())
    }
}
