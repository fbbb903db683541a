//! Scenario execution: drives steps one at a time, owns status
//! transitions, and aggregates the overall pass/fail verdict.

use crate::assertion;
use crate::engine::{AggregateResult, LoadConfig, LoadEngine, ProgressEvent};
use crate::model::{Assertion, ScenarioStatus, ScenarioStep, StepId, StepStatus};
use crate::progress::{self, ProgressBatch};
use crate::resolver::{self, ContextStore, StepContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Identifies one run against the runner's current generation.
///
/// Every piece of asynchronous work holds the handle that was current
/// when it began and compares it against the runner's generation
/// before taking effect. Work tagged with a stale handle has no
/// observable side effect.
#[derive(Debug, Clone)]
pub struct RunHandle {
    generation: u64,
    current: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// True while no newer run has started and the run was not
    /// explicitly stopped.
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Best-effort stop signal forwarded to the engine.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Receives live updates from a run. All methods are invoked by the
/// runner only while the run's handle is still current, so
/// implementations never see effects from a superseded run.
pub trait RunObserver: Send + Sync {
    fn on_step_status(&self, _step_id: &StepId, _status: StepStatus, _summary: Option<&str>) {}
    fn on_progress(&self, _step_id: &StepId, _batch: ProgressBatch) {}
    fn on_finished(&self, _status: ScenarioStatus, _toast: &str) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Terminal record for one step, with the structured numbers kept
/// first-class so callers never have to parse the display summary.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step_id: StepId,
    pub name: String,
    pub status: StepStatus,
    pub summary: Option<String>,
    pub success_rate: Option<f64>,
    pub rps: Option<f64>,
    pub p95: Option<f64>,
    pub total_requests: Option<u64>,
    /// Scored assertions (empty when the step had none).
    pub assertions: Vec<Assertion>,
    pub error: Option<String>,
}

impl StepReport {
    fn pending(step: &ScenarioStep) -> Self {
        Self {
            step_id: step.id.clone(),
            name: step.name.clone(),
            status: StepStatus::Pending,
            summary: None,
            success_rate: None,
            rps: None,
            p95: None,
            total_requests: None,
            assertions: Vec::new(),
            error: None,
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct ScenarioReport {
    pub status: ScenarioStatus,
    pub steps: Vec<StepReport>,
    /// Full aggregate results keyed by step id, for post-run
    /// inspection.
    pub results: HashMap<StepId, AggregateResult>,
    pub duration_ms: u64,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The scenario had no steps; nothing happened and no observer
    /// callback fired.
    Empty,
    /// A newer run started (or `stop` was called) while this one was
    /// in flight. Already-applied effects stand; nothing further was
    /// mutated or reported.
    Superseded,
    Completed(ScenarioReport),
}

/// Drives scenarios against a [`LoadEngine`], one step at a time.
pub struct ScenarioRunner<E> {
    engine: Arc<E>,
    current: Arc<AtomicU64>,
    active_cancel: Mutex<Option<CancellationToken>>,
}

impl<E: LoadEngine + 'static> ScenarioRunner<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            current: Arc::new(AtomicU64::new(0)),
            active_cancel: Mutex::new(None),
        }
    }

    /// Begin a new run generation, superseding any run still in
    /// flight. The previous run's engine call receives a cancel
    /// signal; its late effects are discarded by the handle check
    /// regardless.
    pub fn start_run(&self) -> RunHandle {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let previous = self
            .active_cancel
            .lock()
            .expect("cancel slot lock poisoned")
            .replace(cancel.clone());
        if let Some(previous) = previous {
            debug!("superseding previous run");
            previous.cancel();
        }
        RunHandle {
            generation,
            current: Arc::clone(&self.current),
            cancel,
        }
    }

    /// Logically stop the active run: invalidate its generation and
    /// signal the engine. In-flight work that ignores the signal is
    /// still discarded when its handle turns stale.
    pub fn stop(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self
            .active_cancel
            .lock()
            .expect("cancel slot lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    /// Run `steps` in document order under `handle`.
    ///
    /// Never returns an error: engine failures are confined to the
    /// failing step, and everything else in the error taxonomy is a
    /// normal outcome.
    #[instrument(skip_all, fields(steps = steps.len(), generation = handle.generation()))]
    pub async fn run(
        &self,
        handle: &RunHandle,
        steps: &[ScenarioStep],
        observer: Arc<dyn RunObserver>,
    ) -> RunOutcome {
        if steps.is_empty() {
            debug!("empty scenario; nothing to run");
            return RunOutcome::Empty;
        }

        let run_start = Instant::now();
        let mut reports: Vec<StepReport> = steps.iter().map(StepReport::pending).collect();
        let mut results: HashMap<StepId, AggregateResult> = HashMap::new();
        let mut contexts = ContextStore::new();

        info!("starting scenario run with {} step(s)", steps.len());

        // Reset every step card before the first one starts.
        for step in steps {
            if !handle.is_current() {
                return RunOutcome::Superseded;
            }
            observer.on_step_status(&step.id, StepStatus::Pending, None);
        }

        let last_idx = steps.len() - 1;
        for (idx, step) in steps.iter().enumerate() {
            if !handle.is_current() {
                info!("run superseded before step {}", idx + 1);
                return RunOutcome::Superseded;
            }

            info!(
                "[{}/{}] running '{}': {} {}",
                idx + 1,
                steps.len(),
                step.name,
                step.method,
                step.url
            );
            reports[idx].status = StepStatus::Running;
            observer.on_step_status(&step.id, StepStatus::Running, None);

            // A step without a URL is skipped, not failed.
            if step.url.trim().is_empty() {
                reports[idx].status = StepStatus::Skipped;
                reports[idx].summary = Some("No URL configured".to_string());
                observer.on_step_status(&step.id, StepStatus::Skipped, Some("No URL configured"));
                continue;
            }

            let config = resolve_step(step, &contexts);
            let engine_result = self.dispatch(handle, step, config, &observer).await;

            if !handle.is_current() {
                info!("run superseded while '{}' was in flight", step.name);
                return RunOutcome::Superseded;
            }

            match engine_result {
                Ok(result) => {
                    contexts.insert(&step.name, StepContext::from_result(&result));
                    self.record_step(&mut reports[idx], step, &result, &observer);
                    results.insert(step.id.clone(), result);
                }
                Err(err) => {
                    // Failure is confined to this step; the scenario
                    // keeps going so later steps still execute.
                    let message = err.to_string();
                    warn!("step '{}' failed: {}", step.name, message);
                    contexts.insert(&step.name, StepContext::default());
                    reports[idx].status = StepStatus::Failed;
                    reports[idx].summary = Some(message.clone());
                    reports[idx].error = Some(message.clone());
                    observer.on_step_status(&step.id, StepStatus::Failed, Some(&message));
                }
            }

            if step.think_time_ms > 0 && idx < last_idx {
                debug!("think time: {}ms", step.think_time_ms);
                tokio::time::sleep(Duration::from_millis(step.think_time_ms)).await;
            }
        }

        if !handle.is_current() {
            return RunOutcome::Superseded;
        }

        let any_failed = reports.iter().any(|r| r.status == StepStatus::Failed);
        let status = if any_failed {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };
        let toast = if any_failed {
            "Scenario has failures"
        } else {
            "Scenario passed!"
        };
        observer.on_finished(status, toast);

        let duration_ms = run_start.elapsed().as_millis() as u64;
        info!("scenario finished: {:?} ({} ms)", status, duration_ms);

        RunOutcome::Completed(ScenarioReport {
            status,
            steps: reports,
            results,
            duration_ms,
        })
    }

    /// Invoke the engine for one step with the progress pipeline
    /// wired up.
    async fn dispatch(
        &self,
        handle: &RunHandle,
        step: &ScenarioStep,
        config: LoadConfig,
        observer: &Arc<dyn RunObserver>,
    ) -> anyhow::Result<AggregateResult> {
        let (event_tx, event_rx) = mpsc::channel::<ProgressEvent>(progress::EVENT_CHANNEL_CAPACITY);
        let (batch_tx, mut batch_rx) = mpsc::channel::<ProgressBatch>(64);

        let batcher = progress::spawn_batcher(event_rx, handle.clone(), batch_tx);

        let forward_observer = Arc::clone(observer);
        let forward_id = step.id.clone();
        let forward_handle = handle.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(batch) = batch_rx.recv().await {
                // A batch can sit in the channel across a supersede;
                // re-check liveness at delivery time, not just at
                // flush time.
                if !forward_handle.is_current() {
                    break;
                }
                forward_observer.on_progress(&forward_id, batch);
            }
        });

        let result = self
            .engine
            .run_load_test(config, event_tx, handle.cancel_token())
            .await;

        // The event sender is gone; both pipeline tasks drain and
        // exit on their own.
        let _ = batcher.await;
        let _ = forwarder.await;

        result
    }

    /// Score assertions (or apply the default success-rate rule) and
    /// record the step's terminal status.
    fn record_step(
        &self,
        report: &mut StepReport,
        step: &ScenarioStep,
        result: &AggregateResult,
        observer: &Arc<dyn RunObserver>,
    ) {
        let success_rate = result.success_rate();
        let scored = assertion::evaluate(&step.assertions, result);
        let passed = if scored.is_empty() {
            success_rate >= assertion::PASS_THRESHOLD * 100.0
        } else {
            scored.iter().all(|a| a.passed == Some(true))
        };

        let mut summary = format!(
            "{:.0}% ok · {:.0} RPS · P95: {:.0}ms",
            success_rate, result.requests_per_second, result.latency_p95_ms
        );
        if !scored.is_empty() {
            let ok = scored.iter().filter(|a| a.passed == Some(true)).count();
            summary.push_str(&format!(" · asserts {}/{}", ok, scored.len()));
        }

        report.status = if passed {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        };
        report.summary = Some(summary.clone());
        report.success_rate = Some(success_rate);
        report.rps = Some(result.requests_per_second);
        report.p95 = Some(result.latency_p95_ms);
        report.total_requests = Some(result.total_requests);
        report.assertions = scored;

        observer.on_step_status(&step.id, report.status, Some(&summary));
    }
}

/// Rewrite a step's URL, headers, and body against the accumulated
/// contexts, producing the engine configuration.
fn resolve_step(step: &ScenarioStep, contexts: &ContextStore) -> LoadConfig {
    let headers = step
        .headers
        .iter()
        .map(|(k, v)| (resolver::resolve(k, contexts), resolver::resolve(v, contexts)))
        .collect();

    LoadConfig {
        url: resolver::resolve(&step.url, contexts),
        method: step.method.clone(),
        headers,
        body: step
            .body
            .as_deref()
            .map(|b| resolver::resolve(b, contexts)),
        virtual_users: step.virtual_users,
        mode: step.mode,
        timeout_ms: step.timeout_ms,
        think_time_ms: step.think_time_ms,
        duration_secs: step.duration_secs,
        iterations: step.iterations,
    }
}
