//! End-to-end orchestration tests against a scripted mock engine.

use async_trait::async_trait;
use stampede::engine::{AggregateResult, LoadConfig, LoadEngine, ProgressEvent, RequestEvent};
use stampede::model::{
    Assertion, AssertionKind, ScenarioStatus, ScenarioStep, StepId, StepStatus,
};
use stampede::progress::ProgressBatch;
use stampede::runner::{RunObserver, RunOutcome, ScenarioRunner};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ── mock engine ─────────────────────────────────────────

enum Script {
    /// Resolve with this result, optionally emitting events first.
    Ok(AggregateResult, Vec<ProgressEvent>),
    /// Reject the call.
    Fail(String),
    /// Resolve with this result, pausing after each emitted event so
    /// the flush cadence splits them into separate batches.
    Paced(AggregateResult, Vec<ProgressEvent>, std::time::Duration),
    /// Park until cancelled, then emit late events and resolve.
    HangUntilCancel(AggregateResult, Vec<ProgressEvent>),
}

struct MockEngine {
    scripts: Mutex<VecDeque<Script>>,
    calls: Arc<Mutex<Vec<LoadConfig>>>,
}

impl MockEngine {
    fn new(scripts: Vec<Script>) -> (Self, Arc<Mutex<Vec<LoadConfig>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                scripts: Mutex::new(scripts.into()),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl LoadEngine for MockEngine {
    async fn run_load_test(
        &self,
        config: LoadConfig,
        events: tokio::sync::mpsc::Sender<ProgressEvent>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<AggregateResult> {
        self.calls.lock().unwrap().push(config);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock engine called more times than scripted");

        match script {
            Script::Ok(result, live) => {
                for event in live {
                    let _ = events.send(event).await;
                }
                Ok(result)
            }
            Script::Fail(message) => Err(anyhow::anyhow!(message)),
            Script::Paced(result, live, gap) => {
                for event in live {
                    let _ = events.send(event).await;
                    tokio::time::sleep(gap).await;
                }
                Ok(result)
            }
            Script::HangUntilCancel(result, late) => {
                cancel.cancelled().await;
                for event in late {
                    let _ = events.send(event).await;
                }
                Ok(result)
            }
        }
    }
}

// ── recording observer ──────────────────────────────────

#[derive(Default)]
struct Recording {
    statuses: Mutex<Vec<(StepId, StepStatus, Option<String>)>>,
    batches: Mutex<Vec<(StepId, ProgressBatch)>>,
    finished: Mutex<Option<(ScenarioStatus, String)>>,
}

impl RunObserver for Recording {
    fn on_step_status(&self, step_id: &StepId, status: StepStatus, summary: Option<&str>) {
        self.statuses
            .lock()
            .unwrap()
            .push((step_id.clone(), status, summary.map(str::to_string)));
    }

    fn on_progress(&self, step_id: &StepId, batch: ProgressBatch) {
        self.batches.lock().unwrap().push((step_id.clone(), batch));
    }

    fn on_finished(&self, status: ScenarioStatus, toast: &str) {
        *self.finished.lock().unwrap() = Some((status, toast.to_string()));
    }
}

/// Observer that stalls inside its first progress delivery until the
/// test releases it, recording the event ids of every batch it is
/// handed.
struct StallingObserver {
    batches: Mutex<Vec<Vec<u32>>>,
    entered: std::sync::mpsc::Sender<()>,
    gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
}

impl RunObserver for StallingObserver {
    fn on_progress(&self, _step_id: &StepId, batch: ProgressBatch) {
        self.batches
            .lock()
            .unwrap()
            .push(batch.events.iter().map(|e| e.id).collect());
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = self.entered.send(());
            let _ = gate.recv();
        }
    }
}

// ── builders ────────────────────────────────────────────

fn request_event(id: u32, success: bool, status: Option<u16>, body: Option<&str>) -> RequestEvent {
    RequestEvent {
        id,
        success,
        status_code: status,
        latency_ms: 12.0,
        error: if success { None } else { Some("HTTP 500".to_string()) },
        response_size_bytes: body.map_or(0, str::len),
        response_body: body.map(str::to_string),
    }
}

/// Aggregate for `ok` successful 200s and `bad` failing 500s, with a
/// first-success body of `body`.
fn aggregate(ok: u64, bad: u64, body: Option<&str>) -> AggregateResult {
    let mut status_distribution = HashMap::new();
    if ok > 0 {
        status_distribution.insert("200".to_string(), ok);
        status_distribution.insert("2xx".to_string(), ok);
    }
    if bad > 0 {
        status_distribution.insert("500".to_string(), bad);
        status_distribution.insert("5xx".to_string(), bad);
    }

    let mut timeline = Vec::new();
    if bad > 0 {
        timeline.push(request_event(0, false, Some(500), None));
    }
    if ok > 0 {
        timeline.push(request_event(bad as u32, true, Some(200), body));
    }

    AggregateResult {
        total_requests: ok + bad,
        success_count: ok,
        error_count: bad,
        total_duration_ms: 100.0,
        requests_per_second: (ok + bad) as f64 * 10.0,
        latency_avg_ms: 15.0,
        latency_p50_ms: 12.0,
        latency_p95_ms: 40.0,
        latency_p99_ms: 80.0,
        status_distribution,
        timeline,
        ..Default::default()
    }
}

fn step(id: &str, name: &str, url: &str) -> ScenarioStep {
    let mut s = ScenarioStep::new(id, name);
    s.url = url.to_string();
    s
}

// ── tests ───────────────────────────────────────────────

#[tokio::test]
async fn empty_scenario_is_a_no_op() {
    let (engine, calls) = MockEngine::new(vec![]);
    let runner = ScenarioRunner::new(engine);
    let observer = Arc::new(Recording::default());

    let handle = runner.start_run();
    let outcome = runner.run(&handle, &[], observer.clone()).await;

    assert!(matches!(outcome, RunOutcome::Empty));
    assert!(calls.lock().unwrap().is_empty());
    assert!(observer.statuses.lock().unwrap().is_empty());
    assert!(observer.finished.lock().unwrap().is_none(), "no toast for empty runs");
}

#[tokio::test]
async fn step_with_status_assertion_passes_at_95_of_100() {
    let (engine, _) = MockEngine::new(vec![Script::Ok(aggregate(95, 5, None), vec![])]);
    let runner = ScenarioRunner::new(engine);

    let mut s = step("s1", "burst", "https://x/api");
    s.assertions
        .push(Assertion::new(AssertionKind::StatusCodeEquals, "200"));

    let handle = runner.start_run();
    let outcome = runner.run(&handle, &[s], Arc::new(Recording::default())).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(report.steps[0].status, StepStatus::Passed);
    assert_eq!(report.steps[0].assertions[0].passed, Some(true));
}

#[tokio::test]
async fn step_with_status_assertion_fails_at_94_of_100() {
    let (engine, _) = MockEngine::new(vec![Script::Ok(aggregate(94, 6, None), vec![])]);
    let runner = ScenarioRunner::new(engine);

    let mut s = step("s1", "burst", "https://x/api");
    s.assertions
        .push(Assertion::new(AssertionKind::StatusCodeEquals, "200"));

    let handle = runner.start_run();
    let outcome = runner.run(&handle, &[s], Arc::new(Recording::default())).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(report.status, ScenarioStatus::Failed);
    assert_eq!(report.steps[0].assertions[0].passed, Some(false));
}

#[tokio::test]
async fn default_rule_applies_when_no_assertions() {
    let (engine, _) = MockEngine::new(vec![
        Script::Ok(aggregate(96, 4, None), vec![]),
        Script::Ok(aggregate(90, 10, None), vec![]),
    ]);
    let runner = ScenarioRunner::new(engine);

    let steps = vec![
        step("a", "healthy", "https://x/a"),
        step("b", "flaky", "https://x/b"),
    ];

    let handle = runner.start_run();
    let outcome = runner.run(&handle, &steps, Arc::new(Recording::default())).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(report.steps[0].status, StepStatus::Passed);
    assert_eq!(report.steps[1].status, StepStatus::Failed);
    assert_eq!(report.status, ScenarioStatus::Failed);
}

#[tokio::test]
async fn failure_does_not_abort_and_placeholder_stays_literal() {
    // A fails outright, B references A, C succeeds. All three must
    // run; B's dispatched URL keeps the unresolved placeholder.
    let (engine, calls) = MockEngine::new(vec![
        Script::Fail("Connection refused".to_string()),
        Script::Ok(aggregate(100, 0, None), vec![]),
        Script::Ok(aggregate(100, 0, None), vec![]),
    ]);
    let runner = ScenarioRunner::new(engine);

    let steps = vec![
        step("a", "A", "https://x/a"),
        step("b", "B", "https://x/b?prev={{A.status}}"),
        step("c", "C", "https://x/c"),
    ];

    let observer = Arc::new(Recording::default());
    let handle = runner.start_run();
    let outcome = runner.run(&handle, &steps, observer.clone()).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3, "every step must be dispatched");
    assert_eq!(calls[1].url, "https://x/b?prev={{A.status}}");

    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.steps[0].error.as_deref(), Some("Connection refused"));
    assert_eq!(report.steps[1].status, StepStatus::Passed);
    assert_eq!(report.steps[2].status, StepStatus::Passed);
    assert_eq!(report.status, ScenarioStatus::Failed);

    let finished = observer.finished.lock().unwrap();
    assert_eq!(
        finished.as_ref().map(|(_, toast)| toast.as_str()),
        Some("Scenario has failures")
    );
}

#[tokio::test]
async fn blank_url_steps_are_skipped_not_failed() {
    let (engine, calls) = MockEngine::new(vec![Script::Ok(aggregate(100, 0, None), vec![])]);
    let runner = ScenarioRunner::new(engine);

    let steps = vec![
        step("a", "no-url", "   "),
        step("b", "real", "https://x/b"),
    ];

    let handle = runner.start_run();
    let outcome = runner.run(&handle, &steps, Arc::new(Recording::default())).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(calls.lock().unwrap().len(), 1, "skipped step never dispatched");
    assert_eq!(report.steps[0].status, StepStatus::Skipped);
    assert_eq!(report.steps[0].summary.as_deref(), Some("No URL configured"));
    assert_eq!(report.status, ScenarioStatus::Passed);
}

#[tokio::test]
async fn all_skipped_scenario_is_vacuously_passed() {
    let (engine, _) = MockEngine::new(vec![]);
    let runner = ScenarioRunner::new(engine);

    let steps = vec![step("a", "one", ""), step("b", "two", "")];

    let observer = Arc::new(Recording::default());
    let handle = runner.start_run();
    let outcome = runner.run(&handle, &steps, observer.clone()).await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(report.status, ScenarioStatus::Passed);

    let finished = observer.finished.lock().unwrap();
    assert_eq!(
        finished.as_ref().map(|(_, toast)| toast.as_str()),
        Some("Scenario passed!")
    );
}

#[tokio::test]
async fn chained_steps_resolve_ids_from_earlier_bodies() {
    let login_body = r#"{"id":42,"token":"t0k"}"#;
    let (engine, calls) = MockEngine::new(vec![
        Script::Ok(aggregate(100, 0, Some(login_body)), vec![]),
        Script::Ok(aggregate(100, 0, None), vec![]),
    ]);
    let runner = ScenarioRunner::new(engine);

    let mut login = step("s1", "login", "https://x/login");
    login
        .assertions
        .push(Assertion::new(AssertionKind::LatencyP95Lt, "300"));
    let fetch = step("s2", "fetch", "https://x/items?user={{login.body.id}}");

    let handle = runner.start_run();
    let outcome = runner
        .run(&handle, &[login, fetch], Arc::new(Recording::default()))
        .await;

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected completed run");
    };
    assert_eq!(report.status, ScenarioStatus::Passed);
    assert_eq!(calls.lock().unwrap()[1].url, "https://x/items?user=42");

    // Structured numbers stay first-class next to the summary.
    let login_report = &report.steps[0];
    assert_eq!(login_report.success_rate, Some(100.0));
    assert_eq!(login_report.p95, Some(40.0));
    assert_eq!(login_report.total_requests, Some(100));
    assert!(login_report
        .summary
        .as_deref()
        .unwrap()
        .contains("asserts 1/1"));
}

#[tokio::test]
async fn superseded_run_leaves_no_trace_after_new_run_starts() {
    let late_events = vec![ProgressEvent {
        progress: 55.0,
        result: request_event(9, true, Some(200), None),
    }];
    let (engine, _) = MockEngine::new(vec![
        // Run 1, step 1: parks until the new run cancels it, then
        // emits straggler events.
        Script::HangUntilCancel(aggregate(100, 0, None), late_events),
        // Run 2, step 1.
        Script::Ok(aggregate(100, 0, None), vec![]),
    ]);
    let runner = Arc::new(ScenarioRunner::new(engine));

    let steps = Arc::new(vec![step("a", "only", "https://x/a")]);
    let observer1 = Arc::new(Recording::default());

    let handle1 = runner.start_run();
    let run1 = {
        let runner = Arc::clone(&runner);
        let steps = Arc::clone(&steps);
        let observer1 = Arc::clone(&observer1);
        tokio::spawn(async move { runner.run(&handle1, &steps, observer1).await })
    };

    // Let run 1 reach the engine call.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let observer2 = Arc::new(Recording::default());
    let handle2 = runner.start_run();
    let outcome2 = runner.run(&handle2, &steps, observer2.clone()).await;
    let outcome1 = run1.await.unwrap();

    assert!(matches!(outcome1, RunOutcome::Superseded));
    assert!(matches!(outcome2, RunOutcome::Completed(_)));

    // Run 1 never got past "running": no terminal status, no toast,
    // and none of its straggler progress was delivered.
    let statuses1 = observer1.statuses.lock().unwrap();
    assert!(statuses1
        .iter()
        .all(|(_, status, _)| matches!(status, StepStatus::Pending | StepStatus::Running)));
    assert!(observer1.finished.lock().unwrap().is_none());
    assert!(observer1.batches.lock().unwrap().is_empty());

    // Run 2 is unaffected.
    assert!(observer2
        .statuses
        .lock()
        .unwrap()
        .iter()
        .any(|(_, status, _)| *status == StepStatus::Passed));
}

#[tokio::test]
async fn live_progress_is_batched_to_the_observer() {
    let live: Vec<ProgressEvent> = (0..10)
        .map(|i| ProgressEvent {
            progress: (i + 1) as f32 * 10.0,
            result: request_event(i as u32, true, Some(200), None),
        })
        .collect();
    let (engine, _) = MockEngine::new(vec![Script::Ok(aggregate(10, 0, None), live)]);
    let runner = ScenarioRunner::new(engine);

    let observer = Arc::new(Recording::default());
    let handle = runner.start_run();
    let outcome = runner
        .run(&handle, &[step("a", "only", "https://x/a")], observer.clone())
        .await;
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let batches = observer.batches.lock().unwrap();
    let delivered: Vec<u32> = batches
        .iter()
        .flat_map(|(_, b)| b.events.iter().map(|e| e.id))
        .collect();
    assert_eq!(delivered, (0..10).collect::<Vec<_>>(), "order preserved");
    assert_eq!(batches.last().unwrap().1.progress, 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batches_queued_before_a_supersede_are_not_delivered_after_it() {
    let live: Vec<ProgressEvent> = (0..2)
        .map(|i| ProgressEvent {
            progress: (i + 1) as f32 * 50.0,
            result: request_event(i as u32, true, Some(200), None),
        })
        .collect();
    let (engine, _) = MockEngine::new(vec![Script::Paced(
        aggregate(2, 0, None),
        live,
        std::time::Duration::from_millis(100),
    )]);
    let runner = Arc::new(ScenarioRunner::new(engine));

    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let observer = Arc::new(StallingObserver {
        batches: Mutex::new(Vec::new()),
        entered: entered_tx,
        gate: Mutex::new(Some(release_rx)),
    });

    let handle = runner.start_run();
    let run = {
        let runner = Arc::clone(&runner);
        let observer = Arc::clone(&observer);
        tokio::spawn(async move {
            runner
                .run(&handle, &[step("a", "only", "https://x/a")], observer)
                .await
        })
    };

    // Wait until the observer is stalled inside its first delivery,
    // then give the second batch time to reach the channel while the
    // run is still current.
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // Supersede while that delivery is still in flight, then let the
    // observer resume.
    runner.start_run();
    release_tx.send(()).unwrap();

    let outcome = run.await.unwrap();
    assert!(matches!(outcome, RunOutcome::Superseded));

    let delivered = observer.batches.lock().unwrap();
    assert_eq!(
        *delivered,
        vec![vec![0]],
        "the batch queued before the supersede must not reach the observer"
    );
}

#[tokio::test]
async fn think_time_delays_between_steps_but_not_after_last() {
    let (engine, _) = MockEngine::new(vec![
        Script::Ok(aggregate(10, 0, None), vec![]),
        Script::Ok(aggregate(10, 0, None), vec![]),
    ]);
    let runner = ScenarioRunner::new(engine);

    let mut first = step("a", "first", "https://x/a");
    first.think_time_ms = 80;
    let mut last = step("b", "last", "https://x/b");
    last.think_time_ms = 10_000; // must not delay: it's the last step

    let started = std::time::Instant::now();
    let handle = runner.start_run();
    let outcome = runner
        .run(&handle, &[first, last], Arc::new(Recording::default()))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert!(elapsed.as_millis() >= 80, "think time applied between steps");
    assert!(elapsed.as_millis() < 5_000, "no think time after the last step");
}

#[tokio::test]
async fn statuses_reset_to_pending_at_run_start() {
    let (engine, _) = MockEngine::new(vec![Script::Ok(aggregate(10, 0, None), vec![])]);
    let runner = ScenarioRunner::new(engine);

    let steps = vec![step("a", "only", "https://x/a")];
    let observer = Arc::new(Recording::default());
    let handle = runner.start_run();
    let _ = runner.run(&handle, &steps, observer.clone()).await;

    let statuses = observer.statuses.lock().unwrap();
    assert_eq!(statuses[0].1, StepStatus::Pending, "reset comes first");
    // Forward-only transitions for the step afterwards.
    let step_a: Vec<StepStatus> = statuses
        .iter()
        .filter(|(id, _, _)| id.as_str() == "a")
        .map(|(_, s, _)| *s)
        .collect();
    assert_eq!(
        step_a,
        vec![StepStatus::Pending, StepStatus::Running, StepStatus::Passed]
    );
}
