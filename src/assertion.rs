//! Assertion evaluation against a step's aggregate result.

use crate::engine::AggregateResult;
use crate::model::{Assertion, AssertionKind};
use tracing::debug;

/// Step-pass threshold shared with the orchestrator's default rule:
/// a status bucket must cover at least this share of requests.
pub const PASS_THRESHOLD: f64 = 0.95;

/// Score every assertion against `result`, returning a new list with
/// `passed` populated. The input is never mutated; callers capture
/// the return value.
pub fn evaluate(assertions: &[Assertion], result: &AggregateResult) -> Vec<Assertion> {
    assertions
        .iter()
        .map(|a| {
            let passed = evaluate_one(a, result);
            debug!(
                "assertion {:?}({}) => {}",
                a.kind,
                a.value,
                if passed { "pass" } else { "fail" }
            );
            Assertion {
                kind: a.kind,
                value: a.value.clone(),
                passed: Some(passed),
            }
        })
        .collect()
}

fn evaluate_one(assertion: &Assertion, result: &AggregateResult) -> bool {
    match assertion.kind {
        // The exact-code bucket must cover the same >=95% share the
        // step-pass rule uses.
        AssertionKind::StatusCodeEquals => {
            if result.total_requests == 0 {
                return false;
            }
            let count = result
                .status_distribution
                .get(assertion.value.trim())
                .copied()
                .unwrap_or(0);
            count as f64 / result.total_requests as f64 >= PASS_THRESHOLD
        }
        AssertionKind::BodyContains => result.timeline.iter().any(|e| {
            e.response_body
                .as_deref()
                .is_some_and(|body| body.contains(&assertion.value))
        }),
        AssertionKind::LatencyP95Lt => match assertion.value.trim().parse::<f64>() {
            Ok(threshold) => result.latency_p95_ms < threshold,
            Err(_) => false,
        },
        AssertionKind::ResponseTimeLt => match assertion.value.trim().parse::<f64>() {
            Ok(threshold) => result.latency_avg_ms < threshold,
            Err(_) => false,
        },
    }
}
