//! Variable resolution: `{{step.path}}` placeholder substitution
//! against captured step contexts.
//!
//! Resolution is a pure textual rewrite performed once per step,
//! immediately before it is dispatched. Anything that cannot be
//! resolved (unknown step, missing JSON key, null status) is left
//! verbatim so the failure is visible in the outgoing request instead
//! of being swallowed here.

use crate::engine::AggregateResult;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Minimal response data one step exposes to later steps.
///
/// Captured from the first successful request in the step's timeline;
/// all-failed steps produce an empty context so later references
/// simply stay unresolved.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub status: Option<u16>,
    pub body: String,
    pub body_json: Option<Value>,
}

impl StepContext {
    /// Build a context from a step's aggregate result.
    pub fn from_result(result: &AggregateResult) -> Self {
        let first_ok = result.timeline.iter().find(|e| e.success);
        match first_ok {
            Some(event) => {
                let body = event.response_body.clone().unwrap_or_default();
                let body_json = serde_json::from_str(&body).ok();
                Self {
                    status: event.status_code,
                    body,
                    body_json,
                }
            }
            None => Self::default(),
        }
    }
}

/// Append-only map from step name to captured context, scoped to one
/// scenario run.
///
/// Duplicate step names are ambiguous for addressing; the first
/// writer wins and later insertions under the same name are dropped
/// with a warning.
#[derive(Debug, Default)]
pub struct ContextStore {
    entries: HashMap<String, StepContext>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, ctx: StepContext) {
        if self.entries.contains_key(name) {
            warn!(
                "duplicate step name '{}': keeping context from the first occurrence",
                name
            );
            return;
        }
        debug!("captured context for step '{}'", name);
        self.entries.insert(name.to_string(), ctx);
    }

    pub fn get(&self, name: &str) -> Option<&StepContext> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace every resolvable `{{name.path}}` span in `text`.
///
/// The scanner walks the text by hand instead of using a regex so
/// literal braces in JSON bodies never confuse it: a `{{` without a
/// closing `}}`, or a span without a `name.path` shape, is copied
/// through untouched.
pub fn resolve(text: &str, ctx: &ContextStore) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        let (head, tail) = rest.split_at(open);
        out.push_str(head);

        let Some(close) = tail.find("}}") else {
            // No closing braces anywhere ahead; emit as-is.
            out.push_str(tail);
            return out;
        };

        let inner = tail[2..close].trim();
        match resolve_placeholder(inner, ctx) {
            Some(value) => {
                out.push_str(&value);
                rest = &tail[close + 2..];
            }
            None => {
                // Treat the braces as literal text and keep scanning
                // right after them, so a real placeholder nested
                // past a stray `{{` is still found.
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Collect the step names referenced by `{{name.path}}` spans in
/// `text`, in order of appearance. Spans that do not have the
/// `name.path` shape are ignored, matching what [`resolve`] treats
/// as literal text.
pub fn references(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        let tail = &rest[open..];
        let Some(close) = tail.find("}}") else {
            break;
        };
        let inner = tail[2..close].trim();
        if inner.contains("{{") {
            // Stray literal `{{`; a real span may open inside it.
            rest = &tail[2..];
            continue;
        }
        if let Some((name, _path)) = inner.split_once('.') {
            names.push(name.trim().to_string());
        }
        rest = &tail[close + 2..];
    }

    names
}

/// Resolve the inside of one `{{...}}` span. `None` means "leave the
/// placeholder verbatim".
fn resolve_placeholder(inner: &str, ctx: &ContextStore) -> Option<String> {
    let (name, path) = inner.split_once('.')?;
    let step = ctx.get(name.trim())?;

    match path {
        "status" => step.status.map(|s| s.to_string()),
        "body" => {
            if step.body.is_empty() {
                None
            } else {
                Some(step.body.clone())
            }
        }
        _ => {
            let json_path = path.strip_prefix("body.")?;
            let value = lookup_json_path(step.body_json.as_ref()?, json_path)?;
            Some(render_value(value))
        }
    }
}

/// Walk a dot-separated path through nested JSON objects. Traversal
/// stops the moment a non-object is indexed or a key is missing.
fn lookup_json_path<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = json;
    for part in path.split('.') {
        if part.is_empty() {
            return None;
        }
        match current {
            Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Render a JSON leaf for substitution: strings raw, everything else
/// as compact JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
