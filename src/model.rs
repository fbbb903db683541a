//! Scenario document types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ordered list of steps executed sequentially as one logical test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Stable identifier assigned by the persistence layer, if saved.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<ScenarioStep>,
}

/// A single named load-test step.
///
/// The `id` is a stable opaque identifier distinct from the display
/// `name`; names are the keys used for `{{name.path}}` variable
/// addressing and need not be unique (though duplicates make
/// addressing ambiguous; the resolver keeps the first writer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub id: StepId,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_virtual_users")]
    pub virtual_users: u32,
    #[serde(default)]
    pub mode: TestMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause after this step completes, before the next one starts.
    #[serde(default)]
    pub think_time_ms: u64,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default = "default_iterations")]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub status: StepStatus,
    /// One-line human-readable outcome, set when the step finishes.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Opaque stable step identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a step within one run.
///
/// Only flows forward: `Pending → Running → {Passed|Failed|Skipped}`.
/// Every step is reset to `Pending` when a new run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

/// Scenario-level run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    #[default]
    Idle,
    Running,
    /// Every non-skipped step passed. A scenario of only skipped
    /// steps is also `Passed`, since nothing failed.
    Passed,
    Failed,
}

/// Declarative pass/fail check scored against a step's aggregate
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    pub value: String,
    /// Unset before evaluation; populated after the owning step's
    /// run completes.
    #[serde(default)]
    pub passed: Option<bool>,
}

impl Assertion {
    pub fn new(kind: AssertionKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            passed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    StatusCodeEquals,
    BodyContains,
    LatencyP95Lt,
    ResponseTimeLt,
}

/// Traffic shape the load engine should generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    #[default]
    Burst,
    Constant,
    RampUp,
    StressTest,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_virtual_users() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_iterations() -> Option<u32> {
    Some(1)
}

impl Scenario {
    /// Deserialize a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the scenario to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Deserialize a scenario from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the scenario to a JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl ScenarioStep {
    /// Build a blank step with the app defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            url: String::new(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
            virtual_users: default_virtual_users(),
            mode: TestMode::default(),
            timeout_ms: default_timeout_ms(),
            think_time_ms: 0,
            duration_secs: None,
            iterations: default_iterations(),
            assertions: Vec::new(),
            status: StepStatus::default(),
            summary: None,
        }
    }
}
