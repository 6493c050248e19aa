//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the document consumed by the execution engine,
//! the simulation walker and the validator. Steps carry both graph encodings
//! (`dependencies` pointing at predecessors, `connections` pointing at
//! successors); the core crate's graph abstraction normalises them into one
//! edge set before anything walks the graph.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::JsonMap;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow: an ordered list of typed steps forming a DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow identifier. Generated (UUIDv7) when the document omits it.
    #[serde(default = "generate_workflow_id")]
    pub id: String,
    /// Human-readable workflow name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in authoring order.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

fn generate_workflow_id() -> String {
    Uuid::now_v7().to_string()
}

impl WorkflowDefinition {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Workflow Step
// ---------------------------------------------------------------------------

/// One node of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique within a workflow.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Executor type name (`connector`, `condition`, `transform`, `webhook`,
    /// `delay`) or a `start`/`end` marker.
    ///
    /// Kept as a string so that unknown types survive parsing and can be
    /// reported by the validator or rejected by the executor registry.
    #[serde(rename = "type", default)]
    pub step_type: String,
    /// Type-specific configuration.
    #[serde(default)]
    pub config: JsonMap,
    /// Step inputs; string values may contain `{{var}}` templates.
    #[serde(default)]
    pub inputs: JsonMap,
    /// Declared outputs (documentation, and the validator's variable allow-list).
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub outputs: JsonMap,
    /// Predecessor step ids.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Successor step ids.
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Step timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl WorkflowStep {
    /// Create a step with empty config and no edges.
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            step_type: step_type.into(),
            config: JsonMap::new(),
            inputs: JsonMap::new(),
            outputs: JsonMap::new(),
            dependencies: Vec::new(),
            connections: Vec::new(),
            retry_policy: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// The recognised kind of this step, if its type name is known.
    pub fn kind(&self) -> Option<StepKind> {
        self.step_type.parse().ok()
    }

    /// Whether a failure of this step aborts the run.
    ///
    /// Reads `config.critical`; steps are critical unless explicitly marked
    /// otherwise.
    pub fn is_critical(&self) -> bool {
        self.config
            .get("critical")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// String value of a config key.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// The sub-type selector for this step's kind (e.g. `connector_type`).
    pub fn sub_type(&self) -> Option<&str> {
        self.kind()
            .and_then(StepKind::sub_type_key)
            .and_then(|key| self.config_str(key))
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// The recognised step type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Start,
    End,
    Connector,
    Condition,
    Transform,
    Webhook,
    Delay,
}

impl StepKind {
    pub const ALL: [StepKind; 7] = [
        StepKind::Start,
        StepKind::End,
        StepKind::Connector,
        StepKind::Condition,
        StepKind::Transform,
        StepKind::Webhook,
        StepKind::Delay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Start => "start",
            StepKind::End => "end",
            StepKind::Connector => "connector",
            StepKind::Condition => "condition",
            StepKind::Transform => "transform",
            StepKind::Webhook => "webhook",
            StepKind::Delay => "delay",
        }
    }

    /// Config key selecting the variant within this kind.
    pub fn sub_type_key(self) -> Option<&'static str> {
        match self {
            StepKind::Connector => Some("connector_type"),
            StepKind::Condition => Some("condition_type"),
            StepKind::Transform => Some("transform_type"),
            StepKind::Webhook => Some("webhook_type"),
            StepKind::Delay => Some("delay_type"),
            StepKind::Start | StepKind::End => None,
        }
    }

    /// Allowed values of the sub-type selector.
    pub fn allowed_sub_types(self) -> &'static [&'static str] {
        match self {
            StepKind::Connector => &["http", "database", "file", "email", "slack", "salesforce"],
            StepKind::Condition => &["if", "if_else", "switch", "all", "any"],
            StepKind::Transform => &["map", "filter", "aggregate", "format", "split", "join", "custom"],
            StepKind::Webhook => &["outgoing", "incoming"],
            StepKind::Delay => &["fixed", "dynamic", "conditional"],
            StepKind::Start | StepKind::End => &[],
        }
    }

    /// Whether this kind is a graph marker rather than a working step.
    pub fn is_marker(self) -> bool {
        matches!(self, StepKind::Start | StepKind::End)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown step type: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Per-step retry configuration with linear backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    #[serde(default)]
    pub max_retries: u32,
    /// Base delay in seconds, multiplied by the retry attempt number.
    #[serde(default = "default_retry_delay")]
    pub delay: f64,
}

fn default_retry_delay() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: default_retry_delay(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): `delay * attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = (self.delay * f64::from(attempt)).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
