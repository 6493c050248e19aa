//! Simulation (preview run) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JsonMap;
use crate::execution::StepStatus;

// ---------------------------------------------------------------------------
// SimulationConfig
// ---------------------------------------------------------------------------

/// Knobs for one simulation run. Every field has a default, so `{}` is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Merge provider-generated mock data into step inputs.
    #[serde(default = "default_true")]
    pub use_mock_data: bool,
    /// Per-step-id overrides merged over the generated mock data.
    #[serde(default)]
    pub mock_data_config: JsonMap,
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    /// Hard cap on visited steps.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub enable_validation: bool,
    #[serde(default = "default_true")]
    pub enable_performance_tracking: bool,
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
    /// Substitute synthetic per-type outputs instead of calling executors.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_true() -> bool {
    true
}

fn default_step_timeout_seconds() -> u64 {
    30
}

fn default_max_steps() -> usize {
    100
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            use_mock_data: true,
            mock_data_config: JsonMap::new(),
            step_timeout_seconds: default_step_timeout_seconds(),
            max_steps: default_max_steps(),
            enable_validation: true,
            enable_performance_tracking: true,
            stop_on_error: true,
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SimulationResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SimulationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SimulationStatus::Running)
    }
}

/// Trace of one step inside a simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStep {
    pub step_id: String,
    pub step_type: String,
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub inputs: JsonMap,
    #[serde(default)]
    pub outputs: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub mock_data_used: JsonMap,
}

/// Complete record of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: SimulationStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub steps: Vec<SimulationStep>,
    #[serde(default)]
    pub variables: JsonMap,
    #[serde(default)]
    pub mock_data_config: JsonMap,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    /// Step ids in the order they were visited.
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<PerformanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimulationResult {
    pub fn step(&self, step_id: &str) -> Option<&SimulationStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_duration_ms: u64,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
    pub average_step_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slowest_step: Option<SlowestStep>,
    /// The walk stopped because `max_steps` was reached.
    #[serde(default)]
    pub max_steps_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowestStep {
    pub step_id: String,
    pub duration_ms: u64,
}
