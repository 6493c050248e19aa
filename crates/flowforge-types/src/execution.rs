//! Execution tracking types: one `WorkflowExecution` per submitted run, one
//! `StepResult` per step within it, plus the list/metrics views.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JsonMap;
use crate::workflow::WorkflowStep;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl ExecutionStatus {
    /// Completed, failed and cancelled are set exactly once and never left.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            "paused" => Ok(ExecutionStatus::Paused),
            other => Err(format!("unknown execution status: '{other}'")),
        }
    }
}

/// Status of one step within an execution or simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
    /// The step exceeded its timeout. Distinct from `Failed` so callers can
    /// tell a slow dependency from a broken configuration.
    TimedOut,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::TimedOut
        )
    }

    /// Failed or timed out.
    pub fn is_failure(self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::TimedOut)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Retrying => "retrying",
            StepStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// One step's outcome within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock seconds across all attempts.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl StepResult {
    pub fn new(step_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            output: JsonMap::new(),
            error: None,
            execution_time: 0.0,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            metadata: JsonMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One real run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7, so ids sort by submission time.
    pub id: Uuid,
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_name: String,
    pub status: ExecutionStatus,
    /// Steps in authoring order, with both graph encodings normalised.
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub step_results: BTreeMap<String, StepResult>,
    /// Shared variable context of this run.
    #[serde(default)]
    pub variables: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// A freshly submitted, pending execution.
    pub fn pending(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        steps: Vec<WorkflowStep>,
        variables: JsonMap,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Pending,
            steps,
            step_results: BTreeMap::new(),
            variables,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Seconds between start and completion, if both are known.
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Build the list-view summary of this execution.
    pub fn summary(&self) -> ExecutionSummary {
        let count = |status: StepStatus| {
            self.step_results
                .values()
                .filter(|r| r.status == status)
                .count()
        };
        ExecutionSummary {
            id: self.id,
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            total_steps: self.steps.len(),
            completed_steps: count(StepStatus::Completed),
            failed_steps: count(StepStatus::Failed) + count(StepStatus::TimedOut),
            error: self.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// List and metrics views
// ---------------------------------------------------------------------------

/// Row of `list_executions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Default page size of `list_executions`.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page `list_executions` returns.
pub const MAX_LIST_LIMIT: usize = 100;

/// Filter and page for `list_executions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl ExecutionQuery {
    /// `limit` clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// Aggregate counters over all known executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_executions: usize,
    pub active_executions: usize,
    pub completed_executions: usize,
    pub failed_executions: usize,
    pub cancelled_executions: usize,
    /// Completed over completed + failed, in percent, two decimals.
    pub success_rate: f64,
    /// Mean duration in seconds of finished executions.
    pub average_execution_time: f64,
    /// Per step type: how many step results exist and how they ended.
    pub step_types: BTreeMap<String, StepTypeStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTypeStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
        assert_eq!("paused".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Paused);
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Retrying.is_terminal());
        assert!(StepStatus::TimedOut.is_failure());
    }

    #[test]
    fn query_limit_is_clamped() {
        let q = ExecutionQuery { limit: 500, ..Default::default() };
        assert_eq!(q.effective_limit(), MAX_LIST_LIMIT);
        let q = ExecutionQuery { limit: 0, ..Default::default() };
        assert_eq!(q.effective_limit(), 1);
        assert_eq!(ExecutionQuery::default().effective_limit(), 50);
    }

    #[test]
    fn summary_counts_step_outcomes() {
        let steps = vec![
            WorkflowStep::new("a", "transform"),
            WorkflowStep::new("b", "transform"),
            WorkflowStep::new("c", "transform"),
        ];
        let mut exec = WorkflowExecution::pending("wf", "demo", steps, JsonMap::new());
        exec.step_results
            .insert("a".into(), StepResult::new("a", StepStatus::Completed));
        exec.step_results
            .insert("b".into(), StepResult::new("b", StepStatus::TimedOut));

        let summary = exec.summary();
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.completed_steps, 1);
        assert_eq!(summary.failed_steps, 1);
        assert_eq!(summary.status, ExecutionStatus::Pending);
    }
}
