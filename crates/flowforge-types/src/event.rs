//! Events published by the execution engine on its broadcast bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionStatus, StepStatus};

/// Lifecycle events of workflow executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        execution_id: Uuid,
        workflow_id: String,
        step_count: usize,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: String,
        wave: usize,
    },
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
    },
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        status: StepStatus,
        error: String,
    },
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::RunStarted { execution_id, .. }
            | EngineEvent::StepStarted { execution_id, .. }
            | EngineEvent::StepRetrying { execution_id, .. }
            | EngineEvent::StepCompleted { execution_id, .. }
            | EngineEvent::StepFailed { execution_id, .. }
            | EngineEvent::RunFinished { execution_id, .. } => *execution_id,
        }
    }
}
