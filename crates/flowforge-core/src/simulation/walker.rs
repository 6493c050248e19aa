//! Simulation walker: a sequential, depth-first preview run of a workflow.
//!
//! Starting from every `start` step in authoring order, the walker follows
//! successor edges depth-first, visiting each step at most once. A step is
//! either executed through the executor registry under the simulation's
//! step timeout, or (in dry-run mode) answered with a synthetic output for
//! its type. Outputs are merged into the simulation's variable context
//! before the walk descends into the step's successors.
//!
//! The walk runs on the caller's task, one step at a time, so two runs of
//! the same workflow and config visit steps in the same order.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowforge_types::JsonMap;
use flowforge_types::execution::StepStatus;
use flowforge_types::simulation::{
    PerformanceMetrics, SimulationConfig, SimulationResult, SimulationStatus, SimulationStep,
    SlowestStep,
};
use flowforge_types::workflow::{StepKind, WorkflowDefinition, WorkflowStep};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::mock_data::MockDataProvider;
use crate::workflow::graph::{GraphError, WorkflowGraph};
use crate::workflow::step_runner::{ExecutorRegistry, StepContext, StepError};
use crate::workflow::validator::WorkflowValidator;
use crate::workflow::variables::resolve_inputs;

/// Why a simulation stopped early.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Structural(#[from] GraphError),

    #[error("step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },

    #[error("simulation cancelled")]
    Cancelled,
}

struct ActiveSimulation {
    snapshot: SimulationResult,
    cancel: CancellationToken,
}

/// Runs simulations and keeps their results.
pub struct SimulationEngine {
    registry: ExecutorRegistry,
    validator: WorkflowValidator,
    mock_provider: MockDataProvider,
    active: DashMap<Uuid, ActiveSimulation>,
    finished: DashMap<Uuid, SimulationResult>,
}

impl SimulationEngine {
    pub fn new(registry: ExecutorRegistry) -> Self {
        let validator = WorkflowValidator::with_registry(&registry);
        Self {
            registry,
            validator,
            mock_provider: MockDataProvider::new(),
            active: DashMap::new(),
            finished: DashMap::new(),
        }
    }

    /// Simulate `workflow` and return the finished record.
    pub async fn simulate(
        &self,
        workflow: &WorkflowDefinition,
        config: &SimulationConfig,
        initial_variables: JsonMap,
    ) -> SimulationResult {
        let simulation_id = Uuid::now_v7();
        let started = Instant::now();
        let mut sim = SimulationResult {
            simulation_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: SimulationStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            steps: workflow.steps.iter().map(pending_step).collect(),
            variables: initial_variables,
            mock_data_config: config.mock_data_config.clone(),
            validation_errors: Vec::new(),
            execution_path: Vec::new(),
            performance_metrics: None,
            error: None,
        };

        let cancel = CancellationToken::new();
        self.active.insert(
            simulation_id,
            ActiveSimulation {
                snapshot: sim.clone(),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(
            simulation_id = %simulation_id,
            workflow = workflow.name.as_str(),
            dry_run = config.dry_run,
            "simulation started"
        );

        let mut walk = Walk {
            engine: self,
            workflow,
            config,
            cancel: &cancel,
            visited: HashSet::new(),
            max_steps_reached: false,
        };
        let outcome = walk.run(&mut sim).await;
        let max_steps_reached = walk.max_steps_reached;

        match outcome {
            Ok(()) => sim.status = SimulationStatus::Completed,
            Err(SimulationError::Cancelled) => {
                sim.status = SimulationStatus::Cancelled;
                sim.error = Some(SimulationError::Cancelled.to_string());
            }
            Err(e) => {
                tracing::error!(simulation_id = %simulation_id, error = %e, "simulation failed");
                sim.status = SimulationStatus::Failed;
                sim.error = Some(e.to_string());
            }
        }

        for step in sim.steps.iter_mut().filter(|s| s.status == StepStatus::Pending) {
            step.status = StepStatus::Skipped;
        }
        sim.end_time = Some(Utc::now());
        sim.duration_ms = Some(millis(started.elapsed()));
        if config.enable_performance_tracking {
            sim.performance_metrics = Some(performance_metrics(&sim, max_steps_reached));
        }

        tracing::info!(
            simulation_id = %simulation_id,
            status = ?sim.status,
            steps_visited = sim.execution_path.len(),
            duration_ms = sim.duration_ms.unwrap_or(0),
            "simulation finished"
        );

        self.active.remove(&simulation_id);
        self.finished.insert(simulation_id, sim.clone());
        sim
    }

    /// Latest snapshot of a running simulation, or its finished record.
    pub fn get_simulation(&self, id: Uuid) -> Option<SimulationResult> {
        if let Some(active) = self.active.get(&id) {
            return Some(active.snapshot.clone());
        }
        self.finished.get(&id).map(|r| r.clone())
    }

    /// Ids of simulations still running.
    pub fn active_simulations(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Request cancellation. True only while the simulation is running and
    /// not already cancelled.
    pub fn cancel_simulation(&self, id: Uuid) -> bool {
        match self.active.get(&id) {
            Some(active) if !active.cancel.is_cancelled() => {
                active.cancel.cancel();
                tracing::info!(simulation_id = %id, "simulation cancellation requested");
                true
            }
            _ => false,
        }
    }

    fn publish_snapshot(&self, sim: &SimulationResult) {
        if let Some(mut active) = self.active.get_mut(&sim.simulation_id) {
            active.snapshot = sim.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

struct Walk<'a> {
    engine: &'a SimulationEngine,
    workflow: &'a WorkflowDefinition,
    config: &'a SimulationConfig,
    cancel: &'a CancellationToken,
    visited: HashSet<String>,
    max_steps_reached: bool,
}

impl Walk<'_> {
    async fn run(&mut self, sim: &mut SimulationResult) -> Result<(), SimulationError> {
        if self.config.enable_validation {
            let report = self.engine.validator.validate(self.workflow);
            sim.validation_errors = report.error_messages();
            if !sim.validation_errors.is_empty() && self.config.stop_on_error {
                return Err(SimulationError::Validation(sim.validation_errors.clone()));
            }
        }

        let graph = WorkflowGraph::build(&self.workflow.steps)?;
        let positions: HashMap<&str, usize> = self
            .workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let starts: Vec<&str> = graph
            .steps()
            .iter()
            .filter(|s| s.kind() == Some(StepKind::Start))
            .map(|s| s.id.as_str())
            .collect();
        if starts.is_empty() {
            tracing::warn!(simulation_id = %sim.simulation_id, "workflow has no start step, nothing to walk");
        }

        for start in starts {
            let mut stack = vec![start.to_string()];
            while let Some(step_id) = stack.pop() {
                if self.visited.contains(&step_id) {
                    continue;
                }
                if self.visited.len() >= self.config.max_steps {
                    tracing::warn!(
                        simulation_id = %sim.simulation_id,
                        max_steps = self.config.max_steps,
                        "maximum steps reached, stopping simulation"
                    );
                    self.max_steps_reached = true;
                    return Ok(());
                }
                if self.cancel.is_cancelled() {
                    return Err(SimulationError::Cancelled);
                }
                let (Some(step), Some(&position)) = (graph.step(&step_id), positions.get(step_id.as_str()))
                else {
                    continue;
                };
                self.visited.insert(step_id.clone());

                let outcome = self.visit(sim, step, position).await;
                self.engine.publish_snapshot(sim);

                match outcome {
                    Ok(()) => {
                        // Reversed so the first successor is walked first.
                        for next in graph.successors(&step.id).iter().rev() {
                            if !self.visited.contains(next) {
                                stack.push(next.clone());
                            }
                        }
                    }
                    Err(StepError::Cancelled) => return Err(SimulationError::Cancelled),
                    Err(e) if self.config.stop_on_error => {
                        return Err(SimulationError::StepFailed {
                            step_id: step.id.clone(),
                            error: e.to_string(),
                        });
                    }
                    Err(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Run or synthesize one step and record it at `position`.
    async fn visit(
        &self,
        sim: &mut SimulationResult,
        step: &WorkflowStep,
        position: usize,
    ) -> Result<(), StepError> {
        let start_time = Utc::now();
        let started = Instant::now();
        sim.steps[position].status = StepStatus::Running;
        sim.steps[position].start_time = Some(start_time);

        let mut inputs = resolve_inputs(&step.inputs, &sim.variables);
        let mut mock_used = JsonMap::new();
        if self.config.use_mock_data {
            mock_used = self
                .engine
                .mock_provider
                .mock_data(step, &inputs, &self.config.mock_data_config);
            inputs.extend(mock_used.clone());
        }

        tracing::debug!(
            simulation_id = %sim.simulation_id,
            step_id = step.id.as_str(),
            step_type = step.step_type.as_str(),
            "simulating step"
        );

        let result = if self.config.dry_run {
            Ok(dry_run_output(step, &inputs))
        } else {
            self.execute(sim, step, &mock_used).await
        };

        let record = &mut sim.steps[position];
        record.inputs = inputs;
        record.mock_data_used = mock_used;
        record.end_time = Some(Utc::now());
        record.duration_ms = Some(millis(started.elapsed()));
        sim.execution_path.push(step.id.clone());

        match result {
            Ok(outputs) => {
                record.status = StepStatus::Completed;
                record.outputs = outputs.clone();
                sim.variables.extend(outputs);
                Ok(())
            }
            Err(e) => {
                record.status = e.status();
                record.error = Some(e.to_string());
                tracing::warn!(
                    simulation_id = %sim.simulation_id,
                    step_id = step.id.as_str(),
                    error = %e,
                    "step failed in simulation"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        sim: &SimulationResult,
        step: &WorkflowStep,
        mock: &JsonMap,
    ) -> Result<JsonMap, StepError> {
        // The executor resolves placeholders itself, so it gets the authored
        // inputs plus the mock keys, never the already-resolved map.
        let mut prepared = step.clone();
        prepared.inputs.extend(mock.clone());
        let ctx = StepContext::new(sim.simulation_id, self.workflow.id.clone(), sim.variables.clone())
            .with_cancel(self.cancel.clone());

        let limit = Duration::from_secs(self.config.step_timeout_seconds);
        match tokio::time::timeout(limit, self.engine.registry.execute(&prepared, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(limit)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pending_step(step: &WorkflowStep) -> SimulationStep {
    SimulationStep {
        step_id: step.id.clone(),
        step_type: step.step_type.clone(),
        name: step.name.clone(),
        status: StepStatus::Pending,
        start_time: None,
        end_time: None,
        duration_ms: None,
        inputs: step.inputs.clone(),
        outputs: JsonMap::new(),
        error: None,
        mock_data_used: JsonMap::new(),
    }
}

/// Synthetic output for a step type, used in dry-run mode.
pub fn dry_run_output(step: &WorkflowStep, inputs: &JsonMap) -> JsonMap {
    let output = match step.kind() {
        Some(StepKind::Connector) => json!({
            "status": "success",
            "status_code": 200,
            "headers": {"content-type": "application/json"},
            "data": {"message": "Mock API response"},
        }),
        Some(StepKind::Transform) => json!({
            "status": "success",
            "transformed_data": inputs.get("data").cloned().unwrap_or_else(|| json!({})),
            "transformation_count": 1,
        }),
        Some(StepKind::Condition) => json!({
            "status": "success",
            "condition_result": true,
            "branch": "true",
        }),
        Some(StepKind::Webhook) => json!({
            "status": "success",
            "webhook_sent": true,
            "response_status": 200,
        }),
        Some(StepKind::Delay) => json!({
            "status": "success",
            "delay_completed": true,
            "actual_delay_ms": 0,
        }),
        Some(StepKind::Start | StepKind::End) => json!({}),
        None => json!({ "simulated_output": true }),
    };
    match output {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn performance_metrics(sim: &SimulationResult, max_steps_reached: bool) -> PerformanceMetrics {
    let visited: Vec<(&str, u64)> = sim
        .steps
        .iter()
        .filter_map(|s| s.duration_ms.map(|d| (s.step_id.as_str(), d)))
        .collect();

    let average_step_duration_ms = if visited.is_empty() {
        0.0
    } else {
        visited.iter().map(|(_, d)| *d as f64).sum::<f64>() / visited.len() as f64
    };
    let slowest_step = visited
        .iter()
        .fold(None::<(&str, u64)>, |slowest, &(id, d)| match slowest {
            Some((_, best)) if best >= d => slowest,
            _ => Some((id, d)),
        })
        .map(|(id, d)| SlowestStep {
            step_id: id.to_string(),
            duration_ms: d,
        });

    PerformanceMetrics {
        total_duration_ms: sim.duration_ms.unwrap_or(0),
        steps_executed: visited.len(),
        steps_failed: sim.steps.iter().filter(|s| s.status.is_failure()).count(),
        steps_skipped: sim
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Skipped)
            .count(),
        average_step_duration_ms,
        slowest_step,
        max_steps_reached,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
