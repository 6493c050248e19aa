//! Execution engine: dependency-driven wave scheduling of workflow steps.
//!
//! `submit` records a pending execution and detaches the run onto the tokio
//! runtime. Each run repeatedly computes the *ready set* (steps whose
//! predecessors have all been executed), dispatches it as one wave on a
//! `JoinSet`, waits for the whole wave, then merges outputs into the shared
//! variable context. Steps of the same wave see the context as it was when
//! the wave started.
//!
//! # Failure handling
//!
//! - A critical step failure (the default) aborts the run.
//! - A non-critical failure is recorded and counts as executed; its
//!   dependents are recorded `skipped` and also count as executed.
//! - When no step is ready but some remain, the remaining steps form a cycle
//!   or wait on a missing predecessor and the run fails with their ids.
//!
//! # Cancellation
//!
//! `cancel` retires the record as `cancelled` and fires the run's
//! `CancellationToken`. Executors race the token at every suspension point,
//! so dispatched steps stop at their next await. Records only change while
//! active, so the interrupted run never overwrites the cancelled record.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowforge_types::JsonMap;
use flowforge_types::config::EngineSettings;
use flowforge_types::error::StoreError;
use flowforge_types::event::EngineEvent;
use flowforge_types::execution::{
    ExecutionMetrics, ExecutionQuery, ExecutionStatus, ExecutionSummary, StepResult, StepStatus,
    StepTypeStats, WorkflowExecution,
};
use flowforge_types::workflow::{WorkflowDefinition, WorkflowStep};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::ExecutionStore;

use super::graph::{GraphError, WorkflowGraph};
use super::retry::RetryHandler;
use super::step_runner::{ExecutorRegistry, StepContext, StepError};
use super::validator::WorkflowValidator;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    /// Cycle, missing predecessor or duplicate id.
    #[error("{0}")]
    Structural(#[from] GraphError),

    #[error("workflow validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("step '{step_id}' failed: {error}")]
    StepFailed { step_id: String, error: String },

    #[error("step task failed: {0}")]
    Task(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("event bus closed")]
    EventBusClosed,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Runs workflows against an injected [`ExecutionStore`].
///
/// Cheap to clone; clones share the store, registry, event bus and the
/// cancellation tokens of in-flight runs.
pub struct ExecutionEngine<S: ExecutionStore> {
    inner: Arc<EngineInner<S>>,
}

impl<S: ExecutionStore> Clone for ExecutionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<S> {
    store: S,
    registry: ExecutorRegistry,
    event_bus: EventBus,
    settings: EngineSettings,
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<S: ExecutionStore> ExecutionEngine<S> {
    pub fn new(store: S, registry: ExecutorRegistry, settings: EngineSettings) -> Self {
        let event_bus = EventBus::new(settings.event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                store,
                registry,
                event_bus,
                settings,
                cancellation_tokens: DashMap::new(),
            }),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.inner.registry
    }

    /// Record a pending execution and start running it in the background.
    ///
    /// Returns as soon as the record exists. Structural problems of the
    /// definition (duplicate ids, cycles) fail the run, not the submission.
    pub async fn submit(
        &self,
        workflow_id: impl Into<String>,
        definition: &WorkflowDefinition,
        variables: JsonMap,
    ) -> Result<Uuid, EngineError> {
        let mut definition = definition.clone();
        definition.id = workflow_id.into();

        let graph = WorkflowGraph::build(&definition.steps);
        let steps = match &graph {
            Ok(graph) => graph.normalized_steps(),
            Err(_) => definition.steps.clone(),
        };

        let execution = WorkflowExecution::pending(
            definition.id.clone(),
            definition.name.clone(),
            steps,
            variables.clone(),
        );
        let id = execution.id;
        self.inner.store.insert(execution).await?;

        let token = CancellationToken::new();
        self.inner.cancellation_tokens.insert(id, token.clone());

        tracing::info!(
            execution_id = %id,
            workflow = definition.name.as_str(),
            steps = definition.steps.len(),
            "execution submitted"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(id, definition, graph, variables, token).await;
        });

        Ok(id)
    }

    /// Current record of an execution, active or finished.
    pub async fn get_status(&self, id: Uuid) -> Result<Option<WorkflowExecution>, EngineError> {
        Ok(self.inner.store.get(id).await?)
    }

    /// Cancel an active execution. Returns `false` when it already finished
    /// or does not exist.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, EngineError> {
        let retired = self
            .inner
            .store
            .retire(id, |execution| {
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                execution.error = Some("execution cancelled".to_string());
            })
            .await?;

        if !retired {
            return Ok(false);
        }

        if let Some((_, token)) = self.inner.cancellation_tokens.remove(&id) {
            token.cancel();
        }
        self.inner.event_bus.publish(EngineEvent::RunFinished {
            execution_id: id,
            status: ExecutionStatus::Cancelled,
        });
        tracing::info!(execution_id = %id, "execution cancelled");
        Ok(true)
    }

    /// Executions newest first, filtered and paged by `query`.
    pub async fn list_executions(
        &self,
        query: &ExecutionQuery,
    ) -> Result<Vec<ExecutionSummary>, EngineError> {
        let records = self.inner.store.list(query).await?;
        Ok(records.iter().map(WorkflowExecution::summary).collect())
    }

    /// Aggregate counters over every known execution.
    pub async fn metrics(&self) -> Result<ExecutionMetrics, EngineError> {
        let records = self.inner.store.all().await?;
        Ok(compute_metrics(&records))
    }

    /// Wait until the execution reaches a terminal status and return it.
    pub async fn wait_for_completion(&self, id: Uuid) -> Result<WorkflowExecution, EngineError> {
        // Subscribe before the first check so a RunFinished published in
        // between is not missed.
        let mut events = self.inner.event_bus.subscribe();
        loop {
            match self.inner.store.get(id).await? {
                Some(execution) if execution.status.is_terminal() => return Ok(execution),
                Some(_) => {}
                None => return Err(EngineError::NotFound(id)),
            }

            loop {
                match events.recv().await {
                    Ok(EngineEvent::RunFinished { execution_id, .. }) if execution_id == id => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(EngineError::EventBusClosed),
                }
            }
        }
    }

    /// Submit and wait for the terminal record.
    pub async fn run_to_completion(
        &self,
        workflow_id: impl Into<String>,
        definition: &WorkflowDefinition,
        variables: JsonMap,
    ) -> Result<WorkflowExecution, EngineError> {
        let id = self.submit(workflow_id, definition, variables).await?;
        self.wait_for_completion(id).await
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// What a wave task hands back to the scheduler.
struct StepOutcome {
    result: StepResult,
    output: Result<JsonMap, StepError>,
}

impl<S: ExecutionStore> EngineInner<S> {
    async fn run(
        self: Arc<Self>,
        id: Uuid,
        definition: WorkflowDefinition,
        graph: Result<WorkflowGraph, GraphError>,
        variables: JsonMap,
        token: CancellationToken,
    ) {
        let marked = self
            .store
            .update_active(id, |execution| {
                execution.status = ExecutionStatus::Running;
                execution.started_at = Some(Utc::now());
            })
            .await;
        match marked {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(execution_id = %id, "execution no longer active before start");
                self.cancellation_tokens.remove(&id);
                return;
            }
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "failed to mark execution running");
                self.cancellation_tokens.remove(&id);
                self.fail_unstarted(id, e).await;
                return;
            }
        }

        self.event_bus.publish(EngineEvent::RunStarted {
            execution_id: id,
            workflow_id: definition.id.clone(),
            step_count: definition.steps.len(),
        });
        tracing::info!(execution_id = %id, workflow = definition.name.as_str(), "execution started");

        let mut variables = variables;
        let outcome = self
            .drive(id, &definition, graph, &mut variables, &token)
            .await;
        self.cancellation_tokens.remove(&id);

        let (status, error) = match &outcome {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(EngineError::Cancelled) => {
                (ExecutionStatus::Cancelled, Some("execution cancelled".to_string()))
            }
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
        };

        let retired = self
            .store
            .retire(id, |execution| {
                execution.status = status;
                execution.completed_at = Some(Utc::now());
                execution.error = error.clone();
                execution.variables = variables;
            })
            .await;

        match retired {
            Ok(true) => {
                match &error {
                    Some(error) => {
                        tracing::error!(execution_id = %id, %status, error = error.as_str(), "execution finished");
                    }
                    None => tracing::info!(execution_id = %id, %status, "execution finished"),
                }
                self.event_bus.publish(EngineEvent::RunFinished {
                    execution_id: id,
                    status,
                });
            }
            Ok(false) => {
                tracing::debug!(execution_id = %id, "execution was retired while running");
            }
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "failed to retire execution");
            }
        }
    }

    /// Retire a record whose run could not start, so it does not stay
    /// `pending`.
    async fn fail_unstarted(&self, id: Uuid, cause: StoreError) {
        let error = format!("failed to start execution: {cause}");
        let retired = self
            .store
            .retire(id, |execution| {
                execution.status = ExecutionStatus::Failed;
                execution.completed_at = Some(Utc::now());
                execution.error = Some(error);
            })
            .await;

        match retired {
            Ok(true) => self.event_bus.publish(EngineEvent::RunFinished {
                execution_id: id,
                status: ExecutionStatus::Failed,
            }),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(execution_id = %id, error = %e, "failed to retire execution");
            }
        }
    }

    async fn drive(
        self: &Arc<Self>,
        id: Uuid,
        definition: &WorkflowDefinition,
        graph: Result<WorkflowGraph, GraphError>,
        variables: &mut JsonMap,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let graph = graph?;

        if self.settings.validate_before_run {
            let report = WorkflowValidator::with_registry(&self.registry).validate(definition);
            if !report.is_valid() {
                return Err(EngineError::Validation(report.error_messages()));
            }
        }

        let steps = graph.normalized_steps();
        let mut executed: HashSet<String> = HashSet::with_capacity(steps.len());
        // Steps that did not complete; their dependents are skipped.
        let mut blocked: HashSet<String> = HashSet::new();
        let mut wave = 0usize;

        while executed.len() < steps.len() {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let ready: Vec<&WorkflowStep> = steps
                .iter()
                .filter(|s| !executed.contains(&s.id))
                .filter(|s| graph.predecessors(&s.id).iter().all(|p| executed.contains(p)))
                .collect();

            if ready.is_empty() {
                let step_ids = steps
                    .iter()
                    .filter(|s| !executed.contains(&s.id))
                    .map(|s| s.id.clone())
                    .collect();
                return Err(GraphError::CircularDependency { step_ids }.into());
            }

            let mut runnable = Vec::with_capacity(ready.len());
            for step in ready {
                let upstream = graph
                    .predecessors(&step.id)
                    .iter()
                    .find(|p| blocked.contains(*p))
                    .cloned();
                match upstream {
                    Some(upstream) => {
                        self.record_skipped(id, step, &upstream).await?;
                        blocked.insert(step.id.clone());
                        executed.insert(step.id.clone());
                    }
                    None => runnable.push(step.clone()),
                }
            }
            if runnable.is_empty() {
                continue;
            }

            tracing::debug!(execution_id = %id, wave, steps = runnable.len(), "dispatching wave");

            let mut join_set = JoinSet::new();
            for (position, step) in runnable.iter().enumerate() {
                let inner = Arc::clone(self);
                let step = step.clone();
                let ctx = StepContext::new(id, definition.id.clone(), variables.clone())
                    .with_cancel(token.clone());
                join_set.spawn(async move { (position, inner.run_step(step, ctx, wave).await) });
            }

            let mut outcomes: Vec<Option<StepOutcome>> = runnable.iter().map(|_| None).collect();
            while let Some(joined) = join_set.join_next().await {
                let (position, outcome) = joined.map_err(|e| EngineError::Task(e.to_string()))?;
                outcomes[position] = Some(outcome);
            }

            let mut abort: Option<EngineError> = None;
            for (step, outcome) in runnable.iter().zip(outcomes) {
                let Some(outcome) = outcome else { continue };
                executed.insert(step.id.clone());
                match outcome.output {
                    Ok(output) => variables.extend(output),
                    Err(StepError::Cancelled) => {
                        abort.get_or_insert(EngineError::Cancelled);
                    }
                    Err(err) => {
                        blocked.insert(step.id.clone());
                        if step.is_critical() {
                            abort.get_or_insert(EngineError::StepFailed {
                                step_id: step.id.clone(),
                                error: outcome.result.error.unwrap_or_else(|| err.to_string()),
                            });
                        } else {
                            tracing::warn!(
                                execution_id = %id,
                                step_id = step.id.as_str(),
                                error = %err,
                                "non-critical step failed, continuing"
                            );
                        }
                    }
                }
            }

            let snapshot = variables.clone();
            self.store
                .update_active(id, move |execution| execution.variables = snapshot)
                .await?;

            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Some(abort) = abort {
                return Err(abort);
            }
            wave += 1;
        }

        Ok(())
    }

    /// Run one step through the retry loop under its timeout and record the
    /// result.
    async fn run_step(self: Arc<Self>, step: WorkflowStep, ctx: StepContext, wave: usize) -> StepOutcome {
        let execution_id = ctx.execution_id;
        let started_at = Utc::now();
        let started = Instant::now();

        self.event_bus.publish(EngineEvent::StepStarted {
            execution_id,
            step_id: step.id.clone(),
            step_type: step.step_type.clone(),
            wave,
        });
        tracing::debug!(
            execution_id = %execution_id,
            step_id = step.id.as_str(),
            step_type = step.step_type.as_str(),
            "step started"
        );

        let mut running = StepResult::new(step.id.clone(), StepStatus::Running);
        running.started_at = Some(started_at);
        self.put_step_result(execution_id, running).await;

        let limit = Duration::from_secs(
            step.timeout
                .unwrap_or(self.settings.default_step_timeout_secs),
        );
        let registry = &self.registry;
        let step_ref = &step;
        let ctx_ref = &ctx;

        let outcome = RetryHandler::run(
            &step.retry_policy,
            self.settings.retry_mode,
            &ctx.cancel,
            move |_attempt| async move {
                match tokio::time::timeout(limit, registry.execute(step_ref, ctx_ref)).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Timeout(limit)),
                }
            },
            |retry, error| {
                let inner = Arc::clone(&self);
                let step_id = step.id.clone();
                async move {
                    tracing::warn!(
                        execution_id = %execution_id,
                        step_id = step_id.as_str(),
                        retry,
                        error = error.as_str(),
                        "step failed, retrying"
                    );
                    let mut retrying = StepResult::new(step_id.clone(), StepStatus::Retrying);
                    retrying.started_at = Some(started_at);
                    retrying.retry_count = retry;
                    retrying.error = Some(error.clone());
                    inner.put_step_result(execution_id, retrying).await;
                    inner.event_bus.publish(EngineEvent::StepRetrying {
                        execution_id,
                        step_id,
                        attempt: retry,
                        error,
                    });
                }
            },
        )
        .await;

        let elapsed = started.elapsed();
        let mut result = StepResult::new(step.id.clone(), StepStatus::Completed);
        result.started_at = Some(started_at);
        result.completed_at = Some(Utc::now());
        result.execution_time = elapsed.as_secs_f64();
        result.retry_count = outcome.retry_count;
        result.metadata.insert("step_type".into(), json!(step.step_type));
        result.metadata.insert("critical".into(), json!(step.is_critical()));
        if outcome.recovered {
            result.metadata.insert("recovered".into(), json!(true));
        }

        match &outcome.result {
            Ok(output) => {
                result.output = output.clone();
                self.event_bus.publish(EngineEvent::StepCompleted {
                    execution_id,
                    step_id: step.id.clone(),
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
                tracing::debug!(execution_id = %execution_id, step_id = step.id.as_str(), "step completed");
            }
            Err(err) => {
                result.status = err.status();
                result.error = Some(err.to_string());
                self.event_bus.publish(EngineEvent::StepFailed {
                    execution_id,
                    step_id: step.id.clone(),
                    status: result.status,
                    error: err.to_string(),
                });
                tracing::debug!(
                    execution_id = %execution_id,
                    step_id = step.id.as_str(),
                    status = %result.status,
                    error = %err,
                    "step failed"
                );
            }
        }

        self.put_step_result(execution_id, result.clone()).await;
        StepOutcome {
            result,
            output: outcome.result,
        }
    }

    async fn record_skipped(&self, id: Uuid, step: &WorkflowStep, upstream: &str) -> Result<(), EngineError> {
        let error = format!("skipped: upstream step '{upstream}' did not complete");
        let mut result = StepResult::new(step.id.clone(), StepStatus::Skipped);
        result.error = Some(error.clone());
        result.completed_at = Some(Utc::now());
        result.metadata.insert("step_type".into(), json!(step.step_type));
        self.store
            .update_active(id, |execution| {
                execution.step_results.insert(result.step_id.clone(), result);
            })
            .await?;

        self.event_bus.publish(EngineEvent::StepFailed {
            execution_id: id,
            step_id: step.id.clone(),
            status: StepStatus::Skipped,
            error,
        });
        tracing::debug!(execution_id = %id, step_id = step.id.as_str(), upstream, "step skipped");
        Ok(())
    }

    /// Best-effort write of a step result. A retired record ignores it.
    async fn put_step_result(&self, id: Uuid, result: StepResult) {
        let step_id = result.step_id.clone();
        let written = self
            .store
            .update_active(id, |execution| {
                execution.step_results.insert(result.step_id.clone(), result);
            })
            .await;
        if let Err(e) = written {
            tracing::warn!(execution_id = %id, step_id = step_id.as_str(), error = %e, "failed to record step result");
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

fn compute_metrics(records: &[WorkflowExecution]) -> ExecutionMetrics {
    let count = |status: ExecutionStatus| records.iter().filter(|e| e.status == status).count();
    let completed = count(ExecutionStatus::Completed);
    let failed = count(ExecutionStatus::Failed);

    let success_rate = if completed + failed == 0 {
        0.0
    } else {
        ((completed as f64 / (completed + failed) as f64) * 100.0 * 100.0).round() / 100.0
    };

    let durations: Vec<f64> = records
        .iter()
        .filter(|e| e.status.is_terminal())
        .filter_map(WorkflowExecution::duration_secs)
        .collect();
    let average_execution_time = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    };

    let mut step_types = std::collections::BTreeMap::<String, StepTypeStats>::new();
    for execution in records {
        let types: HashMap<&str, &str> = execution
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.step_type.as_str()))
            .collect();
        for result in execution.step_results.values() {
            let step_type = types.get(result.step_id.as_str()).copied().unwrap_or("unknown");
            let stats = step_types.entry(step_type.to_string()).or_default();
            stats.total += 1;
            if result.status == StepStatus::Completed {
                stats.completed += 1;
            } else if result.status.is_failure() {
                stats.failed += 1;
            }
        }
    }

    ExecutionMetrics {
        total_executions: records.len(),
        active_executions: records.iter().filter(|e| !e.status.is_terminal()).count(),
        completed_executions: completed,
        failed_executions: failed,
        cancelled_executions: count(ExecutionStatus::Cancelled),
        success_rate,
        average_execution_time,
        step_types,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
