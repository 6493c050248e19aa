//! Step executor contract and the registry that dispatches on step type.
//!
//! Every step type is served by a [`StepExecutor`]. Executors are registered
//! in an [`ExecutorRegistry`] under their type name; adding a type is a
//! registration, and an unregistered type fails fast as a configuration
//! error.
//!
//! Follows the same object-safety pattern as the connector backends:
//! 1. `StepExecutor` uses RPITIT for `execute`
//! 2. `StepExecutorDyn` is the object-safe twin with a boxed future
//! 3. a blanket impl bridges the two, and the registry stores `dyn StepExecutorDyn`

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flowforge_types::JsonMap;
use flowforge_types::execution::StepStatus;
use flowforge_types::workflow::WorkflowStep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::variables::resolve_inputs;

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors a step can fail with.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// Missing or invalid step configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Runtime failure (network, non-2xx, signature mismatch).
    #[error("execution error: {0}")]
    Execution(String),

    /// The step exceeded its timeout.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// The execution was cancelled while the step was suspended.
    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    /// Only execution failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Execution(_) | StepError::Timeout(_))
    }

    /// Terminal step status this error maps to.
    pub fn status(&self) -> StepStatus {
        match self {
            StepError::Timeout(_) => StepStatus::TimedOut,
            _ => StepStatus::Failed,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        StepError::Configuration(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        StepError::Execution(message.into())
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// What an executor sees of the run it belongs to.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    /// Snapshot of the variable context taken when the step's wave started.
    pub variables: JsonMap,
    /// Fired when the run is cancelled.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(execution_id: Uuid, workflow_id: impl Into<String>, variables: JsonMap) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            variables,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The step's inputs with `{{var}}` placeholders resolved.
    pub fn resolve_inputs(&self, step: &WorkflowStep) -> JsonMap {
        resolve_inputs(&step.inputs, &self.variables)
    }

    /// Sleep that ends early with [`StepError::Cancelled`] when the run is
    /// cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StepError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Await `fut`, abandoning it if the run is cancelled first.
    pub async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, StepError>>,
    ) -> Result<T, StepError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            result = fut => result,
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Executes one step type.
///
/// Implementations resolve `step.inputs` against `ctx.variables` themselves
/// and return the output map that is merged into the variable context.
pub trait StepExecutor: Send + Sync {
    fn execute(
        &self,
        step: &WorkflowStep,
        ctx: &StepContext,
    ) -> impl Future<Output = Result<JsonMap, StepError>> + Send;
}

/// Object-safe version of [`StepExecutor`] with a boxed future.
pub trait StepExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, StepError>> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, StepError>> + Send + 'a>> {
        Box::pin(self.execute(step, ctx))
    }
}

/// Executor for `start`/`end` marker steps: produces an empty output.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerExecutor;

impl StepExecutor for MarkerExecutor {
    async fn execute(&self, _step: &WorkflowStep, _ctx: &StepContext) -> Result<JsonMap, StepError> {
        Ok(JsonMap::new())
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

/// Step executors keyed by step type name.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutorDyn>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for a step type.
    pub fn register<T: StepExecutor + 'static>(&mut self, step_type: &str, executor: T) -> &mut Self {
        self.executors
            .insert(step_type.to_string(), Arc::new(executor));
        self
    }

    /// Builder-style [`ExecutorRegistry::register`].
    pub fn with<T: StepExecutor + 'static>(mut self, step_type: &str, executor: T) -> Self {
        self.register(step_type, executor);
        self
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.contains_key(step_type)
    }

    /// Registered type names, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn get(&self, step_type: &str) -> Result<Arc<dyn StepExecutorDyn>, StepError> {
        self.executors
            .get(step_type)
            .cloned()
            .ok_or_else(|| StepError::config(format!("unsupported step type: '{step_type}'")))
    }

    /// Dispatch a step to the executor registered for its type.
    pub async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let executor = self.get(&step.step_type)?;
        executor.execute_boxed(step, ctx).await
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
