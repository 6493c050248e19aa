//! Connector step executor and the backend registry it dispatches through.
//!
//! `config.connector_type` (default `http`) names a [`ConnectorBackend`]
//! registered in a [`ConnectorRegistry`]. The core crate ships only
//! synthetic backends; the HTTP backend lives with the other network
//! adapters in `flowforge-infra`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use serde_json::{Value, json};

use crate::workflow::step_runner::{StepContext, StepError, StepExecutor};

/// One external-system integration.
///
/// `inputs` are the step's inputs already resolved against the variable
/// context. Implementations must race long waits against `ctx.cancel`.
pub trait ConnectorBackend: Send + Sync {
    fn call(
        &self,
        step: &WorkflowStep,
        inputs: &JsonMap,
        ctx: &StepContext,
    ) -> impl Future<Output = Result<JsonMap, StepError>> + Send;
}

/// Object-safe version of [`ConnectorBackend`] with a boxed future.
pub trait ConnectorBackendDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        inputs: &'a JsonMap,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, StepError>> + Send + 'a>>;
}

impl<T: ConnectorBackend> ConnectorBackendDyn for T {
    fn call_boxed<'a>(
        &'a self,
        step: &'a WorkflowStep,
        inputs: &'a JsonMap,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<JsonMap, StepError>> + Send + 'a>> {
        Box::pin(self.call(step, inputs, ctx))
    }
}

// ---------------------------------------------------------------------------
// ConnectorRegistry
// ---------------------------------------------------------------------------

/// Connector backends keyed by `connector_type`.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    backends: HashMap<String, Arc<dyn ConnectorBackendDyn>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the synthetic backends (database, file, email, slack,
    /// salesforce).
    pub fn with_stubs() -> Self {
        let mut registry = Self::new();
        for name in StubBackend::NAMES {
            registry.register(name, StubBackend::new(name));
        }
        registry
    }

    /// Register (or replace) a backend.
    pub fn register<B: ConnectorBackend + 'static>(&mut self, name: &str, backend: B) -> &mut Self {
        self.backends.insert(name.to_string(), Arc::new(backend));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ConnectorBackendDyn>, StepError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| StepError::config(format!("unsupported connector type: '{name}'")))
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConnectorExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectorExecutor {
    backends: ConnectorRegistry,
}

impl ConnectorExecutor {
    pub fn new(backends: ConnectorRegistry) -> Self {
        Self { backends }
    }
}

impl StepExecutor for ConnectorExecutor {
    async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let connector_type = step.config_str("connector_type").unwrap_or("http");
        let backend = self.backends.get(connector_type)?;
        let inputs = ctx.resolve_inputs(step);

        tracing::debug!(
            step_id = step.id.as_str(),
            connector_type,
            "executing connector"
        );

        backend.call_boxed(step, &inputs, ctx).await
    }
}

// ---------------------------------------------------------------------------
// Synthetic backends
// ---------------------------------------------------------------------------

/// Pass-through backend that echoes its inputs as mock output.
#[derive(Debug, Clone, Copy)]
pub struct StubBackend {
    name: &'static str,
}

impl StubBackend {
    pub const NAMES: [&'static str; 5] = ["database", "file", "email", "slack", "salesforce"];

    pub fn new(name: &'static str) -> Self {
        Self { name }
    }

    fn specific(&self, step: &WorkflowStep, inputs: &JsonMap) -> JsonMap {
        let get = |key: &str, default: Value| inputs.get(key).cloned().unwrap_or(default);
        let fields = match self.name {
            "database" => json!({
                "operation": get("operation", json!("query")),
                "rows_affected": get("rows_affected", json!(0)),
                "result": get("result", json!([])),
            }),
            "file" => json!({
                "operation": get("operation", json!("read")),
                "file_path": get("file_path", json!("")),
                "content": get("content", json!("")),
            }),
            "email" => json!({
                "to": get("to", json!([])),
                "subject": get("subject", json!("")),
                "message_id": format!("mock-{}", step.id),
            }),
            "slack" => json!({
                "channel": get("channel", json!("")),
                "message": get("message", json!("")),
            }),
            "salesforce" => json!({
                "object": get("object", json!("")),
                "operation": get("operation", json!("query")),
                "record_id": get("record_id", json!("")),
            }),
            _ => json!({ "processed_data": get("data", json!({})) }),
        };
        match fields {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }
}

impl ConnectorBackend for StubBackend {
    async fn call(
        &self,
        step: &WorkflowStep,
        inputs: &JsonMap,
        _ctx: &StepContext,
    ) -> Result<JsonMap, StepError> {
        let mut output = self.specific(step, inputs);
        output.insert("status".into(), json!("success"));
        output.insert("connector_type".into(), json!(self.name));
        output.insert("mock".into(), json!(true));
        output.insert("echo".into(), Value::Object(inputs.clone()));
        output.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn step(connector_type: &str, inputs: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new("conn", "connector");
        step.config.insert("connector_type".into(), json!(connector_type));
        step.inputs = inputs.as_object().cloned().unwrap();
        step
    }

    #[tokio::test]
    async fn stub_backend_echoes_resolved_inputs() {
        let executor = ConnectorExecutor::new(ConnectorRegistry::with_stubs());
        let vars = json!({"room": "#ops"}).as_object().cloned().unwrap();
        let ctx = StepContext::new(Uuid::now_v7(), "wf", vars);

        let out = executor
            .execute(&step("slack", json!({"channel": "{{room}}", "message": "hi"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["status"], json!("success"));
        assert_eq!(out["mock"], json!(true));
        assert_eq!(out["connector_type"], json!("slack"));
        assert_eq!(out["channel"], json!("#ops"));
        assert_eq!(out["echo"]["message"], json!("hi"));
    }

    #[tokio::test]
    async fn database_stub_has_defaults() {
        let executor = ConnectorExecutor::new(ConnectorRegistry::with_stubs());
        let ctx = StepContext::new(Uuid::now_v7(), "wf", JsonMap::new());
        let out = executor.execute(&step("database", json!({})), &ctx).await.unwrap();
        assert_eq!(out["operation"], json!("query"));
        assert_eq!(out["rows_affected"], json!(0));
    }

    #[tokio::test]
    async fn unregistered_backend_is_a_configuration_error() {
        let executor = ConnectorExecutor::new(ConnectorRegistry::with_stubs());
        let ctx = StepContext::new(Uuid::now_v7(), "wf", JsonMap::new());

        let err = executor.execute(&step("ftp", json!({})), &ctx).await.unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
        assert!(err.to_string().contains("ftp"));

        // http is not part of the stub set.
        let err = executor
            .execute(&WorkflowStep::new("c", "connector"), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn registry_lists_names_sorted() {
        let registry = ConnectorRegistry::with_stubs();
        assert_eq!(
            registry.names(),
            vec!["database", "email", "file", "salesforce", "slack"]
        );
        assert!(!registry.contains("http"));
    }
}
