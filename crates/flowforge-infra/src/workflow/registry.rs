//! Assembly of the standard executor registry.

use flowforge_core::workflow::ExecutorRegistry;
use flowforge_core::workflow::executors::{ConnectorRegistry, core_registry};
use flowforge_types::config::EngineConfig;
use flowforge_types::workflow::StepKind;

use super::http::build_client;
use super::http_connector::HttpBackend;
use super::webhook::WebhookExecutor;

/// Registry serving every built-in step type: the core executors, the `http`
/// connector backend next to the synthetic ones, and webhooks. The HTTP
/// client is shared by the connector and the webhook executor.
pub fn standard_registry(config: &EngineConfig) -> Result<ExecutorRegistry, reqwest::Error> {
    let client = build_client(&config.http)?;

    let mut connectors = ConnectorRegistry::with_stubs();
    connectors.register("http", HttpBackend::new(client.clone()));

    let registry = core_registry(connectors).with(StepKind::Webhook.as_str(), WebhookExecutor::new(client));

    tracing::debug!(step_types = ?registry.step_types(), "executor registry assembled");
    Ok(registry)
}
