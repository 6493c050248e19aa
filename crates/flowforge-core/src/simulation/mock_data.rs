//! Deterministic sample inputs for simulated steps.
//!
//! Values are derived from the step's own config where it has them and from
//! fixed samples otherwise, so two simulations of the same workflow see the
//! same data.

use flowforge_types::JsonMap;
use flowforge_types::workflow::{StepKind, WorkflowStep};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, Default)]
pub struct MockDataProvider;

impl MockDataProvider {
    pub fn new() -> Self {
        Self
    }

    /// Generated sample data for `step`.
    pub fn generate(&self, step: &WorkflowStep) -> JsonMap {
        let cfg = |key: &str, default: Value| step.config.get(key).cloned().unwrap_or(default);

        let data = match step.kind() {
            Some(StepKind::Connector) => match step.sub_type().unwrap_or("http") {
                "http" => json!({
                    "url": cfg("url", json!("https://api.example.com/mock")),
                    "method": cfg("method", json!("GET")),
                    "headers": cfg("headers", json!({"Content-Type": "application/json"})),
                    "mock_response": {
                        "status_code": 200,
                        "headers": {"content-type": "application/json"},
                        "data": {"status": "success", "message": "Operation completed successfully"},
                    },
                }),
                "database" => json!({
                    "connection_string": cfg("connection_string", json!("postgresql://mock")),
                    "query": cfg("query", json!("SELECT * FROM mock_table")),
                    "parameters": cfg("parameters", json!({})),
                    "mock_result": sample_records(),
                }),
                "file" => json!({
                    "operation": cfg("operation", json!("read")),
                    "file_path": cfg("file_path", json!("/tmp/mock.txt")),
                    "content": "mock file content",
                }),
                "email" => json!({
                    "to": cfg("to", json!(["user@example.com"])),
                    "subject": cfg("subject", json!("Mock Email Subject")),
                    "body": cfg("body", json!("Mock email body content")),
                    "from": cfg("from", json!("noreply@example.com")),
                    "mock_sent": true,
                }),
                "slack" => json!({
                    "channel": cfg("channel", json!("#general")),
                    "message": cfg("message", json!("Mock Slack message")),
                    "mock_sent": true,
                }),
                "salesforce" => json!({
                    "object": cfg("object", json!("Contact")),
                    "action": cfg("action", json!("create")),
                    "data": cfg("data", json!({
                        "FirstName": "Ada",
                        "LastName": "Lovelace",
                        "Email": "ada@example.com",
                    })),
                    "mock_result": {"success": true, "id": format!("mock-{}", step.id)},
                }),
                _ => json!({ "mock_data": true }),
            },
            Some(StepKind::Transform) => match step.sub_type().unwrap_or("map") {
                "map" | "filter" => json!({ "data": cfg("data", sample_records()) }),
                "aggregate" => json!({
                    "data": cfg("data", json!([
                        {"category": "A", "value": 100},
                        {"category": "A", "value": 150},
                        {"category": "B", "value": 200},
                    ])),
                }),
                "split" => json!({ "data": "alpha,beta,gamma" }),
                "join" => json!({ "data": ["alpha", "beta", "gamma"] }),
                _ => json!({ "mock_transformed": true }),
            },
            Some(StepKind::Condition) => match step.sub_type().unwrap_or("if") {
                "switch" => json!({ "test_data": {"status": "active"}, "mock_result": "active" }),
                _ => json!({ "test_data": {"value": 150}, "mock_result": true }),
            },
            Some(StepKind::Webhook) => match step.sub_type().unwrap_or("outgoing") {
                "incoming" => json!({
                    "webhook_data": cfg("expected_payload", json!({"event": "mock_event"})),
                    "mock_received": true,
                }),
                _ => json!({
                    "url": cfg("url", json!("https://webhook.example.com/mock")),
                    "method": cfg("method", json!("POST")),
                    "body": cfg("body", json!({"event": "mock_event"})),
                    "mock_sent": true,
                    "mock_response": {"status_code": 200},
                }),
            },
            Some(StepKind::Delay) => json!({ "mock_completed": true }),
            Some(StepKind::Start | StepKind::End) => json!({}),
            None => {
                tracing::warn!(
                    step_id = step.id.as_str(),
                    step_type = step.step_type.as_str(),
                    "no mock data for unknown step type"
                );
                json!({ "step_type": step.step_type, "mock_data": true })
            }
        };

        match data {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }

    /// Mock data to merge into `inputs`: generated values for keys the
    /// inputs lack, then the per-step overrides from `mock_config[step.id]`.
    pub fn mock_data(&self, step: &WorkflowStep, inputs: &JsonMap, mock_config: &JsonMap) -> JsonMap {
        let mut data: JsonMap = self
            .generate(step)
            .into_iter()
            .filter(|(key, _)| !inputs.contains_key(key))
            .collect();

        match mock_config.get(&step.id) {
            Some(Value::Object(overrides)) => data.extend(overrides.clone()),
            Some(other) => {
                tracing::warn!(
                    step_id = step.id.as_str(),
                    value = %other,
                    "ignoring non-object mock data override"
                );
            }
            None => {}
        }
        data
    }
}

fn sample_records() -> Value {
    json!([
        {"id": 1, "name": "John Doe", "email": "john@example.com", "status": "active", "value": 100},
        {"id": 2, "name": "Jane Smith", "email": "jane@example.com", "status": "inactive", "value": 50},
        {"id": 3, "name": "Sam Lee", "email": "sam@example.com", "status": "active", "value": 200},
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_type: &str, config: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new("s1", step_type);
        step.config = config.as_object().cloned().unwrap();
        step
    }

    #[test]
    fn generated_data_is_deterministic() {
        let provider = MockDataProvider::new();
        let s = step("connector", json!({"connector_type": "database"}));
        assert_eq!(provider.generate(&s), provider.generate(&s));
        assert_eq!(provider.generate(&s)["mock_result"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn config_values_take_precedence_over_samples() {
        let provider = MockDataProvider::new();
        let s = step("connector", json!({"url": "https://real.example.com"}));
        let data = provider.generate(&s);
        assert_eq!(data["url"], json!("https://real.example.com"));
        assert_eq!(data["method"], json!("GET"));
    }

    #[test]
    fn existing_inputs_are_not_replaced_but_overrides_win() {
        let provider = MockDataProvider::new();
        let s = step("transform", json!({"transform_type": "split"}));

        let inputs = json!({"data": "x;y"}).as_object().cloned().unwrap();
        assert!(provider.mock_data(&s, &inputs, &JsonMap::new()).is_empty());

        let overrides = json!({"s1": {"data": "1,2"}}).as_object().cloned().unwrap();
        let data = provider.mock_data(&s, &inputs, &overrides);
        assert_eq!(data["data"], json!("1,2"));
    }

    #[test]
    fn markers_and_unknown_types() {
        let provider = MockDataProvider::new();
        assert!(provider.generate(&step("start", json!({}))).is_empty());
        let data = provider.generate(&step("teleport", json!({})));
        assert_eq!(data["mock_data"], json!(true));
        assert_eq!(data["step_type"], json!("teleport"));
    }
}
