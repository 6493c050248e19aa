//! The `http` connector backend.
//!
//! Reads `url`/`endpoint` (or `inputs.url`), `method`, `headers`, `body` and
//! `timeout` from the step, sends the request through the shared client and
//! fails the step on any non-2xx status.

use chrono::Utc;
use flowforge_core::workflow::StepError;
use flowforge_core::workflow::executors::ConnectorBackend;
use flowforge_core::workflow::step_runner::StepContext;
use flowforge_core::workflow::variables::{resolve_value, value_to_text};
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use serde_json::{Value, json};

use super::http::{self, HttpRequest};

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_request(
        step: &WorkflowStep,
        inputs: &JsonMap,
        ctx: &StepContext,
    ) -> Result<HttpRequest, StepError> {
        // Config values may carry placeholders too; inputs arrive resolved.
        let config_value = |key: &str| {
            step.config
                .get(key)
                .filter(|v| !v.is_null())
                .map(|v| resolve_value(v, &ctx.variables))
        };

        let url = config_value("url")
            .or_else(|| config_value("endpoint"))
            .or_else(|| inputs.get("url").cloned())
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StepError::config("http connector requires a 'url'"))?;

        let method = match config_value("method") {
            Some(Value::String(m)) => http::parse_method(&m)?,
            Some(other) => return Err(StepError::config(format!("invalid HTTP method: {other}"))),
            None => reqwest::Method::GET,
        };

        let mut headers = http::header_pairs(config_value("headers").as_ref());
        headers.extend(http::header_pairs(inputs.get("headers")));

        let body = config_value("body")
            .or_else(|| inputs.get("body").cloned())
            .filter(|b| !b.is_null())
            .map(|b| http::encode_body(&b, &mut headers));

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
            timeout: http::timeout_from_config(&step.config)?,
        })
    }
}

impl ConnectorBackend for HttpBackend {
    async fn call(
        &self,
        step: &WorkflowStep,
        inputs: &JsonMap,
        ctx: &StepContext,
    ) -> Result<JsonMap, StepError> {
        let request = Self::build_request(step, inputs, ctx)?;
        let url = request.url.clone();
        let response = http::send(&self.client, request, ctx).await?;

        if !response.is_success() {
            return Err(StepError::execution(format!(
                "HTTP {} from '{url}': {}",
                response.status,
                value_to_text(&response.body)
            )));
        }

        let output = json!({
            "status": "success",
            "status_code": response.status,
            "headers": response.headers,
            "body": response.body,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match output {
            Value::Object(map) => Ok(map),
            _ => Ok(JsonMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_support::spawn_server;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use flowforge_core::workflow::executors::{ConnectorExecutor, ConnectorRegistry};
    use flowforge_core::workflow::StepExecutor;
    use flowforge_types::config::HttpSettings;
    use std::time::Duration;
    use uuid::Uuid;

    fn executor() -> ConnectorExecutor {
        let client = http::build_client(&HttpSettings::default()).unwrap();
        let mut backends = ConnectorRegistry::new();
        backends.register("http", HttpBackend::new(client));
        ConnectorExecutor::new(backends)
    }

    fn step(config: Value, inputs: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new("call", "connector");
        step.config = config.as_object().cloned().unwrap();
        step.inputs = inputs.as_object().cloned().unwrap();
        step
    }

    fn ctx(vars: Value) -> StepContext {
        StepContext::new(Uuid::now_v7(), "wf", vars.as_object().cloned().unwrap())
    }

    async fn server() -> String {
        let router = Router::new()
            .route(
                "/users",
                get(|| async { axum::Json(json!({"users": [{"name": "Ada"}]})) }),
            )
            .route(
                "/echo",
                post(|headers: HeaderMap, body: String| async move {
                    let tag = headers
                        .get("x-tag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    format!("{tag}:{body}")
                }),
            )
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        spawn_server(router).await
    }

    #[tokio::test]
    async fn get_parses_json_bodies() {
        let base = server().await;
        let out = executor()
            .execute(&step(json!({"url": format!("{base}/users")}), json!({})), &ctx(json!({})))
            .await
            .unwrap();

        assert_eq!(out["status"], json!("success"));
        assert_eq!(out["status_code"], json!(200));
        assert_eq!(out["body"]["users"][0]["name"], json!("Ada"));
        assert!(out["headers"]["content-type"].as_str().unwrap().contains("json"));
        assert!(out.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn post_sends_headers_and_templated_url() {
        let base = server().await;
        let s = step(
            json!({"url": "{{base}}/echo", "method": "post", "headers": {"X-Tag": "cfg"}}),
            json!({"body": {"n": "{{n}}"}}),
        );
        let out = executor()
            .execute(&s, &ctx(json!({"base": base, "n": 3})))
            .await
            .unwrap();

        // Text responses stay text.
        assert_eq!(out["body"], json!(r#"cfg:{"n":3}"#));
    }

    #[tokio::test]
    async fn non_success_status_fails_the_step() {
        let base = server().await;
        let err = executor()
            .execute(&step(json!({"endpoint": format!("{base}/missing")}), json!({})), &ctx(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Execution(_)));
        assert!(err.to_string().contains("404"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let base = server().await;
        let s = step(json!({"url": format!("{base}/slow"), "timeout": 0.2}), json!({}));
        let err = executor().execute(&s, &ctx(json!({}))).await.unwrap_err();
        assert_eq!(err, StepError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn cancellation_abandons_the_request() {
        let base = server().await;
        let ctx = ctx(json!({}));
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let s = step(json!({"url": format!("{base}/slow")}), json!({}));
        let err = executor().execute(&s, &ctx).await.unwrap_err();
        assert_eq!(err, StepError::Cancelled);
    }

    #[tokio::test]
    async fn missing_url_is_a_configuration_error() {
        let err = executor()
            .execute(&step(json!({}), json!({})), &ctx(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
        assert!(!err.is_retryable());
    }
}
