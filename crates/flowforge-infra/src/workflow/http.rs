//! Shared HTTP plumbing for the connector backend and the webhook executor.
//!
//! One `reqwest::Client` is built from [`HttpSettings`] and shared by every
//! step. [`send`] applies the per-step timeout, races the request against the
//! run's cancellation token and decodes the response body.

use std::time::Duration;

use flowforge_core::workflow::StepError;
use flowforge_core::workflow::step_runner::StepContext;
use flowforge_core::workflow::variables::value_to_text;
use flowforge_types::JsonMap;
use flowforge_types::config::HttpSettings;
use reqwest::Method;
use serde_json::Value;

/// Per-request timeout used when a step does not configure one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the client shared by all HTTP-backed steps.
pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(settings.user_agent.as_str())
        .build()
}

/// Parse an HTTP method name (case-insensitive).
pub fn parse_method(method: &str) -> Result<Method, StepError> {
    method
        .trim()
        .to_ascii_uppercase()
        .parse::<Method>()
        .map_err(|_| StepError::config(format!("invalid HTTP method: '{method}'")))
}

/// Read a step's `timeout` config (seconds, fractional allowed).
pub fn timeout_from_config(config: &JsonMap) -> Result<Duration, StepError> {
    match config.get("timeout") {
        None | Some(Value::Null) => Ok(DEFAULT_REQUEST_TIMEOUT),
        Some(value) => value
            .as_f64()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(|| StepError::config(format!("invalid timeout: {value}"))),
    }
}

/// Flatten a JSON object of headers into name/value pairs. Non-string values
/// are rendered as text.
pub fn header_pairs(headers: Option<&Value>) -> Vec<(String, String)> {
    match headers {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, value)| (name.clone(), value_to_text(value)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Encode a request body. Strings are sent as-is; anything else is sent as
/// JSON with a `Content-Type` header unless one is already present.
pub fn encode_body(body: &Value, headers: &mut Vec<(String, String)>) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => {
            ensure_json_content_type(headers);
            other.to_string()
        }
    }
}

/// Add `Content-Type: application/json` unless a content type is already set.
pub fn ensure_json_content_type(headers: &mut Vec<(String, String)>) {
    if !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
        headers.push(("Content-Type".into(), "application/json".into()));
    }
}

/// A request ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// A decoded response. `body` is parsed JSON when the server declared a
/// JSON content type and the body parses, otherwise the raw text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: JsonMap,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Send `request`, abandoning it if the run is cancelled first.
///
/// Transport failures map to [`StepError::Execution`], an elapsed timeout to
/// [`StepError::Timeout`]. The status code is not interpreted here.
pub async fn send(
    client: &reqwest::Client,
    request: HttpRequest,
    ctx: &StepContext,
) -> Result<HttpResponse, StepError> {
    ctx.cancellable(send_inner(client, request)).await
}

async fn send_inner(client: &reqwest::Client, request: HttpRequest) -> Result<HttpResponse, StepError> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
        timeout,
    } = request;

    let mut builder = client.request(method.clone(), &url).timeout(timeout);
    for (name, value) in &headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            StepError::Timeout(timeout)
        } else {
            StepError::execution(format!("HTTP request to '{url}' failed: {e}"))
        }
    };

    let response = builder.send().await.map_err(map_err)?;

    let status = response.status().as_u16();
    let response_headers: JsonMap = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                Value::String(v.to_str().unwrap_or("<binary>").to_string()),
            )
        })
        .collect();
    let is_json = response_headers
        .get("content-type")
        .and_then(Value::as_str)
        .is_some_and(|ct| ct.contains("json"));

    let text = response.text().await.map_err(map_err)?;
    let body = if is_json {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    };

    tracing::info!(url = url.as_str(), %method, status, "HTTP request completed");

    Ok(HttpResponse {
        status,
        headers: response_headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method(" Patch ").unwrap(), Method::PATCH);
        assert!(matches!(
            parse_method("NOT A METHOD"),
            Err(StepError::Configuration(_))
        ));
    }

    #[test]
    fn timeout_defaults_and_validation() {
        assert_eq!(timeout_from_config(&JsonMap::new()).unwrap(), DEFAULT_REQUEST_TIMEOUT);

        let config = json!({"timeout": 0.5}).as_object().cloned().unwrap();
        assert_eq!(timeout_from_config(&config).unwrap(), Duration::from_millis(500));

        let config = json!({"timeout": -1}).as_object().cloned().unwrap();
        assert!(timeout_from_config(&config).is_err());
        let config = json!({"timeout": "soon"}).as_object().cloned().unwrap();
        assert!(timeout_from_config(&config).is_err());
    }

    #[test]
    fn json_bodies_get_a_content_type() {
        let mut headers = Vec::new();
        assert_eq!(encode_body(&json!({"a": 1}), &mut headers), r#"{"a":1}"#);
        assert_eq!(headers, vec![("Content-Type".to_string(), "application/json".to_string())]);

        let mut headers = vec![("content-type".to_string(), "text/plain".to_string())];
        assert_eq!(encode_body(&json!("raw"), &mut headers), "raw");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn header_values_are_rendered_as_text() {
        let headers = json!({"X-Retry": 3, "X-Name": "ada"});
        let mut pairs = header_pairs(Some(&headers));
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("X-Name".to_string(), "ada".to_string()),
                ("X-Retry".to_string(), "3".to_string()),
            ]
        );
        assert!(header_pairs(Some(&json!("nope"))).is_empty());
    }
}
