//! Webhook step executor with HMAC-SHA256 signatures.
//!
//! Provides:
//! - `canonical_json()` -- compact JSON with recursively sorted object keys
//! - `sign_payload()` / `verify_signature()` -- `sha256=<hex>` signatures over
//!   the canonical body, verified in constant time
//! - `WebhookExecutor` -- `outgoing` (send, optionally signed) and `incoming`
//!   (verify a received payload) webhook steps

use chrono::Utc;
use flowforge_core::workflow::step_runner::{StepContext, StepError, StepExecutor};
use flowforge_core::workflow::variables::{resolve_value, value_to_text};
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

use super::http::{self, HttpRequest};

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature when `signature_header` is not configured.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// HMAC signature verification failed.
    #[error("HMAC signature verification failed")]
    SignatureMismatch,

    /// The payload arrived without the configured signature header.
    #[error("missing signature header: {0}")]
    MissingSignature(String),

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

impl From<WebhookError> for StepError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidKey(_) => StepError::config(err.to_string()),
            _ => StepError::execution(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Compact JSON with object keys sorted at every level, so a payload has
/// exactly one signed form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn mac_for(secret: &str, payload: &Value) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(canonical_json(payload).as_bytes());
    Ok(mac)
}

/// Sign `payload` with `secret`, returning the `sha256=<hex>` header value.
pub fn sign_payload(secret: &str, payload: &Value) -> Result<String, WebhookError> {
    let digest = mac_for(secret, payload)?.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Verify a signature produced by [`sign_payload`]. The `sha256=` prefix is
/// optional. Comparison is constant time (`Mac::verify_slice`).
pub fn verify_signature(secret: &str, payload: &Value, signature: &str) -> Result<(), WebhookError> {
    let hex_sig = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature.trim());
    let expected = hex::decode(hex_sig).map_err(|_| WebhookError::SignatureMismatch)?;

    mac_for(secret, payload)?
        .verify_slice(&expected)
        .map_err(|_| WebhookError::SignatureMismatch)
}

// ---------------------------------------------------------------------------
// WebhookExecutor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn outgoing(
        &self,
        step: &WorkflowStep,
        inputs: &JsonMap,
        ctx: &StepContext,
    ) -> Result<JsonMap, StepError> {
        let config_value = |key: &str| {
            step.config
                .get(key)
                .filter(|v| !v.is_null())
                .map(|v| resolve_value(v, &ctx.variables))
        };

        let url = config_value("url")
            .or_else(|| inputs.get("url").cloned())
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| StepError::config("outgoing webhook requires a 'url'"))?;

        let method = match config_value("method") {
            Some(Value::String(m)) => http::parse_method(&m)?,
            Some(other) => return Err(StepError::config(format!("invalid HTTP method: {other}"))),
            None => reqwest::Method::POST,
        };

        let payload = config_value("body")
            .or_else(|| inputs.get("body").cloned())
            .or_else(|| inputs.get("data").cloned())
            .unwrap_or_else(|| Value::Object(inputs.clone()));

        let mut headers = http::header_pairs(config_value("headers").as_ref());
        headers.extend(http::header_pairs(inputs.get("headers")));
        http::ensure_json_content_type(&mut headers);

        let secret = config_value("secret").map(|s| value_to_text(&s));
        let signed = match secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                let header = step
                    .config_str("signature_header")
                    .unwrap_or(DEFAULT_SIGNATURE_HEADER);
                headers.push((header.to_string(), sign_payload(secret, &payload)?));
                true
            }
            _ => false,
        };

        let request = HttpRequest {
            method,
            url: url.clone(),
            headers,
            body: Some(canonical_json(&payload)),
            timeout: http::timeout_from_config(&step.config)?,
        };
        let response = http::send(&self.client, request, ctx).await?;

        if !response.is_success() {
            return Err(StepError::execution(format!(
                "webhook to '{url}' returned HTTP {}",
                response.status
            )));
        }

        tracing::info!(step_id = step.id.as_str(), url = url.as_str(), signed, "webhook sent");

        Ok(object(json!({
            "status": "success",
            "webhook_sent": true,
            "response_status": response.status,
            "response_body": response.body,
            "signed": signed,
        })))
    }

    fn incoming(step: &WorkflowStep, inputs: &JsonMap, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let payload = inputs
            .get("webhook_data")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let secret = step
            .config
            .get("secret")
            .filter(|v| !v.is_null())
            .map(|v| value_to_text(&resolve_value(v, &ctx.variables)))
            .filter(|s| !s.is_empty());

        let verified = match secret {
            Some(secret) => {
                let header = step
                    .config_str("signature_header")
                    .unwrap_or(DEFAULT_SIGNATURE_HEADER);
                let signature = find_header(inputs.get("headers"), header)
                    .ok_or_else(|| WebhookError::MissingSignature(header.to_string()))?;
                verify_signature(&secret, &payload, &signature)?;
                true
            }
            None => false,
        };

        tracing::debug!(step_id = step.id.as_str(), verified, "webhook payload accepted");

        Ok(object(json!({
            "status": "success",
            "webhook_received": true,
            "payload": payload,
            "verified": verified,
        })))
    }
}

impl StepExecutor for WebhookExecutor {
    async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let inputs = ctx.resolve_inputs(step);
        let webhook_type = step.config_str("webhook_type").unwrap_or("outgoing");

        let mut output = match webhook_type {
            "outgoing" => self.outgoing(step, &inputs, ctx).await?,
            "incoming" => Self::incoming(step, &inputs, ctx)?,
            other => {
                return Err(StepError::config(format!("unsupported webhook type: '{other}'")));
            }
        };
        output.insert("webhook_type".into(), json!(webhook_type));
        output.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

/// Case-insensitive header lookup in a JSON header object.
fn find_header(headers: Option<&Value>, name: &str) -> Option<String> {
    headers?
        .as_object()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value_to_text(value))
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_support::spawn_server;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use flowforge_types::config::HttpSettings;
    use uuid::Uuid;

    const SECRET: &str = "s";

    fn executor() -> WebhookExecutor {
        WebhookExecutor::new(http::build_client(&HttpSettings::default()).unwrap())
    }

    fn step(config: Value, inputs: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new("hook", "webhook");
        step.config = config.as_object().cloned().unwrap();
        step.inputs = inputs.as_object().cloned().unwrap();
        step
    }

    fn ctx() -> StepContext {
        StepContext::new(Uuid::now_v7(), "wf", JsonMap::new())
    }

    #[test]
    fn test_verify_hmac_sha256_round_trip() {
        let payload = json!({"a": 1});
        let signature = sign_payload(SECRET, &payload).unwrap();
        assert_eq!(
            signature,
            "sha256=37beaf650f70b40ec9706929c2e9d835cbd63729988f48781e6383a147215f07"
        );
        assert!(verify_signature(SECRET, &payload, &signature).is_ok());
        // Plain hex is accepted too.
        assert!(verify_signature(SECRET, &payload, &signature[7..]).is_ok());
    }

    #[test]
    fn test_verify_hmac_sha256_wrong_secret() {
        let payload = json!({"a": 1});
        let signature = sign_payload(SECRET, &payload).unwrap();
        assert!(matches!(
            verify_signature("not-s", &payload, &signature),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_verify_hmac_sha256_mutated_payload() {
        let signature = sign_payload(SECRET, &json!({"a": 1})).unwrap();
        assert!(verify_signature(SECRET, &json!({"a": 2}), &signature).is_err());
        assert!(verify_signature(SECRET, &json!({"a": 1, "b": null}), &signature).is_err());
    }

    #[test]
    fn test_verify_hmac_sha256_invalid_hex() {
        assert!(matches!(
            verify_signature(SECRET, &json!({}), "sha256=zz-not-hex"),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"d": [{"z": 1, "y": 2}], "c": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"x","d":[{"y":2,"z":1}]},"b":1}"#
        );
        let reordered = json!({"a": {"c": "x", "d": [{"y": 2, "z": 1}]}, "b": 1});
        assert_eq!(
            sign_payload(SECRET, &value).unwrap(),
            sign_payload(SECRET, &reordered).unwrap()
        );
    }

    #[test]
    fn webhook_errors_map_to_step_errors() {
        assert!(matches!(
            StepError::from(WebhookError::SignatureMismatch),
            StepError::Execution(_)
        ));
        assert!(matches!(
            StepError::from(WebhookError::InvalidKey("k".into())),
            StepError::Configuration(_)
        ));
    }

    async fn receiver() -> String {
        let router = Router::new()
            .route(
                "/hook",
                post(|headers: HeaderMap, body: String| async move {
                    let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                    let signature = headers
                        .get("x-webhook-signature")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    let ok = verify_signature(SECRET, &payload, signature).is_ok();
                    axum::Json(json!({"verified": ok, "event": payload["event"]}))
                }),
            )
            .route(
                "/content-type",
                post(|headers: HeaderMap| async move {
                    let values: Vec<String> = headers
                        .get_all("content-type")
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .map(str::to_string)
                        .collect();
                    axum::Json(json!({"content_types": values}))
                }),
            )
            .route(
                "/broken",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
            );
        spawn_server(router).await
    }

    #[tokio::test]
    async fn outgoing_webhook_is_signed_over_canonical_body() {
        let base = receiver().await;
        let s = step(
            json!({"url": format!("{base}/hook"), "secret": SECRET}),
            json!({"data": {"event": "order.created", "amount": 12}}),
        );
        let out = executor().execute(&s, &ctx()).await.unwrap();

        assert_eq!(out["webhook_sent"], json!(true));
        assert_eq!(out["signed"], json!(true));
        assert_eq!(out["response_status"], json!(200));
        assert_eq!(out["response_body"]["verified"], json!(true));
        assert_eq!(out["response_body"]["event"], json!("order.created"));
        assert_eq!(out["webhook_type"], json!("outgoing"));
    }

    #[tokio::test]
    async fn outgoing_webhook_without_secret_is_unsigned() {
        let base = receiver().await;
        let s = step(json!({"url": format!("{base}/hook"), "body": {"event": "ping"}}), json!({}));
        let out = executor().execute(&s, &ctx()).await.unwrap();
        assert_eq!(out["signed"], json!(false));
        assert_eq!(out["response_body"]["verified"], json!(false));
    }

    #[tokio::test]
    async fn outgoing_webhook_keeps_a_caller_content_type() {
        let base = receiver().await;
        let s = step(
            json!({
                "url": format!("{base}/content-type"),
                "headers": {"content-type": "application/vnd.acme+json"},
                "body": {"event": "ping"}
            }),
            json!({}),
        );
        let out = executor().execute(&s, &ctx()).await.unwrap();
        assert_eq!(
            out["response_body"]["content_types"],
            json!(["application/vnd.acme+json"])
        );

        let s = step(json!({"url": format!("{base}/content-type"), "body": {"event": "ping"}}), json!({}));
        let out = executor().execute(&s, &ctx()).await.unwrap();
        assert_eq!(out["response_body"]["content_types"], json!(["application/json"]));
    }

    #[tokio::test]
    async fn outgoing_webhook_fails_on_server_error() {
        let base = receiver().await;
        let s = step(json!({"url": format!("{base}/broken")}), json!({}));
        let err = executor().execute(&s, &ctx()).await.unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn incoming_webhook_verifies_signature() {
        let payload = json!({"event": "push", "ref": "main"});
        let signature = sign_payload(SECRET, &payload).unwrap();
        let s = step(
            json!({"webhook_type": "incoming", "secret": SECRET}),
            json!({
                "webhook_data": payload,
                "headers": {"x-webhook-signature": signature},
            }),
        );
        let out = executor().execute(&s, &ctx()).await.unwrap();
        assert_eq!(out["webhook_received"], json!(true));
        assert_eq!(out["verified"], json!(true));
        assert_eq!(out["payload"]["ref"], json!("main"));
    }

    #[tokio::test]
    async fn incoming_webhook_rejects_bad_or_missing_signature() {
        let payload = json!({"event": "push"});
        let forged = sign_payload("other", &payload).unwrap();
        let bad = step(
            json!({"webhook_type": "incoming", "secret": SECRET, "signature_header": "X-Sig"}),
            json!({"webhook_data": payload, "headers": {"X-SIG": forged}}),
        );
        let err = executor().execute(&bad, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("verification failed"));

        let missing = step(
            json!({"webhook_type": "incoming", "secret": SECRET}),
            json!({"webhook_data": {"event": "push"}}),
        );
        let err = executor().execute(&missing, &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("X-Webhook-Signature"));
    }

    #[tokio::test]
    async fn incoming_webhook_without_secret_is_unverified() {
        let s = step(json!({"webhook_type": "incoming"}), json!({"webhook_data": {"n": 1}}));
        let out = executor().execute(&s, &ctx()).await.unwrap();
        assert_eq!(out["verified"], json!(false));
        assert_eq!(out["payload"], json!({"n": 1}));
    }

    #[tokio::test]
    async fn unknown_webhook_type_is_a_configuration_error() {
        let s = step(json!({"webhook_type": "sideways"}), json!({}));
        let err = executor().execute(&s, &ctx()).await.unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
    }
}
