//! Delay step executor: fixed sleeps, waits until a wall-clock time, and
//! conditional polling. Every sleep goes through [`StepContext::sleep`] so a
//! cancelled run stops waiting immediately.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use serde_json::{Value, json};
use tokio::time::Instant;

use super::fields::FieldCondition;
use crate::workflow::step_runner::{StepContext, StepError, StepExecutor};

const DEFAULT_MAX_WAIT_SECS: f64 = 300.0;
const DEFAULT_CHECK_INTERVAL_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct DelayExecutor;

impl StepExecutor for DelayExecutor {
    async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let inputs = ctx.resolve_inputs(step);
        let delay_type = step.config_str("delay_type").unwrap_or("fixed");

        tracing::debug!(step_id = step.id.as_str(), delay_type, "executing delay");

        let mut output = match delay_type {
            "fixed" => fixed_delay(&step.config, &inputs, ctx).await?,
            "dynamic" => dynamic_delay(&step.config, &inputs, ctx).await?,
            "conditional" => conditional_delay(&step.config, &inputs, ctx).await?,
            other => {
                return Err(StepError::config(format!("unsupported delay type: '{other}'")));
            }
        };

        output.insert("delay_type".into(), json!(delay_type));
        output.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

/// First present key among `keys` in config, then in inputs.
fn setting<'a>(config: &'a JsonMap, inputs: &'a JsonMap, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| config.get(*k).filter(|v| !v.is_null()))
        .or_else(|| keys.iter().find_map(|k| inputs.get(*k).filter(|v| !v.is_null())))
}

fn seconds(value: &Value, name: &str) -> Result<f64, StepError> {
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| StepError::config(format!("{name} must be a number of seconds")))?;

    if !secs.is_finite() || secs < 0.0 {
        return Err(StepError::config(format!("{name} must be a non-negative number")));
    }
    Ok(secs)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn fixed_delay(config: &JsonMap, inputs: &JsonMap, ctx: &StepContext) -> Result<JsonMap, StepError> {
    let duration = match setting(config, inputs, &["duration", "duration_seconds"]) {
        Some(value) => seconds(value, "duration")?,
        None => 1.0,
    };

    let started = Instant::now();
    ctx.sleep(Duration::from_secs_f64(duration)).await?;

    Ok(object(json!({
        "status": "success",
        "duration_seconds": duration,
        "actual_delay_ms": elapsed_ms(started),
    })))
}

/// Parse an RFC 3339 timestamp, or a naive timestamp taken as UTC.
pub fn parse_until_time(raw: &str) -> Result<DateTime<Utc>, StepError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StepError::config(format!("invalid until_time: '{raw}'")))
}

async fn dynamic_delay(config: &JsonMap, inputs: &JsonMap, ctx: &StepContext) -> Result<JsonMap, StepError> {
    let raw = setting(config, inputs, &["until_time"])
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::config("dynamic delay requires until_time"))?;
    let target = parse_until_time(raw)?;

    let started = Instant::now();
    // A target in the past yields a negative span and no sleep.
    if let Ok(wait) = (target - Utc::now()).to_std() {
        tracing::debug!(until_time = %target, wait_ms = wait.as_millis() as u64, "waiting until target time");
        ctx.sleep(wait).await?;
    }

    Ok(object(json!({
        "status": "success",
        "until_time": target.to_rfc3339(),
        "actual_delay_ms": elapsed_ms(started),
    })))
}

async fn conditional_delay(
    config: &JsonMap,
    inputs: &JsonMap,
    ctx: &StepContext,
) -> Result<JsonMap, StepError> {
    let condition = setting(config, inputs, &["condition"])
        .ok_or_else(|| StepError::config("conditional delay requires condition"))
        .and_then(FieldCondition::from_value)?;
    let max_wait = match setting(config, inputs, &["max_wait_time"]) {
        Some(v) => seconds(v, "max_wait_time")?,
        None => DEFAULT_MAX_WAIT_SECS,
    };
    let interval = match setting(config, inputs, &["check_interval"]) {
        Some(v) => seconds(v, "check_interval")?,
        None => DEFAULT_CHECK_INTERVAL_SECS,
    };
    let interval = Duration::from_secs_f64(interval.max(0.001));
    let max_wait = Duration::from_secs_f64(max_wait);

    let started = Instant::now();
    let mut checks = 0u64;
    loop {
        checks += 1;
        if condition.evaluate(inputs)? {
            return Ok(object(json!({
                "status": "success",
                "condition_met": true,
                "checks": checks,
                "actual_delay_ms": elapsed_ms(started),
            })));
        }
        if started.elapsed() >= max_wait {
            tracing::warn!(checks, max_wait_secs = max_wait.as_secs_f64(), "conditional delay timed out");
            return Ok(object(json!({
                "status": "timeout",
                "condition_met": false,
                "checks": checks,
                "max_wait_time": max_wait.as_secs_f64(),
                "actual_delay_ms": elapsed_ms(started),
            })));
        }
        ctx.sleep(interval).await?;
    }
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn step(config: Value, inputs: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new("wait", "delay");
        step.config = config.as_object().cloned().unwrap();
        step.inputs = inputs.as_object().cloned().unwrap();
        step
    }

    fn ctx() -> StepContext {
        StepContext::new(Uuid::now_v7(), "wf", JsonMap::new())
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_sleeps_for_duration() {
        let started = Instant::now();
        let out = DelayExecutor
            .execute(&step(json!({"duration": 5}), json!({})), &ctx())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(out["status"], json!("success"));
        assert_eq!(out["delay_type"], json!("fixed"));
        assert_eq!(out["duration_seconds"].as_f64(), Some(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_reads_alias_and_inputs() {
        let out = DelayExecutor
            .execute(&step(json!({"duration_seconds": 2}), json!({})), &ctx())
            .await
            .unwrap();
        assert_eq!(out["duration_seconds"].as_f64(), Some(2.0));

        let out = DelayExecutor
            .execute(&step(json!({}), json!({"duration": 3})), &ctx())
            .await
            .unwrap();
        assert_eq!(out["duration_seconds"].as_f64(), Some(3.0));
    }

    #[tokio::test]
    async fn negative_duration_is_a_configuration_error() {
        let err = DelayExecutor
            .execute(&step(json!({"duration": -1}), json!({})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_long_delay() {
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        let handle = tokio::spawn(async move {
            DelayExecutor
                .execute(&step(json!({"duration": 86_400}), json!({})), &ctx)
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap().unwrap_err(), StepError::Cancelled);
    }

    #[tokio::test]
    async fn dynamic_delay_in_the_past_does_not_sleep() {
        let out = DelayExecutor
            .execute(
                &step(json!({"delay_type": "dynamic", "until_time": "2000-01-01T00:00:00Z"}), json!({})),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["status"], json!("success"));
        assert!(out["until_time"].as_str().unwrap().starts_with("2000-01-01T00:00:00"));
    }

    #[tokio::test]
    async fn dynamic_delay_rejects_bad_timestamps() {
        let err = DelayExecutor
            .execute(&step(json!({"delay_type": "dynamic", "until_time": "soon"}), json!({})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let ts = parse_until_time("2030-05-01T12:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2030-05-01T12:30:00+00:00");
        assert!(parse_until_time("2030-05-01T12:30:00+02:00").is_ok());
    }

    #[tokio::test]
    async fn conditional_delay_returns_when_condition_holds() {
        let out = DelayExecutor
            .execute(
                &step(
                    json!({
                        "delay_type": "conditional",
                        "condition": {"field": "state", "operator": "equals", "value": "ready"}
                    }),
                    json!({"state": "ready"}),
                ),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["condition_met"], json!(true));
        assert_eq!(out["checks"], json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn conditional_delay_times_out() {
        let out = DelayExecutor
            .execute(
                &step(
                    json!({
                        "delay_type": "conditional",
                        "condition": {"field": "state", "value": "ready"},
                        "max_wait_time": 5,
                        "check_interval": 1
                    }),
                    json!({"state": "pending"}),
                ),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["status"], json!("timeout"));
        assert_eq!(out["condition_met"], json!(false));
        assert_eq!(out["checks"], json!(6));
    }

    #[tokio::test]
    async fn unknown_delay_type() {
        let err = DelayExecutor
            .execute(&step(json!({"delay_type": "forever"}), json!({})), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forever"));
    }
}
