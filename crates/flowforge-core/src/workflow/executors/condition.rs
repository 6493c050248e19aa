//! Condition step executor: `if`, `switch`, `all` and `any` branching.

use chrono::Utc;
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use serde_json::{Value, json};

use super::fields::{FieldCondition, json_eq};
use crate::workflow::step_runner::{StepContext, StepError, StepExecutor};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

impl StepExecutor for ConditionExecutor {
    async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let inputs = ctx.resolve_inputs(step);
        let condition_type = step.config_str("condition_type").unwrap_or("if");

        tracing::debug!(
            step_id = step.id.as_str(),
            condition_type,
            "evaluating condition"
        );

        let mut output = match condition_type {
            "if" | "if_else" => evaluate_if(&step.config, &inputs)?,
            "switch" => evaluate_switch(&step.config, &inputs)?,
            "all" => evaluate_many(&step.config, &inputs, true)?,
            "any" => evaluate_many(&step.config, &inputs, false)?,
            other => {
                return Err(StepError::config(format!(
                    "unsupported condition type: '{other}'"
                )));
            }
        };

        output.insert("condition_type".into(), json!(condition_type));
        output.insert(
            "operator".into(),
            json!(step.config_str("operator").unwrap_or("equals")),
        );
        output.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

fn branch(result: bool) -> &'static str {
    if result { "true" } else { "false" }
}

fn evaluate_if(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let condition = FieldCondition::from_config(config)?;
    let result = condition.evaluate(inputs)?;
    let test_value = condition.subject(inputs).cloned().unwrap_or(Value::Null);

    Ok(object(json!({
        "status": "success",
        "condition_result": result,
        "branch": branch(result),
        "test_value": test_value,
        "expected_value": condition.value,
    })))
}

fn evaluate_switch(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let subject = FieldCondition::from_config(config)?;
    let test_value = subject.subject(inputs).cloned().unwrap_or(Value::Null);
    let default_branch = config
        .get("default_branch")
        .and_then(Value::as_str)
        .unwrap_or("default");

    let cases = config
        .get("conditions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let matched = cases.iter().find(|case| {
        case.get("value")
            .is_some_and(|value| json_eq(&test_value, value))
    });

    let (matched_branch, matched_value) = match matched {
        Some(case) => (
            case.get("branch").cloned().unwrap_or(Value::Null),
            case.get("value").cloned().unwrap_or(Value::Null),
        ),
        None => (json!(default_branch), Value::Null),
    };

    Ok(object(json!({
        "status": "success",
        "condition_result": matched.is_some(),
        "branch": matched_branch,
        "test_value": test_value,
        "matched_value": matched_value,
    })))
}

fn evaluate_many(config: &JsonMap, inputs: &JsonMap, require_all: bool) -> Result<JsonMap, StepError> {
    let kind = if require_all { "all" } else { "any" };
    let conditions = config
        .get("conditions")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| StepError::config(format!("'{kind}' condition requires a conditions list")))?;

    let mut results = Vec::with_capacity(conditions.len());
    let mut passed = 0usize;
    for raw in conditions {
        let nested = raw
            .as_object()
            .ok_or_else(|| StepError::config("condition must be an object"))?;
        let result = evaluate_if(nested, inputs)?;
        if result.get("condition_result") == Some(&Value::Bool(true)) {
            passed += 1;
        }
        results.push(Value::Object(result));
    }

    let result = if require_all {
        passed == conditions.len()
    } else {
        passed > 0
    };

    Ok(object(json!({
        "status": "success",
        "condition_result": result,
        "branch": branch(result),
        "results": results,
        "total_conditions": conditions.len(),
        "passed_conditions": passed,
    })))
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
        let mut step = WorkflowStep::new("cond", "condition");
        step.config = config.as_object().cloned().unwrap();
        step.inputs = inputs.as_object().cloned().unwrap();
        step
    }

    async fn run(config: Value, inputs: Value) -> Result<JsonMap, StepError> {
        let ctx = StepContext::new(Uuid::now_v7(), "wf", JsonMap::new());
        ConditionExecutor.execute(&step(config, inputs), &ctx).await
    }

    #[tokio::test]
    async fn if_condition_equals() {
        let out = run(
            json!({"condition_type": "if", "field": "n", "operator": "equals", "value": 5}),
            json!({"n": 5}),
        )
        .await
        .unwrap();
        assert_eq!(out["condition_result"], json!(true));
        assert_eq!(out["branch"], json!("true"));
        assert_eq!(out["condition_type"], json!("if"));
        assert_eq!(out["operator"], json!("equals"));
    }

    #[tokio::test]
    async fn if_else_is_an_alias() {
        let out = run(
            json!({"condition_type": "if_else", "field": "s", "operator": "is_empty"}),
            json!({"s": "x"}),
        )
        .await
        .unwrap();
        assert_eq!(out["condition_result"], json!(false));
        assert_eq!(out["branch"], json!("false"));
    }

    #[tokio::test]
    async fn if_without_field_tests_the_first_authored_input() {
        let out = run(
            json!({"condition_type": "if", "operator": "equals", "value": 1}),
            json!({"zeta": 1, "alpha": 2}),
        )
        .await
        .unwrap();
        assert_eq!(out["condition_result"], json!(true));
        assert_eq!(out["test_value"], json!(1));
    }

    #[tokio::test]
    async fn if_reads_resolved_variables() {
        let mut step = step(
            json!({"field": "text", "operator": "contains", "value": "cd"}),
            json!({"text": "{{payload}}"}),
        );
        step.id = "c".into();
        let vars = json!({"payload": "abcdef"}).as_object().cloned().unwrap();
        let ctx = StepContext::new(Uuid::now_v7(), "wf", vars);
        let out = ConditionExecutor.execute(&step, &ctx).await.unwrap();
        assert_eq!(out["condition_result"], json!(true));
        assert_eq!(out["test_value"], json!("abcdef"));
    }

    #[tokio::test]
    async fn switch_matches_case_or_falls_back() {
        let config = json!({
            "condition_type": "switch",
            "field": "tier",
            "conditions": [
                {"value": "gold", "branch": "vip"},
                {"value": "silver", "branch": "standard"}
            ],
            "default_branch": "basic"
        });
        let out = run(config.clone(), json!({"tier": "silver"})).await.unwrap();
        assert_eq!(out["branch"], json!("standard"));
        assert_eq!(out["condition_result"], json!(true));

        let out = run(config, json!({"tier": "bronze"})).await.unwrap();
        assert_eq!(out["branch"], json!("basic"));
        assert_eq!(out["condition_result"], json!(false));
    }

    #[tokio::test]
    async fn all_and_any_report_breakdown() {
        let conditions = json!([
            {"field": "age", "operator": "greater_than_or_equal", "value": 18},
            {"field": "country", "operator": "equals", "value": "NO"}
        ]);
        let inputs = json!({"age": 30, "country": "SE"});

        let all = run(json!({"condition_type": "all", "conditions": conditions}), inputs.clone())
            .await
            .unwrap();
        assert_eq!(all["condition_result"], json!(false));
        assert_eq!(all["passed_conditions"], json!(1));
        assert_eq!(all["total_conditions"], json!(2));
        assert_eq!(all["results"].as_array().unwrap().len(), 2);

        let any = run(json!({"condition_type": "any", "conditions": conditions}), inputs)
            .await
            .unwrap();
        assert_eq!(any["condition_result"], json!(true));
        assert_eq!(any["branch"], json!("true"));
    }

    #[tokio::test]
    async fn all_without_conditions_is_a_configuration_error() {
        let err = run(json!({"condition_type": "all"}), json!({})).await.unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
    }

    #[tokio::test]
    async fn unknown_operator_and_type_fail_fast() {
        let err = run(json!({"operator": "roughly", "value": 1}), json!({"n": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));

        let err = run(json!({"condition_type": "maybe"}), json!({})).await.unwrap_err();
        assert!(err.to_string().contains("maybe"));
    }
}
