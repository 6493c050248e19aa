//! Transform step executor: map, filter, aggregate, format, split, join and
//! restricted custom expressions.

use std::cmp::Ordering;

use chrono::Utc;
use flowforge_types::JsonMap;
use flowforge_types::workflow::WorkflowStep;
use serde_json::{Value, json};

use super::fields::{FieldCondition, compare, json_eq};
use crate::workflow::expression::{ALLOWED_TRANSFORMS, ExpressionEvaluator};
use crate::workflow::step_runner::{StepContext, StepError, StepExecutor};
use crate::workflow::variables::{lookup_path, value_to_text};

/// Functions usable in `field_mappings` pipelines and `aggregation_rules`.
pub const MAP_FUNCTIONS: &[&str] = &[
    "uppercase",
    "lowercase",
    "capitalize",
    "trim",
    "length",
    "round",
    "abs",
    "sum",
    "avg",
    "min",
    "max",
    "count",
    "unique",
    "reverse",
    "sort",
    "json_parse",
    "json_stringify",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformExecutor;

impl StepExecutor for TransformExecutor {
    async fn execute(&self, step: &WorkflowStep, ctx: &StepContext) -> Result<JsonMap, StepError> {
        let inputs = ctx.resolve_inputs(step);
        let transform_type = step
            .config_str("transform_type")
            .ok_or_else(|| StepError::config("transform step requires transform_type"))?;

        tracing::debug!(step_id = step.id.as_str(), transform_type, "executing transform");

        let config = &step.config;
        let mut output = match transform_type {
            "map" => map_transform(config, &inputs)?,
            "filter" => filter_transform(config, &inputs)?,
            "aggregate" => aggregate_transform(config, &inputs)?,
            "format" => format_transform(config, &inputs)?,
            "split" => split_transform(config, &inputs),
            "join" => join_transform(config, &inputs)?,
            "custom" => custom_transform(config, &inputs)?,
            other => {
                return Err(StepError::config(format!(
                    "unsupported transform type: '{other}'"
                )));
            }
        };

        output.insert("transform_type".into(), json!(transform_type));
        output.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Transform variants
// ---------------------------------------------------------------------------

fn map_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let mappings = config
        .get("field_mappings")
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| StepError::config("map transform requires field_mappings"))?;

    let source = Value::Object(inputs.clone());
    let mut mapped = JsonMap::new();
    for (source_path, spec) in mappings {
        let spec = spec
            .as_str()
            .ok_or_else(|| StepError::config(format!("mapping for '{source_path}' must be a string")))?;
        let mut parts = spec.split(':');
        let target = parts
            .next()
            .filter(|t| !t.is_empty())
            .unwrap_or(source_path.as_str());

        let mut value = lookup_path(&source, source_path).cloned().unwrap_or(Value::Null);
        for function in parts {
            value = apply_function(function, value)?;
        }
        mapped.insert(target.to_string(), value);
    }

    let mut output = mapped.clone();
    output.insert("status".into(), json!("success"));
    output.insert("input_count".into(), json!(inputs.len()));
    output.insert("output_count".into(), json!(mapped.len()));
    output.insert("transformed_data".into(), Value::Object(mapped));
    Ok(output)
}

fn filter_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let conditions = config
        .get("filter_conditions")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| StepError::config("filter transform requires filter_conditions"))?
        .iter()
        .map(FieldCondition::from_value)
        .collect::<Result<Vec<_>, _>>()?;

    let (filtered, original_count, filtered_count) = match inputs.get("data") {
        Some(Value::Array(items)) => {
            let mut kept = Vec::new();
            for item in items {
                if matches_all(&conditions, item)? {
                    kept.push(item.clone());
                }
            }
            let count = kept.len();
            (Value::Array(kept), items.len(), count)
        }
        _ => {
            let whole = Value::Object(inputs.clone());
            if matches_all(&conditions, &whole)? {
                (whole, 1, 1)
            } else {
                (json!({}), 1, 0)
            }
        }
    };

    Ok(object(json!({
        "status": "success",
        "filtered_data": filtered,
        "original_count": original_count,
        "filtered_count": filtered_count,
    })))
}

fn matches_all(conditions: &[FieldCondition], item: &Value) -> Result<bool, StepError> {
    for condition in conditions {
        let subject = match &condition.field {
            Some(field) => lookup_path(item, field),
            None => Some(item),
        };
        if !condition.operator.apply(subject, &condition.value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn aggregate_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let rules = config
        .get("aggregation_rules")
        .and_then(Value::as_object)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| StepError::config("aggregate transform requires aggregation_rules"))?;

    let records = inputs
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::execution("aggregate transform requires array data"))?;

    let mut aggregated = JsonMap::new();
    for (field, function) in rules {
        let function = function
            .as_str()
            .ok_or_else(|| StepError::config(format!("aggregation for '{field}' must be a string")))?;
        let values: Vec<Value> = records
            .iter()
            .filter_map(|record| lookup_path(record, field))
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        aggregated.insert(field.clone(), apply_function(function, Value::Array(values))?);
    }

    Ok(object(json!({
        "status": "success",
        "aggregated_data": aggregated,
        "record_count": records.len(),
    })))
}

fn format_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let template = config
        .get("format_template")
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::config("format transform requires format_template"))?;

    let formatted = inputs.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), &value_to_text(value))
    });

    Ok(object(json!({
        "status": "success",
        "formatted_string": formatted,
    })))
}

fn split_transform(config: &JsonMap, inputs: &JsonMap) -> JsonMap {
    let delimiter = config
        .get("split_delimiter")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .unwrap_or(",");
    let text = inputs.get("data").map(value_to_text).unwrap_or_default();
    let parts: Vec<&str> = text.split(delimiter).collect();

    object(json!({
        "status": "success",
        "split_data": parts,
        "parts_count": parts.len(),
    }))
}

fn join_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let delimiter = config
        .get("join_delimiter")
        .and_then(Value::as_str)
        .unwrap_or(" ");
    let items = inputs
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::execution("join transform requires array data"))?;
    let joined = items
        .iter()
        .map(value_to_text)
        .collect::<Vec<_>>()
        .join(delimiter);

    Ok(object(json!({
        "status": "success",
        "joined_string": joined,
        "items_count": items.len(),
    })))
}

fn custom_transform(config: &JsonMap, inputs: &JsonMap) -> Result<JsonMap, StepError> {
    let expression = config
        .get("custom_function")
        .and_then(Value::as_str)
        .ok_or_else(|| StepError::config("custom transform requires custom_function"))?;

    let context = json!({ "inputs": inputs });
    let result = ExpressionEvaluator::new()
        .evaluate(expression, &context)
        .map_err(|e| {
            StepError::config(format!(
                "custom transform rejected: {e} (allowed transforms: {})",
                ALLOWED_TRANSFORMS.join(", ")
            ))
        })?;

    Ok(object(json!({
        "status": "success",
        "custom_result": result,
    })))
}

// ---------------------------------------------------------------------------
// Pipeline functions
// ---------------------------------------------------------------------------

/// Apply one named pipeline function. Unknown names are configuration errors.
pub fn apply_function(name: &str, value: Value) -> Result<Value, StepError> {
    let out = match name {
        "uppercase" => json!(value_to_text(&value).to_uppercase()),
        "lowercase" => json!(value_to_text(&value).to_lowercase()),
        "capitalize" => json!(capitalize(&value_to_text(&value))),
        "trim" => json!(value_to_text(&value).trim()),
        "length" => json!(match &value {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(o) => o.len(),
            Value::Null => 0,
            other => other.to_string().len(),
        }),
        "round" => json!((as_number(&value) * 100.0).round() / 100.0),
        "abs" => json!(as_number(&value).abs()),
        "sum" => json!(numbers(&value).iter().sum::<f64>()),
        "avg" => {
            let nums = numbers(&value);
            if nums.is_empty() {
                json!(0)
            } else {
                json!(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        "min" => extreme(value, Ordering::Less),
        "max" => extreme(value, Ordering::Greater),
        "count" => json!(value.as_array().map_or(1, Vec::len)),
        "unique" => match value {
            Value::Array(items) => {
                let mut seen: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !seen.iter().any(|s| json_eq(s, &item)) {
                        seen.push(item);
                    }
                }
                Value::Array(seen)
            }
            other => json!([other]),
        },
        "reverse" => match value {
            Value::Array(mut items) => {
                items.reverse();
                Value::Array(items)
            }
            Value::String(s) => json!(s.chars().rev().collect::<String>()),
            other => other,
        },
        "sort" => match value {
            Value::Array(mut items) => {
                items.sort_by(|a, b| {
                    compare(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string()))
                });
                Value::Array(items)
            }
            other => other,
        },
        "json_parse" => match value {
            Value::String(s) => serde_json::from_str(&s)
                .map_err(|e| StepError::execution(format!("json_parse failed: {e}")))?,
            other => other,
        },
        "json_stringify" => match value {
            Value::Null => json!(""),
            other => json!(other.to_string()),
        },
        other => {
            return Err(StepError::config(format!(
                "unknown transform function: '{other}'"
            )));
        }
    };
    Ok(out)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().map(as_number).collect(),
        Value::Null => vec![],
        other => vec![as_number(other)],
    }
}

fn extreme(value: Value, wanted: Ordering) -> Value {
    match value {
        Value::Array(items) if !items.is_empty() => items
            .into_iter()
            .reduce(|best, item| {
                if compare(&item, &best) == Some(wanted) {
                    item
                } else {
                    best
                }
            })
            .unwrap_or(Value::Null),
        other => other,
    }
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
