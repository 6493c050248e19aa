//! Restricted expression evaluator for `custom` transforms.
//!
//! Wraps `jexl_eval::Evaluator` with a fixed allow-list of transforms. JEXL
//! has no assignment, loops, function definitions or host access, so a
//! workflow author can combine field access, arithmetic, comparisons and the
//! registered transforms, and nothing else. Any expression outside that
//! grammar fails to parse or evaluate.
//!
//! **Security note:** step inputs are always passed as the context object,
//! never interpolated into the expression string.

use serde_json::{Value, json};

/// Longest expression accepted.
pub const MAX_EXPRESSION_LEN: usize = 1000;

/// Transforms callable with `value|name(args)`.
pub const ALLOWED_TRANSFORMS: &[&str] = &[
    "upper", "lower", "trim", "length", "sum", "avg", "min", "max", "round", "abs", "keys",
    "values", "join", "split",
];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression is {len} characters long, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("expression is empty")]
    Empty,

    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with only the allow-listed transforms registered.
pub struct ExpressionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("join", |args: &[Value]| {
                let items = args.first().and_then(|v| v.as_array()).cloned().unwrap_or_default();
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                Ok(json!(parts.join(delimiter)))
            })
            // Collection transforms
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("keys", |args: &[Value]| {
                let keys: Vec<String> = args
                    .first()
                    .and_then(|v| v.as_object())
                    .map(|o| o.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(json!(keys))
            })
            .with_transform("values", |args: &[Value]| {
                let values: Vec<Value> = args
                    .first()
                    .and_then(|v| v.as_object())
                    .map(|o| o.values().cloned().collect())
                    .unwrap_or_default();
                Ok(json!(values))
            })
            // Numeric transforms
            .with_transform("sum", |args: &[Value]| Ok(json!(numbers(args).iter().sum::<f64>())))
            .with_transform("avg", |args: &[Value]| {
                let nums = numbers(args);
                if nums.is_empty() {
                    return Ok(json!(0.0));
                }
                Ok(json!(nums.iter().sum::<f64>() / nums.len() as f64))
            })
            .with_transform("min", |args: &[Value]| {
                Ok(numbers(args)
                    .into_iter()
                    .reduce(f64::min)
                    .map_or(Value::Null, |n| json!(n)))
            })
            .with_transform("max", |args: &[Value]| {
                Ok(numbers(args)
                    .into_iter()
                    .reduce(f64::max)
                    .map_or(Value::Null, |n| json!(n)))
            })
            .with_transform("round", |args: &[Value]| {
                let n = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
                let places = args.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0) as i32;
                let factor = 10f64.powi(places);
                Ok(json!((n * factor).round() / factor))
            })
            .with_transform("abs", |args: &[Value]| {
                let n = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
                Ok(json!(n.abs()))
            });

        Self { evaluator }
    }

    /// Evaluate an expression against a JSON object context.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ExpressionError::Empty);
        }
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::TooLong {
                len: expression.len(),
                max: MAX_EXPRESSION_LEN,
            });
        }
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric arguments: the first argument if it is an array, else all arguments.
fn numbers(args: &[Value]) -> Vec<f64> {
    match args.first() {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_f64).collect(),
        _ => args.iter().filter_map(Value::as_f64).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
