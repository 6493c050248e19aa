//! Comparison operators and field lookup shared by the condition, filter and
//! conditional-delay logic.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use flowforge_types::JsonMap;
use regex::Regex;
use serde_json::Value;

use crate::workflow::step_runner::StepError;
use crate::workflow::variables::{lookup, value_to_text};

/// Fixed operator table for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,
    RegexMatch,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThan,
        Operator::LessThanOrEqual,
        Operator::Contains,
        Operator::NotContains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::IsEmpty,
        Operator::IsNotEmpty,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::RegexMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
            Operator::RegexMatch => "regex_match",
        }
    }

    /// Parse the `operator` config key, defaulting to `equals`.
    pub fn from_config(config: &JsonMap) -> Result<Self, StepError> {
        config
            .get("operator")
            .and_then(Value::as_str)
            .map_or(Ok(Operator::Equals), str::parse)
    }

    /// Apply the operator. A missing subject compares as `null`.
    ///
    /// Only `regex_match` with an invalid pattern fails.
    pub fn apply(self, subject: Option<&Value>, expected: &Value) -> Result<bool, StepError> {
        let subject = subject.unwrap_or(&Value::Null);
        let result = match self {
            Operator::Equals => json_eq(subject, expected),
            Operator::NotEquals => !json_eq(subject, expected),
            Operator::GreaterThan => compare(subject, expected) == Some(Ordering::Greater),
            Operator::GreaterThanOrEqual => matches!(
                compare(subject, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => compare(subject, expected) == Some(Ordering::Less),
            Operator::LessThanOrEqual => matches!(
                compare(subject, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Contains => contains(subject, expected),
            Operator::NotContains => !contains(subject, expected),
            Operator::StartsWith => value_to_text(subject).starts_with(&value_to_text(expected)),
            Operator::EndsWith => value_to_text(subject).ends_with(&value_to_text(expected)),
            Operator::IsEmpty => is_empty(subject),
            Operator::IsNotEmpty => !is_empty(subject),
            Operator::IsNull => subject.is_null(),
            Operator::IsNotNull => !subject.is_null(),
            Operator::RegexMatch => {
                let pattern = value_to_text(expected);
                let re = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    StepError::config(format!("invalid regex pattern '{pattern}': {e}"))
                })?;
                re.is_match(&value_to_text(subject))
            }
        };
        Ok(result)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| StepError::config(format!("unsupported operator: '{s}'")))
    }
}

/// Look up a field in resolved inputs: exact key first, then dot path.
pub fn get_field<'a>(inputs: &'a JsonMap, field: &str) -> Option<&'a Value> {
    lookup(inputs, field)
}

/// JSON equality where integers and floats compare numerically.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Numbers compare numerically, strings lexicographically, anything else is
/// incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(subject: &Value, needle: &Value) -> bool {
    match subject {
        Value::String(s) => s.contains(&value_to_text(needle)),
        Value::Array(items) => items.iter().any(|item| json_eq(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

/// Null, false, zero, blank strings and empty collections are empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// A `{field, operator, value}` clause evaluated against resolved inputs.
#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: Option<String>,
    pub operator: Operator,
    pub value: Value,
}

impl FieldCondition {
    /// Parse from a config object. `operator` defaults to `equals`.
    pub fn from_config(config: &JsonMap) -> Result<Self, StepError> {
        Ok(Self {
            field: config.get("field").and_then(Value::as_str).map(str::to_string),
            operator: Operator::from_config(config)?,
            value: config.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    /// Parse from a JSON value that must be an object.
    pub fn from_value(value: &Value) -> Result<Self, StepError> {
        let map = value
            .as_object()
            .ok_or_else(|| StepError::config("condition must be an object"))?;
        Self::from_config(map)
    }

    /// The value under test: the named field, or the first input when no
    /// field is named.
    pub fn subject<'a>(&self, inputs: &'a JsonMap) -> Option<&'a Value> {
        match &self.field {
            Some(field) => get_field(inputs, field),
            None => inputs.values().next(),
        }
    }

    pub fn evaluate(&self, inputs: &JsonMap) -> Result<bool, StepError> {
        self.operator.apply(self.subject(inputs), &self.value)
    }
}
