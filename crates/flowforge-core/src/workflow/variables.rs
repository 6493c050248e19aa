//! `{{name}}` placeholder resolution against a variable context.
//!
//! Used by the engine, the simulation walker and every executor. Resolution
//! is pure: it never mutates the context and never fails. Placeholders that
//! name nothing known are left verbatim.
//!
//! - A string that is exactly one placeholder keeps the JSON type of the
//!   referenced value (`"{{count}}"` with `count = 3` resolves to `3`).
//! - Placeholders embedded in a longer string are interpolated as text.
//! - Names are looked up as exact keys first, then as dot paths
//!   (`{{user.address.city}}`, `{{items.0.id}}`).

use std::sync::LazyLock;

use flowforge_types::JsonMap;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("PLACEHOLDER must compile")
});

/// Resolve every placeholder in `inputs`, recursing through maps and arrays.
pub fn resolve_inputs(inputs: &JsonMap, variables: &JsonMap) -> JsonMap {
    inputs
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, variables)))
        .collect()
}

/// Resolve placeholders in one JSON value.
pub fn resolve_value(value: &Value, variables: &JsonMap) -> Value {
    match value {
        Value::String(s) => resolve_str(s, variables),
        Value::Object(map) => Value::Object(resolve_inputs(map, variables)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_value(item, variables))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_str(text: &str, variables: &JsonMap) -> Value {
    if let Some(name) = whole_placeholder(text) {
        return lookup(variables, name)
            .cloned()
            .unwrap_or_else(|| Value::String(text.to_string()));
    }

    let replaced = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| match lookup(variables, &caps[1]) {
        Some(value) => value_to_text(value),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

/// The variable name if `text` consists of exactly one placeholder.
fn whole_placeholder(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let caps = PLACEHOLDER.captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// Look up a variable by exact key, then by dot path.
pub fn lookup<'a>(variables: &'a JsonMap, name: &str) -> Option<&'a Value> {
    if let Some(value) = variables.get(name) {
        return Some(value);
    }
    let (head, rest) = name.split_once('.')?;
    lookup_path(variables.get(head)?, rest)
}

/// Walk a dot path through objects and arrays (numeric segments index arrays).
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Variable names referenced by placeholders in `text`, in order.
pub fn template_references(text: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

/// Text form used when a value is interpolated into a string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
