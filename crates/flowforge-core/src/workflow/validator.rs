//! Static workflow validation.
//!
//! `WorkflowValidator::validate` inspects a definition without running it and
//! returns every finding bucketed by severity. Checks run in a fixed order:
//! workflow basics, per-step checks, graph shape, variable references,
//! performance heuristics, then security heuristics.
//!
//! The variable and security checks are heuristics: they may warn about
//! references that are fine at runtime and miss ones that are not.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use flowforge_types::validation::{Severity, ValidationIssue, ValidationReport};
use flowforge_types::workflow::{StepKind, WorkflowDefinition, WorkflowStep};
use regex::Regex;
use serde_json::Value;

use super::graph::WorkflowGraph;
use super::step_runner::ExecutorRegistry;
use super::variables::template_references;

/// Workflows larger than this get a performance warning.
pub const MAX_RECOMMENDED_STEPS: usize = 100;

/// Fixed delays longer than this many seconds get a performance warning.
pub const LONG_DELAY_SECS: f64 = 300.0;

/// HTTP methods accepted by the HTTP connector.
pub const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

/// Variables assumed to exist in every run.
pub const BUILTIN_VARIABLES: [&str; 7] = [
    "workflow_id",
    "workflow_name",
    "execution_id",
    "timestamp",
    "user_id",
    "user_email",
    "organization_id",
];

static SENSITIVE_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(password|token|key|secret|auth|api_key)=")
        .expect("sensitive query regex must compile")
});

/// Config (or input) fields each synthetic connector backend needs.
fn backend_required_fields(connector_type: &str) -> &'static [&'static str] {
    match connector_type {
        "database" => &["connection_string", "query"],
        "email" => &["to", "subject", "body"],
        "slack" => &["channel", "message"],
        "salesforce" => &["object", "action"],
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// WorkflowValidator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WorkflowValidator {
    /// Step types with a registered executor. `None` skips the check.
    executor_types: Option<HashSet<String>>,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also warn about step types the given registry cannot execute.
    pub fn with_registry(registry: &ExecutorRegistry) -> Self {
        Self {
            executor_types: Some(registry.step_types().into_iter().map(str::to_string).collect()),
        }
    }

    pub fn validate(&self, workflow: &WorkflowDefinition) -> ValidationReport {
        let mut report = ValidationReport::default();

        check_basics(workflow, &mut report);
        self.check_steps(workflow, &mut report);
        check_graph(workflow, &mut report);
        check_variables(workflow, &mut report);
        check_performance(workflow, &mut report);
        check_security(workflow, &mut report);

        tracing::debug!(
            workflow_id = workflow.id.as_str(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "workflow validated"
        );
        report
    }

    fn check_steps(&self, workflow: &WorkflowDefinition, report: &mut ValidationReport) {
        let ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();
        let mut seen = HashSet::new();

        for step in &workflow.steps {
            if !seen.insert(step.id.as_str()) {
                report.push(
                    step_issue(step, "duplicate_step_id", format!("Duplicate step ID: {}", step.id)),
                );
            }

            if step.name.trim().is_empty() {
                let mut issue = ValidationIssue::workflow(
                    "missing_step_name",
                    format!("Step {} must have a name", step.id),
                    Severity::Error,
                );
                issue.step_id = Some(step.id.clone());
                report.push(issue);
            }

            if step.step_type.trim().is_empty() {
                report.push(step_issue(
                    step,
                    "missing_step_type",
                    format!("Step {} must have a type", label(step)),
                ));
            } else if step.kind().is_none() {
                report.push(step_issue(
                    step,
                    "invalid_step_type",
                    format!("Invalid step type '{}' for step {}", step.step_type, label(step)),
                ));
            }

            if let Some(kind) = step.kind() {
                check_step_config(step, kind, report);
            }

            if let Some(registered) = &self.executor_types {
                if !step.step_type.is_empty() && !registered.contains(&step.step_type) {
                    report.push(
                        step_issue(
                            step,
                            "no_executor",
                            format!("No executor found for step type '{}'", step.step_type),
                        )
                        .with_severity(Severity::Warning),
                    );
                }
            }

            for target in &step.connections {
                if !ids.contains(target.as_str()) {
                    report.push(step_issue(
                        step,
                        "invalid_connection",
                        format!("Step {} connects to non-existent step {target}", label(step)),
                    ));
                }
            }
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    report.push(step_issue(
                        step,
                        "invalid_dependency",
                        format!("Step {} depends on non-existent step {dep}", label(step)),
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn check_basics(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    if workflow.name.trim().is_empty() {
        report.push(ValidationIssue::workflow(
            "missing_name",
            "Workflow must have a name",
            Severity::Error,
        ));
    }
    if workflow.steps.is_empty() {
        report.push(ValidationIssue::workflow(
            "no_steps",
            "Workflow must have at least one step",
            Severity::Error,
        ));
    }
    if !workflow.steps.iter().any(|s| s.kind() == Some(StepKind::Start)) {
        report.push(ValidationIssue::workflow(
            "no_start_step",
            "Workflow must have at least one start step",
            Severity::Error,
        ));
    }
    if !workflow.steps.iter().any(|s| s.kind() == Some(StepKind::End)) {
        report.push(ValidationIssue::workflow(
            "no_end_step",
            "Workflow should have at least one end step",
            Severity::Warning,
        ));
    }
}

fn check_step_config(step: &WorkflowStep, kind: StepKind, report: &mut ValidationReport) {
    // Markers carry no configuration.
    let Some(key) = kind.sub_type_key() else {
        return;
    };

    if step.config.is_empty() {
        report.push(step_issue(
            step,
            "missing_config",
            format!("Step {} must have configuration", label(step)),
        ));
        return;
    }

    let Some(sub_type) = step.config.get(key) else {
        report.push(
            step_issue(
                step,
                &format!("missing_{key}"),
                format!("{} step {} must specify {key}", capitalized(kind), label(step)),
            )
            .with_field(key),
        );
        return;
    };

    let sub_type = sub_type.as_str().unwrap_or_default();
    if !kind.allowed_sub_types().contains(&sub_type) {
        report.push(
            step_issue(
                step,
                &format!("invalid_{key}"),
                format!(
                    "Invalid {} '{sub_type}' for step {}",
                    key.replace('_', " "),
                    label(step)
                ),
            )
            .with_field(key),
        );
        return;
    }

    if kind == StepKind::Connector {
        check_connector(step, sub_type, report);
    }
}

fn check_connector(step: &WorkflowStep, connector_type: &str, report: &mut ValidationReport) {
    if connector_type == "http" {
        match http_url(step) {
            None => report.push(
                step_issue(
                    step,
                    "missing_url",
                    format!("HTTP connector {} must specify URL", label(step)),
                )
                .with_field("url"),
            ),
            Some(raw) if !raw.contains("{{") && !is_absolute_url(raw) => report.push(
                step_issue(
                    step,
                    "invalid_url",
                    format!("Invalid URL '{raw}' in step {}", label(step)),
                )
                .with_field("url"),
            ),
            Some(_) => {}
        }

        if let Some(method) = step.config_str("method") {
            let method = method.to_ascii_uppercase();
            if !HTTP_METHODS.contains(&method.as_str()) {
                report.push(
                    step_issue(
                        step,
                        "invalid_method",
                        format!("Invalid HTTP method '{method}' in step {}", label(step)),
                    )
                    .with_field("method"),
                );
            }
        }
        return;
    }

    for field in backend_required_fields(connector_type) {
        if !step.config.contains_key(*field) && !step.inputs.contains_key(*field) {
            report.push(
                step_issue(
                    step,
                    &format!("missing_{field}"),
                    format!(
                        "{} connector {} must specify {field}",
                        capitalize_word(connector_type),
                        label(step)
                    ),
                )
                .with_field(field),
            );
        }
    }
}

fn check_graph(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    // Duplicates are already reported; keep the first occurrence of each id.
    let mut seen = HashSet::new();
    let unique: Vec<WorkflowStep> = workflow
        .steps
        .iter()
        .filter(|s| seen.insert(s.id.as_str()))
        .cloned()
        .collect();
    let Ok(graph) = WorkflowGraph::build(&unique) else {
        return;
    };

    if let Some(cycle) = graph.find_cycle() {
        report.push(ValidationIssue::workflow(
            "workflow_cycle",
            format!(
                "Workflow contains cycles which may cause infinite loops: {}",
                cycle.join(" -> ")
            ),
            Severity::Error,
        ));
    }

    let starts = unique
        .iter()
        .filter(|s| s.kind() == Some(StepKind::Start))
        .map(|s| s.id.as_str());
    let reachable = graph.reachable_from(starts);
    let unreachable: Vec<&str> = unique
        .iter()
        .filter(|s| !reachable.contains(&s.id))
        .map(label)
        .collect();
    if !unreachable.is_empty() {
        report.push(ValidationIssue::workflow(
            "unreachable_steps",
            format!("Unreachable steps detected: {}", unreachable.join(", ")),
            Severity::Warning,
        ));
    }
}

fn check_variables(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    let mut references = BTreeSet::new();
    for step in &workflow.steps {
        collect_references(&Value::Object(step.config.clone()), &mut references);
        collect_references(&Value::Object(step.inputs.clone()), &mut references);
    }

    let declared = declared_outputs(workflow);
    for reference in references {
        let root = reference.split('.').next().unwrap_or(&reference);
        let known = BUILTIN_VARIABLES.contains(&reference.as_str())
            || BUILTIN_VARIABLES.contains(&root)
            || declared.contains(reference.as_str())
            || declared.contains(root);
        if !known {
            report.push(ValidationIssue::workflow(
                "undefined_variable",
                format!("Variable reference '{reference}' may be undefined"),
                Severity::Warning,
            ));
        }
    }
}

fn check_performance(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    if workflow.steps.len() > MAX_RECOMMENDED_STEPS {
        report.push(ValidationIssue::workflow(
            "too_many_steps",
            format!(
                "Workflow has {} steps, consider breaking into smaller workflows",
                workflow.steps.len()
            ),
            Severity::Warning,
        ));
    }

    for step in &workflow.steps {
        if step.kind() != Some(StepKind::Delay) || step.config_str("delay_type") != Some("fixed") {
            continue;
        }
        let duration = ["duration", "duration_seconds"]
            .iter()
            .find_map(|k| step.config.get(*k).and_then(Value::as_f64))
            .unwrap_or(0.0);
        if duration > LONG_DELAY_SECS {
            report.push(
                step_issue(
                    step,
                    "long_delay",
                    format!("Step {} has a long delay ({duration}s)", label(step)),
                )
                .with_severity(Severity::Warning),
            );
        }
    }
}

fn check_security(workflow: &WorkflowDefinition, report: &mut ValidationReport) {
    for step in &workflow.steps {
        if step.kind() != Some(StepKind::Connector)
            || step.config_str("connector_type").unwrap_or("http") != "http"
        {
            continue;
        }
        if http_url(step).is_some_and(|url| SENSITIVE_QUERY.is_match(url)) {
            report.push(
                step_issue(
                    step,
                    "sensitive_url",
                    format!("Step {} URL may contain sensitive data", label(step)),
                )
                .with_severity(Severity::Warning),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn step_issue(step: &WorkflowStep, error_type: &str, message: String) -> ValidationIssue {
    ValidationIssue::workflow(error_type, message, Severity::Error).for_step(&step.id, &step.name)
}

fn label(step: &WorkflowStep) -> &str {
    if step.name.trim().is_empty() {
        &step.id
    } else {
        &step.name
    }
}

fn capitalize_word(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn capitalized(kind: StepKind) -> String {
    capitalize_word(kind.as_str())
}

fn http_url(step: &WorkflowStep) -> Option<&str> {
    step.config_str("url").or_else(|| step.config_str("endpoint"))
}

fn is_absolute_url(raw: &str) -> bool {
    url::Url::parse(raw).is_ok_and(|u| u.has_host())
}

fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => out.extend(template_references(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// Output names declared on any step, via `outputs` or `config.outputs`.
fn declared_outputs(workflow: &WorkflowDefinition) -> HashSet<&str> {
    let mut names = HashSet::new();
    for step in &workflow.steps {
        names.extend(step.outputs.keys().map(String::as_str));
        if let Some(outputs) = step.config.get("outputs").and_then(Value::as_object) {
            names.extend(outputs.keys().map(String::as_str));
        }
    }
    names
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::executors::{ConnectorRegistry, core_registry};
    use serde_json::json;

    fn step(id: &str, step_type: &str, config: Value) -> WorkflowStep {
        let mut step = WorkflowStep::new(id, step_type);
        step.config = config.as_object().cloned().unwrap_or_default();
        step
    }

    fn linked(mut steps: Vec<WorkflowStep>) -> Vec<WorkflowStep> {
        for i in 0..steps.len().saturating_sub(1) {
            let next = steps[i + 1].id.clone();
            steps[i].connections.push(next);
        }
        steps
    }

    fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".into(),
            name: "Test".into(),
            description: None,
            steps,
            metadata: Default::default(),
        }
    }

    fn valid_steps() -> Vec<WorkflowStep> {
        let mut fetch = step(
            "fetch",
            "connector",
            json!({"connector_type": "http", "url": "https://api.example.com/users", "method": "get"}),
        );
        fetch.outputs.insert("body".into(), json!("object"));
        let mut shape = step(
            "shape",
            "transform",
            json!({"transform_type": "format", "format_template": "Hi {{body}}"}),
        );
        shape.inputs.insert("name".into(), json!("{{body.name}}"));
        linked(vec![
            step("start", "start", json!({})),
            fetch,
            shape,
            step("end", "end", json!({})),
        ])
    }

    #[test]
    fn test_valid_workflow_has_no_findings() {
        let report = WorkflowValidator::new().validate(&workflow(valid_steps()));
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_basics() {
        let mut wf = workflow(vec![]);
        wf.name = " ".into();
        let report = WorkflowValidator::new().validate(&wf);
        assert!(report.has("missing_name"));
        assert!(report.has("no_steps"));
        assert!(report.has("no_start_step"));
        assert!(report.warnings.iter().any(|w| w.error_type == "no_end_step"));
    }

    #[test]
    fn test_duplicate_ids_and_unknown_types() {
        let wf = workflow(linked(vec![
            step("start", "start", json!({})),
            step("x", "teleport", json!({})),
            step("x", "end", json!({})),
        ]));
        let report = WorkflowValidator::new().validate(&wf);
        assert!(report.has("duplicate_step_id"));
        assert!(report.has("invalid_step_type"));
    }

    #[test]
    fn test_sub_type_checks() {
        let wf = workflow(linked(vec![
            step("start", "start", json!({})),
            step("a", "transform", json!({})),
            step("b", "condition", json!({"operator": "equals"})),
            step("c", "delay", json!({"delay_type": "eventually"})),
            step("end", "end", json!({})),
        ]));
        let report = WorkflowValidator::new().validate(&wf);
        assert!(report.has("missing_config"));
        assert!(report.has("missing_condition_type"));
        let invalid = report
            .errors
            .iter()
            .find(|e| e.error_type == "invalid_delay_type")
            .unwrap();
        assert_eq!(invalid.step_id.as_deref(), Some("c"));
        assert_eq!(invalid.field.as_deref(), Some("delay_type"));
    }

    #[test]
    fn test_http_connector_checks() {
        let wf = workflow(linked(vec![
            step("start", "start", json!({})),
            step("a", "connector", json!({"connector_type": "http", "url": "not a url"})),
            step("b", "connector", json!({"connector_type": "http", "url": "https://x.io", "method": "FETCH"})),
            step("c", "connector", json!({"connector_type": "http"})),
            step("d", "connector", json!({"connector_type": "http", "url": "{{base_url}}/users"})),
            step("end", "end", json!({})),
        ]));
        let report = WorkflowValidator::new().validate(&wf);
        assert!(report.has("invalid_url"));
        assert!(report.has("invalid_method"));
        assert!(report.has("missing_url"));
        // Templated URLs are only checked at runtime.
        assert_eq!(
            report.errors.iter().filter(|e| e.error_type == "invalid_url").count(),
            1
        );
    }

    #[test]
    fn test_backend_required_fields_accept_config_or_inputs() {
        let mut slack = step("s", "connector", json!({"connector_type": "slack", "channel": "#ops"}));
        slack.inputs.insert("message".into(), json!("hi"));
        let db = step("d", "connector", json!({"connector_type": "database", "query": "select 1"}));
        let wf = workflow(linked(vec![
            step("start", "start", json!({})),
            slack,
            db,
            step("end", "end", json!({})),
        ]));
        let report = WorkflowValidator::new().validate(&wf);
        assert!(!report.has("missing_message"));
        assert!(report.has("missing_connection_string"));
        assert!(!report.has("missing_query"));
    }

    #[test]
    fn test_dangling_connection_and_cycle() {
        let mut a = step("a", "transform", json!({"transform_type": "split"}));
        let mut b = step("b", "transform", json!({"transform_type": "split"}));
        a.connections = vec!["b".into(), "ghost".into()];
        b.connections = vec!["a".into()];
        let mut start = step("start", "start", json!({}));
        start.connections = vec!["a".into()];
        let wf = workflow(vec![start, a, b]);

        let report = WorkflowValidator::new().validate(&wf);
        assert!(report.has("invalid_connection"));
        let cycle = report
            .errors
            .iter()
            .find(|e| e.error_type == "workflow_cycle")
            .unwrap();
        assert!(cycle.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_unreachable_steps_warn() {
        let mut steps = valid_steps();
        steps.push(step("orphan", "delay", json!({"delay_type": "fixed"})));
        let report = WorkflowValidator::new().validate(&workflow(steps));
        assert!(report.is_valid());
        let warning = report
            .warnings
            .iter()
            .find(|w| w.error_type == "unreachable_steps")
            .unwrap();
        assert!(warning.message.contains("orphan"));
    }

    #[test]
    fn test_undefined_variables_warn() {
        let mut steps = valid_steps();
        steps[2].inputs.insert("who".into(), json!("{{mystery}} and {{user_id}}"));
        let report = WorkflowValidator::new().validate(&workflow(steps));
        let undefined: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.error_type == "undefined_variable")
            .collect();
        assert_eq!(undefined.len(), 1);
        assert!(undefined[0].message.contains("mystery"));
    }

    #[test]
    fn test_performance_and_security_heuristics() {
        let mut steps = vec![step("start", "start", json!({}))];
        steps.push(step("wait", "delay", json!({"delay_type": "fixed", "duration_seconds": 900})));
        steps.push(step(
            "leak",
            "connector",
            json!({"connector_type": "http", "url": "https://x.io/?API_KEY=abc"}),
        ));
        for i in 0..100 {
            steps.push(step(&format!("s{i}"), "end", json!({})));
        }
        let report = WorkflowValidator::new().validate(&workflow(linked(steps)));
        assert!(report.warnings.iter().any(|w| w.error_type == "long_delay"));
        assert!(report.warnings.iter().any(|w| w.error_type == "sensitive_url"));
        assert!(report.warnings.iter().any(|w| w.error_type == "too_many_steps"));
    }

    #[test]
    fn test_registry_warns_on_missing_executor() {
        let registry = core_registry(ConnectorRegistry::with_stubs());
        let wf = workflow(linked(vec![
            step("start", "start", json!({})),
            step("hook", "webhook", json!({"webhook_type": "outgoing"})),
            step("end", "end", json!({})),
        ]));
        let report = WorkflowValidator::with_registry(&registry).validate(&wf);
        let warning = report
            .warnings
            .iter()
            .find(|w| w.error_type == "no_executor")
            .unwrap();
        assert_eq!(warning.step_id.as_deref(), Some("hook"));
        assert!(!WorkflowValidator::new().validate(&wf).has("no_executor"));
    }
}
