//! Structured validation issues produced by the workflow validator.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// One finding of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Machine-readable kind, e.g. `missing_url` or `workflow_cycle`.
    pub error_type: String,
    pub message: String,
    pub severity: Severity,
    /// Config key the issue refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationIssue {
    /// Workflow-level issue (no step attached).
    pub fn workflow(error_type: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            step_id: None,
            step_name: None,
            error_type: error_type.to_string(),
            message: message.into(),
            severity,
            field: None,
        }
    }

    /// Attach the issue to a step.
    pub fn for_step(mut self, step_id: &str, step_name: &str) -> Self {
        self.step_id = Some(step_id.to_string());
        self.step_name = Some(step_name.to_string());
        self
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// All issues of one validation pass, bucketed by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
            Severity::Info => self.info.push(issue),
        }
    }

    /// True when no error-severity issue was found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors, then warnings, then info.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        self.errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.info)
            .cloned()
            .collect()
    }

    /// Messages of error-severity issues.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    /// Whether any issue of the given type was reported.
    pub fn has(&self, error_type: &str) -> bool {
        self.errors
            .iter()
            .chain(&self.warnings)
            .chain(&self.info)
            .any(|i| i.error_type == error_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_buckets_by_severity() {
        let mut report = ValidationReport::default();
        report.push(ValidationIssue::workflow("no_end_step", "no end", Severity::Warning));
        assert!(report.is_valid());

        report.push(
            ValidationIssue::workflow("missing_url", "url required", Severity::Error)
                .for_step("fetch", "Fetch")
                .with_field("url"),
        );
        assert!(!report.is_valid());
        assert_eq!(report.error_messages(), vec!["url required".to_string()]);
        assert_eq!(report.issues().len(), 2);
        assert_eq!(report.issues()[0].field.as_deref(), Some("url"));
        assert!(report.has("no_end_step"));
    }
}
