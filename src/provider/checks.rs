//! Scoring of guided-step checks shared by the adapters.
//!
//! A check is the step's `validation` block:
//!
//! ```text
//! {"type": "command_output", "expected": ["ip address 10.0.0.1", ...], "pass_ratio": 1.0}
//! ```
//!
//! Output checks award partial credit: `max_score * matched / expected`.

use serde_json::{json, Value};

use super::StepValidation;
use crate::storage::GuidedStep;

/// Result of matching output against expected patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub score: f64,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
}

impl CheckOutcome {
    /// Feedback line for the student.
    pub fn feedback(&self) -> String {
        if self.passed && self.missing.is_empty() {
            "All expected configuration found.".to_string()
        } else if self.passed {
            format!(
                "Step passed. Still missing: {}",
                self.missing.join(", ")
            )
        } else if self.matched.is_empty() {
            "None of the expected configuration was found.".to_string()
        } else {
            format!("Missing: {}", self.missing.join(", "))
        }
    }
}

/// Expected patterns of a check (`expected` as a string or array of strings).
pub(crate) fn expected_patterns(check: &Value) -> Vec<String> {
    match check.get("expected") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Fraction of patterns that must match to pass (default: all).
pub(crate) fn pass_ratio(check: &Value) -> f64 {
    check
        .get("pass_ratio")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0)
}

/// Case- and whitespace-insensitive containment of each pattern in `output`.
pub fn evaluate_output(output: &str, patterns: &[String], max_score: f64, ratio: f64) -> CheckOutcome {
    if patterns.is_empty() {
        return CheckOutcome {
            passed: true,
            score: max_score,
            matched: Vec::new(),
            missing: Vec::new(),
        };
    }

    let haystack = normalize(output);
    let (matched, missing): (Vec<String>, Vec<String>) = patterns
        .iter()
        .cloned()
        .partition(|p| haystack.contains(&normalize(p)));

    let fraction = matched.len() as f64 / patterns.len() as f64;
    CheckOutcome {
        passed: fraction >= ratio,
        score: (max_score * fraction * 100.0).round() / 100.0,
        matched,
        missing,
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Output text submitted with a validation request.
pub(crate) fn submitted_output(data: &Value) -> Option<&str> {
    data.get("output")
        .or_else(|| data.get("command_output"))
        .and_then(Value::as_str)
}

/// Judge a `command_output` check against the submitted output.
pub(crate) fn judge_output(step: &GuidedStep, check: &Value, data: &Value) -> StepValidation {
    let Some(output) = submitted_output(data) else {
        return StepValidation {
            passed: false,
            score: 0.0,
            feedback: "No command output submitted.".to_string(),
            actual_result: None,
            validation_time_ms: 0,
        };
    };

    let outcome = evaluate_output(
        output,
        &expected_patterns(check),
        step.max_score,
        pass_ratio(check),
    );
    StepValidation {
        passed: outcome.passed,
        score: outcome.score,
        feedback: outcome.feedback(),
        actual_result: Some(json!({
            "matched": outcome.matched,
            "missing": outcome.missing,
        })),
        validation_time_ms: 0,
    }
}

/// Steps without an automated check pass with full credit.
pub(crate) fn manual_pass(step: &GuidedStep) -> StepValidation {
    StepValidation {
        passed: true,
        score: step.max_score,
        feedback: "Step marked complete.".to_string(),
        actual_result: None,
        validation_time_ms: 0,
    }
}

/// Failed validation for a check type the adapter cannot run.
pub(crate) fn unsupported(check_type: &str) -> StepValidation {
    StepValidation {
        passed: false,
        score: 0.0,
        feedback: format!("Unsupported check type: {}", check_type),
        actual_result: None,
        validation_time_ms: 0,
    }
}
