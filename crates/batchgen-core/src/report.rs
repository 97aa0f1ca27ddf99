use serde::{Deserialize, Serialize};

use crate::{EntryId, FailureCategory};

pub const FAILURE_RECORD_SCHEMA_VERSION: u32 = 2;

pub const SUBCATEGORY_DEADLINE_EXCEEDED: &str = "deadline_exceeded";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutcome {
    Success,
    Failure,
}

/// Structured result of one recipe executor invocation.
///
/// The category is always a field; `message` is for humans and is never
/// inspected when classifying.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorReport {
    pub outcome: ExecOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub message: String,
}

impl ExecutorReport {
    pub fn success() -> Self {
        Self { outcome: ExecOutcome::Success, category: None, subcategory: None, blocked_by: Vec::new(), message: String::new() }
    }

    pub fn failure(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            outcome: ExecOutcome::Failure,
            category: Some(category),
            subcategory: None,
            blocked_by: Vec::new(),
            message: message.into(),
        }
    }

    pub fn missing_dependencies(blocked_by: Vec<String>) -> Self {
        let message = format!("missing dependencies: {}", blocked_by.join(", "));
        Self { blocked_by, ..Self::failure(FailureCategory::MissingDependency, message) }
    }

    pub fn deadline_exceeded(timeout_secs: u64) -> Self {
        Self {
            subcategory: Some(SUBCATEGORY_DEADLINE_EXCEEDED.to_string()),
            ..Self::failure(FailureCategory::Internal, format!("executor exceeded {timeout_secs}s deadline"))
        }
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExecOutcome::Success
    }
}

/// One line of the append-only failure log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    pub schema_version: u32,
    pub package_id: EntryId,
    pub environment: String,
    pub category: FailureCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "timestamp")]
    pub timestamp_unix: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_json_is_parsed_without_reading_the_message() {
        let r: ExecutorReport = serde_json::from_str(
            r#"{"outcome":"failure","category":"network_retryable","message":"could not verify checksum"}"#,
        )
        .unwrap();
        assert_eq!(r.category, Some(FailureCategory::NetworkRetryable));
        assert!(!r.is_success());
    }

    #[test]
    fn deadline_report_is_internal() {
        let r = ExecutorReport::deadline_exceeded(30);
        assert_eq!(r.category, Some(FailureCategory::Internal));
        assert_eq!(r.subcategory.as_deref(), Some(SUBCATEGORY_DEADLINE_EXCEEDED));
    }
}
