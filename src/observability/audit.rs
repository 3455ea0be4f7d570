/// Structured audit events for liberation operations
///
/// Each operation emits one JSON line under the `handlefree::audit` log
/// target, so a host can route forced releases (which may terminate other
/// processes) separately from ordinary diagnostics.
use crate::config::types::LiberationError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "handlefree::audit";

/// Which liberation step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CloseSelfHandles,
    ForceUnlock,
    Liberate,
}

/// Terminal outcome of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Released,
    NothingHeld,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub operation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub path: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(operation: Operation, path: &Path, outcome: Outcome) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            path: path.display().to_string(),
            outcome,
            closed: None,
            code: None,
            error: None,
        }
    }

    pub fn with_closed(mut self, closed: usize) -> Self {
        self.closed = Some(closed);
        self
    }

    /// Mark as failed with the error's message and native code
    pub fn with_error(mut self, err: &LiberationError) -> Self {
        self.outcome = Outcome::Failed;
        self.code = err.native_code();
        self.error = Some(err.to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn emit(&self) {
        match self.to_json() {
            Ok(line) => info!(target: AUDIT_TARGET, "{}", line),
            Err(e) => warn!(target: AUDIT_TARGET, "failed to serialize audit event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = AuditEvent::new(Operation::CloseSelfHandles, Path::new("db.sqlite"), Outcome::Released)
            .with_closed(2);
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["operation"], "close_self_handles");
        assert_eq!(json["outcome"], "released");
        assert_eq!(json["closed"], 2);
        assert_eq!(json["path"], "db.sqlite");
        assert!(json.get("code").is_none());
        assert!(json.get("error").is_none());
        assert!(json["operation_id"].as_str().unwrap().len() == 36);
    }

    #[test]
    fn test_error_marks_failed_with_code() {
        let err = LiberationError::SessionStartFailed {
            path: "x".to_string(),
            code: 29,
        };
        let event = AuditEvent::new(Operation::ForceUnlock, Path::new("x"), Outcome::Released).with_error(&err);
        assert_eq!(event.outcome, Outcome::Failed);
        assert_eq!(event.code, Some(29));
        assert!(event.error.as_deref().unwrap().contains("RmStartSession"));
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let a = AuditEvent::new(Operation::Liberate, Path::new("x"), Outcome::NothingHeld);
        let b = AuditEvent::new(Operation::Liberate, Path::new("x"), Outcome::NothingHeld);
        assert_ne!(a.operation_id, b.operation_id);
    }
}
