//! Error types.
//!
//! `AdapterError` is the five-kind taxonomy a task can fail with. Components
//! wrap it in `TaskError`, adding which component failed and for which task,
//! and hand it to the adapter, the only place that turns an error into a
//! `failed` status event.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DiagnosticFile, TaskId, TaskState};

/// Failure classification reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    InputResolutionError,
    EngineExecutionError,
    OutputCollectionError,
    CancelledError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::InputResolutionError => "InputResolutionError",
            ErrorKind::EngineExecutionError => "EngineExecutionError",
            ErrorKind::OutputCollectionError => "OutputCollectionError",
            ErrorKind::CancelledError => "CancelledError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("invalid task message: `{field}` {reason}")]
    Validation { field: String, reason: String },

    #[error("input `{reference}` could not be resolved: {reason}")]
    InputResolution { reference: String, reason: String },

    #[error("engine failed{}: {diagnostics}", exit_suffix(.exit_code))]
    EngineExecution {
        exit_code: Option<i32>,
        timed_out: bool,
        diagnostics: String,
    },

    #[error("output collection failed: {reason}")]
    OutputCollection { reason: String },

    #[error("task cancelled while {phase}")]
    Cancelled { phase: TaskState },
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| format!(" with exit code {code}"))
        .unwrap_or_default()
}

impl AdapterError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn input(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        AdapterError::InputResolution {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(diagnostics: impl Into<String>) -> Self {
        AdapterError::EngineExecution {
            exit_code: None,
            timed_out: false,
            diagnostics: diagnostics.into(),
        }
    }

    pub fn output(reason: impl Into<String>) -> Self {
        AdapterError::OutputCollection {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Validation { .. } => ErrorKind::ValidationError,
            AdapterError::InputResolution { .. } => ErrorKind::InputResolutionError,
            AdapterError::EngineExecution { .. } => ErrorKind::EngineExecutionError,
            AdapterError::OutputCollection { .. } => ErrorKind::OutputCollectionError,
            AdapterError::Cancelled { .. } => ErrorKind::CancelledError,
        }
    }

    /// Kind-specific fields for the failure payload.
    fn detail(&self) -> serde_json::Value {
        match self {
            AdapterError::Validation { field, .. } => serde_json::json!({ "field": field }),
            AdapterError::InputResolution { reference, .. } => {
                serde_json::json!({ "reference": reference })
            }
            AdapterError::EngineExecution {
                exit_code,
                timed_out,
                ..
            } => serde_json::json!({ "exit_code": exit_code, "timed_out": timed_out }),
            AdapterError::OutputCollection { .. } => serde_json::json!({}),
            AdapterError::Cancelled { phase } => serde_json::json!({ "phase": phase }),
        }
    }
}

/// Pipeline component that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    PayloadValidator,
    InputStager,
    ProcessRunner,
    OutputCollector,
    StatusReporter,
    TaskAdapter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::PayloadValidator => "PayloadValidator",
            Component::InputStager => "InputStager",
            Component::ProcessRunner => "ProcessRunner",
            Component::OutputCollector => "OutputCollector",
            Component::StatusReporter => "StatusReporter",
            Component::TaskAdapter => "TaskAdapter",
        };
        f.write_str(name)
    }
}

/// An `AdapterError` enriched with its origin.
#[derive(Debug, Clone, Error)]
#[error("[{component}] task {task_id}: {source}")]
pub struct TaskError {
    pub task_id: String,
    pub component: Component,
    #[source]
    pub source: AdapterError,

    /// Files left in the output directory by a failed engine run.
    pub diagnostics: Vec<DiagnosticFile>,
}

impl TaskError {
    pub fn new(task_id: &TaskId, component: Component, source: AdapterError) -> Self {
        Self::for_raw(task_id.as_str(), component, source)
    }

    /// For failures that happen before a `TaskId` has been validated.
    pub fn for_raw(task_id: impl Into<String>, component: Component, source: AdapterError) -> Self {
        Self {
            task_id: task_id.into(),
            component,
            source,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<DiagnosticFile>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Structured payload of the terminal `failed` event.
    pub fn payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "error_kind": self.kind(),
            "component": self.component,
            "message": self.source.to_string(),
            "detail": self.source.detail(),
        });
        if !self.diagnostics.is_empty() {
            payload["diagnostics"] = serde_json::json!(self.diagnostics);
        }
        payload
    }
}

/// Errors from the artifact storage collaborator.
///
/// The collaborator decides which failures are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("permanent storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Errors from the status event channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("event channel unavailable: {0}")]
    Unavailable(String),

    #[error("event rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error("engine path not configured (set engine.path or TASKBRIDGE_ENGINE_PATH)")]
    EngineNotConfigured,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_serialize_under_their_public_names() {
        let s = serde_json::to_string(&ErrorKind::EngineExecutionError).unwrap();
        assert_eq!(s, "\"EngineExecutionError\"");
        assert_eq!(ErrorKind::CancelledError.to_string(), "CancelledError");
    }

    #[test]
    fn task_error_payload_carries_kind_component_and_message() {
        let err = TaskError::new(
            &TaskId::new("t1"),
            Component::ProcessRunner,
            AdapterError::EngineExecution {
                exit_code: Some(2),
                timed_out: false,
                diagnostics: "bad config".to_string(),
            },
        );
        let payload = err.payload();
        assert_eq!(payload["error_kind"], "EngineExecutionError");
        assert_eq!(payload["component"], "ProcessRunner");
        assert_eq!(payload["detail"]["exit_code"], 2);
        assert!(payload["message"].as_str().unwrap().contains("bad config"));
        assert!(payload.get("diagnostics").is_none());
        assert!(err.to_string().starts_with("[ProcessRunner] task t1:"));
    }

    #[test]
    fn cancelled_is_distinct_from_engine_failure() {
        let cancelled = AdapterError::Cancelled {
            phase: TaskState::Running,
        };
        assert_eq!(cancelled.kind(), ErrorKind::CancelledError);
        assert_eq!(cancelled.to_string(), "task cancelled while running");
    }

    #[test]
    fn only_transient_storage_errors_are_retryable() {
        assert!(StorageError::Transient("timeout".into()).is_retryable());
        assert!(!StorageError::Permanent("not found".into()).is_retryable());
    }
}
