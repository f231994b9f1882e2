//! Inbound task message and the validated request derived from it.
//!
//! `TaskMessage` mirrors the wire record one-to-one and keeps every field
//! optional so that a malformed message still deserializes and the validator
//! can name exactly what is missing. `TaskRequest` is the immutable,
//! validated form the rest of the pipeline consumes.

use serde::{Deserialize, Serialize};

use super::artifact::ArtifactRole;
use super::ids::{TaskId, UserId};

/// Raw queue message as delivered by the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(default)]
    pub task_id: Option<serde_json::Value>,

    #[serde(default)]
    pub user_id: Option<serde_json::Value>,

    #[serde(default)]
    pub inputs: Option<serde_json::Value>,

    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl TaskMessage {
    /// Best-effort task id for reporting, even when the message is invalid.
    pub fn task_id_hint(&self) -> Option<String> {
        match &self.task_id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One referenced input artifact.
///
/// On the wire this is either a bare string or
/// `{"reference": "...", "role": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ArtifactRole>,
}

impl InputRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: ArtifactRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Validated task request. Immutable once built by the validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRequest {
    task_id: TaskId,
    user_id: UserId,
    inputs: Vec<InputRef>,
    parameters: serde_json::Map<String, serde_json::Value>,
}

impl TaskRequest {
    pub(crate) fn new(
        task_id: TaskId,
        user_id: UserId,
        inputs: Vec<InputRef>,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            user_id,
            inputs,
            parameters,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn inputs(&self) -> &[InputRef] {
        &self.inputs
    }

    pub fn parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_with_missing_fields_still_deserializes() {
        let msg: TaskMessage = serde_json::from_value(json!({ "user_id": "u1" })).unwrap();
        assert!(msg.task_id.is_none());
        assert_eq!(msg.user_id, Some(json!("u1")));
    }

    #[test]
    fn task_id_hint_ignores_blank_values() {
        let msg = TaskMessage {
            task_id: Some(json!("  ")),
            ..Default::default()
        };
        assert_eq!(msg.task_id_hint(), None);

        let msg = TaskMessage {
            task_id: Some(json!(" t1 ")),
            ..Default::default()
        };
        assert_eq!(msg.task_id_hint().as_deref(), Some("t1"));
    }
}
