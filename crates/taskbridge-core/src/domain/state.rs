//! Task state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one task instance.
///
/// State transitions (strictly forward, nothing is revisited):
/// - Queued -> Validating -> Staging -> Running -> Collecting -> Uploading -> Succeeded
/// - any non-terminal state -> Failed
///
/// Declaration order is the lifecycle order; `Ord` relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Message received, nothing done yet.
    Queued,

    /// PayloadValidator is checking the message.
    Validating,

    /// InputStager is materializing inputs into the workspace.
    Staging,

    /// The external engine is running.
    Running,

    /// Engine finished; output files are being enumerated and classified.
    Collecting,

    /// Output artifacts are being uploaded to storage.
    Uploading,

    /// Terminal: outputs were uploaded.
    Succeeded,

    /// Terminal: some phase failed or the task was cancelled.
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::Queued,
        TaskState::Validating,
        TaskState::Staging,
        TaskState::Running,
        TaskState::Collecting,
        TaskState::Uploading,
        TaskState::Succeeded,
        TaskState::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Failure is reachable from every non-terminal state. Success is only
    /// reachable from `Uploading`. Otherwise the lifecycle advances one step
    /// at a time.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskState::Failed => true,
            TaskState::Succeeded => self == TaskState::Uploading,
            _ => self.successor() == Some(next),
        }
    }

    fn successor(self) -> Option<TaskState> {
        match self {
            TaskState::Queued => Some(TaskState::Validating),
            TaskState::Validating => Some(TaskState::Staging),
            TaskState::Staging => Some(TaskState::Running),
            TaskState::Running => Some(TaskState::Collecting),
            TaskState::Collecting => Some(TaskState::Uploading),
            TaskState::Uploading => Some(TaskState::Succeeded),
            TaskState::Succeeded | TaskState::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Validating => "validating",
            TaskState::Staging => "staging",
            TaskState::Running => "running",
            TaskState::Collecting => "collecting",
            TaskState::Uploading => "uploading",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
