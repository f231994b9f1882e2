//! Outbound status events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RunId, TaskId};
use super::state::TaskState;

/// A timestamped progress record for one task instance.
///
/// `sequence` starts at 0 for each run and increases by one per event, so a
/// consumer can detect gaps left by dropped best-effort events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub sequence: u64,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
