//! JsonLinesEventSink - appends one JSON object per event to a file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::StatusEvent;
use crate::error::SinkError;
use crate::ports::EventSink;

pub struct JsonLinesEventSink {
    path: PathBuf,
    // serializes appends so lines from concurrent tasks never interleave
    lock: Mutex<()>,
}

impl JsonLinesEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for JsonLinesEventSink {
    async fn publish(&self, event: &StatusEvent) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_vec(event).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", self.path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunId, TaskId, TaskState};
    use chrono::Utc;
    use ulid::Ulid;

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesEventSink::new(dir.path().join("events.jsonl"));

        for (sequence, state) in [TaskState::Queued, TaskState::Validating].into_iter().enumerate() {
            let event = StatusEvent {
                task_id: TaskId::new("t1"),
                run_id: RunId::from_ulid(Ulid::new()),
                sequence: sequence as u64,
                state,
                timestamp: Utc::now(),
                message: None,
                payload: None,
            };
            sink.publish(&event).await.unwrap();
        }

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["state"], "validating");
    }
}
