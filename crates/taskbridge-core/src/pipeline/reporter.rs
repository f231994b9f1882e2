//! StatusReporter - publishes the lifecycle of one task instance.
//!
//! One reporter per run. It owns the sequence counter and the last state,
//! which makes the ordering invariant local: events leave in strictly
//! increasing state order, and at most one of them is terminal.
//!
//! Delivery policy:
//! - Progress events are best-effort. A failed publish is logged and dropped.
//! - The terminal event is retried with backoff. If it still cannot be
//!   delivered the caller learns so through `TerminalReport::delivered`.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{RunId, StatusEvent, TaskId, TaskState};
use crate::error::SinkError;
use crate::ports::{Clock, EventSink};
use crate::retry::{RetryPolicy, retry_transient};

/// A transition the lifecycle does not allow. Always a bug in the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from:?} -> {to}")]
    Illegal {
        from: Option<TaskState>,
        to: TaskState,
    },

    #[error("terminal event already emitted ({0})")]
    AlreadyTerminal(TaskState),
}

/// Result of publishing the terminal event.
#[derive(Debug, Clone)]
pub struct TerminalReport {
    pub event: StatusEvent,
    pub delivered: bool,
}

pub struct StatusReporter {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    terminal_retry: RetryPolicy,
    task_id: TaskId,
    run_id: RunId,
    last: Option<TaskState>,
    next_sequence: u64,
}

impl StatusReporter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        terminal_retry: RetryPolicy,
        task_id: TaskId,
        run_id: RunId,
    ) -> Self {
        Self {
            sink,
            clock,
            terminal_retry,
            task_id,
            run_id,
            last: None,
            next_sequence: 0,
        }
    }

    /// The task id events are published under. It can change once, when
    /// validation replaces the raw hint with the validated id.
    pub fn set_task_id(&mut self, task_id: TaskId) {
        self.task_id = task_id;
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Publishes a non-terminal state change, best-effort.
    pub async fn progress(
        &mut self,
        state: TaskState,
        message: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<(), TransitionError> {
        if state.is_terminal() {
            return Err(TransitionError::Illegal {
                from: self.last,
                to: state,
            });
        }
        let event = self.advance(state, message, payload)?;
        if let Err(err) = self.sink.publish(&event).await {
            tracing::warn!(state = %state, error = %err, "progress event dropped");
        }
        Ok(())
    }

    /// Publishes the terminal event, retrying while the channel is
    /// unavailable.
    pub async fn terminal(
        &mut self,
        state: TaskState,
        message: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<TerminalReport, TransitionError> {
        if !state.is_terminal() {
            return Err(TransitionError::Illegal {
                from: self.last,
                to: state,
            });
        }
        let event = self.advance(state, message, payload)?;

        let sink = &self.sink;
        let delivered = match retry_transient(&self.terminal_retry, SinkError::is_retryable, |_| {
            sink.publish(&event)
        })
        .await
        {
            Ok(()) => true,
            Err((err, attempts)) => {
                tracing::error!(state = %state, attempts, error = %err, "terminal event not delivered");
                false
            }
        };

        Ok(TerminalReport { event, delivered })
    }

    fn advance(
        &mut self,
        state: TaskState,
        message: Option<String>,
        payload: Option<serde_json::Value>,
    ) -> Result<StatusEvent, TransitionError> {
        match self.last {
            Some(last) if last.is_terminal() => return Err(TransitionError::AlreadyTerminal(last)),
            Some(last) if !last.can_transition_to(state) => {
                return Err(TransitionError::Illegal {
                    from: Some(last),
                    to: state,
                });
            }
            None if state != TaskState::Queued => {
                return Err(TransitionError::Illegal {
                    from: None,
                    to: state,
                });
            }
            _ => {}
        }

        let event = StatusEvent {
            task_id: self.task_id.clone(),
            run_id: self.run_id,
            sequence: self.next_sequence,
            state,
            timestamp: self.clock.now(),
            message,
            payload,
        };
        self.last = Some(state);
        self.next_sequence += 1;
        Ok(event)
    }
}
