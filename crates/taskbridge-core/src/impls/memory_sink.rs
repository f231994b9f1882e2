//! InMemoryEventSink - keeps published events in order.
//!
//! Used by the CLI when no event file is given, and by tests that assert on
//! the full event sequence.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::StatusEvent;
use crate::error::SinkError;
use crate::ports::EventSink;

#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: &StatusEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
