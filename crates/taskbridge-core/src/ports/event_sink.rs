//! EventSink port - the caller's status event channel.

use async_trait::async_trait;

use crate::domain::StatusEvent;
use crate::error::SinkError;

/// Publishes status events.
///
/// Implementations deliver each call at most once; retrying is the
/// reporter's decision.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &StatusEvent) -> Result<(), SinkError>;
}
