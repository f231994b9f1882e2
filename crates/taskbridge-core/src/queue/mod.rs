//! Queue module: the consumer-side view of the task broker.
//!
//! Delivery is at-least-once. A leased message must be settled with `ack`
//! or `nack`; an unsettled delivery that is dropped (worker panic, aborted
//! slot) goes back to the queue, just like an expired broker lease.

mod memory;

pub use memory::InMemoryQueue;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("unknown delivery {0}")]
    UnknownDelivery(u64),
}

/// One leased message.
///
/// Design intent:
/// - The body is raw bytes. Decoding is the adapter's job, so a malformed
///   message still produces a `failed` event instead of vanishing here.
/// - Settling consumes the delivery; it cannot be settled twice.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &[u8];

    /// 1 on first delivery, incremented on each redelivery.
    fn delivery_count(&self) -> u32;

    /// Processing finished; drop the message.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Processing did not finish. With `requeue` the message is delivered
    /// again (up to the queue's redelivery cap), otherwise dead-lettered.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;
}

/// Queue port. The in-memory implementation backs tests and the local CLI;
/// a broker client implements the same trait.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, message: Vec<u8>) -> Result<(), QueueError>;

    /// Waits for the next message. `None` once the queue is closed and
    /// drained.
    async fn lease(&self) -> Option<Box<dyn Delivery>>;

    async fn counts(&self) -> QueueCounts;
}

/// Snapshot of message states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub ready: usize,
    pub in_flight: usize,
    pub acked: usize,
    pub dead_lettered: usize,
}
