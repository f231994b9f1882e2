//! In-memory queue implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Delivery, Queue, QueueCounts, QueueError};

const DEFAULT_MAX_DELIVERIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    Ready,
    InFlight,
    DeadLettered,
}

struct Record {
    body: Vec<u8>,
    deliveries: u32,
    state: MessageState,
}

/// In-memory queue state.
///
/// Guarded by a synchronous mutex: no lock is ever held across an await,
/// and `Drop` of a delivery needs to requeue without an executor.
struct QueueState {
    /// Messages not yet acked (single source of truth). Acked records are
    /// dropped and only counted.
    records: HashMap<u64, Record>,
    acked: usize,

    /// Ready queue (ids only), FIFO.
    ready: VecDeque<u64>,

    next_id: u64,
    max_deliveries: u32,
    closed: bool,
}

impl QueueState {
    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            acked: self.acked,
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                MessageState::Ready => counts.ready += 1,
                MessageState::InFlight => counts.in_flight += 1,
                MessageState::DeadLettered => counts.dead_lettered += 1,
            }
        }
        counts
    }

    /// Returns true when the message went back to the ready queue.
    fn release(&mut self, id: u64, requeue: bool) -> Result<bool, QueueError> {
        let max_deliveries = self.max_deliveries;
        let record = self
            .records
            .get_mut(&id)
            .ok_or(QueueError::UnknownDelivery(id))?;
        if requeue && record.deliveries < max_deliveries {
            record.state = MessageState::Ready;
            self.ready.push_back(id);
            Ok(true)
        } else {
            tracing::warn!(
                delivery = id,
                deliveries = record.deliveries,
                "message dead-lettered"
            );
            record.state = MessageState::DeadLettered;
            Ok(false)
        }
    }
}

/// At-least-once queue with a redelivery cap.
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERIES)
    }
}

impl InMemoryQueue {
    /// `max_deliveries` bounds how often one message is handed out.
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                records: HashMap::new(),
                acked: 0,
                ready: VecDeque::new(),
                next_id: 1,
                max_deliveries: max_deliveries.max(1),
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Stops accepting messages. Waiting `lease` calls return `None` once
    /// the ready queue is drained.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Bodies of dead-lettered messages, oldest first.
    pub fn dead_letters(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock();
        let mut dead: Vec<_> = state
            .records
            .iter()
            .filter(|(_, r)| r.state == MessageState::DeadLettered)
            .map(|(id, r)| (*id, r.body.clone()))
            .collect();
        dead.sort_by_key(|(id, _)| *id);
        dead.into_iter().map(|(_, body)| body).collect()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(&self, message: Vec<u8>) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let id = state.next_id;
            state.next_id += 1;
            state.records.insert(
                id,
                Record {
                    body: message,
                    deliveries: 0,
                    state: MessageState::Ready,
                },
            );
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn lease(&self) -> Option<Box<dyn Delivery>> {
        loop {
            // Register interest before looking, so a notify between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                while let Some(id) = state.ready.pop_front() {
                    if let Some(record) = state.records.get_mut(&id)
                        && record.state == MessageState::Ready
                    {
                        record.state = MessageState::InFlight;
                        record.deliveries += 1;
                        return Some(Box::new(InMemoryDelivery {
                            id,
                            body: record.body.clone(),
                            delivery_count: record.deliveries,
                            queue: Arc::clone(&self.state),
                            notify: Arc::clone(&self.notify),
                            settled: false,
                        }));
                    }
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    async fn counts(&self) -> QueueCounts {
        self.state.lock().counts()
    }
}

struct InMemoryDelivery {
    id: u64,
    body: Vec<u8>,
    delivery_count: u32,
    queue: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    settled: bool,
}

impl InMemoryDelivery {
    fn release(&mut self, requeue: bool) -> Result<(), QueueError> {
        self.settled = true;
        let requeued = self.queue.lock().release(self.id, requeue)?;
        if requeued {
            self.notify.notify_one();
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &[u8] {
        &self.body
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn ack(mut self: Box<Self>) -> Result<(), QueueError> {
        self.settled = true;
        let mut state = self.queue.lock();
        state
            .records
            .remove(&self.id)
            .ok_or(QueueError::UnknownDelivery(self.id))?;
        state.acked += 1;
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        self.release(requeue)
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(delivery = self.id, "delivery dropped unsettled, requeueing");
            if let Err(e) = self.release(true) {
                tracing::error!(error = %e, "requeue on drop failed");
            }
        }
    }
}
