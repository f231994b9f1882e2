//! Worker group: N execution slots consuming one queue.
//!
//! Each slot runs one task instance at a time. Slots share nothing but the
//! queue, the adapter (immutable) and the cancellation registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::pipeline::{TaskAdapter, TaskOutcome, parse_message};
use crate::queue::{Delivery, Queue};

/// In-flight task instances by task id, for external revocation.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next: AtomicU64,
    tokens: Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new instance of `task_id`. The registration ends when the
    /// returned guard is dropped.
    pub fn register(&self, task_id: &str) -> Registration {
        let id = self.inner.next.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner
            .tokens
            .lock()
            .entry(task_id.to_string())
            .or_default()
            .push((id, token.clone()));
        Registration {
            registry: self.clone(),
            task_id: task_id.to_string(),
            id,
            token,
        }
    }

    /// Cancels every in-flight instance of `task_id`. Returns how many
    /// were signalled.
    pub fn revoke(&self, task_id: &str) -> usize {
        let tokens = self.inner.tokens.lock();
        let Some(entries) = tokens.get(task_id) else {
            return 0;
        };
        for (_, token) in entries {
            token.cancel();
        }
        tracing::info!(task_id, instances = entries.len(), "task revoked");
        entries.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tokens.lock().values().map(Vec::len).sum()
    }

    fn remove(&self, task_id: &str, id: u64) {
        let mut tokens = self.inner.tokens.lock();
        if let Some(entries) = tokens.get_mut(task_id) {
            entries.retain(|(entry, _)| *entry != id);
            if entries.is_empty() {
                tokens.remove(task_id);
            }
        }
    }
}

/// A live registration; unregisters on drop.
pub struct Registration {
    registry: CancellationRegistry,
    task_id: String,
    id: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.task_id, self.id);
    }
}

/// Worker group handle.
/// - `request_shutdown` stops taking new leases; in-flight tasks finish.
/// - `shutdown_and_join` waits for every slot to exit.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    registry: CancellationRegistry,
}

impl WorkerGroup {
    /// Spawn `n` slots.
    pub fn spawn(n: usize, queue: Arc<dyn Queue>, adapter: Arc<TaskAdapter>) -> Self {
        let registry = CancellationRegistry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for slot in 0..n {
            let q = Arc::clone(&queue);
            let a = Arc::clone(&adapter);
            let r = registry.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(
                async move { worker_loop(q, a, r, &mut rx).await }
                    .instrument(tracing::info_span!("worker", slot)),
            );
            joins.push(join);
        }

        Self {
            shutdown_tx,
            joins,
            registry,
        }
    }

    /// Cancels the in-flight instance(s) of `task_id`.
    pub fn revoke(&self, task_id: &str) -> usize {
        self.registry.revoke(task_id)
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }

    /// Waits for every slot to exit on its own (e.g. the queue was closed).
    pub async fn join(self) {
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "worker slot panicked");
            }
        }
    }
}

async fn worker_loop(
    queue: Arc<dyn Queue>,
    adapter: Arc<TaskAdapter>,
    registry: CancellationRegistry,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let delivery = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = queue.lease() => delivery,
        };
        let Some(delivery) = delivery else {
            // queue closed and drained
            break;
        };

        let body = delivery.message().to_vec();
        let outcome = run_delivery(&adapter, &registry, &body, delivery.delivery_count()).await;
        settle(delivery, &outcome).await;
    }
}

async fn run_delivery(
    adapter: &TaskAdapter,
    registry: &CancellationRegistry,
    body: &[u8],
    delivery_count: u32,
) -> TaskOutcome {
    let task_id = parse_message(body)
        .ok()
        .and_then(|m| m.task_id_hint())
        .unwrap_or_default();
    tracing::debug!(task_id = %task_id, delivery_count, "message leased");

    let registration = registry.register(&task_id);
    adapter.handle_raw(body, registration.token()).await
}

/// Acks once the caller has seen the terminal event; otherwise the broker
/// must redeliver so the task reaches its caller eventually.
async fn settle(delivery: Box<dyn Delivery>, outcome: &TaskOutcome) {
    let result = if outcome.terminal_delivered {
        delivery.ack().await
    } else {
        tracing::warn!(run_id = %outcome.run_id, "terminal event undelivered, requeueing");
        delivery.nack(true).await
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrations_are_removed_on_drop() {
        let registry = CancellationRegistry::new();
        let a = registry.register("t1");
        let b = registry.register("t1");
        assert_eq!(registry.in_flight(), 2);

        drop(a);
        assert_eq!(registry.in_flight(), 1);
        assert_eq!(registry.revoke("t1"), 1);
        assert!(b.token().is_cancelled());

        drop(b);
        assert_eq!(registry.in_flight(), 0);
        assert_eq!(registry.revoke("t1"), 0);
    }

    #[test]
    fn revoke_only_touches_the_named_task() {
        let registry = CancellationRegistry::new();
        let t1 = registry.register("t1");
        let t2 = registry.register("t2");

        registry.revoke("t1");

        assert!(t1.token().is_cancelled());
        assert!(!t2.token().is_cancelled());
    }
}
