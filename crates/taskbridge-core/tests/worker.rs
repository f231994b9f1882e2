//! Worker group against the in-memory queue.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use taskbridge_core::domain::TaskState;
use taskbridge_core::queue::{InMemoryQueue, Queue, QueueCounts};
use taskbridge_core::worker::WorkerGroup;

use common::{DownSink, Fixture};

fn body(task_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({ "task_id": task_id, "user_id": "u1", "parameters": {} })).unwrap()
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slots_drain_the_queue_and_ack_every_message() {
    let fx = Fixture::new(r#"echo ok > "$out/result.csv""#);
    let queue = Arc::new(InMemoryQueue::default());
    for i in 0..4 {
        queue.enqueue(body(&format!("t{i}"))).await.unwrap();
    }
    queue.close();

    let group = WorkerGroup::spawn(2, queue.clone(), Arc::new(fx.adapter()));
    tokio::time::timeout(Duration::from_secs(30), group.join())
        .await
        .unwrap();

    assert_eq!(
        queue.counts().await,
        QueueCounts {
            ready: 0,
            in_flight: 0,
            acked: 4,
            dead_lettered: 0,
        }
    );
    assert_eq!(fx.launches(), 4);
    let succeeded = fx
        .sink
        .events()
        .iter()
        .filter(|e| e.state == TaskState::Succeeded)
        .count();
    assert_eq!(succeeded, 4);
    assert_eq!(fx.leftover_workspaces(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn revoking_a_task_cancels_its_engine() {
    let fx = Fixture::new("sleep 60");
    let queue = Arc::new(InMemoryQueue::default());
    queue.enqueue(body("t-long")).await.unwrap();

    let group = WorkerGroup::spawn(1, queue.clone(), Arc::new(fx.adapter()));
    wait_for(|| fx.launches() == 1).await;

    assert_eq!(group.revoke("t-long"), 1);
    assert_eq!(group.revoke("t-other"), 0);

    wait_for(|| fx.sink.events().iter().any(|e| e.is_terminal())).await;
    let last = fx.sink.events().pop().unwrap();
    assert_eq!(last.state, TaskState::Failed);
    assert_eq!(last.payload.unwrap()["error_kind"], "CancelledError");

    queue.close();
    group.join().await;
    assert_eq!(queue.counts().await.acked, 1);
    assert_eq!(fx.leftover_workspaces(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undelivered_terminal_event_is_redelivered_then_dead_lettered() {
    let fx = Fixture::new(r#"echo ok > "$out/result.csv""#);
    let queue = Arc::new(InMemoryQueue::new(2));
    queue.enqueue(body("t1")).await.unwrap();
    queue.close();

    let adapter = fx.adapter_with_sink(Arc::new(DownSink::default()));
    let group = WorkerGroup::spawn(1, queue.clone(), Arc::new(adapter));
    tokio::time::timeout(Duration::from_secs(30), group.join())
        .await
        .unwrap();

    assert_eq!(fx.launches(), 2);
    let counts = queue.counts().await;
    assert_eq!(counts.acked, 0);
    assert_eq!(counts.dead_lettered, 1);
    assert_eq!(queue.dead_letters(), vec![body("t1")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_lets_the_running_task_finish_and_leaves_the_rest_queued() {
    let fx = Fixture::new(r#"sleep 1; echo ok > "$out/result.csv""#);
    let queue = Arc::new(InMemoryQueue::default());
    queue.enqueue(body("t-first")).await.unwrap();
    queue.enqueue(body("t-second")).await.unwrap();

    let group = WorkerGroup::spawn(1, queue.clone(), Arc::new(fx.adapter()));
    wait_for(|| fx.launches() == 1).await;
    tokio::time::timeout(Duration::from_secs(30), group.shutdown_and_join())
        .await
        .unwrap();

    assert_eq!(fx.launches(), 1);
    let counts = queue.counts().await;
    assert_eq!(counts.acked, 1);
    assert_eq!(counts.ready, 1);
    let last = fx.sink.events().pop().unwrap();
    assert_eq!(last.state, TaskState::Succeeded);
    assert_eq!(last.task_id.as_str(), "t-first");
}
