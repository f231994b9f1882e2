//! Shared fixtures for the integration tests: script engines, a counting
//! store and sinks that misbehave on purpose.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taskbridge_core::domain::{StatusEvent, TaskMessage};
use taskbridge_core::error::{SinkError, StorageError};
use taskbridge_core::impls::{InMemoryEventSink, LocalArtifactStore};
use taskbridge_core::ports::{ArtifactStore, EventSink};
use taskbridge_core::retry::RetryPolicy;
use taskbridge_core::{AdapterConfig, TaskAdapter};
use tempfile::TempDir;

/// Argument parsing every script engine starts with. Sets `$out`, `$cfg`
/// and `$inputs` (space separated).
const PRELUDE: &str = r#"out=""; cfg=""; inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --config) cfg="$2"; shift 2 ;;
    --input) inputs="$inputs $2"; shift 2 ;;
    *) shift ;;
  esac
done"#;

/// Writes an executable shell engine that records each launch.
pub fn script_engine(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("engine.sh");
    let launched = dir.join("launched");
    let script = format!(
        "#!/bin/sh\necho launch >> '{}'\n{PRELUDE}\n{body}\n",
        launched.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Local store that counts calls.
pub struct CountingStore {
    inner: LocalArtifactStore,
    pub downloads: AtomicUsize,
    pub uploads: AtomicUsize,
}

impl CountingStore {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalArtifactStore::new(root),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.downloads.load(Ordering::SeqCst) + self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for CountingStore {
    async fn download(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download(reference, dest_dir).await
    }

    async fn upload(&self, local_path: &Path, suggested_key: &str) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(local_path, suggested_key).await
    }
}

/// Event channel that is always down.
#[derive(Default)]
pub struct DownSink {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl EventSink for DownSink {
    async fn publish(&self, _event: &StatusEvent) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("broker unreachable".into()))
    }
}

/// One temp tree per test: storage, workspaces and the engine script.
pub struct Fixture {
    pub root: TempDir,
    pub storage: PathBuf,
    pub workspaces: PathBuf,
    pub store: Arc<CountingStore>,
    pub sink: Arc<InMemoryEventSink>,
    pub config: AdapterConfig,
}

impl Fixture {
    pub fn new(engine_body: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let storage = root.path().join("storage");
        let workspaces = root.path().join("workspaces");
        std::fs::create_dir_all(&storage).unwrap();

        let mut config = AdapterConfig::default();
        config.engine.path = Some(script_engine(root.path(), engine_body));
        config.engine.timeout_secs = 20;
        config.workspace.root = Some(workspaces.clone());
        config.storage.root = storage.clone();
        config.retry = RetryPolicy::new(3, Duration::from_millis(5), 2.0);
        config.reporter.terminal_attempts = 3;

        Self {
            store: Arc::new(CountingStore::new(&storage)),
            sink: Arc::new(InMemoryEventSink::new()),
            root,
            storage,
            workspaces,
            config,
        }
    }

    pub fn adapter(&self) -> TaskAdapter {
        self.adapter_with_sink(self.sink.clone())
    }

    pub fn adapter_with_sink(&self, sink: Arc<dyn EventSink>) -> TaskAdapter {
        TaskAdapter::new(&self.config, self.store.clone(), sink).unwrap()
    }

    /// Puts an artifact into storage under `reference`.
    pub fn put(&self, reference: &str, body: &str) {
        let path = self.storage.join(reference);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    pub fn launches(&self) -> usize {
        std::fs::read_to_string(self.root.path().join("launched"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(&self.workspaces)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn marker(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}

pub fn message(value: serde_json::Value) -> TaskMessage {
    serde_json::from_value(value).unwrap()
}
