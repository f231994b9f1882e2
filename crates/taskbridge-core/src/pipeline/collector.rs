//! OutputCollector - discovers engine outputs and uploads them.
//!
//! Collection is split in two so the adapter can report the `collecting`
//! and `uploading` states separately:
//! - [`OutputCollector::enumerate`] walks the output directory.
//! - [`OutputCollector::upload`] pushes each artifact to storage.
//!
//! After a failed run the output directory is only inspected
//! ([`OutputCollector::inspect_diagnostics`]); nothing is uploaded.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::domain::{ArtifactRole, DiagnosticFile, OutputArtifact, RunId, TaskRequest, TaskState};
use crate::error::{AdapterError, Component, StorageError, TaskError};
use crate::ports::ArtifactStore;
use crate::retry::{RetryPolicy, retry_transient};

/// Bytes kept from the end of a textual diagnostic file.
const EXCERPT_BYTES: u64 = 2048;

pub struct OutputCollector {
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
}

impl OutputCollector {
    pub fn new(store: Arc<dyn ArtifactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Lists every regular file under `output_dir`, sorted by relative name.
    ///
    /// A missing or unreadable directory after a successful run means the
    /// engine broke its contract.
    pub async fn enumerate(
        &self,
        request: &TaskRequest,
        output_dir: &Path,
    ) -> Result<Vec<OutputArtifact>, TaskError> {
        let files = walk(output_dir).await.map_err(|e| {
            TaskError::new(
                request.task_id(),
                Component::OutputCollector,
                AdapterError::output(format!(
                    "output directory {} unreadable: {e}",
                    output_dir.display()
                )),
            )
        })?;

        let artifacts: Vec<_> = files
            .into_iter()
            .map(|file| OutputArtifact {
                role: ArtifactRole::classify_output(&file.path),
                name: file.name,
                size_bytes: file.size_bytes,
                local_path: file.path,
                destination_key: None,
            })
            .collect();

        tracing::info!(outputs = artifacts.len(), "outputs collected");
        Ok(artifacts)
    }

    /// Uploads artifacts one by one, each with its own retry budget.
    ///
    /// Keys are suggested as `<user>/<task>/<run>/<name>`; the store may
    /// pick a different one, which is what gets recorded.
    pub async fn upload(
        &self,
        request: &TaskRequest,
        run_id: RunId,
        artifacts: Vec<OutputArtifact>,
        cancel: &CancellationToken,
    ) -> Result<Vec<OutputArtifact>, TaskError> {
        let fail = |source| TaskError::new(request.task_id(), Component::OutputCollector, source);

        let mut uploaded = Vec::with_capacity(artifacts.len());
        for mut artifact in artifacts {
            let suggested = format!(
                "{}/{}/{}/{}",
                request.user_id(),
                request.task_id(),
                run_id,
                artifact.name
            );

            let upload = retry_transient(&self.retry, StorageError::is_retryable, |attempt| {
                tracing::debug!(name = %artifact.name, attempt, "uploading output");
                self.store.upload(&artifact.local_path, &suggested)
            });
            let key = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(fail(AdapterError::Cancelled { phase: TaskState::Uploading }));
                }
                key = upload => key.map_err(|(err, attempts)| {
                    tracing::warn!(name = %artifact.name, attempts, error = %err, "upload failed");
                    fail(AdapterError::output(format!(
                        "upload of `{}` failed after {attempts} attempt(s): {err}",
                        artifact.name
                    )))
                })?,
            };

            if key.trim().is_empty() {
                return Err(fail(AdapterError::output(format!(
                    "storage returned an empty key for `{}`",
                    artifact.name
                ))));
            }
            artifact.destination_key = Some(key);
            uploaded.push(artifact);
        }
        Ok(uploaded)
    }

    /// Lists whatever a failed run left behind, quoting the tail of textual
    /// files. Never fails: diagnostics are a courtesy.
    pub async fn inspect_diagnostics(&self, output_dir: &Path) -> Vec<DiagnosticFile> {
        let files = match walk(output_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(error = %e, "no diagnostics available");
                return Vec::new();
            }
        };

        let mut diagnostics = Vec::with_capacity(files.len());
        for file in files {
            let excerpt = if ArtifactRole::classify_output(&file.path).is_textual() {
                tail(&file.path, EXCERPT_BYTES).await.ok()
            } else {
                None
            };
            diagnostics.push(DiagnosticFile {
                name: file.name,
                size_bytes: file.size_bytes,
                excerpt,
            });
        }
        diagnostics
    }
}

struct FoundFile {
    name: String,
    path: PathBuf,
    size_bytes: u64,
}

/// Recursive listing of regular files. Symlinks are skipped so an engine
/// cannot point the uploader outside its workspace.
async fn walk(root: &Path) -> io::Result<Vec<FoundFile>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let size_bytes = entry.metadata().await?.len();
                found.push(FoundFile {
                    name: relative_name(root, &path),
                    path,
                    size_bytes,
                });
            }
        }
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn tail(path: &Path, max_bytes: u64) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    file.seek(io::SeekFrom::Start(len.saturating_sub(max_bytes)))
        .await?;
    let mut buf = Vec::with_capacity(max_bytes.min(len) as usize);
    file.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
