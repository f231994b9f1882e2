//! InputStager - materializes input references into the workspace.
//!
//! # Design
//! - Downloads run concurrently up to `parallelism`, but results come back
//!   in request order (`buffered`, not `buffer_unordered`).
//! - Each download has its own retry budget. One flaky artifact never
//!   restarts the others.
//! - No inputs means no storage calls at all.
//! - The quota is checked as downloads complete; the first input that
//!   pushes the total over the limit stops the remaining transfers.

use std::pin::pin;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;

use super::workspace::Workspace;
use crate::config::StagingConfig;
use crate::domain::{ArtifactRole, InputRef, StagedInput, TaskRequest, TaskState};
use crate::error::{AdapterError, Component, StorageError, TaskError};
use crate::ports::ArtifactStore;
use crate::retry::{RetryPolicy, retry_transient};

pub struct InputStager {
    store: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    parallelism: usize,
    max_total_bytes: u64,
}

impl InputStager {
    pub fn new(store: Arc<dyn ArtifactStore>, retry: RetryPolicy, staging: &StagingConfig) -> Self {
        Self {
            store,
            retry,
            parallelism: staging.parallelism.max(1),
            max_total_bytes: staging.max_total_bytes,
        }
    }

    pub async fn stage(
        &self,
        request: &TaskRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Vec<StagedInput>, TaskError> {
        let fail = |source| TaskError::new(request.task_id(), Component::InputStager, source);

        if request.inputs().is_empty() {
            return Ok(Vec::new());
        }

        // Built up front so the stage future stays `Send`.
        let pending: Vec<_> = request
            .inputs()
            .iter()
            .enumerate()
            .map(|(index, input)| self.stage_one(index, input, workspace))
            .collect();

        let downloads = async {
            let mut completed = pin!(stream::iter(pending).buffered(self.parallelism));
            let mut staged = Vec::with_capacity(request.inputs().len());
            let mut total = 0u64;
            while let Some(input) = completed.try_next().await? {
                total += input.size_bytes;
                if self.max_total_bytes > 0 && total > self.max_total_bytes {
                    return Err(AdapterError::input(
                        "*",
                        format!(
                            "quota exceeded: staged {total} bytes, limit is {} bytes",
                            self.max_total_bytes
                        ),
                    ));
                }
                staged.push(input);
            }
            Ok((staged, total))
        };

        let (staged, total) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(fail(AdapterError::Cancelled { phase: TaskState::Staging }));
            }
            staged = downloads => staged.map_err(fail)?,
        };

        tracing::info!(inputs = staged.len(), total_bytes = total, "inputs staged");
        Ok(staged)
    }

    async fn stage_one(
        &self,
        index: usize,
        input: &InputRef,
        workspace: &Workspace,
    ) -> Result<StagedInput, AdapterError> {
        let slot = workspace.input_slot(index);
        let reference = input.reference.as_str();

        let path = retry_transient(&self.retry, StorageError::is_retryable, |attempt| {
            tracing::debug!(reference, attempt, "downloading input");
            self.store.download(reference, &slot)
        })
        .await
        .map_err(|(err, attempts)| {
            tracing::warn!(reference, attempts, error = %err, "input download failed");
            AdapterError::input(reference, describe(&err, attempts))
        })?;

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AdapterError::input(reference, format!("staged file unreadable: {e}")))?
            .len();

        let role = input
            .role
            .clone()
            .unwrap_or_else(|| ArtifactRole::infer_input(&path));

        Ok(StagedInput {
            reference: reference.to_string(),
            path,
            role,
            size_bytes,
        })
    }
}

fn describe(err: &StorageError, attempts: u32) -> String {
    if attempts > 1 {
        format!("{err} (gave up after {attempts} attempts)")
    } else {
        err.to_string()
    }
}
