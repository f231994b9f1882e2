//! TaskAdapter - one queue message in, exactly one terminal event out.
//!
//! # State machine
//! ```text
//! queued -> validating -> staging -> running -> collecting -> uploading -> succeeded
//!    \___________\____________\__________\____________\____________\_____-> failed
//! ```
//!
//! # Design
//! - Components return `TaskError`; the adapter is the only place that
//!   turns one into a `failed` event.
//! - The adapter never retries a phase. Whole-task retry is the broker's
//!   redelivery, and every delivery is a fresh run with its own `RunId`.
//! - The workspace lives inside [`TaskAdapter::drive`], so it is removed on
//!   every exit path, including `?` early returns and a dropped future.
//! - Log context is a `task` span built from the explicit `TaskContext`,
//!   never from globals.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::collector::OutputCollector;
use super::reporter::{StatusReporter, TerminalReport, TransitionError};
use super::runner::ProcessRunner;
use super::stager::InputStager;
use super::validator;
use super::workspace::Workspace;
use crate::config::AdapterConfig;
use crate::domain::{OutputArtifact, ProcessResult, RunId, StatusEvent, TaskId, TaskMessage, TaskState};
use crate::error::{AdapterError, Component, ConfigError, ErrorKind, TaskError};
use crate::ports::{ArtifactStore, Clock, EventSink, IdGenerator, SystemClock, UlidGenerator};
use crate::retry::RetryPolicy;

/// Per-instance context handed through the pipeline.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub run_id: RunId,
    pub cancel: CancellationToken,
}

/// What the caller of [`TaskAdapter::handle`] learns about a run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub run_id: RunId,

    /// The terminal event, whether or not it reached the sink.
    pub final_event: StatusEvent,

    /// False when the terminal event could not be published. The message
    /// should then be redelivered rather than acknowledged.
    pub terminal_delivered: bool,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.final_event.state == TaskState::Succeeded
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        let kind = self.final_event.payload.as_ref()?.get("error_kind")?;
        serde_json::from_value(kind.clone()).ok()
    }
}

struct Completed {
    outputs: Vec<OutputArtifact>,
    engine: ProcessResult,
    staged_inputs: usize,
}

pub struct TaskAdapter {
    stager: InputStager,
    runner: ProcessRunner,
    collector: OutputCollector,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    terminal_retry: RetryPolicy,
    workspace_root: Option<PathBuf>,
}

impl TaskAdapter {
    pub fn new(
        config: &AdapterConfig,
        store: Arc<dyn ArtifactStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            stager: InputStager::new(Arc::clone(&store), config.retry.clone(), &config.staging),
            runner: ProcessRunner::new(&config.engine)?,
            collector: OutputCollector::new(store, config.retry.clone()),
            sink,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            terminal_retry: config.terminal_retry(),
            workspace_root: config.workspace.root.clone(),
        })
    }

    /// Replaces the clock used for event timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Handles raw message bytes. Undecodable payloads fail validation like
    /// any other malformed message.
    pub async fn handle_raw(&self, raw: &[u8], cancel: CancellationToken) -> TaskOutcome {
        match validator::parse_message(raw) {
            Ok(message) => self.handle(&message, cancel).await,
            Err(err) => {
                let ctx = self.context(cancel);
                let mut reporter = self.reporter(&ctx, TaskId::new(""));
                self.enter(&mut reporter, TaskState::Queued).await;
                self.enter(&mut reporter, TaskState::Validating).await;
                let err = TaskError::for_raw("", Component::PayloadValidator, err);
                self.finish(&ctx, reporter, Err(err)).await
            }
        }
    }

    /// Runs one task instance to its terminal state.
    pub async fn handle(&self, message: &TaskMessage, cancel: CancellationToken) -> TaskOutcome {
        let ctx = self.context(cancel);
        let hint = message.task_id_hint().unwrap_or_default();
        let span = tracing::info_span!(
            "task",
            task_id = %hint,
            user_id = tracing::field::Empty,
            run_id = %ctx.run_id,
        );

        async {
            tracing::info!("task received");
            let mut reporter = self.reporter(&ctx, TaskId::new(hint.as_str()));
            self.enter(&mut reporter, TaskState::Queued).await;
            let result = self.drive(message, &ctx, &mut reporter).await;
            self.finish(&ctx, reporter, result).await
        }
        .instrument(span)
        .await
    }

    fn context(&self, cancel: CancellationToken) -> TaskContext {
        TaskContext {
            run_id: self.ids.generate_run_id(),
            cancel,
        }
    }

    fn reporter(&self, ctx: &TaskContext, task_id: TaskId) -> StatusReporter {
        StatusReporter::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
            self.terminal_retry.clone(),
            task_id,
            ctx.run_id,
        )
    }

    async fn drive(
        &self,
        message: &TaskMessage,
        ctx: &TaskContext,
        reporter: &mut StatusReporter,
    ) -> Result<Completed, TaskError> {
        let hint = message.task_id_hint().unwrap_or_default();
        self.checkpoint(ctx, &hint, TaskState::Validating)?;
        self.enter(reporter, TaskState::Validating).await;
        let request = validator::validate(message)?;
        tracing::Span::current().record("user_id", request.user_id().as_str());
        reporter.set_task_id(request.task_id().clone());
        let task_id = request.task_id().as_str();

        self.checkpoint(ctx, task_id, TaskState::Staging)?;
        self.enter(reporter, TaskState::Staging).await;
        let workspace = Workspace::create(self.workspace_root.as_deref()).map_err(|e| {
            TaskError::new(
                request.task_id(),
                Component::TaskAdapter,
                AdapterError::input("workspace", format!("could not create workspace: {e}")),
            )
        })?;
        let staged = self.stager.stage(&request, &workspace, &ctx.cancel).await?;

        self.checkpoint(ctx, task_id, TaskState::Running)?;
        self.enter(reporter, TaskState::Running).await;
        let engine = match self
            .runner
            .invoke(&request, &staged, &workspace, &ctx.cancel)
            .await
        {
            Ok(result) => result,
            Err(err) if err.kind() == ErrorKind::EngineExecutionError => {
                let diagnostics = self.collector.inspect_diagnostics(workspace.output_dir()).await;
                return Err(err.with_diagnostics(diagnostics));
            }
            Err(err) => return Err(err),
        };

        self.checkpoint(ctx, task_id, TaskState::Collecting)?;
        self.enter(reporter, TaskState::Collecting).await;
        let found = self
            .collector
            .enumerate(&request, workspace.output_dir())
            .await?;

        self.checkpoint(ctx, task_id, TaskState::Uploading)?;
        self.enter(reporter, TaskState::Uploading).await;
        let outputs = self
            .collector
            .upload(&request, ctx.run_id, found, &ctx.cancel)
            .await?;

        if let Err(e) = workspace.close() {
            tracing::warn!(error = %e, "workspace cleanup failed");
        }

        Ok(Completed {
            outputs,
            engine,
            staged_inputs: staged.len(),
        })
    }

    /// Cancellation check at a phase boundary.
    fn checkpoint(&self, ctx: &TaskContext, task_id: &str, next: TaskState) -> Result<(), TaskError> {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::for_raw(
                task_id,
                Component::TaskAdapter,
                AdapterError::Cancelled { phase: next },
            ));
        }
        Ok(())
    }

    async fn enter(&self, reporter: &mut StatusReporter, state: TaskState) {
        tracing::debug!(state = %state, "entering state");
        if let Err(err) = reporter.progress(state, None, None).await {
            log_transition_bug(&err);
        }
    }

    async fn finish(
        &self,
        ctx: &TaskContext,
        mut reporter: StatusReporter,
        result: Result<Completed, TaskError>,
    ) -> TaskOutcome {
        let (state, message, payload) = match result {
            Ok(done) => {
                let names: Vec<_> = done.outputs.iter().map(|a| a.name.clone()).collect();
                tracing::info!(outputs = names.len(), "task succeeded");
                let payload = serde_json::json!({
                    "artifacts": names,
                    "outputs": done.outputs,
                    "inputs_staged": done.staged_inputs,
                    "engine": done.engine.summary(),
                });
                let message = format!("{} output artifact(s) uploaded", done.outputs.len());
                (TaskState::Succeeded, message, payload)
            }
            Err(err) => {
                tracing::warn!(error_kind = %err.kind(), component = %err.component, error = %err.source, "task failed");
                (TaskState::Failed, err.to_string(), err.payload())
            }
        };

        let report = match reporter.terminal(state, Some(message.clone()), Some(payload.clone())).await {
            Ok(report) => report,
            Err(err) => {
                // A refused terminal event was never published.
                log_transition_bug(&err);
                TerminalReport {
                    event: StatusEvent {
                        task_id: reporter.task_id().clone(),
                        run_id: ctx.run_id,
                        sequence: 0,
                        state,
                        timestamp: self.clock.now(),
                        message: Some(message),
                        payload: Some(payload),
                    },
                    delivered: false,
                }
            }
        };

        TaskOutcome {
            run_id: ctx.run_id,
            final_event: report.event,
            terminal_delivered: report.delivered,
        }
    }
}

fn log_transition_bug(err: &TransitionError) {
    tracing::error!(error = %err, "status transition refused");
}
