//! ProcessRunner - runs the external engine as a bounded subprocess.
//!
//! # Design
//! - The engine gets its inputs through a generated JSON config file in the
//!   workspace plus `--config/--input/--output` flags.
//! - The child runs in its own process group (unix). Timeout and
//!   cancellation kill the whole group, so helpers the engine forked go too.
//! - The memory ceiling is an `RLIMIT_AS` set in the child before exec.
//! - stdout/stderr are drained concurrently with the wait, keeping at most
//!   `capture_limit_bytes` each. Excess is counted and flagged, not kept.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::workspace::Workspace;
use crate::config::EngineConfig;
use crate::domain::{
    ArtifactRole, CapturedOutput, EngineLauncher, InvocationSpec, ProcessResult, StagedInput,
    TaskRequest, TaskState,
};
use crate::error::{AdapterError, Component, ConfigError, TaskError};

/// How long to keep draining pipes after the child is gone. A grandchild
/// that escaped the process group can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct ProcessRunner {
    launcher: EngineLauncher,
    subcommand: Vec<String>,
    extra_args: Vec<String>,
    timeout: Duration,
    memory_limit_bytes: Option<u64>,
    capture_limit_bytes: usize,
}

/// Contents of the generated engine configuration file.
#[derive(Debug, Serialize)]
struct EngineConfigFile<'a> {
    task_id: &'a str,
    user_id: &'a str,
    parameters: &'a serde_json::Map<String, serde_json::Value>,
    inputs: Vec<EngineInput<'a>>,
    output_dir: &'a Path,
}

#[derive(Debug, Serialize)]
struct EngineInput<'a> {
    path: &'a Path,
    role: &'a ArtifactRole,
    reference: &'a str,
}

impl ProcessRunner {
    pub fn new(engine: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            launcher: engine.launcher()?,
            subcommand: engine.subcommand.clone(),
            extra_args: engine.extra_args.clone(),
            timeout: engine.timeout(),
            memory_limit_bytes: engine.memory_limit_bytes(),
            capture_limit_bytes: engine.capture_limit_bytes,
        })
    }

    pub fn launcher(&self) -> &EngineLauncher {
        &self.launcher
    }

    /// Builds the invocation. Deterministic in its inputs; the config file
    /// is written separately by [`ProcessRunner::write_engine_config`].
    pub fn build_spec(&self, staged: &[StagedInput], workspace: &Workspace) -> InvocationSpec {
        let mut args = self.launcher.prefix_args();
        args.extend(self.subcommand.iter().cloned());
        args.push("--config".to_string());
        args.push(workspace.engine_config_path().display().to_string());
        for input in staged {
            args.push("--input".to_string());
            args.push(input.path.display().to_string());
        }
        args.push("--output".to_string());
        args.push(workspace.output_dir().display().to_string());
        args.extend(self.extra_args.iter().cloned());

        InvocationSpec::new(
            self.launcher.program().to_path_buf(),
            args,
            workspace.path().to_path_buf(),
            workspace.output_dir().to_path_buf(),
            self.memory_limit_bytes,
            self.timeout,
            self.capture_limit_bytes,
        )
    }

    pub async fn write_engine_config(
        &self,
        request: &TaskRequest,
        staged: &[StagedInput],
        workspace: &Workspace,
    ) -> Result<(), AdapterError> {
        let file = EngineConfigFile {
            task_id: request.task_id().as_str(),
            user_id: request.user_id().as_str(),
            parameters: request.parameters(),
            inputs: staged
                .iter()
                .map(|s| EngineInput {
                    path: &s.path,
                    role: &s.role,
                    reference: &s.reference,
                })
                .collect(),
            output_dir: workspace.output_dir(),
        };
        let body = serde_json::to_vec_pretty(&file)
            .map_err(|e| AdapterError::engine(format!("could not encode engine config: {e}")))?;
        tokio::fs::write(workspace.engine_config_path(), body)
            .await
            .map_err(|e| AdapterError::engine(format!("could not write engine config: {e}")))
    }

    /// Runs the engine for one task. Non-zero exit and timeout become
    /// `EngineExecution` errors; cancellation becomes `Cancelled`.
    pub async fn invoke(
        &self,
        request: &TaskRequest,
        staged: &[StagedInput],
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult, TaskError> {
        let fail = |source| TaskError::new(request.task_id(), Component::ProcessRunner, source);

        self.write_engine_config(request, staged, workspace)
            .await
            .map_err(fail)?;
        let spec = self.build_spec(staged, workspace);
        let result = run_bounded(&spec, cancel).await.map_err(fail)?;
        result.check().map_err(fail)
    }
}

/// Runs a fully resolved invocation under its time and size bounds.
///
/// Returns `Ok` for any completed or timed-out run (the caller decides what
/// a non-zero exit means) and `Err` only when the process could not be
/// started or the run was cancelled.
pub async fn run_bounded(
    spec: &InvocationSpec,
    cancel: &CancellationToken,
) -> Result<ProcessResult, AdapterError> {
    let program = resolve_program(spec.program()).ok_or_else(|| {
        AdapterError::engine(format!(
            "engine launcher `{}` not found",
            spec.program().display()
        ))
    })?;

    let mut cmd = Command::new(&program);
    cmd.args(spec.args())
        .current_dir(spec.working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    apply_unix_bounds(&mut cmd, spec.memory_limit_bytes());

    tracing::info!(command = %spec.command_line(), timeout = ?spec.timeout(), "launching engine");
    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        AdapterError::engine(format!("failed to start `{}`: {e}", program.display()))
    })?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .map(|r| spawn_capture(r, spec.capture_limit_bytes()));
    let stderr = child
        .stderr
        .take()
        .map(|r| spawn_capture(r, spec.capture_limit_bytes()));

    let ended = tokio::select! {
        status = child.wait() => Ended::Exited(status),
        _ = tokio::time::sleep(spec.timeout()) => Ended::TimedOut,
        _ = cancel.cancelled() => Ended::Cancelled,
    };
    let duration = started.elapsed();

    // Always take the group down: after a normal exit this reaps stragglers
    // the engine left behind.
    kill_tree(pid, &mut child).await;

    let stdout = finish_capture(stdout).await;
    let stderr = finish_capture(stderr).await;

    let (exit_code, timed_out) = match ended {
        Ended::Exited(Ok(status)) => (status.code(), false),
        Ended::Exited(Err(e)) => {
            return Err(AdapterError::engine(format!("waiting for engine failed: {e}")));
        }
        Ended::TimedOut => {
            tracing::warn!(timeout = ?spec.timeout(), "engine timed out, process group killed");
            (None, true)
        }
        Ended::Cancelled => {
            tracing::warn!("task cancelled, engine process group killed");
            return Err(AdapterError::Cancelled {
                phase: TaskState::Running,
            });
        }
    };

    let result = ProcessResult {
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
    };
    if !timed_out {
        if result.is_success() {
            tracing::info!(duration_ms = duration.as_millis() as u64, "engine finished");
        } else {
            tracing::warn!(exit_code = ?result.exit_code, "engine exited with failure");
        }
    }
    Ok(result)
}

enum Ended {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[cfg(unix)]
fn apply_unix_bounds(cmd: &mut Command, memory_limit_bytes: Option<u64>) {
    cmd.process_group(0);
    if let Some(limit) = memory_limit_bytes {
        // SAFETY: the closure only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || limit_address_space(limit));
        }
    }
}

#[cfg(unix)]
fn limit_address_space(bytes: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call.
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Kills the child's process group (unix) and the child itself, then reaps.
async fn kill_tree(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: plain syscall; ESRCH (group already gone) is fine.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "engine already exited");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "failed to reap engine process");
    }
}

#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    total: u64,
}

struct CaptureHandle {
    shared: Arc<Mutex<Capture>>,
    task: JoinHandle<()>,
}

fn spawn_capture<R>(mut reader: R, limit: usize) -> CaptureHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let shared = Arc::new(Mutex::new(Capture::default()));
    let sink = Arc::clone(&shared);
    let task = tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut capture = sink.lock();
                    capture.total += n as u64;
                    let room = limit.saturating_sub(capture.kept.len());
                    capture.kept.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "engine pipe read failed");
                    break;
                }
            }
        }
    });
    CaptureHandle { shared, task }
}

async fn finish_capture(handle: Option<CaptureHandle>) -> CapturedOutput {
    let Some(CaptureHandle { shared, mut task }) = handle else {
        return CapturedOutput::default();
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        tracing::warn!("engine pipe still open after exit, capture cut short");
        task.abort();
    }
    let capture = shared.lock();
    CapturedOutput {
        text: String::from_utf8_lossy(&capture.kept).into_owned(),
        truncated: capture.total > capture.kept.len() as u64,
        total_bytes: capture.total,
    }
}

/// Resolves a program the way a shell would: paths with a separator must
/// exist, bare names are searched on `PATH`.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
