//! Engine invocation: what we run and what came back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::AdapterError;

/// How the engine artifact is launched.
///
/// The artifact is shared and read-only across task instances; only the
/// per-task arguments differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLauncher {
    /// A directly executable program.
    Native { executable: PathBuf },

    /// A .NET assembly run through the `dotnet` host.
    Dotnet { dotnet_bin: PathBuf, assembly: PathBuf },

    /// A JAR run through `java -jar`.
    Java {
        java_bin: PathBuf,
        jar: PathBuf,
        java_opts: Vec<String>,
    },
}

impl EngineLauncher {
    /// The program handed to the OS.
    pub fn program(&self) -> &Path {
        match self {
            EngineLauncher::Native { executable } => executable,
            EngineLauncher::Dotnet { dotnet_bin, .. } => dotnet_bin,
            EngineLauncher::Java { java_bin, .. } => java_bin,
        }
    }

    /// Arguments that precede the engine's own arguments.
    pub fn prefix_args(&self) -> Vec<String> {
        match self {
            EngineLauncher::Native { .. } => Vec::new(),
            EngineLauncher::Dotnet { assembly, .. } => vec![assembly.display().to_string()],
            EngineLauncher::Java { jar, java_opts, .. } => {
                let mut args = java_opts.clone();
                args.push("-jar".to_string());
                args.push(jar.display().to_string());
                args
            }
        }
    }
}

/// Fully resolved engine command. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    output_dir: PathBuf,
    memory_limit_bytes: Option<u64>,
    timeout: Duration,
    capture_limit_bytes: usize,
}

impl InvocationSpec {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        working_dir: PathBuf,
        output_dir: PathBuf,
        memory_limit_bytes: Option<u64>,
        timeout: Duration,
        capture_limit_bytes: usize,
    ) -> Self {
        Self {
            program,
            args,
            working_dir,
            output_dir,
            memory_limit_bytes,
            timeout,
            capture_limit_bytes,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_bytes
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn capture_limit_bytes(&self) -> usize {
        self.capture_limit_bytes
    }

    /// Shell-escaped command line, for logs only.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| shell_quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(part: &str) -> String {
    let safe = !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_./:=@%+,-".contains(c));
    if safe {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', "'\"'\"'"))
    }
}

/// Captured stream, bounded in size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
    pub text: String,

    /// Set when the stream produced more than the capture limit.
    pub truncated: bool,

    /// Bytes the stream produced, including the dropped excess.
    pub total_bytes: u64,
}

/// Outcome of one engine invocation. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ProcessResult {
    /// Zero exit and no timeout. Engine-specific codes are not interpreted.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Best diagnostic text: stderr, then stdout, then a synthetic line.
    pub fn diagnostic_text(&self) -> String {
        let stderr = self.stderr.text.trim();
        let stdout = self.stdout.text.trim();
        let detail = if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        };
        if self.timed_out {
            format!("timed out after {}ms: {detail}", self.duration.as_millis())
        } else {
            detail
        }
    }

    /// Turns a failed run into an `EngineExecution` error.
    pub fn check(self) -> Result<Self, AdapterError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(AdapterError::EngineExecution {
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            diagnostics: self.diagnostic_text(),
        })
    }

    /// Summary attached to status payloads.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "exit_code": self.exit_code,
            "duration_ms": self.duration.as_millis() as u64,
            "timed_out": self.timed_out,
            "stdout_truncated": self.stdout.truncated,
            "stderr_truncated": self.stderr.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ProcessResult {
        ProcessResult {
            exit_code,
            stdout: CapturedOutput {
                text: stdout.to_string(),
                ..Default::default()
            },
            stderr: CapturedOutput {
                text: stderr.to_string(),
                ..Default::default()
            },
            duration: Duration::from_secs(3),
            timed_out: false,
        }
    }

    #[test]
    fn diagnostic_text_prefers_stderr_then_stdout_then_exit_code() {
        assert_eq!(result(Some(2), "out", " boom \n").diagnostic_text(), "boom");
        assert_eq!(result(Some(2), "out\n", "  ").diagnostic_text(), "out");
        assert_eq!(result(Some(2), "", "").diagnostic_text(), "exit code 2");
    }

    #[test]
    fn check_rejects_non_zero_and_timeouts() {
        assert!(result(Some(0), "", "").check().is_ok());

        let err = result(Some(2), "", "bad input").check().unwrap_err();
        assert!(matches!(
            err,
            AdapterError::EngineExecution { exit_code: Some(2), timed_out: false, ref diagnostics } if diagnostics == "bad input"
        ));

        let mut timed_out = result(None, "", "");
        timed_out.timed_out = true;
        let err = timed_out.check().unwrap_err();
        assert!(err.to_string().contains("timed out after 3000ms"), "{err}");
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let mut timed_out = result(None, "", "");
        timed_out.timed_out = true;
        timed_out.duration = Duration::from_millis(250);
        assert_eq!(timed_out.diagnostic_text(), "timed out after 250ms: terminated by signal");
    }

    #[test]
    fn launcher_prefix_args() {
        let java = EngineLauncher::Java {
            java_bin: PathBuf::from("java"),
            jar: PathBuf::from("/opt/engine.jar"),
            java_opts: vec!["-Xmx2g".to_string()],
        };
        assert_eq!(java.program(), Path::new("java"));
        assert_eq!(java.prefix_args(), vec!["-Xmx2g", "-jar", "/opt/engine.jar"]);

        let dotnet = EngineLauncher::Dotnet {
            dotnet_bin: PathBuf::from("dotnet"),
            assembly: PathBuf::from("/opt/mcra.dll"),
        };
        assert_eq!(dotnet.prefix_args(), vec!["/opt/mcra.dll"]);
    }

    #[test]
    fn command_line_quotes_unsafe_arguments() {
        let spec = InvocationSpec::new(
            PathBuf::from("/opt/engine"),
            vec!["--name".to_string(), "two words".to_string(), "it's".to_string()],
            PathBuf::from("/tmp/ws"),
            PathBuf::from("/tmp/ws/output"),
            None,
            Duration::from_secs(1),
            1024,
        );
        assert_eq!(
            spec.command_line(),
            "/opt/engine --name 'two words' 'it'\"'\"'s'"
        );
    }
}
