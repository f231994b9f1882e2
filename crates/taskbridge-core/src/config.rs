//! Adapter configuration.
//!
//! Loaded from TOML; every section has defaults so a partial file (or no
//! file) works. Environment overrides are applied afterwards through a
//! lookup function, which keeps tests away from the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::EngineLauncher;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const ENV_ENGINE_PATH: &str = "TASKBRIDGE_ENGINE_PATH";
pub const ENV_DOTNET_BIN: &str = "TASKBRIDGE_DOTNET_BIN";
pub const ENV_JAVA_BIN: &str = "TASKBRIDGE_JAVA_BIN";
pub const ENV_ENGINE_TIMEOUT_SECS: &str = "TASKBRIDGE_ENGINE_TIMEOUT_SECS";
pub const ENV_STORAGE_ROOT: &str = "TASKBRIDGE_STORAGE_ROOT";

const MAX_RETRY_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub engine: EngineConfig,
    pub staging: StagingConfig,
    pub retry: RetryPolicy,
    pub storage: StorageConfig,
    pub workspace: WorkspaceConfig,
    pub reporter: ReporterConfig,
}

/// How to pick the launcher for the engine artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// By extension: `.dll` -> dotnet, `.jar` -> java, else native.
    #[default]
    Auto,
    Native,
    Dotnet,
    Java,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub path: Option<PathBuf>,
    pub launcher: LauncherKind,
    pub dotnet_bin: PathBuf,
    pub java_bin: PathBuf,
    pub java_opts: Vec<String>,

    /// Arguments placed before the adapter's own flags (e.g. `["run"]`).
    pub subcommand: Vec<String>,

    /// Arguments appended after the adapter's own flags.
    pub extra_args: Vec<String>,

    pub timeout_secs: u64,

    /// Address-space ceiling for the engine process. 0 disables it.
    pub memory_limit_mb: u64,

    /// Per-stream capture limit for stdout/stderr.
    pub capture_limit_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            launcher: LauncherKind::Auto,
            dotnet_bin: PathBuf::from("dotnet"),
            java_bin: PathBuf::from("java"),
            java_opts: Vec::new(),
            subcommand: Vec::new(),
            extra_args: Vec::new(),
            timeout_secs: 3600,
            memory_limit_mb: 0,
            capture_limit_bytes: 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        (self.memory_limit_mb > 0).then(|| self.memory_limit_mb.saturating_mul(1024 * 1024))
    }

    /// Resolves the configured artifact into a launcher.
    pub fn launcher(&self) -> Result<EngineLauncher, ConfigError> {
        let path = self.path.clone().ok_or(ConfigError::EngineNotConfigured)?;
        let kind = match self.launcher {
            LauncherKind::Auto => match extension(&path).as_deref() {
                Some("dll") => LauncherKind::Dotnet,
                Some("jar") => LauncherKind::Java,
                _ => LauncherKind::Native,
            },
            explicit => explicit,
        };
        Ok(match kind {
            LauncherKind::Dotnet => EngineLauncher::Dotnet {
                dotnet_bin: self.dotnet_bin.clone(),
                assembly: path,
            },
            LauncherKind::Java => EngineLauncher::Java {
                java_bin: self.java_bin.clone(),
                jar: path,
                java_opts: self.java_opts.clone(),
            },
            LauncherKind::Native | LauncherKind::Auto => EngineLauncher::Native { executable: path },
        })
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Concurrent downloads per task.
    pub parallelism: usize,

    /// Quota on the summed size of staged inputs. 0 disables it.
    pub max_total_bytes: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_total_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./artifacts"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for per-task workspaces. `None` = system temp dir.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Delivery attempts for the terminal event.
    pub terminal_attempts: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            terminal_attempts: 5,
        }
    }
}

impl AdapterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies environment overrides.
    ///
    /// The engine path from the environment is only used when the file did
    /// not set one; the other variables override the file.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if self.engine.path.is_none()
            && let Some(path) = lookup(ENV_ENGINE_PATH).filter(|p| !p.is_empty())
        {
            self.engine.path = Some(PathBuf::from(path));
        }
        if let Some(bin) = lookup(ENV_DOTNET_BIN).filter(|b| !b.is_empty()) {
            self.engine.dotnet_bin = PathBuf::from(bin);
        }
        if let Some(bin) = lookup(ENV_JAVA_BIN).filter(|b| !b.is_empty()) {
            self.engine.java_bin = PathBuf::from(bin);
        }
        if let Some(secs) = lookup(ENV_ENGINE_TIMEOUT_SECS) {
            self.engine.timeout_secs = secs.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_ENGINE_TIMEOUT_SECS.to_string(),
                reason: format!("`{secs}` is not a whole number of seconds"),
            })?;
        }
        if let Some(root) = lookup(ENV_STORAGE_ROOT).filter(|r| !r.is_empty()) {
            self.storage.root = PathBuf::from(root);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.engine.timeout_secs == 0 {
            return Err(invalid("engine.timeout_secs", "must be greater than zero"));
        }
        if self.engine.capture_limit_bytes == 0 {
            return Err(invalid("engine.capture_limit_bytes", "must be greater than zero"));
        }
        if self.staging.parallelism == 0 {
            return Err(invalid("staging.parallelism", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.multiplier.is_finite()
            || !(1.0..=MAX_RETRY_MULTIPLIER).contains(&self.retry.multiplier)
        {
            return Err(invalid(
                "retry.multiplier",
                "must be a finite number between 1.0 and 10.0",
            ));
        }
        if self.reporter.terminal_attempts == 0 {
            return Err(invalid("reporter.terminal_attempts", "must be at least 1"));
        }
        Ok(())
    }

    /// Retry policy for terminal event delivery.
    pub fn terminal_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.reporter.terminal_attempts,
            ..self.retry.clone()
        }
    }
}
