//! Artifacts consumed and produced by the engine.
//!
//! Artifacts are used in reporting and can grow new roles without touching
//! the execution model, so roles round-trip through plain strings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Logical role of a file, declared by the caller or inferred from its
/// extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactRole {
    /// Engine configuration (json/yaml/toml).
    Config,
    /// Tabular data (csv/tsv/xlsx/parquet).
    Table,
    /// Human-readable report (html/pdf/md/txt).
    Report,
    /// Machine-readable structured output (json/xml/yaml).
    Structured,
    Log,
    Archive,
    Image,
    /// Generic input data with no recognized extension.
    Data,
    Other,
    /// Caller-declared role we do not interpret.
    Custom(String),
}

impl ArtifactRole {
    /// Role for a staged input when the caller did not declare one.
    pub fn infer_input(path: &Path) -> Self {
        match extension(path).as_deref() {
            Some("json" | "yaml" | "yml" | "toml") => ArtifactRole::Config,
            Some("csv" | "tsv" | "xlsx" | "xls" | "parquet") => ArtifactRole::Table,
            _ => ArtifactRole::Data,
        }
    }

    /// Role for an engine-produced output file.
    pub fn classify_output(path: &Path) -> Self {
        match extension(path).as_deref() {
            Some("csv" | "tsv" | "xlsx" | "xls" | "parquet") => ArtifactRole::Table,
            Some("html" | "htm" | "pdf" | "md" | "txt") => ArtifactRole::Report,
            Some("json" | "yaml" | "yml" | "xml" | "toml") => ArtifactRole::Structured,
            Some("log") => ArtifactRole::Log,
            Some("zip" | "gz" | "tar" | "tgz") => ArtifactRole::Archive,
            Some("png" | "jpg" | "jpeg" | "svg") => ArtifactRole::Image,
            _ => ArtifactRole::Other,
        }
    }

    /// Whether a file of this role is worth quoting in a failure report.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ArtifactRole::Log | ArtifactRole::Report | ArtifactRole::Structured
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            ArtifactRole::Config => "config",
            ArtifactRole::Table => "table",
            ArtifactRole::Report => "report",
            ArtifactRole::Structured => "structured",
            ArtifactRole::Log => "log",
            ArtifactRole::Archive => "archive",
            ArtifactRole::Image => "image",
            ArtifactRole::Data => "data",
            ArtifactRole::Other => "other",
            ArtifactRole::Custom(s) => s,
        }
    }
}

impl From<String> for ArtifactRole {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "config" | "configuration" => ArtifactRole::Config,
            "table" | "data table" | "data_table" => ArtifactRole::Table,
            "report" => ArtifactRole::Report,
            "structured" => ArtifactRole::Structured,
            "log" => ArtifactRole::Log,
            "archive" => ArtifactRole::Archive,
            "image" => ArtifactRole::Image,
            "data" => ArtifactRole::Data,
            "other" => ArtifactRole::Other,
            _ => ArtifactRole::Custom(s),
        }
    }
}

impl From<ArtifactRole> for String {
    fn from(role: ArtifactRole) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// A local materialization of one input reference.
///
/// Lives under the task's workspace and disappears with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedInput {
    pub reference: String,
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub size_bytes: u64,
}

/// An engine-produced file, with its storage key once uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    /// Path relative to the output directory, `/`-separated.
    pub name: String,
    pub role: ArtifactRole,
    pub size_bytes: u64,

    #[serde(skip)]
    pub local_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_key: Option<String>,
}

/// A file found in the output directory after a failed run.
///
/// Attached to the failure report; never uploaded as a task output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticFile {
    pub name: String,
    pub size_bytes: u64,

    /// Tail of the file for textual roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}
