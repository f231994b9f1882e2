//! Per-task scoped workspace.
//!
//! Layout:
//! ```text
//! <tmp>/taskbridge-<random>/
//!   inputs/<index>/<file>     staged inputs, one slot per reference
//!   output/                   engine output directory
//!   engine-config.json        generated engine configuration
//! ```
//!
//! The directory is owned by exactly one task instance and is removed when
//! the `Workspace` is dropped, whichever way the task ends.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const ENGINE_CONFIG_FILE: &str = "engine-config.json";

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    inputs: PathBuf,
    output: PathBuf,
}

impl Workspace {
    /// Creates the workspace under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("taskbridge-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        let inputs = dir.path().join("inputs");
        let output = dir.path().join("output");
        std::fs::create_dir(&inputs)?;
        std::fs::create_dir(&output)?;

        Ok(Self {
            dir,
            inputs,
            output,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Private directory for the input at `index`, so that two references
    /// with the same file name never collide.
    pub fn input_slot(&self, index: usize) -> PathBuf {
        self.inputs.join(index.to_string())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn engine_config_path(&self) -> PathBuf {
        self.dir.path().join(ENGINE_CONFIG_FILE)
    }

    /// Removes the directory now, reporting errors that `Drop` would hide.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_created_and_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(Some(parent.path())).unwrap();
        let root = ws.path().to_path_buf();

        assert!(root.starts_with(parent.path()));
        assert!(ws.output_dir().is_dir());
        assert!(root.join("inputs").is_dir());
        assert_eq!(ws.input_slot(2), root.join("inputs/2"));
        assert_eq!(ws.engine_config_path(), root.join("engine-config.json"));

        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn close_removes_everything_including_engine_files() {
        let ws = Workspace::create(None).unwrap();
        let root = ws.path().to_path_buf();
        std::fs::create_dir_all(ws.output_dir().join("nested")).unwrap();
        std::fs::write(ws.output_dir().join("nested/result.csv"), "x").unwrap();

        ws.close().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn concurrent_workspaces_never_share_a_directory() {
        let a = Workspace::create(None).unwrap();
        let b = Workspace::create(None).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
