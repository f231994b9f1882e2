//! ArtifactStore port - object storage for task inputs and outputs.
//!
//! Only two primitives are consumed: download a referenced artifact into a
//! local directory, and upload a local file. Both may fail transiently or
//! permanently; the implementation decides which.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageError;

/// Storage collaborator.
///
/// # Design
/// - `download` writes beneath `dest_dir`, which belongs to one task's
///   workspace, and returns the path of the file it created.
/// - `upload` receives a suggested key and returns the key actually used.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn download(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, StorageError>;

    async fn upload(&self, local_path: &Path, suggested_key: &str) -> Result<String, StorageError>;
}
