//! LocalArtifactStore - directory-backed storage.
//!
//! References and keys are paths relative to a root directory. Used by the
//! CLI for local runs and by tests; a network backend implements the same
//! port.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ports::ArtifactStore;

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a reference or key under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let path = Path::new(relative);
        let escapes = relative.is_empty()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::Permanent(format!(
                "invalid artifact path `{relative}`"
            )));
        }
        Ok(self.root.join(path))
    }
}

fn classify(context: &str, err: io::Error) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput => {
            StorageError::Permanent(format!("{context}: {err}"))
        }
        _ => StorageError::Transient(format!("{context}: {err}")),
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn download(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf, StorageError> {
        let src = self.resolve(reference)?;
        let meta = tokio::fs::metadata(&src).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                StorageError::Permanent(format!("artifact `{reference}` not found"))
            }
            _ => classify(reference, e),
        })?;
        if !meta.is_file() {
            return Err(StorageError::Permanent(format!(
                "artifact `{reference}` is not a file"
            )));
        }
        let file_name = src
            .file_name()
            .ok_or_else(|| StorageError::Permanent(format!("artifact `{reference}` has no file name")))?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| classify("create staging dir", e))?;
        let dest = dest_dir.join(file_name);
        tokio::fs::copy(&src, &dest)
            .await
            .map_err(|e| classify(reference, e))?;
        Ok(dest)
    }

    async fn upload(&self, local_path: &Path, suggested_key: &str) -> Result<String, StorageError> {
        let dest = self.resolve(suggested_key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| classify("create destination dir", e))?;
        }
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|e| classify(suggested_key, e))?;
        Ok(suggested_key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_copies_into_destination() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("refs")).unwrap();
        std::fs::write(root.path().join("refs/foods.csv"), "a,b\n1,2\n").unwrap();
        let dest = tempfile::tempdir().unwrap();

        let store = LocalArtifactStore::new(root.path());
        let staged = store
            .download("refs/foods.csv", &dest.path().join("0"))
            .await
            .unwrap();

        assert_eq!(staged, dest.path().join("0/foods.csv"));
        assert_eq!(std::fs::read_to_string(staged).unwrap(), "a,b\n1,2\n");
    }

    #[tokio::test]
    async fn missing_artifact_is_permanent() {
        let root = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(root.path());

        let err = store.download("missing-ref", dest.path()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn references_cannot_escape_the_root() {
        let root = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(root.path());

        for bad in ["../etc/passwd", "/etc/passwd", ""] {
            let err = store.download(bad, dest.path()).await.unwrap_err();
            assert!(matches!(err, StorageError::Permanent(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn upload_writes_under_key() {
        let root = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("result.csv");
        std::fs::write(&file, "x\n").unwrap();

        let store = LocalArtifactStore::new(root.path());
        let key = store.upload(&file, "u1/t1/run-1/result.csv").await.unwrap();

        assert_eq!(key, "u1/t1/run-1/result.csv");
        assert!(root.path().join(&key).is_file());
    }
}
