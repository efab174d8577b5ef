//! Compiled modules kept on disk for retrieval by id.
//!
//! Artifacts expire: every [`ArtifactStore::store`] first sweeps out files
//! older than the store's maximum age.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{CompilerError, Result};

/// How long an artifact stays retrievable by default.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

const FILE_PREFIX: &str = "wasm_";
const FILE_SUFFIX: &str = ".wasm";

/// Directory of `wasm_{id}.wasm` files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    max_age: Duration,
}

impl ArtifactStore {
    /// Store artifacts under `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Builder: expire artifacts after `max_age`.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// How long an artifact is kept.
    pub fn expires_after(&self) -> Duration {
        self.max_age
    }

    /// Directory holding the artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File an id maps to. Fails for ids that could escape the directory.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(CompilerError::InvalidArtifactId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}{}{}", FILE_PREFIX, id, FILE_SUFFIX)))
    }

    /// Write `bytes` under a fresh id and return the id.
    pub async fn store(&self, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        if let Err(e) = self.sweep().await {
            tracing::warn!(dir = %self.dir.display(), "artifact sweep failed: {}", e);
        }

        let id = format!("{:032x}", rand::random::<u128>());
        let path = self.path_for(&id)?;
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(id = %id, bytes = bytes.len(), "stored artifact");
        Ok(id)
    }

    /// Read an artifact back. `Ok(None)` when no such artifact exists.
    pub async fn load(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an artifact. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        remove_if_present(&self.path_for(id)?).await
    }

    /// Delete every artifact older than the maximum age. Returns how many
    /// were removed. Other files in the directory are left alone.
    pub async fn sweep(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)) {
                continue;
            }

            let modified = entry.metadata().await?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= self.max_age && remove_if_present(&entry.path()).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "swept expired artifacts");
        }
        Ok(removed)
    }
}

// Concurrent sweeps may race to the same file.
async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let id = store.store(b"\0asm\x01\0\0\0").await.unwrap();
        assert_eq!(id.len(), 32);
        assert!(dir.path().join(format!("wasm_{}.wasm", id)).exists());
        assert_eq!(store.load(&id).await.unwrap().unwrap(), b"\0asm\x01\0\0\0");
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.store(b"a").await.unwrap();
        let b = store.store(b"b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load("0123abcd").await.unwrap().is_none());
        assert!(!store.remove("0123abcd").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = store.store(b"x").await.unwrap();
        assert!(store.remove(&id).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_sweeps_expired_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).max_age(Duration::ZERO);
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        let first = store.store(b"first").await.unwrap();
        let second = store.store(b"second").await.unwrap();
        assert!(store.load(&first).await.unwrap().is_none());
        assert_eq!(store.load(&second).await.unwrap().unwrap(), b"second");
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_fresh_artifacts_survive_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.store(b"a").await.unwrap();
        let b = store.store(b"b").await.unwrap();

        assert_eq!(store.sweep().await.unwrap(), 0);
        assert!(store.load(&a).await.unwrap().is_some());
        assert!(store.load(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_of_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("never-created"));
        assert_eq!(store.sweep().await.unwrap(), 0);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let store = ArtifactStore::new("/tmp/wasmpad");
        for id in ["", "../etc/passwd", "a/b", "a.b"] {
            assert!(
                matches!(store.path_for(id), Err(CompilerError::InvalidArtifactId(_))),
                "{:?}",
                id
            );
        }
        assert_eq!(
            store.path_for("abc-123_x").unwrap(),
            PathBuf::from("/tmp/wasmpad/wasm_abc-123_x.wasm")
        );
    }
}
