//! Persistent Store — directory-backed JSON documents with atomic replace.
//!
//! Each of `crew.json`, `chores.json`, `users.json` is owned by one
//! [`Document<T>`]. A document is a whole-value JSON replace behind a
//! single `tokio::sync::Mutex`: readers and writers take the same lock,
//! which is plenty at the scale this crate targets (tens of sailors,
//! thousands of chores) — see spec.md §4.1 and §9.
//!
//! Writes go to a sibling `.tmp` file and are `rename`d into place so a
//! concurrent reader (or a crash mid-write) never observes a torn file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, warn};

pub struct Document<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> Document<T>
where
    T: Default + Clone + Serialize + DeserializeOwned + Send,
{
    /// Load `path` from disk, or start from `T::default()` if it is
    /// missing or fails to parse. A load failure is logged, never raised —
    /// the store must never abort startup over a corrupt document.
    pub async fn open(path: PathBuf) -> Self {
        let value = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse document, starting empty");
                    T::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read document, starting empty");
                T::default()
            }
        };
        Document {
            path,
            state: Mutex::new(value),
        }
    }

    /// Take a read-only snapshot under the document lock.
    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.state.lock().await;
        f(&guard)
    }

    /// Atomically read, mutate, and persist. If the write fails, the
    /// in-memory mutation is rolled back and the error returned — the
    /// caller (an HTTP handler) maps this to a 500 per spec.md §7.
    pub async fn with_lock<F, R>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.state.lock().await;
        let before = guard.clone();
        let result = f(&mut guard);
        if let Err(e) = write_atomic(&self.path, &*guard).await {
            error!(path = %self.path.display(), error = %e, "persistence failed, reverting in-memory mutation");
            *guard = before;
            return Err(e);
        }
        Ok(result)
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)?;
    let write_result = tokio::fs::write(&tmp_path, &json).await;
    match write_result {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await.map_err(Into::into),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    type Doc = Document<HashMap<String, u32>>;

    async fn open_in(dir: &tempfile::TempDir, name: &str) -> Doc {
        Document::open(dir.path().join(name)).await
    }

    #[tokio::test]
    async fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let doc = open_in(&dir, "missing.json").await;
        let snapshot = doc.read(|m| m.clone()).await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn with_lock_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc: Doc = Document::open(path.clone()).await;
        doc.with_lock(|m| {
            m.insert("alice".to_string(), 3);
        })
        .await
        .unwrap();

        let reopened: Doc = Document::open(path).await;
        let snapshot = reopened.read(|m| m.clone()).await;
        assert_eq!(snapshot.get("alice"), Some(&3));
    }

    #[tokio::test]
    async fn corrupt_file_loads_as_default_and_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let doc: Doc = Document::open(path).await;
        assert!(doc.read(|m| m.is_empty()).await);
    }

    #[tokio::test]
    async fn no_tmp_file_left_after_successful_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc: Doc = Document::open(path.clone()).await;
        doc.with_lock(|m| {
            m.insert("bob".to_string(), 1);
        })
        .await
        .unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert!(path.exists());
    }
}
