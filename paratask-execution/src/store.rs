//! Shared payload store
//!
//! Stages encoded payloads as files under the shared data directory. Each
//! file is written by the orchestrator, consumed and deleted by the worker
//! that owns it, and removed again on kill in case the worker never got to
//! it. All filesystem work is returned as a [`Completion`] built with the
//! current completion primitive.

use crate::completion::Completion;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

/// Payload store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create shared data directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Failed to write payload {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to inspect payload {path}: {source}")]
    Probe { path: PathBuf, source: io::Error },

    #[error("Failed to remove payload {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Location of one staged payload and the task it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPayloadHandle {
    pub path: PathBuf,
    pub owning_task_index: usize,
}

/// File-backed payload store rooted at the shared data directory
#[derive(Debug, Clone)]
pub struct PayloadStore {
    dir: PathBuf,
}

impl PayloadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate the location for task `index` of a submission.
    ///
    /// Names follow `<unix_millis>_<index>_<submission>.json`, so concurrent
    /// submissions sharing a directory never collide.
    pub fn allocate(&self, submission: Uuid, index: usize) -> SharedPayloadHandle {
        let name = format!(
            "{}_{}_{}.json",
            Utc::now().timestamp_millis(),
            index,
            submission.simple()
        );
        SharedPayloadHandle {
            path: self.dir.join(name),
            owning_task_index: index,
        }
    }

    /// Write `bytes` to the handle's location, creating the directory if needed
    pub fn write(&self, handle: &SharedPayloadHandle, bytes: Vec<u8>) -> Completion<()> {
        let dir = self.dir.clone();
        let path = handle.path.clone();
        Completion::new(move |settler| {
            tokio::spawn(async move {
                settler.settle(write_payload(dir, path, bytes).await.map_err(Into::into))
            });
        })
    }

    /// Remove the payload if it is still present.
    ///
    /// Resolves to `true` when a file was removed. A file that disappears
    /// between the check and the removal is not an error.
    pub fn remove_if_exists(&self, handle: &SharedPayloadHandle) -> Completion<bool> {
        let path = handle.path.clone();
        Completion::new(move |settler| {
            tokio::spawn(async move {
                settler.settle(remove_payload(path).await.map_err(Into::into))
            });
        })
    }
}

async fn write_payload(dir: PathBuf, path: PathBuf, bytes: Vec<u8>) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
    trace!(path = %path.display(), "Staged payload");
    Ok(())
}

async fn remove_payload(path: PathBuf) -> Result<bool, StoreError> {
    match tokio::fs::try_exists(&path).await {
        Ok(true) => {}
        Ok(false) => return Ok(false),
        Err(source) => return Err(StoreError::Probe { path, source }),
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            trace!(path = %path.display(), "Removed payload");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Remove { path, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_names_are_unique_per_submission() {
        let store = PayloadStore::new("/tmp/paratask/shared_data");
        let first = store.allocate(Uuid::new_v4(), 3);
        let second = store.allocate(Uuid::new_v4(), 3);

        assert_ne!(first.path, second.path);
        assert_eq!(first.owning_task_index, 3);
        assert!(first.path.starts_with("/tmp/paratask/shared_data"));

        let name = first.path.file_name().unwrap().to_str().unwrap();
        let parts: Vec<&str> = name.trim_end_matches(".json").split('_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1], "3");
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_write_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = PayloadStore::new(dir.path().join("nested").join("shared"));
        let handle = store.allocate(Uuid::new_v4(), 0);

        store.write(&handle, b"{}".to_vec()).await.unwrap();
        assert!(handle.path.is_file());
        assert_eq!(std::fs::read(&handle.path).unwrap(), b"{}");

        assert!(store.remove_if_exists(&handle).await.unwrap());
        assert!(!handle.path.exists());

        // second removal is a no-op
        assert!(!store.remove_if_exists(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        // shared dir path runs through a regular file
        let store = PayloadStore::new(blocker.join("shared"));
        let handle = store.allocate(Uuid::new_v4(), 1);
        let err = store.write(&handle, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::ExecutionError::Store(StoreError::CreateDir { .. })
        ));
    }
}
