// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable fallback for batches the collector path gave up on.
//!
//! [`DirectoryFailoverSink`] writes each batch to its own file:
//!
//! ```text
//!   <directory>/batch-<unix_nanos>-<batch_id>.log
//! ```
//!
//! The content is written under a `.tmp` name and renamed once complete, so a
//! reader scanning the directory never sees a partial batch.

use crate::batch::Batch;
use crate::errors::FailoverError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[async_trait]
pub trait FailoverSink: Send + Sync {
    async fn store(&self, batch: &Batch) -> Result<(), FailoverError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryFailoverSink {
    directory: PathBuf,
}

impl DirectoryFailoverSink {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_name(batch: &Batch) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("batch-{nanos}-{}.log", batch.id())
    }

    /// Writes `batch` under a temporary name next to `path`, then renames it.
    /// The temporary file is removed again if any step fails.
    async fn persist(batch: &Batch, path: &Path) -> Result<(), FailoverError> {
        let tmp_path = path.with_extension("log.tmp");
        let result = write_then_rename(batch, &tmp_path, path).await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp_path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("LOGS | Unable to remove {}: {}", tmp_path.display(), e);
                }
            }
        }
        result.map_err(FailoverError::from)
    }
}

async fn write_then_rename(batch: &Batch, tmp_path: &Path, path: &Path) -> io::Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(&batch.to_payload()).await?;
    file.write_all(b"\n").await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp_path, path).await
}

#[async_trait]
impl FailoverSink for DirectoryFailoverSink {
    async fn store(&self, batch: &Batch) -> Result<(), FailoverError> {
        if batch.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.directory).await?;

        let path = self.directory.join(Self::file_name(batch));
        Self::persist(batch, &path).await?;

        debug!(
            "LOGS | Stored batch {} ({} records) in {}",
            batch.id(),
            batch.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn stored_files(directory: &Path) -> Vec<PathBuf> {
        let mut entries = fs::read_dir(directory).await.unwrap();
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            files.push(entry.path());
        }
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_store_writes_one_file_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryFailoverSink::new(dir.path().join("failover"));

        let first = Batch::new(1, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let second = Batch::new(2, vec![Bytes::from_static(b"c")]);
        sink.store(&first).await.unwrap();
        sink.store(&second).await.unwrap();

        let files = stored_files(sink.directory()).await;
        assert_eq!(files.len(), 2);
        assert!(files
            .iter()
            .all(|f| f.extension().and_then(|e| e.to_str()) == Some("log")));

        let mut contents = Vec::new();
        for file in files {
            contents.push(fs::read_to_string(file).await.unwrap());
        }
        contents.sort();
        assert_eq!(contents, vec!["a\nb\n".to_string(), "c\n".to_string()]);
    }

    #[tokio::test]
    async fn test_store_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectoryFailoverSink::new(dir.path().join("unused"));
        sink.store(&Batch::new(1, Vec::new())).await.unwrap();
        assert!(!sink.directory().exists());
    }

    #[tokio::test]
    async fn test_store_fails_when_directory_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let sink = DirectoryFailoverSink::new(&blocker);
        let result = sink
            .store(&Batch::new(1, vec![Bytes::from_static(b"a")]))
            .await;
        assert!(matches!(result, Err(FailoverError::Io(_))));
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory where the batch file should land
        let target = dir.path().join("occupied.log");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        let batch = Batch::new(1, vec![Bytes::from_static(b"a")]);
        let result = DirectoryFailoverSink::persist(&batch, &target).await;

        assert!(matches!(result, Err(FailoverError::Io(_))));
        assert!(!dir.path().join("occupied.log.tmp").exists());
        assert!(target.join("keep").exists());
    }
}
