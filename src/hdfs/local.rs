//! Segment source backed by a local (or mounted) directory

use super::{CopyOutcome, RemoteSegmentFile, SegmentSource};
use crate::common::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Temporary name used while a copy is in flight; renamed over the
/// destination only once the whole file is down.
pub(crate) fn partial_path(dest_dir: &Path, file_name: &str) -> PathBuf {
    dest_dir.join(format!(".{}.partial", file_name))
}

/// Drop what a failed copy left behind
pub(crate) async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not remove {}: {}", partial.display(), e);
        }
    }
}

pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub struct LocalDirSource {
    root: PathBuf,
    extension: String,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    async fn copy_one(&self, source: &str, dest_dir: &Path) -> Result<()> {
        let name = file_name(source);
        let partial = partial_path(dest_dir, name);
        let copied = copy_then_rename(source, &partial, &dest_dir.join(name)).await;
        if copied.is_err() {
            discard_partial(&partial).await;
        }
        copied
    }
}

async fn copy_then_rename(source: &str, partial: &Path, dest: &Path) -> Result<()> {
    tokio::fs::copy(source, partial).await?;
    tokio::fs::rename(partial, dest).await?;
    Ok(())
}

#[async_trait]
impl SegmentSource for LocalDirSource {
    async fn list(&self) -> Result<Vec<RemoteSegmentFile>> {
        let suffix = format!(".{}", self.extension);
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path().to_string_lossy().into_owned();
            if path.ends_with(&suffix) {
                files.push(RemoteSegmentFile {
                    path,
                    length: metadata.len(),
                });
            }
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn copy_to_local(&self, sources: &[String], dest_dir: &Path) -> Result<Vec<CopyOutcome>> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let mut outcomes = Vec::with_capacity(sources.len());
        for source in sources {
            let error = self
                .copy_one(source, dest_dir)
                .await
                .err()
                .map(|e| e.to_string());
            outcomes.push(CopyOutcome {
                path: source.clone(),
                error,
            });
        }
        Ok(outcomes)
    }

    fn segment_path(&self, segment_id: &str) -> String {
        self.root
            .join(format!("{}.{}", segment_id, self.extension))
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_and_copy() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(remote.path().join("b.sqlite"), b"bbbb").unwrap();
        std::fs::write(remote.path().join("a.sqlite"), b"aa").unwrap();
        std::fs::write(remote.path().join("notes.txt"), b"ignored").unwrap();

        let source = LocalDirSource::new(remote.path(), "sqlite");
        let listing = source.list().await.unwrap();
        let ids: Vec<String> = listing.iter().map(|f| f.segment_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(listing[1].length, 4);

        let outcomes = source
            .copy_to_local(&[source.segment_path("b")], local.path())
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());
        assert_eq!(std::fs::read(local.path().join("b.sqlite")).unwrap(), b"bbbb");
    }

    #[tokio::test]
    async fn test_copy_missing_reports_error() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let source = LocalDirSource::new(remote.path(), "sqlite");

        let outcomes = source
            .copy_to_local(&[source.segment_path("gone")], local.path())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].error.is_some());
        assert!(!local.path().join("gone.sqlite").exists());
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(remote.path().join("a.sqlite"), b"aa").unwrap();
        // a non-empty directory in the way makes the final rename fail
        let blocker = local.path().join("a.sqlite");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let source = LocalDirSource::new(remote.path(), "sqlite");
        let outcomes = source
            .copy_to_local(&[source.segment_path("a")], local.path())
            .await
            .unwrap();
        assert!(outcomes[0].error.is_some());
        assert!(!partial_path(local.path(), "a.sqlite").exists());
        assert!(blocker.join("keep").exists());
    }
}
