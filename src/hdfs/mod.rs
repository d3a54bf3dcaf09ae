//! Segment source of truth
//!
//! Segment files live in a distributed filesystem. The sync processes only
//! need two things from it: a listing with byte lengths, and a way to copy
//! files down to local disk.

pub mod local;
pub mod webhdfs;

pub use local::LocalDirSource;
pub use webhdfs::WebHdfsClient;

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One file in the watched directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSegmentFile {
    pub path: String,
    pub length: u64,
}

impl RemoteSegmentFile {
    /// Segment id: the file name without its extension
    pub fn segment_id(&self) -> String {
        segment_id_from_path(&self.path)
    }
}

/// Derive a segment id from a file path ("/data/abc.sqlite" -> "abc")
pub fn segment_id_from_path(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

/// Result of copying one file; copy errors are reported per file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub path: String,
    pub error: Option<String>,
}

impl CopyOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// List the segment files in the watched directory
    async fn list(&self) -> Result<Vec<RemoteSegmentFile>>;

    /// Copy the given remote paths into `dest_dir`, overwriting local copies
    async fn copy_to_local(&self, sources: &[String], dest_dir: &Path) -> Result<Vec<CopyOutcome>>;

    /// Remote path of a segment file
    fn segment_path(&self, segment_id: &str) -> String;
}
