//! Segment file mutation

use crate::common::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Run `query` against the segment at `path` in one transaction.
/// Either every statement lands or none does. The segment file must already
/// be on disk; writes never create one.
pub fn execute_write(path: &Path, query: &str) -> Result<()> {
    if !path.is_file() {
        return Err(crate::Error::SegmentNotLocal(path.display().to_string()));
    }
    let mut conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let tx = conn.transaction()?;
    tx.execute_batch(query)?;
    tx.commit()?;
    Ok(())
}

/// [`execute_write`] off the async runtime
pub async fn execute_write_blocking(path: PathBuf, query: String) -> Result<()> {
    tokio::task::spawn_blocking(move || execute_write(&path, &query))
        .await
        .map_err(|e| crate::Error::Internal(format!("write task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn segment(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("seg1.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (a INTEGER)")
            .unwrap();
        path
    }

    fn count(path: &Path) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_execute_write() {
        let dir = TempDir::new().unwrap();
        let path = segment(&dir);
        execute_write(&path, "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2)").unwrap();
        assert_eq!(count(&path), 2);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = segment(&dir);

        let result = execute_write(&path, "INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2)");
        assert!(matches!(result, Err(crate::Error::Sqlite(_))));
        assert_eq!(count(&path), 0);
    }

    #[test]
    fn test_missing_segment_not_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s9.sqlite");

        let result = execute_write(&path, "INSERT INTO t VALUES (1)");
        assert!(matches!(result, Err(crate::Error::SegmentNotLocal(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_execute_write_blocking() {
        let dir = TempDir::new().unwrap();
        let path = segment(&dir);
        execute_write_blocking(path.clone(), "INSERT INTO t VALUES (7)".into())
            .await
            .unwrap();
        assert_eq!(count(&path), 1);
    }
}
