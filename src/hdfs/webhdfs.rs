//! WebHDFS client: directory listing and streamed downloads

use super::local::{discard_partial, file_name, partial_path};
use super::{CopyOutcome, RemoteSegmentFile, SegmentSource};
use crate::common::{encode_path, HdfsSettings, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListStatusResponse {
    file_statuses: FileStatuses,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileStatuses {
    file_status: Vec<FileStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileStatus {
    path_suffix: String,
    length: u64,
    #[serde(rename = "type")]
    kind: String,
}

pub struct WebHdfsClient {
    http: Client,
    base_url: String,
    path: String,
    extension: String,
}

impl WebHdfsClient {
    pub fn new(settings: &HdfsSettings, extension: impl Into<String>) -> Result<Self> {
        Self::with_base_url(
            format!("http://{}:{}", settings.host, settings.port),
            settings.path.clone(),
            extension,
        )
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        path: impl Into<String>,
        extension: impl Into<String>,
    ) -> Result<Self> {
        // no overall timeout: segment downloads can be large
        let http = Client::builder().connect_timeout(LIST_TIMEOUT).build()?;
        let path = path.into();
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            path: format!("/{}", path.trim_matches('/')),
            extension: extension.into(),
        })
    }

    fn url(&self, path: &str, op: &str) -> String {
        format!(
            "{}/webhdfs/v1{}?op={}",
            self.base_url,
            encode_path(path),
            op
        )
    }

    async fn copy_one(&self, source: &str, dest_dir: &Path) -> Result<()> {
        let name = file_name(source);
        let partial = partial_path(dest_dir, name);
        let copied = match self.download(source, &partial).await {
            Ok(()) => tokio::fs::rename(&partial, dest_dir.join(name))
                .await
                .map_err(crate::Error::from),
            Err(e) => Err(e),
        };
        if copied.is_err() {
            discard_partial(&partial).await;
        }
        copied
    }

    /// Stream `source` into `partial`
    async fn download(&self, source: &str, partial: &Path) -> Result<()> {
        let url = self.url(source, "OPEN");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(crate::Error::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(partial).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl SegmentSource for WebHdfsClient {
    async fn list(&self) -> Result<Vec<RemoteSegmentFile>> {
        let url = self.url(&self.path, "LISTSTATUS");
        let response = self
            .http
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| crate::Error::SegmentSource(format!("listing {}: {}", self.path, e)))?;
        if !response.status().is_success() {
            return Err(crate::Error::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            });
        }
        let listing: ListStatusResponse = response.json().await?;
        Ok(listing_to_files(&self.path, &self.extension, listing))
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
        format!(
            "{}/{}.{}",
            self.path.trim_end_matches('/'),
            segment_id,
            self.extension
        )
    }
}

fn listing_to_files(dir: &str, extension: &str, listing: ListStatusResponse) -> Vec<RemoteSegmentFile> {
    let suffix = format!(".{}", extension);
    let dir = dir.trim_end_matches('/');
    listing
        .file_statuses
        .file_status
        .into_iter()
        .filter(|status| status.kind == "FILE" && status.path_suffix.ends_with(&suffix))
        .map(|status| RemoteSegmentFile {
            path: format!("{}/{}", dir, status.path_suffix),
            length: status.length,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tempfile::TempDir;

    async fn start_namenode() -> String {
        let app = Router::new().route("/webhdfs/v1/*path", get(|| async { "segment bytes" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_listing_filters_files() {
        let raw = r#"{"FileStatuses":{"FileStatus":[
            {"pathSuffix":"seg-1.sqlite","length":1024,"type":"FILE","owner":"hdfs"},
            {"pathSuffix":"archive","length":0,"type":"DIRECTORY"},
            {"pathSuffix":"readme.txt","length":12,"type":"FILE"}
        ]}}"#;
        let listing: ListStatusResponse = serde_json::from_str(raw).unwrap();
        let files = listing_to_files("/segments/", "sqlite", listing);
        assert_eq!(
            files,
            vec![RemoteSegmentFile {
                path: "/segments/seg-1.sqlite".to_string(),
                length: 1024,
            }]
        );
        assert_eq!(files[0].segment_id(), "seg-1");
    }

    #[test]
    fn test_urls() {
        let client =
            WebHdfsClient::with_base_url("http://namenode:50070/", "segments/", "sqlite").unwrap();
        assert_eq!(client.segment_path("seg-1"), "/segments/seg-1.sqlite");
        assert_eq!(
            client.url("/segments", "LISTSTATUS"),
            "http://namenode:50070/webhdfs/v1/segments?op=LISTSTATUS"
        );
    }

    #[tokio::test]
    async fn test_copy_streams_to_destination() {
        let client = WebHdfsClient::with_base_url(start_namenode().await, "/segments", "sqlite").unwrap();
        let local = TempDir::new().unwrap();

        let outcomes = client
            .copy_to_local(&[client.segment_path("seg-1")], local.path())
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());
        assert_eq!(
            std::fs::read(local.path().join("seg-1.sqlite")).unwrap(),
            b"segment bytes"
        );
        assert!(!partial_path(local.path(), "seg-1.sqlite").exists());
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial() {
        let client = WebHdfsClient::with_base_url(start_namenode().await, "/segments", "sqlite").unwrap();
        let local = TempDir::new().unwrap();
        // a non-empty directory in the way makes the final rename fail
        let blocker = local.path().join("seg-1.sqlite");
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let outcomes = client
            .copy_to_local(&[client.segment_path("seg-1")], local.path())
            .await
            .unwrap();
        assert!(outcomes[0].error.is_some());
        assert!(!partial_path(local.path(), "seg-1.sqlite").exists());
    }
}
