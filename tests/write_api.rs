//! Write API: verb filter, write lock and execution

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{join_host, registry, settings};
use rusqlite::Connection;
use segmentd::consul::{MemoryAgent, MemoryCluster};
use segmentd::coordinator::Segment;
use segmentd::volume::{create_router, WriteServer};
use segmentd::SyncMode;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct Fixture {
    dir: TempDir,
    router: axum::Router,
    db: std::path::PathBuf,
}

async fn fixture() -> Fixture {
    let cluster = Arc::new(MemoryCluster::new());
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("s1.sqlite");
    Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE t (a INTEGER)")
        .unwrap();

    join_host(&cluster, "host-b", 1_000_000, 0).await;
    let master = registry(&cluster, "master");
    master
        .assign("host-a", &Segment::new("s1", Some(8192)))
        .await
        .unwrap();
    // Claimed here but not yet copied
    master
        .assign("host-a", &Segment::new("s9", Some(8192)))
        .await
        .unwrap();
    master
        .assign("host-b", &Segment::new("s3", Some(8192)))
        .await
        .unwrap();

    let settings = Arc::new(settings("host-a", SyncMode::Write, dir.path()));
    let client = Arc::new(MemoryAgent::new("host-a", cluster));
    let router = create_router(WriteServer::new(settings, client).state());
    Fixture {
        dir,
        router,
        db,
    }
}

async fn post(router: &axum::Router, host: &str, query: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("host", host)
        .body(Body::from(query.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn rows(db: &Path) -> i64 {
    Connection::open(db)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_insert_accepted() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s1.write.local", "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
    assert_eq!(rows(&fx.db), 1);
}

#[tokio::test]
async fn test_select_rejected() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s1.write.local", "SELECT * FROM t").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("500 Server Error:"));
    assert!(body.contains("SELECT"));
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s1.write.local", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("No query provided"));
}

#[tokio::test]
async fn test_no_write_lock() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s2.write.local", "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("no write lock"));
}

#[tokio::test]
async fn test_lock_held_by_another_host() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s3.write.local", "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("host-b"));
}

#[tokio::test]
async fn test_write_to_segment_not_yet_copied() {
    let fx = fixture().await;
    let (status, body) = post(&fx.router, "s9.write.local", "INSERT INTO t VALUES (1)").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("not on this host"));
    assert!(!fx.dir.path().join("s9.sqlite").exists());
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let fx = fixture().await;
    let (status, _) = post(
        &fx.router,
        "s1.write.local",
        "INSERT INTO t VALUES (1); INSERT INTO missing VALUES (2)",
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(rows(&fx.db), 0);
}

#[tokio::test]
async fn test_any_path_accepted() {
    let fx = fixture().await;
    let request = Request::builder()
        .method("POST")
        .uri("/anything/here")
        .header("host", "s1.write.local")
        .body(Body::from("UPDATE t SET a = 2"))
        .unwrap();
    let response = fx.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
