//! Consul HTTP client against a stub agent

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use segmentd::consul::{
    check_coordination_health, CheckStatus, ConsulClient, CoordinationClient,
};
use segmentd::Error;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Stub {
    puts: Arc<Mutex<Vec<(String, String)>>>,
    deletes: Arc<Mutex<Vec<String>>>,
}

async fn kv_get(
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let recurse = params.get("recurse").map(String::as_str) == Some("true");
    match (key.as_str(), recurse) {
        // "1000" and "512"
        ("host-a", false) => (
            StatusCode::OK,
            Json(json!([{"Key": "host-a", "Value": "MTAwMA==", "CreateIndex": 5}])),
        ),
        ("host-a/", true) => (
            StatusCode::OK,
            Json(json!([
                {"Key": "host-a/s2", "Value": "NTEy", "CreateIndex": 9},
                {"Key": "host-a/s1", "Value": "NTEy", "CreateIndex": 12}
            ])),
        ),
        _ => (StatusCode::NOT_FOUND, Json(json!(null))),
    }
}

async fn kv_put(State(stub): State<Stub>, Path(key): Path<String>, body: Bytes) -> &'static str {
    let value = String::from_utf8_lossy(&body).into_owned();
    stub.puts.lock().unwrap().push((key, value));
    "true"
}

async fn kv_delete(State(stub): State<Stub>, Path(key): Path<String>) -> &'static str {
    stub.deletes.lock().unwrap().push(key);
    "true"
}

async fn health_service(
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let passing = params.get("passing").map(String::as_str) == Some("true");
    let tagged = params.get("tag").map(String::as_str) == Some("s1");
    if name != "segmentd-read-segments" || !passing || !tagged {
        return Json(json!([]));
    }
    Json(json!([{
        "Node": {"Node": "host-a", "Address": "10.0.0.7"},
        "Service": {"ID": "segmentd/read/s1", "Service": "segmentd-read-segments",
                    "Tags": ["s1"], "Address": "", "Port": 6222}
    }]))
}

async fn check_pass(Path(id): Path<String>) -> StatusCode {
    if id == "service:segmentd/nodes/host-a" {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn agent_checks() -> Json<serde_json::Value> {
    Json(json!({
        "service:segmentd/nodes/host-a": {
            "Node": "host-a",
            "CheckID": "service:segmentd/nodes/host-a",
            "Name": "Node Health Check for \"host-a\"",
            "Status": "passing",
            "Notes": "",
            "ServiceID": "segmentd/nodes/host-a"
        }
    }))
}

async fn start_stub() -> (String, Stub) {
    let stub = Stub::default();
    let app = Router::new()
        .route("/v1/kv/*key", get(kv_get).put(kv_put).delete(kv_delete))
        .route("/v1/health/service/:name", get(health_service))
        .route("/v1/agent/check/pass/*id", put(check_pass))
        .route("/v1/agent/checks", get(agent_checks))
        .with_state(stub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), stub)
}

#[tokio::test]
async fn test_kv_roundtrip() {
    let (url, stub) = start_stub().await;
    let client = ConsulClient::with_base_url(url).unwrap();

    let quota = client.kv_get("host-a").await.unwrap().unwrap();
    assert_eq!(quota.value, "1000");
    assert_eq!(quota.create_index, 5);
    assert!(client.kv_get("missing").await.unwrap().is_none());

    let scanned = client.kv_scan("host-a/").await.unwrap();
    let keys: Vec<&str> = scanned.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["host-a/s1", "host-a/s2"]);

    client.kv_put("host-a/s3", "2048").await.unwrap();
    assert_eq!(
        stub.puts.lock().unwrap().as_slice(),
        &[("host-a/s3".to_string(), "2048".to_string())]
    );
}

#[tokio::test]
async fn test_healthy_service_filters() {
    let (url, _) = start_stub().await;
    let client = ConsulClient::with_base_url(url).unwrap();

    let up = client
        .healthy_service("segmentd-read-segments", Some("s1"))
        .await
        .unwrap();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].node, "host-a");
    // Falls back to the node address when the service has none
    assert_eq!(up[0].address, "10.0.0.7");

    let none = client
        .healthy_service("segmentd-read-segments", Some("s9"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_checks() {
    let (url, _) = start_stub().await;
    let client = ConsulClient::with_base_url(url).unwrap();

    client
        .ttl_pass("service:segmentd/nodes/host-a")
        .await
        .unwrap();
    let err = client
        .ttl_pass("service:segmentd/read/s1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownCheck(_)));

    let check = client
        .health_check("service:segmentd/nodes/host-a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(check.status, CheckStatus::Passing);
    assert_eq!(check.service_id.as_deref(), Some("segmentd/nodes/host-a"));
    assert!(client
        .health_check("service:segmentd/read/s1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_canary_against_agent() {
    let (url, stub) = start_stub().await;
    let client = ConsulClient::with_base_url(url).unwrap();

    check_coordination_health(&client).await.unwrap();
    let puts = stub.puts.lock().unwrap().clone();
    let deletes = stub.deletes.lock().unwrap().clone();
    assert_eq!(puts.len(), 1);
    assert_eq!(deletes, vec![puts[0].0.clone()]);
}

#[tokio::test]
async fn test_unreachable_agent() {
    // Nothing listens on port 9 locally
    let client = ConsulClient::with_base_url("http://127.0.0.1:9").unwrap();
    let err = check_coordination_health(&client).await.unwrap_err();
    assert!(matches!(err, Error::CoordinationUnavailable(_)));
}
