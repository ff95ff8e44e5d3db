//! Both workspace API backends against fake HTTP services

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use wsc_core::config::{ApiFlavor, ResolverConfig};
use wsc_core::traits::{SessionTokenProvider, WorkspaceApi};
use wsc_core::types::WorkspacePhase;
use wsc_core::ResolveError;
use wsc_resolver::{select_backend, PublicApi, ServerApi};

const SESSION: &str = "session-abc";

struct StaticToken;

#[async_trait]
impl SessionTokenProvider for StaticToken {
    async fn session_token(&self, _host: &str) -> Result<String, ResolveError> {
        Ok(SESSION.to_string())
    }
}

#[derive(Default)]
struct Recorded {
    calls: Mutex<Vec<Value>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", SESSION))
        .unwrap_or(false)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn rpc(
    State(state): State<Arc<Recorded>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.calls.lock().unwrap().push(body.clone());
    let id = body["id"].clone();
    let result = match body["method"].as_str().unwrap_or_default() {
        "getWorkspace" => json!({
            "workspace": { "id": body["params"][0] },
            "latestInstance": {
                "id": "i-1",
                "ideUrl": "https://ws-1.eu.example.dev",
                "status": { "phase": "running" }
            }
        }),
        "getOwnerToken" => json!("owner-1"),
        "getSSHPublicKeys" => json!([{ "name": "laptop", "fingerprint": "abc" }]),
        "sendHeartBeat" => Value::Null,
        _ => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" }
            }))
            .into_response()
        }
    };
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

#[tokio::test]
async fn test_server_api_round_trip() {
    let recorded = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/api/rpc", post(rpc))
        .with_state(Arc::clone(&recorded));
    let addr = serve(app).await;
    let api = ServerApi::new(&format!("http://{}", addr), Arc::new(StaticToken));

    let status = api.workspace_status("ws-1").await.unwrap();
    assert_eq!(status.phase, WorkspacePhase::Running);
    assert_eq!(status.instance_id.as_deref(), Some("i-1"));
    assert_eq!(status.workspace_host().as_deref(), Some("eu.example.dev"));

    assert_eq!(api.owner_token("ws-1").await.unwrap(), "owner-1");
    let keys = api.registered_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, "laptop");
    api.send_heartbeat("i-1", true).await.unwrap();

    let calls = recorded.calls.lock().unwrap();
    let methods: Vec<&str> = calls.iter().filter_map(|c| c["method"].as_str()).collect();
    assert_eq!(
        methods,
        vec!["getWorkspace", "getOwnerToken", "getSSHPublicKeys", "sendHeartBeat"]
    );
    assert_eq!(calls[3]["params"][0]["wasClosed"], json!(true));
    assert_eq!(calls[3]["params"][0]["instanceId"], json!("i-1"));
}

#[tokio::test]
async fn test_server_api_surfaces_http_failures() {
    let app = Router::new().route(
        "/api/rpc",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let addr = serve(app).await;
    let api = ServerApi::new(&format!("http://{}", addr), Arc::new(StaticToken));

    let err = api.owner_token("ws-1").await.unwrap_err();
    match err {
        ResolveError::Api(message) => {
            assert!(message.contains("502"));
            assert!(message.contains("upstream down"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

async fn public_workspace(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "workspace": {
            "workspaceId": id,
            "status": {
                "instance": {
                    "instanceId": "i-2",
                    "status": { "phase": "PHASE_STOPPED", "url": "" }
                }
            }
        }
    }))
    .into_response()
}

async fn public_heartbeat(
    State(state): State<Arc<Recorded>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    state
        .calls
        .lock()
        .unwrap()
        .push(json!({ "instance": id, "body": body }));
    StatusCode::NO_CONTENT
}

#[tokio::test]
async fn test_public_api_round_trip() {
    let recorded = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/public-api/v1/workspaces/:id", get(public_workspace))
        .route(
            "/public-api/v1/workspaces/:id/owner-token",
            get(|| async { Json(json!({ "token": "owner-2" })) }),
        )
        .route(
            "/public-api/v1/user/ssh-keys",
            get(|| async { Json(json!({ "keys": [] })) }),
        )
        .route("/public-api/v1/instances/:id/heartbeat", post(public_heartbeat))
        .with_state(Arc::clone(&recorded));
    let addr = serve(app).await;
    let api = PublicApi::new(&format!("http://{}", addr), Arc::new(StaticToken));

    let status = api.workspace_status("ws-2").await.unwrap();
    assert_eq!(status.workspace_id, "ws-2");
    assert_eq!(status.phase, WorkspacePhase::Stopped);
    assert_eq!(status.workspace_url, None);

    assert_eq!(api.owner_token("ws-2").await.unwrap(), "owner-2");
    assert!(api.registered_keys().await.unwrap().is_empty());
    api.send_heartbeat("i-2", false).await.unwrap();

    let calls = recorded.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![json!({ "instance": "i-2", "body": { "wasClosed": false } })]
    );
}

#[tokio::test]
async fn test_select_backend_follows_config() {
    let recorded = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/api/rpc", post(rpc))
        .with_state(Arc::clone(&recorded));
    let addr = serve(app).await;

    let config = ResolverConfig {
        host: format!("http://{}", addr),
        api: ApiFlavor::Server,
        ..ResolverConfig::default()
    };
    let api = select_backend(&config, Arc::new(StaticToken));
    assert_eq!(api.owner_token("ws-1").await.unwrap(), "owner-1");
    assert_eq!(recorded.calls.lock().unwrap().len(), 1);
}
