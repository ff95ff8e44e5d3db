//! Legacy JSON-RPC backend (`POST {host}/api/rpc`)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use wsc_core::traits::{SessionTokenProvider, WorkspaceApi};
use wsc_core::types::{RegisteredKey, WorkspacePhase, WorkspaceStatus};
use wsc_core::ResolveError;

use super::{check_status, http_error, ApiClient};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceInfo {
    workspace: WorkspaceBody,
    #[serde(default)]
    latest_instance: Option<InstanceBody>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceBody {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceBody {
    id: String,
    #[serde(default)]
    ide_url: Option<String>,
    status: InstanceStatus,
}

#[derive(Debug, Deserialize)]
struct InstanceStatus {
    phase: String,
}

impl From<WorkspaceInfo> for WorkspaceStatus {
    fn from(info: WorkspaceInfo) -> Self {
        match info.latest_instance {
            Some(instance) => WorkspaceStatus {
                workspace_id: info.workspace.id,
                instance_id: Some(instance.id),
                phase: WorkspacePhase::parse(&instance.status.phase),
                workspace_url: instance.ide_url.filter(|u| !u.is_empty()),
            },
            // Never started, or all instances gone
            None => WorkspaceStatus {
                workspace_id: info.workspace.id,
                instance_id: None,
                phase: WorkspacePhase::Stopped,
                workspace_url: None,
            },
        }
    }
}

/// JSON-RPC 2.0 client for the service's internal API
pub struct ServerApi {
    client: ApiClient,
    next_id: AtomicU64,
}

impl ServerApi {
    pub fn new(host: &str, tokens: Arc<dyn SessionTokenProvider>) -> Self {
        Self {
            client: ApiClient::new(host, tokens),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ResolveError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "Server API call");

        let token = self.client.token().await?;
        let response = self
            .client
            .http
            .post(self.client.url("/api/rpc"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error(method, e))?;
        let response = check_status(method, response).await?;
        let reply: RpcResponse = response.json().await.map_err(|e| http_error(method, e))?;

        if let Some(err) = reply.error {
            return Err(ResolveError::Api(format!(
                "{} failed ({}): {}",
                method, err.code, err.message
            )));
        }
        let result = reply.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| ResolveError::Api(format!("{}: malformed result: {}", method, e)))
    }
}

#[async_trait]
impl WorkspaceApi for ServerApi {
    async fn workspace_status(&self, workspace_id: &str) -> Result<WorkspaceStatus, ResolveError> {
        let info: WorkspaceInfo = self.call("getWorkspace", json!([workspace_id])).await?;
        Ok(info.into())
    }

    async fn owner_token(&self, workspace_id: &str) -> Result<String, ResolveError> {
        self.call("getOwnerToken", json!([workspace_id])).await
    }

    async fn registered_keys(&self) -> Result<Vec<RegisteredKey>, ResolveError> {
        self.call("getSSHPublicKeys", json!([])).await
    }

    async fn send_heartbeat(&self, instance_id: &str, was_closed: bool) -> Result<(), ResolveError> {
        let _: Value = self
            .call(
                "sendHeartBeat",
                json!([{ "instanceId": instance_id, "wasClosed": was_closed }]),
            )
            .await?;
        Ok(())
    }
}
