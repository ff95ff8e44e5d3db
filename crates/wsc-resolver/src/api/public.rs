//! REST backend under `{host}/public-api/v1`

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use wsc_core::traits::{SessionTokenProvider, WorkspaceApi};
use wsc_core::types::{RegisteredKey, WorkspacePhase, WorkspaceStatus};
use wsc_core::ResolveError;

use super::{check_status, http_error, ApiClient};

const PREFIX: &str = "/public-api/v1";

#[derive(Debug, Deserialize)]
struct GetWorkspaceResponse {
    workspace: Workspace,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Workspace {
    workspace_id: String,
    #[serde(default)]
    status: Option<WorkspaceState>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceState {
    #[serde(default)]
    instance: Option<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    instance_id: String,
    status: InstanceStatus,
}

#[derive(Debug, Deserialize)]
struct InstanceStatus {
    phase: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerTokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SshKeysResponse {
    #[serde(default)]
    keys: Vec<RegisteredKey>,
}

impl From<Workspace> for WorkspaceStatus {
    fn from(ws: Workspace) -> Self {
        match ws.status.and_then(|s| s.instance) {
            Some(instance) => WorkspaceStatus {
                workspace_id: ws.workspace_id,
                instance_id: Some(instance.instance_id),
                phase: WorkspacePhase::parse(&instance.status.phase),
                workspace_url: instance.status.url.filter(|u| !u.is_empty()),
            },
            None => WorkspaceStatus {
                workspace_id: ws.workspace_id,
                instance_id: None,
                phase: WorkspacePhase::Stopped,
                workspace_url: None,
            },
        }
    }
}

/// Public API client
pub struct PublicApi {
    client: ApiClient,
}

impl PublicApi {
    pub fn new(host: &str, tokens: Arc<dyn SessionTokenProvider>) -> Self {
        Self {
            client: ApiClient::new(host, tokens),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ResolveError> {
        let token = self.client.token().await?;
        let url = self.client.url(&format!("{}{}", PREFIX, path));
        let response = self
            .client
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| http_error(path, e))?;
        let response = check_status(path, response).await?;
        response.json().await.map_err(|e| http_error(path, e))
    }
}

#[async_trait]
impl WorkspaceApi for PublicApi {
    async fn workspace_status(&self, workspace_id: &str) -> Result<WorkspaceStatus, ResolveError> {
        let response: GetWorkspaceResponse =
            self.get(&format!("/workspaces/{}", workspace_id)).await?;
        Ok(response.workspace.into())
    }

    async fn owner_token(&self, workspace_id: &str) -> Result<String, ResolveError> {
        let response: OwnerTokenResponse = self
            .get(&format!("/workspaces/{}/owner-token", workspace_id))
            .await?;
        Ok(response.token)
    }

    async fn registered_keys(&self) -> Result<Vec<RegisteredKey>, ResolveError> {
        let response: SshKeysResponse = self.get("/user/ssh-keys").await?;
        Ok(response.keys)
    }

    async fn send_heartbeat(&self, instance_id: &str, was_closed: bool) -> Result<(), ResolveError> {
        let path = format!("/instances/{}/heartbeat", instance_id);
        let token = self.client.token().await?;
        let response = self
            .client
            .http
            .post(self.client.url(&format!("{}{}", PREFIX, path)))
            .bearer_auth(token)
            .json(&json!({ "wasClosed": was_closed }))
            .send()
            .await
            .map_err(|e| http_error(&path, e))?;
        check_status(&path, response).await?;
        Ok(())
    }
}
