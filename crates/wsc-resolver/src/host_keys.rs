//! Trusted host keys published by a running workspace

use std::time::Duration;

use reqwest::{Client, Url};
use tracing::{debug, warn};
use wsc_core::types::{HostKeyRecord, WorkspaceStatus};
use wsc_core::ResolveError;

/// `{scheme}://{workspaceHost}[:port]/_ssh/host_keys` for a workspace
pub fn host_keys_url(status: &WorkspaceStatus) -> Option<String> {
    let url = Url::parse(status.workspace_url.as_deref()?).ok()?;
    let host = status.workspace_host()?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };
    Some(format!("{}://{}/_ssh/host_keys", url.scheme(), authority))
}

/// Fetch the workspace's host keys. Any failure, including an empty list,
/// means the host has no usable SSH gateway.
pub async fn fetch_host_keys(
    http: &Client,
    status: &WorkspaceStatus,
    timeout: Duration,
) -> Result<Vec<HostKeyRecord>, ResolveError> {
    let no_gateway = || {
        ResolveError::NoSshGateway(
            status
                .workspace_host()
                .unwrap_or_else(|| status.workspace_id.clone()),
        )
    };
    let url = host_keys_url(status).ok_or_else(no_gateway)?;

    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            warn!(url = %url, "Host key fetch failed: {}", e);
            no_gateway()
        })?;
    if !response.status().is_success() {
        warn!(url = %url, status = %response.status(), "Host key fetch rejected");
        return Err(no_gateway());
    }

    let keys: Vec<HostKeyRecord> = response.json().await.map_err(|e| {
        warn!(url = %url, "Malformed host key list: {}", e);
        no_gateway()
    })?;
    if keys.is_empty() {
        return Err(no_gateway());
    }

    debug!(url = %url, count = keys.len(), "Fetched workspace host keys");
    Ok(keys)
}
