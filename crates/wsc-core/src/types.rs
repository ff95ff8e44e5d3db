//! Core domain types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifies the workspace a resolution attempt targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub workspace_id: String,
    /// Refreshed across reconnects
    pub instance_id: String,
    /// Workspace service host, e.g. `https://example.dev`
    pub host: String,
    #[serde(default)]
    pub debug_workspace: bool,
}

impl ConnectionParams {
    pub fn new(
        workspace_id: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            instance_id: instance_id.into(),
            host: host.into(),
            debug_workspace: false,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug_workspace = debug;
        self
    }

    /// Authority (`host[:port]`) of the service host
    pub fn authority(&self) -> String {
        host_authority(&self.host)
    }

    /// SSH user for the workspace gateway
    pub fn gateway_user(&self) -> String {
        if self.debug_workspace {
            format!("debug-{}", self.workspace_id)
        } else {
            self.workspace_id.clone()
        }
    }
}

/// An installed helper binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalHelperInstallation {
    pub binary_path: PathBuf,
    /// Version marker from the download endpoint; absent for user-pinned binaries
    #[serde(default)]
    pub etag: Option<String>,
}

/// A running helper instance, valid only while `pid` is alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalHelperConfig {
    pub host: String,
    pub generated_ssh_config_path: PathBuf,
    pub api_port: u16,
    pub pid: u32,
    pub log_path: PathBuf,
}

/// Advisory lease in the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub owner_value: String,
    /// Unix millis after which the lease is stale
    pub deadline: u64,
    pub owner_pid: u32,
}

/// Trusted host key published by a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostKeyRecord {
    #[serde(rename = "type")]
    pub key_type: String,
    /// Base64 of the wire-format public key
    pub host_key: String,
}

/// Workspace lifecycle phase as reported by the workspace API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspacePhase {
    Preparing,
    Building,
    Pending,
    Creating,
    Initializing,
    Running,
    Interrupted,
    Stopping,
    Stopped,
    Unknown,
}

impl WorkspacePhase {
    /// Parse a phase name, tolerating `PHASE_`-prefixed upper-case forms
    pub fn parse(value: &str) -> Self {
        let normalized = value
            .trim()
            .trim_start_matches("PHASE_")
            .trim_start_matches("phase_")
            .to_ascii_lowercase();
        match normalized.as_str() {
            "preparing" => Self::Preparing,
            "building" | "imagebuild" | "image_build" => Self::Building,
            "pending" => Self::Pending,
            "creating" => Self::Creating,
            "initializing" => Self::Initializing,
            "running" => Self::Running,
            "interrupted" => Self::Interrupted,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Building => "building",
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Status of a workspace instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub instance_id: Option<String>,
    pub phase: WorkspacePhase,
    /// Public URL of the running instance, e.g. `https://ws-1.example.dev`
    pub workspace_url: Option<String>,
}

impl WorkspaceStatus {
    /// Host the workspace's own endpoints live on, with the leading
    /// workspace-id label removed: `ws-1.eu.example.dev` -> `eu.example.dev`
    pub fn workspace_host(&self) -> Option<String> {
        let url = self.workspace_url.as_deref()?;
        let host = reqwest::Url::parse(url).ok()?.host_str()?.to_string();
        match host.split_once('.') {
            Some((first, rest)) if first == self.workspace_id => Some(rest.to_string()),
            _ => Some(host),
        }
    }
}

/// Reachability strategy chosen for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    LocalSshProxy,
    Gateway,
    LocalHelper,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LocalSshProxy => "local-ssh-proxy",
            Self::Gateway => "gateway",
            Self::LocalHelper => "local-helper",
        };
        write!(f, "{}", s)
    }
}

/// Record persisted under `ssh-dest:{encoded}` for reconnection and heartbeats
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRecord {
    #[serde(flatten)]
    pub params: ConnectionParams,
    pub strategy: Strategy,
}

/// Key registered with the workspace service for the current user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    pub name: String,
    /// OpenSSH-style SHA256 fingerprint (without the `SHA256:` prefix)
    pub fingerprint: String,
}

/// Normalize a service host into its `host[:port]` authority.
///
/// Accepts full URLs or bare hosts; the result is lower-cased and suitable as
/// a store key suffix.
pub fn host_authority(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match reqwest::Url::parse(&with_scheme) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h.to_ascii_lowercase(), p),
            (Some(h), None) => h.to_ascii_lowercase(),
            _ => trimmed.to_ascii_lowercase(),
        },
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// Normalize a service host into a full `https://` URL without trailing slash
pub fn host_url(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}
