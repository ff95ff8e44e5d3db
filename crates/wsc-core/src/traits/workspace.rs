//! Workspace capability interface

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::types::{RegisteredKey, WorkspaceStatus};

/// Operations the resolver needs from the workspace service, independent of
/// which API shape backs them
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Current phase and URL of the workspace's latest instance
    async fn workspace_status(&self, workspace_id: &str) -> Result<WorkspaceStatus, ResolveError>;

    /// Token accepted as the gateway password for the workspace owner
    async fn owner_token(&self, workspace_id: &str) -> Result<String, ResolveError>;

    /// Public keys the current user registered with the service
    async fn registered_keys(&self) -> Result<Vec<RegisteredKey>, ResolveError>;

    /// Keep an instance alive; `was_closed` marks the final heartbeat
    async fn send_heartbeat(&self, instance_id: &str, was_closed: bool)
        -> Result<(), ResolveError>;
}
