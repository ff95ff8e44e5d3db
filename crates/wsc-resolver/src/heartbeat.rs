//! Workspace heartbeats for an open connection
//!
//! The editor keeps a workspace instance alive by reporting activity at a
//! fixed interval. The instance comes from the destination record persisted
//! by the resolver, so heartbeats survive editor reloads.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsc_core::store::keys;
use wsc_core::traits::WorkspaceApi;
use wsc_core::types::DestinationRecord;
use wsc_core::{KeyValueStore, ResolveError, StoreExt};

/// Why the heartbeat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEnd {
    /// Caller cancelled; a closing heartbeat was sent
    Closed,
    /// Workspace left the running phase
    WorkspaceStopped,
}

/// Counters from one heartbeat run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub sent: u32,
    pub failed: u32,
    pub end: HeartbeatEnd,
}

pub struct HeartbeatService {
    api: Arc<dyn WorkspaceApi>,
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
}

impl HeartbeatService {
    pub fn new(api: Arc<dyn WorkspaceApi>, store: Arc<dyn KeyValueStore>, interval: Duration) -> Self {
        Self {
            api,
            store,
            interval,
        }
    }

    /// Send heartbeats for the destination persisted under `encoded` until
    /// `cancel` fires or the workspace stops running
    pub async fn run(
        &self,
        encoded: &str,
        cancel: &CancellationToken,
    ) -> Result<HeartbeatStats, ResolveError> {
        let record: DestinationRecord = self
            .store
            .get_json(&keys::destination(encoded))
            .map_err(|e| ResolveError::lock_failed(&e))?
            .ok_or_else(|| {
                ResolveError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no destination recorded for {}", encoded),
                ))
            })?;
        let workspace_id = record.params.workspace_id.as_str();
        let mut instance_id = record.params.instance_id.clone();

        info!(
            workspace_id = %workspace_id,
            strategy = %record.strategy,
            interval = ?self.interval,
            "Starting heartbeats"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sent = 0u32;
        let mut failed = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.api.workspace_status(workspace_id).await {
                Ok(status) if !status.phase.is_running() => {
                    info!(workspace_id = %workspace_id, phase = %status.phase, "Workspace stopped, ending heartbeats");
                    return Ok(HeartbeatStats {
                        sent,
                        failed,
                        end: HeartbeatEnd::WorkspaceStopped,
                    });
                }
                Ok(status) => {
                    if let Some(current) = status.instance_id {
                        if current != instance_id {
                            debug!(workspace_id = %workspace_id, instance_id = %current, "Instance changed");
                            instance_id = current;
                        }
                    }
                }
                Err(e) => warn!(workspace_id = %workspace_id, "Status check failed: {}", e),
            }
            if cancel.is_cancelled() {
                break;
            }

            match self.api.send_heartbeat(&instance_id, false).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(instance_id = %instance_id, "Heartbeat failed: {}", e);
                }
            }
        }

        match self.api.send_heartbeat(&instance_id, true).await {
            Ok(()) => sent += 1,
            Err(e) => {
                failed += 1;
                warn!(instance_id = %instance_id, "Closing heartbeat failed: {}", e);
            }
        }
        info!(workspace_id = %workspace_id, sent, failed, "Heartbeats stopped");
        Ok(HeartbeatStats {
            sent,
            failed,
            end: HeartbeatEnd::Closed,
        })
    }
}
