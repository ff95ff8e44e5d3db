//! Heartbeat command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use wsc_core::config::ResolverConfig;
use wsc_resolver::{select_backend, HeartbeatEnd, HeartbeatService};

use super::{cancel_on_ctrl_c, open_store};
use crate::output::{print_info, print_success};
use crate::terminal::EnvTokenProvider;

/// Keep the workspace behind a resolved authority alive until Ctrl+C
pub async fn heartbeat_command(config: &ResolverConfig, encoded: &str) -> Result<()> {
    let service = HeartbeatService::new(
        select_backend(config, Arc::new(EnvTokenProvider)),
        open_store(config),
        config.heartbeat_interval,
    );

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    print_info("Sending heartbeats, press Ctrl+C to stop");
    let stats = service
        .run(encoded, &cancel)
        .await
        .with_context(|| format!("Heartbeats for {} failed", encoded))?;
    cancel.cancel();

    let reason = match stats.end {
        HeartbeatEnd::Closed => "connection closed",
        HeartbeatEnd::WorkspaceStopped => "workspace stopped",
    };
    print_success(&format!(
        "Sent {} heartbeat(s), {} failed ({})",
        stats.sent, stats.failed, reason
    ));
    Ok(())
}
