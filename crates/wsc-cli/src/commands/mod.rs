//! CLI command implementations

mod config;
mod destination;
mod heartbeat;
mod identities;
mod locks;
mod resolve;

pub use config::{config_init, config_path, config_show};
pub use destination::{decode_command, encode_command};
pub use heartbeat::heartbeat_command;
pub use identities::identities_command;
pub use locks::locks_sweep;
pub use resolve::{resolve_command, ResolveArgs};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wsc_core::config::ResolverConfig;
use wsc_core::{FileStore, KeyValueStore};

/// The shared store every wsconnect process on this machine uses
fn open_store(config: &ResolverConfig) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(config.store_path()))
}

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!("Received Ctrl+C, cancelling...");
                }
                token.cancel();
            }
        }
    });
}
