//! Resolve command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use wsc_core::config::ResolverConfig;
use wsc_core::types::ConnectionParams;
use wsc_core::LockCoordinator;
use wsc_resolver::{select_backend, Collaborators, Resolution, Resolver};

use super::{cancel_on_ctrl_c, open_store};
use crate::output::{format_resolution, print_success, print_warning};
use crate::terminal::{EnvTokenProvider, LogReporter, TerminalNotifier, TerminalPrompter};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Arguments of `wsconnect resolve`
#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub workspace_id: String,
    pub instance_id: String,
    /// Service host overriding the configured one
    pub host: Option<String>,
    pub debug: bool,
    pub json: bool,
}

/// Resolve an SSH destination for a workspace and print it
pub async fn resolve_command(mut config: ResolverConfig, args: ResolveArgs) -> Result<()> {
    if let Some(host) = args.host {
        config.host = host;
    }
    let config = Arc::new(config);
    let store = open_store(&config);

    let collaborators = Collaborators {
        api: select_backend(&config, Arc::new(EnvTokenProvider)),
        notifier: Arc::new(TerminalNotifier),
        prompter: Arc::new(TerminalPrompter),
        reporter: Arc::new(LogReporter),
    };
    let resolver = Resolver::new(Arc::clone(&config), Arc::clone(&store), collaborators);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let sweeper = LockCoordinator::new(store)
        .with_poll_interval(config.timeouts.lock_poll)
        .spawn_sweeper(SWEEP_INTERVAL, cancel.child_token());

    let params = ConnectionParams::new(args.workspace_id, args.instance_id, config.host.clone())
        .debug(args.debug);
    let result = resolver.resolve(&params, &cancel).await;

    cancel.cancel();
    let _ = sweeper.await;

    match result {
        Ok(resolution) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&resolution_json(&resolution))?);
            } else {
                print!("{}", format_resolution(&resolution));
                print_success(&format!("Resolved via {}", resolution.strategy));
            }
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            print_warning("Resolution cancelled");
            Ok(())
        }
        // The notifier has already shown the failure
        Err(e) => Err(e.into()),
    }
}

fn resolution_json(resolution: &Resolution) -> serde_json::Value {
    serde_json::json!({
        "destination": resolution.destination,
        "authority": resolution.encoded,
        "strategy": resolution.strategy,
        "password": resolution.password,
        "sshConfigPath": resolution.ssh_config_path,
    })
}
