//! Identities command implementation

use anyhow::{Context, Result};
use wsc_core::config::ResolverConfig;
use wsc_ssh::agent::resolve_agent_socket;
use wsc_ssh::{IdentityGatherer, SshConfigStore};

use crate::output::format_identities;

/// List the identities an SSH connection to `host` would offer, in order
pub async fn identities_command(config: &ResolverConfig, host: &str) -> Result<()> {
    let mut ssh_config = SshConfigStore::from_settings(&config.ssh, config.managed_ssh_config());
    ssh_config
        .load_from_filesystem()
        .await
        .context("Failed to read SSH config")?;

    let host_config = ssh_config.get_host_configuration(host);
    let agent_socket = resolve_agent_socket(
        host_config.identity_agent.as_deref(),
        &host_config.effective_hostname(),
    );

    let mut hints = config.ssh.identity_files.clone();
    hints.extend(host_config.identity_file_paths());

    let keys = IdentityGatherer::default()
        .gather(&hints, agent_socket.as_deref(), host_config.identities_only())
        .await;

    println!("{}", format_identities(&keys));
    Ok(())
}
