//! Local SSH proxy strategy
//!
//! The SSH client reaches workspaces through a `ProxyCommand` that calls back
//! into the editor-side proxy executable. All workspaces of a service host
//! share one wildcard `Host` block in the generated sub-file, which the user
//! config includes through the managed block.

use std::path::Path;

use tracing::{debug, warn};
use wsc_core::types::{host_authority, ConnectionParams};
use wsc_core::ResolveError;
use wsc_protocol::SshDestination;
use wsc_ssh::config::Directive;
use wsc_ssh::{HostEntry, SshConfigStore};

pub const LOCAL_PROXY_SUFFIX: &str = "wsc.local";

/// Per-host domain: `{sanitized authority}.wsc.local`
pub fn proxy_domain(host: &str) -> String {
    let sanitized: String = host_authority(host)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("{}.{}", sanitized, LOCAL_PROXY_SUFFIX)
}

/// `{workspaceId}.{domain}`
pub fn proxy_destination(params: &ConnectionParams) -> SshDestination {
    SshDestination::new(format!("{}.{}", params.workspace_id, proxy_domain(&params.host)))
}

/// The wildcard block routing every workspace of `host` through the proxy
pub fn proxy_host_entry(host: &str, proxy_command: &Path) -> HostEntry {
    HostEntry::new(format!("*.{}", proxy_domain(host)))
        .with(
            Directive::ProxyCommand,
            format!(
                "\"{}\" --host {} %h %p",
                proxy_command.display(),
                host_authority(host)
            ),
        )
        .with(Directive::ForwardAgent, "yes")
}

/// Write the proxy block and make sure the user config includes it
pub async fn prepare(
    ssh_config: &SshConfigStore,
    host: &str,
    proxy_command: Option<&Path>,
) -> Result<(), ResolveError> {
    let proxy_command = proxy_command.ok_or(ResolveError::NoExtensionIpcServer)?;

    let entry = proxy_host_entry(host, proxy_command);
    let changed = ssh_config.add_host_configuration(&entry).await.map_err(|e| {
        warn!(path = ?ssh_config.managed_path(), "Cannot write proxy SSH config: {}", e);
        ResolveError::NoLocalSshSupport(format!(
            "cannot write {}: {}",
            ssh_config.managed_path().display(),
            e
        ))
    })?;
    if changed {
        debug!(pattern = %entry.pattern, "Wrote local proxy host block");
    }

    ssh_config.ensure_managed_include().await.map_err(|e| {
        warn!(path = ?ssh_config.user_path(), "Cannot update SSH config: {}", e);
        ResolveError::NoLocalSshSupport(format!(
            "cannot update {}: {}",
            ssh_config.user_path().display(),
            e
        ))
    })?;
    Ok(())
}
