//! SSH agent access
//!
//! Only listing is done here; signing happens inside the probe transport,
//! which opens its own agent connection per authentication attempt.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use wsc_core::ResolveError;

use crate::config::expand_tokens;
use crate::identity::IdentityKey;

/// Lists the public keys an agent advertises
#[async_trait]
pub trait AgentKeySource: Send + Sync {
    async fn list_keys(&self, socket: &Path) -> Result<Vec<IdentityKey>, ResolveError>;
}

/// The user's running ssh-agent
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAgent;

#[async_trait]
impl AgentKeySource for SystemAgent {
    #[cfg(unix)]
    async fn list_keys(&self, socket: &Path) -> Result<Vec<IdentityKey>, ResolveError> {
        use russh_keys::agent::client::AgentClient;

        let mut agent = AgentClient::connect_uds(socket)
            .await
            .map_err(|e| ResolveError::Ssh(format!("Cannot reach agent at {:?}: {}", socket, e)))?;
        let keys = agent
            .request_identities()
            .await
            .map_err(|e| ResolveError::Ssh(format!("Agent identity request failed: {}", e)))?;

        debug!(count = keys.len(), "Agent advertised keys");
        Ok(keys.iter().map(IdentityKey::from_agent_key).collect())
    }

    #[cfg(not(unix))]
    async fn list_keys(&self, socket: &Path) -> Result<Vec<IdentityKey>, ResolveError> {
        Err(ResolveError::Ssh(format!(
            "Agent sockets are not supported on this platform ({:?})",
            socket
        )))
    }
}

/// Resolve the agent socket from an `IdentityAgent` value, falling back to
/// `SSH_AUTH_SOCK`. `IdentityAgent none` disables the agent.
pub fn resolve_agent_socket(identity_agent: Option<&str>, hostname: &str) -> Option<PathBuf> {
    let from_env = || {
        std::env::var_os("SSH_AUTH_SOCK")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    };

    match identity_agent.map(str::trim) {
        None => from_env(),
        Some(v) if v.eq_ignore_ascii_case("none") => None,
        Some("SSH_AUTH_SOCK") | Some("$SSH_AUTH_SOCK") => from_env(),
        Some(v) => match v.strip_prefix('$') {
            Some(var) => std::env::var_os(var).map(PathBuf::from),
            None => Some(PathBuf::from(expand_tokens(v, hostname, None))),
        },
    }
}
