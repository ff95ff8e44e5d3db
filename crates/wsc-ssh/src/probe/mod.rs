//! Test handshakes against workspace SSH endpoints
//!
//! A probe walks the target's `ProxyJump` chain from the user's SSH config,
//! authenticates every hop, pins the final server key to the keys the
//! workspace published, and tears the whole chain down again by closing the
//! outermost connection.

mod russh_transport;
pub mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsc_core::traits::Prompter;
use wsc_core::types::HostKeyRecord;
use wsc_core::{checkpoint, ResolveError};

use crate::agent::resolve_agent_socket;
use crate::config::SshConfigStore;
use crate::identity::{IdentityGatherer, IdentityKey};

pub use russh_transport::RusshConnector;
pub use transport::{
    HopTarget, HostKeyPolicy, KeyFileAuth, SshConnector, SshLink, Transport, TunnelStream,
    VerifiedHostKey,
};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(40);

const MAX_PASSPHRASE_ATTEMPTS: u32 = 3;
const MAX_PASSWORD_ATTEMPTS: u32 = 3;
const MAX_KEYBOARD_INTERACTIVE_ATTEMPTS: u32 = 3;

/// What to probe and with which credentials
#[derive(Debug, Clone, Default)]
pub struct ProbeTarget {
    /// Host as the user would type it; looked up in the SSH config
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Candidate identities for the final hop, in preference order
    pub identities: Vec<IdentityKey>,
    pub agent_socket: Option<PathBuf>,
    /// Tried before prompting; prompts are skipped when it is set
    pub password: Option<String>,
    /// Run `echo <nonce>` after authenticating and compare the output
    pub verify_output: bool,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HopAuth {
    identities: Vec<IdentityKey>,
    agent_socket: Option<PathBuf>,
    password: Option<String>,
}

#[derive(Debug, Clone)]
struct PlannedHop {
    target: HopTarget,
    auth: HopAuth,
}

fn local_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Performs test connections
pub struct SshProber {
    connector: Arc<dyn SshConnector>,
    gatherer: IdentityGatherer,
    prompter: Arc<dyn Prompter>,
    handshake_timeout: Duration,
    known_hosts: PathBuf,
}

impl SshProber {
    pub fn new(
        connector: Arc<dyn SshConnector>,
        gatherer: IdentityGatherer,
        prompter: Arc<dyn Prompter>,
        known_hosts: PathBuf,
    ) -> Self {
        Self {
            connector,
            gatherer,
            prompter,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            known_hosts,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn known_hosts_path(&self) -> &std::path::Path {
        &self.known_hosts
    }

    /// Connect to `target`, authenticate, and return the verified key of the
    /// final server. Only keys in `trusted` are accepted for the final hop.
    pub async fn test_connection(
        &self,
        target: &ProbeTarget,
        trusted: &[HostKeyRecord],
        store: &SshConfigStore,
        cancel: &CancellationToken,
    ) -> Result<VerifiedHostKey, ResolveError> {
        let (hops, last) = self.plan(target, store).await;
        info!(
            target = %last.target,
            hops = hops.len(),
            "Testing SSH connection"
        );

        let mut links: Vec<Box<dyn SshLink>> = Vec::new();
        let result = self
            .establish(&mut links, &hops, &last, trusted, target.verify_output, cancel)
            .await;

        // Inner links ride on the outer one's channels
        if let Some(outer) = links.first_mut() {
            outer.close().await;
        }
        drop(links);

        match &result {
            Ok(key) => debug!(key_type = %key.key_type, "Probe succeeded"),
            Err(e) => debug!("Probe failed: {}", e),
        }
        result
    }

    async fn plan(&self, target: &ProbeTarget, store: &SshConfigStore) -> (Vec<PlannedHop>, PlannedHop) {
        let config = store.get_host_configuration(&target.host);

        let last = PlannedHop {
            target: HopTarget {
                alias: target.host.clone(),
                hostname: config.effective_hostname(),
                port: target.port.unwrap_or_else(|| config.effective_port()),
                user: target
                    .user
                    .clone()
                    .or_else(|| config.user.clone())
                    .unwrap_or_else(local_username),
            },
            auth: HopAuth {
                identities: target.identities.clone(),
                agent_socket: target.agent_socket.clone(),
                password: target.password.clone(),
            },
        };

        let mut hops = Vec::new();
        for jump in config.proxy_jumps() {
            let hop_config = store.get_host_configuration(&jump.host);
            let hostname = hop_config.effective_hostname();
            let agent_socket =
                resolve_agent_socket(hop_config.identity_agent.as_deref(), &hostname);
            let identities = self
                .gatherer
                .gather(
                    &hop_config.identity_file_paths(),
                    agent_socket.as_deref(),
                    hop_config.identities_only(),
                )
                .await;

            hops.push(PlannedHop {
                target: HopTarget {
                    alias: jump.host.clone(),
                    port: jump.port.unwrap_or_else(|| hop_config.effective_port()),
                    user: jump
                        .user
                        .clone()
                        .or_else(|| hop_config.user.clone())
                        .unwrap_or_else(local_username),
                    hostname,
                },
                auth: HopAuth {
                    identities,
                    agent_socket,
                    password: None,
                },
            });
        }

        (hops, last)
    }

    async fn establish(
        &self,
        links: &mut Vec<Box<dyn SshLink>>,
        hops: &[PlannedHop],
        last: &PlannedHop,
        trusted: &[HostKeyRecord],
        verify_output: bool,
        cancel: &CancellationToken,
    ) -> Result<VerifiedHostKey, ResolveError> {
        let mut transport = Transport::Tcp;

        for (i, hop) in hops.iter().enumerate() {
            let policy = HostKeyPolicy::KnownHosts(self.known_hosts.clone());
            let link = self.connect(&hop.target, transport, policy, cancel).await?;
            let idx = links.len();
            links.push(link);
            checkpoint(cancel)?;

            let link = &mut links[idx];
            self.authenticate(link.as_mut(), hop, cancel).await?;

            let next = hops.get(i + 1).map(|h| &h.target).unwrap_or(&last.target);
            let stream = link.open_forward(&next.hostname, next.port).await?;
            checkpoint(cancel)?;
            debug!(via = %hop.target, next = %next, "Forwarded to next hop");

            transport = Transport::Tunnel(stream);
        }

        let policy = HostKeyPolicy::Trusted(trusted.to_vec());
        let link = self.connect(&last.target, transport, policy, cancel).await?;
        let idx = links.len();
        links.push(link);
        checkpoint(cancel)?;

        let link = &mut links[idx];
        self.authenticate(link.as_mut(), last, cancel).await?;

        if verify_output {
            verify_echo(link.as_mut()).await?;
            checkpoint(cancel)?;
        }

        link.host_key()
            .ok_or_else(|| ResolveError::Ssh(format!("No host key recorded for {}", last.target)))
    }

    async fn connect(
        &self,
        target: &HopTarget,
        transport: Transport,
        policy: HostKeyPolicy,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn SshLink>, ResolveError> {
        let handshake = tokio::time::timeout(
            self.handshake_timeout,
            self.connector.connect(target, transport, policy),
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(ResolveError::Cancelled),
            result = handshake => match result {
                Ok(link) => link,
                Err(_) => {
                    warn!(target = %target, timeout = ?self.handshake_timeout, "SSH handshake timed out");
                    Err(ResolveError::SshHandshakeTimeout)
                }
            },
        }
    }

    /// Agent keys, key files, password, then keyboard-interactive
    async fn authenticate(
        &self,
        link: &mut dyn SshLink,
        hop: &PlannedHop,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let user = hop.target.user.as_str();
        let auth = &hop.auth;

        if let Some(socket) = &auth.agent_socket {
            for key in auth.identities.iter().filter(|k| k.agent_support) {
                match link.auth_agent(user, key, socket).await {
                    Ok(true) => {
                        debug!(key = %key.label(), "Authenticated with agent key");
                        return Ok(());
                    }
                    Ok(false) => {}
                    Err(e) => debug!(key = %key.label(), "Agent authentication error: {}", e),
                }
                checkpoint(cancel)?;
            }
        }

        for key in auth.identities.iter().filter(|k| k.is_private_material) {
            let Some(path) = &key.filename else { continue };
            let mut passphrase: Option<String> = None;
            let mut attempts = 0;

            loop {
                match link.auth_key_file(user, path, passphrase.as_deref()).await? {
                    KeyFileAuth::Accepted => {
                        debug!(key = %key.label(), "Authenticated with key file");
                        return Ok(());
                    }
                    KeyFileAuth::Rejected => break,
                    KeyFileAuth::NeedsPassphrase | KeyFileAuth::WrongPassphrase => {
                        attempts += 1;
                        if attempts > MAX_PASSPHRASE_ATTEMPTS {
                            break;
                        }
                        match self.prompter.passphrase(path, attempts).await {
                            Some(p) => passphrase = Some(p),
                            None => break,
                        }
                    }
                }
                checkpoint(cancel)?;
            }
            checkpoint(cancel)?;
        }

        match &auth.password {
            Some(password) => {
                if link.auth_password(user, password).await? {
                    return Ok(());
                }
                checkpoint(cancel)?;
            }
            None => {
                let label = hop.target.to_string();
                for attempt in 1..=MAX_PASSWORD_ATTEMPTS {
                    let Some(password) = self.prompter.password(&label, attempt).await else {
                        break;
                    };
                    if link.auth_password(user, &password).await? {
                        return Ok(());
                    }
                    checkpoint(cancel)?;
                }
            }
        }

        for _ in 0..MAX_KEYBOARD_INTERACTIVE_ATTEMPTS {
            if link
                .auth_keyboard_interactive(user, self.prompter.as_ref())
                .await?
            {
                return Ok(());
            }
            checkpoint(cancel)?;
        }

        Err(ResolveError::AuthenticationFailed(hop.target.to_string()))
    }
}

async fn verify_echo(link: &mut dyn SshLink) -> Result<(), ResolveError> {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    let nonce = hex::encode(bytes);

    let output = link.exec(&format!("echo {}", nonce)).await?;
    if String::from_utf8_lossy(&output).trim() == nonce {
        Ok(())
    } else {
        Err(ResolveError::SshOutputVerificationFailed)
    }
}
