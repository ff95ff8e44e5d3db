//! russh-backed links

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tracing::{debug, warn};
use wsc_core::traits::{InteractivePrompt, Prompter};
use wsc_core::ResolveError;

use super::transport::{
    HopTarget, HostKeyPolicy, KeyFileAuth, SshConnector, SshLink, Transport, TunnelStream,
    VerifiedHostKey,
};
use crate::identity::IdentityKey;
use crate::known_hosts::{self, KnownHostStatus};

#[derive(Debug, Default)]
struct HandshakeState {
    presented: Option<VerifiedHostKey>,
    rejected: bool,
}

fn ssh_error(context: &str, e: russh::Error) -> ResolveError {
    ResolveError::Ssh(format!("{}: {}", context, e))
}

/// Client handler that checks and records the server's key
pub struct ClientHandler {
    hostname: String,
    port: u16,
    policy: HostKeyPolicy,
    state: Arc<Mutex<HandshakeState>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let presented = VerifiedHostKey {
            key_type: server_public_key.name().to_string(),
            base64: server_public_key.public_key_base64(),
            bytes: server_public_key.public_key_bytes(),
        };

        let accepted = match &self.policy {
            HostKeyPolicy::Trusted(records) => {
                HostKeyPolicy::trusts_base64(records, &presented.base64)
            }
            HostKeyPolicy::KnownHosts(path) => {
                known_hosts::check(path, &self.hostname, self.port, server_public_key)
                    != KnownHostStatus::Changed
            }
        };

        debug!(
            host = %self.hostname,
            fingerprint = %server_public_key.fingerprint(),
            accepted,
            "Server host key"
        );

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.rejected = !accepted;
        if accepted {
            state.presented = Some(presented);
        }
        Ok(accepted)
    }
}

/// Connects with russh
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        })
    }
}

impl RusshConnector {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(
        &self,
        target: &HopTarget,
        transport: Transport,
        policy: HostKeyPolicy,
    ) -> Result<Box<dyn SshLink>, ResolveError> {
        let state = Arc::new(Mutex::new(HandshakeState::default()));
        let handler = ClientHandler {
            hostname: target.hostname.clone(),
            port: target.port,
            policy,
            state: Arc::clone(&state),
        };

        debug!(target = %target, tunnel = transport.is_tunnel(), "Opening SSH link");
        let result = match transport {
            Transport::Tcp => {
                client::connect(
                    Arc::clone(&self.config),
                    (target.hostname.as_str(), target.port),
                    handler,
                )
                .await
            }
            Transport::Tunnel(stream) => {
                client::connect_stream(Arc::clone(&self.config), stream, handler).await
            }
        };

        let handle = result.map_err(|e| {
            let rejected = state.lock().map(|s| s.rejected).unwrap_or(false);
            if rejected {
                ResolveError::HostKeyMismatch(target.hostname.clone())
            } else {
                ssh_error(&format!("Failed to connect to {}", target), e)
            }
        })?;

        Ok(Box::new(RusshLink {
            handle,
            state,
            target: target.clone(),
        }))
    }
}

struct RusshLink {
    handle: Handle<ClientHandler>,
    state: Arc<Mutex<HandshakeState>>,
    target: HopTarget,
}

#[async_trait]
impl SshLink for RusshLink {
    fn host_key(&self) -> Option<VerifiedHostKey> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.presented.clone())
    }

    #[cfg(unix)]
    async fn auth_agent(
        &mut self,
        user: &str,
        key: &IdentityKey,
        agent_socket: &Path,
    ) -> Result<bool, ResolveError> {
        use russh_keys::agent::client::AgentClient;

        let agent = AgentClient::connect_uds(agent_socket)
            .await
            .map_err(|e| ResolveError::Ssh(format!("Cannot reach agent: {}", e)))?;
        let public_key = key.public_key()?;

        let (_agent, result) = self
            .handle
            .authenticate_future(user, public_key, agent)
            .await;
        result.map_err(|e| ResolveError::Ssh(format!("Agent signing failed: {:?}", e)))
    }

    #[cfg(not(unix))]
    async fn auth_agent(
        &mut self,
        _user: &str,
        _key: &IdentityKey,
        _agent_socket: &Path,
    ) -> Result<bool, ResolveError> {
        Ok(false)
    }

    async fn auth_key_file(
        &mut self,
        user: &str,
        path: &Path,
        passphrase: Option<&str>,
    ) -> Result<KeyFileAuth, ResolveError> {
        let key_pair = match russh_keys::load_secret_key(path, passphrase) {
            Ok(kp) => kp,
            Err(russh_keys::Error::KeyIsEncrypted) if passphrase.is_none() => {
                return Ok(KeyFileAuth::NeedsPassphrase)
            }
            Err(e) if passphrase.is_some() => {
                debug!(path = ?path, "Passphrase rejected: {}", e);
                return Ok(KeyFileAuth::WrongPassphrase);
            }
            Err(e) => {
                warn!(path = ?path, "Unusable private key: {}", e);
                return Ok(KeyFileAuth::Rejected);
            }
        };

        let accepted = self
            .handle
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| ssh_error("Public key authentication error", e))?;
        Ok(if accepted {
            KeyFileAuth::Accepted
        } else {
            KeyFileAuth::Rejected
        })
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<bool, ResolveError> {
        self.handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| ssh_error("Password authentication error", e))
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        prompter: &dyn Prompter,
    ) -> Result<bool, ResolveError> {
        let mut response = self
            .handle
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await
            .map_err(|e| ssh_error("Keyboard-interactive error", e))?;

        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure => return Ok(false),
                KeyboardInteractiveAuthResponse::InfoRequest {
                    name,
                    instructions,
                    prompts,
                } => {
                    let prompts: Vec<InteractivePrompt> = prompts
                        .into_iter()
                        .map(|p| InteractivePrompt {
                            prompt: p.prompt,
                            echo: p.echo,
                        })
                        .collect();

                    let answers = if prompts.is_empty() {
                        Vec::new()
                    } else {
                        match prompter
                            .keyboard_interactive(&name, &instructions, &prompts)
                            .await
                        {
                            Some(answers) => answers,
                            None => return Ok(false),
                        }
                    };

                    response = self
                        .handle
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(|e| ssh_error("Keyboard-interactive error", e))?;
                }
            }
        }
    }

    async fn open_forward(&mut self, host: &str, port: u16) -> Result<TunnelStream, ResolveError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| ssh_error(&format!("Forward to {}:{} via {}", host, port, self.target), e))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn exec(&mut self, command: &str) -> Result<Vec<u8>, ResolveError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ssh_error("Failed to open session channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ssh_error("Failed to exec", e))?;

        let mut output = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } if exit_status != 0 => {
                    debug!(exit_status, "Remote command failed");
                }
                _ => {}
            }
        }
        Ok(output)
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(target = %self.target, "Disconnect failed: {}", e);
        }
    }
}
