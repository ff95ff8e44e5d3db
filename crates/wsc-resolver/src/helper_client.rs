//! RPC client for a running local helper
//!
//! One TCP connection per request on the helper's loopback API port, framed
//! with [`RpcCodec`]. While the helper process is alive, "unavailable"
//! answers and connection failures are retried after a fixed delay until the
//! caller cancels; anything else, or a dead helper, is fatal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wsc_core::types::{ConnectionParams, LocalHelperConfig};
use wsc_core::{checkpoint, ResolveError};
use wsc_protocol::{RequestId, RpcCodec, RpcFrame, RpcMessage, SshDestination};

use crate::supervisor::{HelperState, ProcessControl, StateTable};

/// Upper bound on one request; a hung helper counts as unavailable
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single attempt
#[derive(Debug)]
enum AttemptError {
    /// Worth retrying while the helper lives
    Transient(String),
    Fatal(ResolveError),
}

/// Destination resolved by the helper
#[derive(Debug, Clone, PartialEq)]
pub struct HelperDestination {
    pub destination: SshDestination,
    pub generated_config_path: PathBuf,
}

pub struct HelperClient {
    config: LocalHelperConfig,
    authority: String,
    processes: Arc<dyn ProcessControl>,
    states: StateTable,
    retry_delay: Duration,
    next_id: RequestId,
}

impl HelperClient {
    pub(crate) fn new(
        config: LocalHelperConfig,
        authority: String,
        processes: Arc<dyn ProcessControl>,
        states: StateTable,
        retry_delay: Duration,
    ) -> Self {
        Self {
            config,
            authority,
            processes,
            states,
            retry_delay,
            next_id: RequestId::new(1),
        }
    }

    pub fn config(&self) -> &LocalHelperConfig {
        &self.config
    }

    pub async fn ping(&mut self, cancel: &CancellationToken) -> Result<String, ResolveError> {
        match self.call(RpcMessage::ping(), cancel).await? {
            RpcMessage::Pong { version } => Ok(version),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the helper for a destination reaching `params`' instance
    pub async fn resolve_ssh_connection(
        &mut self,
        params: &ConnectionParams,
        cancel: &CancellationToken,
    ) -> Result<HelperDestination, ResolveError> {
        let request = RpcMessage::ResolveSshConnection {
            workspace_id: params.workspace_id.clone(),
            instance_id: params.instance_id.clone(),
            debug: params.debug_workspace,
        };
        match self.call(request, cancel).await? {
            RpcMessage::SshConnection {
                destination,
                generated_config_path,
            } => Ok(HelperDestination {
                destination,
                generated_config_path: PathBuf::from(generated_config_path),
            }),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn set_auto_tunnel(
        &mut self,
        instance_id: &str,
        enabled: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let request = RpcMessage::SetAutoTunnel {
            instance_id: instance_id.to_string(),
            enabled,
        };
        match self.call(request, cancel).await? {
            RpcMessage::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Send `request`, retrying transient failures while the helper lives
    pub async fn call(
        &mut self,
        request: RpcMessage,
        cancel: &CancellationToken,
    ) -> Result<RpcMessage, ResolveError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let id = self.next_id;
            self.next_id = self.next_id.next();

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                r = tokio::time::timeout(ATTEMPT_TIMEOUT, self.attempt(id, request.clone())) => {
                    r.unwrap_or_else(|_| Err(AttemptError::Transient("request timed out".into())))
                }
            };

            match outcome {
                Ok(response) => {
                    self.states.set(&self.authority, HelperState::Running);
                    return Ok(response);
                }
                Err(AttemptError::Fatal(e)) => {
                    warn!(pid = self.config.pid, "Helper request failed: {}", e);
                    self.states.set(&self.authority, HelperState::Stopped);
                    return Err(ResolveError::LocalAppUnavailable(self.config.log_path.clone()));
                }
                Err(AttemptError::Transient(reason)) => {
                    if !self.processes.is_alive(self.config.pid) {
                        warn!(pid = self.config.pid, "Helper process is gone: {}", reason);
                        self.states.set(&self.authority, HelperState::Stopped);
                        return Err(ResolveError::LocalAppUnavailable(
                            self.config.log_path.clone(),
                        ));
                    }
                    debug!(attempt, "Helper unavailable, retrying: {}", reason);
                    self.states.set(&self.authority, HelperState::Retrying);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
            checkpoint(cancel)?;
        }
    }

    async fn attempt(&self, id: RequestId, request: RpcMessage) -> Result<RpcMessage, AttemptError> {
        let stream = TcpStream::connect(("127.0.0.1", self.config.api_port))
            .await
            .map_err(|e| AttemptError::Transient(format!("connect: {}", e)))?;
        let mut framed = Framed::new(stream, RpcCodec::new());

        framed
            .send(RpcFrame::new(id, request))
            .await
            .map_err(|e| AttemptError::Transient(format!("send: {}", e)))?;

        while let Some(frame) = framed.next().await {
            let frame = frame.map_err(|e| AttemptError::Fatal(e.into()))?;
            if frame.request_id != id {
                debug!(expected = %id, got = %frame.request_id, "Ignoring stray frame");
                continue;
            }
            return match frame.message {
                RpcMessage::Error { code, message } if code.is_retryable() => {
                    Err(AttemptError::Transient(format!("{:?}: {}", code, message)))
                }
                RpcMessage::Error { code, message } => Err(AttemptError::Fatal(
                    ResolveError::Api(format!("helper error {:?}: {}", code, message)),
                )),
                other => Ok(other),
            };
        }
        Err(AttemptError::Transient("connection closed".into()))
    }
}

fn unexpected(message: &RpcMessage) -> ResolveError {
    ResolveError::Api(format!("Unexpected helper response: {:?}", message.message_type()))
}
