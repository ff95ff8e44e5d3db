//! Transport seam for the prober
//!
//! [`SshConnector`] establishes one SSH connection (a "link") either over TCP
//! or over a stream forwarded through a previous link. [`SshLink`] exposes the
//! handful of operations a probe needs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use wsc_core::traits::Prompter;
use wsc_core::types::HostKeyRecord;
use wsc_core::ResolveError;

use crate::identity::IdentityKey;

/// Byte stream usable as an SSH transport
pub trait TunnelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelIo for T {}

pub type TunnelStream = Box<dyn TunnelIo>;

/// How a link reaches its server
pub enum Transport {
    /// Direct TCP connection
    Tcp,
    /// Stream forwarded through the previous hop
    Tunnel(TunnelStream),
}

impl Transport {
    pub fn is_tunnel(&self) -> bool {
        matches!(self, Transport::Tunnel(_))
    }
}

/// Which server keys a link accepts
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Only keys published by the workspace
    Trusted(Vec<HostKeyRecord>),
    /// known_hosts: unknown accepted, changed rejected
    KnownHosts(PathBuf),
}

impl HostKeyPolicy {
    /// Whether a presented base64 key is acceptable under `Trusted`
    pub fn trusts_base64(records: &[HostKeyRecord], presented: &str) -> bool {
        records.iter().any(|r| r.host_key.trim() == presented)
    }
}

/// Concrete endpoint of one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopTarget {
    /// Name as written in config or by the caller
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub user: String,
}

impl std::fmt::Display for HopTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.hostname, self.port)
    }
}

/// Server key accepted during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedHostKey {
    pub key_type: String,
    pub base64: String,
    /// Wire-format key bytes
    pub bytes: Vec<u8>,
}

/// Outcome of a key-file authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFileAuth {
    Accepted,
    Rejected,
    /// Key is encrypted and no passphrase was given
    NeedsPassphrase,
    /// Passphrase did not decrypt the key
    WrongPassphrase,
}

/// Opens SSH links
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// Complete the handshake with `target` over `transport`, checking the
    /// server key against `policy`
    async fn connect(
        &self,
        target: &HopTarget,
        transport: Transport,
        policy: HostKeyPolicy,
    ) -> Result<Box<dyn SshLink>, ResolveError>;
}

/// One established SSH connection
#[async_trait]
pub trait SshLink: Send {
    /// Key the server presented during the handshake
    fn host_key(&self) -> Option<VerifiedHostKey>;

    /// Public key auth, signing through the agent at `agent_socket`
    async fn auth_agent(
        &mut self,
        user: &str,
        key: &IdentityKey,
        agent_socket: &Path,
    ) -> Result<bool, ResolveError>;

    /// Public key auth with a private key file
    async fn auth_key_file(
        &mut self,
        user: &str,
        path: &Path,
        passphrase: Option<&str>,
    ) -> Result<KeyFileAuth, ResolveError>;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<bool, ResolveError>;

    /// One full keyboard-interactive exchange, answering through `prompter`
    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        prompter: &dyn Prompter,
    ) -> Result<bool, ResolveError>;

    /// `direct-tcpip` channel to `host:port` through this link
    async fn open_forward(&mut self, host: &str, port: u16) -> Result<TunnelStream, ResolveError>;

    /// Run `command` and collect stdout
    async fn exec(&mut self, command: &str) -> Result<Vec<u8>, ResolveError>;

    /// Disconnect. Closing the first link of a chain tears down the rest.
    async fn close(&mut self);
}
