//! Core error types for wsconnect

use std::path::PathBuf;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use wsc_protocol::ProtocolError;

use crate::types::WorkspacePhase;

/// Store error codes that are never worth reporting (the user's disk is full)
const UNREPORTED_STORE_CODES: &[&str] = &["ENOSPC"];

/// Top-level error type for connection resolution
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Cross-process lock could not be taken because the shared store failed
    #[error("Failed to acquire lock ({code}): {message}")]
    LockFailed { code: String, message: String },

    /// Workspace is not in the running phase
    #[error("Workspace is not running (phase: {0})")]
    NoRunningInstance(WorkspacePhase),

    /// Workspace host does not expose an SSH gateway
    #[error("No SSH gateway available on {0}")]
    NoSshGateway(String),

    /// SSH handshake did not complete in time
    #[error("SSH handshake timed out")]
    SshHandshakeTimeout,

    /// Remote command output did not match what was sent
    #[error("SSH output verification failed")]
    SshOutputVerificationFailed,

    /// Local helper is not serving requests
    #[error("Local helper unavailable, see logs at {}", .0.display())]
    LocalAppUnavailable(PathBuf),

    /// Local proxy strategy has no proxy executable to call back into
    #[error("No IPC server available for the local SSH proxy")]
    NoExtensionIpcServer,

    /// Local SSH client configuration could not be prepared
    #[error("Local SSH proxy not supported: {0}")]
    NoLocalSshSupport(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Every authentication method was rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server presented a host key outside the trusted set
    #[error("Host key verification failed for {0}")]
    HostKeyMismatch(String),

    /// SSH transport failure other than timeout or auth
    #[error("SSH connection error: {0}")]
    Ssh(String),

    /// Workspace API or HTTP failure
    #[error("API error: {0}")]
    Api(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Helper RPC framing error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    /// Errors after which the resolver moves on to the next strategy with
    /// only an informational notice
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResolveError::NoSshGateway(_) | ResolveError::SshHandshakeTimeout
        )
    }

    /// Whether this error should reach the user or the status reporter
    pub fn is_reportable(&self) -> bool {
        match self {
            ResolveError::Cancelled => false,
            ResolveError::LockFailed { code, .. } => {
                !UNREPORTED_STORE_CODES.contains(&code.as_str())
            }
            _ => true,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }

    /// Short machine-readable name used in status reports
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::LockFailed { .. } => "LockFailed",
            ResolveError::NoRunningInstance(_) => "NoRunningInstance",
            ResolveError::NoSshGateway(_) => "NoSSHGateway",
            ResolveError::SshHandshakeTimeout => "SSHHandshakeTimeout",
            ResolveError::SshOutputVerificationFailed => "SSHOutputVerificationFailed",
            ResolveError::LocalAppUnavailable(_) => "LocalAppUnavailable",
            ResolveError::NoExtensionIpcServer => "NoExtensionIPCServer",
            ResolveError::NoLocalSshSupport(_) => "NoLocalSSHSupport",
            ResolveError::Cancelled => "Cancelled",
            ResolveError::AuthenticationFailed(_) => "AuthenticationFailed",
            ResolveError::HostKeyMismatch(_) => "HostKeyMismatch",
            ResolveError::Ssh(_) => "SSHError",
            ResolveError::Api(_) => "ApiError",
            ResolveError::Config(_) => "ConfigError",
            ResolveError::Protocol(_) => "ProtocolError",
            ResolveError::Io(_) => "IoError",
        }
    }

    /// A held lock was reclaimed by another party before the work finished
    pub fn lock_lost(name: &str) -> Self {
        ResolveError::LockFailed {
            code: "ELOCKLOST".to_string(),
            message: format!("Lock for {} was taken over", name),
        }
    }

    /// Wrap a store failure raised during lock handling
    pub fn lock_failed(err: &StoreError) -> Self {
        ResolveError::LockFailed {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Cooperative cancellation check, called right after each awaited step
pub fn checkpoint(token: &CancellationToken) -> Result<(), ResolveError> {
    if token.is_cancelled() {
        Err(ResolveError::Cancelled)
    } else {
        Ok(())
    }
}

/// Shared key-value store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backing file could not be read or written
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value was not valid JSON for the requested type
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Stable code for the failure, errno-style where the OS gave one
    pub fn code(&self) -> String {
        match self {
            StoreError::Io(e) => match e.raw_os_error() {
                Some(28) => "ENOSPC".to_string(),
                Some(13) => "EACCES".to_string(),
                Some(30) => "EROFS".to_string(),
                Some(n) => format!("OS{}", n),
                None => format!("{:?}", e.kind()),
            },
            StoreError::Serialization(_) => "EINVAL".to_string(),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
