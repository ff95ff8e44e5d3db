//! Message types for the local helper RPC
//!
//! The helper listens on a loopback port chosen by the supervisor. Each
//! request frame carries a fresh request id; the helper answers with exactly
//! one response frame carrying the same id.
//!
//! # Message Flow
//!
//! 1. Client sends `Ping`, helper answers `Pong` (health check)
//! 2. Client sends `ResolveSshConnection`, helper answers `SshConnection`
//!    once it has an authenticated tunnel for the workspace
//! 3. Client may toggle `SetAutoTunnel`, helper answers `Ack`
//!
//! Any request may instead be answered with `Error`. The error code tells
//! the caller whether the helper is still warming up (`Unavailable`,
//! `Unknown`) or has failed for good.

use serde::{Deserialize, Serialize};

use crate::destination::SshDestination;

/// Helper RPC protocol version, sent in `Ping`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0x01,
    Pong = 0x02,
    ResolveSshConnection = 0x03,
    SshConnection = 0x04,
    SetAutoTunnel = 0x05,
    Ack = 0x06,
    Error = 0xFF,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::ResolveSshConnection),
            0x04 => Some(Self::SshConnection),
            0x05 => Some(Self::SetAutoTunnel),
            0x06 => Some(Self::Ack),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes carried by `RpcMessage::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum RpcErrorCode {
    /// Cause not known; treated like `Unavailable` by callers
    Unknown = 0,
    /// Helper is up but not ready to serve the request yet
    Unavailable = 1,
    /// Workspace does not exist or is not running
    NotFound = 2,
    /// Helper could not authenticate against the workspace host
    Unauthenticated = 3,
    /// Request was malformed
    InvalidArgument = 4,
    /// Helper hit an internal failure
    Internal = 5,
}

impl RpcErrorCode {
    /// Whether a caller should retry the same request after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcErrorCode::Unavailable | RpcErrorCode::Unknown)
    }
}

/// Helper RPC messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcMessage {
    /// Liveness probe
    Ping {
        /// Client protocol version
        version: String,
    },

    /// Liveness answer
    Pong {
        /// Helper build version
        version: String,
    },

    /// Ask the helper for an SSH destination reaching a workspace instance
    ResolveSshConnection {
        workspace_id: String,
        instance_id: String,
        debug: bool,
    },

    /// Destination the editor should connect to
    SshConnection {
        destination: SshDestination,
        /// SSH config file the helper wrote the destination's Host block into
        generated_config_path: String,
    },

    /// Enable or disable automatic port tunnelling for an instance
    SetAutoTunnel { instance_id: String, enabled: bool },

    /// Generic success
    Ack,

    /// Error response
    Error { code: RpcErrorCode, message: String },
}

impl RpcMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            RpcMessage::Ping { .. } => MessageType::Ping,
            RpcMessage::Pong { .. } => MessageType::Pong,
            RpcMessage::ResolveSshConnection { .. } => MessageType::ResolveSshConnection,
            RpcMessage::SshConnection { .. } => MessageType::SshConnection,
            RpcMessage::SetAutoTunnel { .. } => MessageType::SetAutoTunnel,
            RpcMessage::Ack => MessageType::Ack,
            RpcMessage::Error { .. } => MessageType::Error,
        }
    }

    /// Build a `Ping` carrying this crate's protocol version
    pub fn ping() -> Self {
        RpcMessage::Ping {
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}
