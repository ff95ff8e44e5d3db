//! wsc-protocol: Wire formats for wsconnect
//!
//! This crate defines the binary framing used to talk to the local helper
//! process over its loopback RPC port, and the compact destination encoding
//! handed to the editor's remote-SSH mechanism.

pub mod codec;
pub mod destination;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{RpcCodec, RpcFrame};
pub use destination::SshDestination;
pub use error::ProtocolError;
pub use frame::{FrameHeader, RequestId, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{MessageType, RpcErrorCode, RpcMessage, PROTOCOL_VERSION};
