//! wsc-resolver: Connection strategy resolution for wsconnect
//!
//! This crate decides how a workspace is reached and drives everything that
//! decision needs:
//! - Workspace API backends ([`api`])
//! - The destination resolver and its strategies ([`resolver`])
//! - Local helper install, upgrade and launch ([`supervisor`])
//! - The helper's loopback RPC client ([`helper_client`])
//! - Heartbeats for open connections ([`heartbeat`])

pub mod api;
pub mod heartbeat;
pub mod helper_client;
pub mod host_keys;
pub mod local_proxy;
pub mod resolver;
pub mod supervisor;
pub mod version_cache;

pub use api::{select_backend, PublicApi, ServerApi};
pub use heartbeat::{HeartbeatEnd, HeartbeatService, HeartbeatStats};
pub use helper_client::{HelperClient, HelperDestination};
pub use resolver::{Collaborators, Resolution, Resolver};
pub use supervisor::{HelperState, ProcessControl, Supervisor, SystemProcesses};
pub use version_cache::{ServiceVersion, VersionCache};
