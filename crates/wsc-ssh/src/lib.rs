//! wsc-ssh: SSH plumbing for wsconnect
//!
//! - [`config`]: OpenSSH client configuration parsing and the managed
//!   `Include` block
//! - [`identity`]: candidate identities from key files and the agent
//! - [`probe`]: test handshakes, host key pinning and ProxyJump chains

pub mod agent;
pub mod config;
pub mod identity;
pub mod known_hosts;
pub mod probe;

pub use config::{HostConfiguration, HostEntry, SshConfigStore};
pub use identity::{IdentityGatherer, IdentityKey};
pub use probe::{ProbeTarget, SshProber, VerifiedHostKey};
