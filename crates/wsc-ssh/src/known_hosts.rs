//! known_hosts lookups for intermediate hops and best-effort learning of
//! verified workspace keys

use std::path::Path;

use russh_keys::key::PublicKey;
use tracing::{debug, warn};

/// Result of checking a presented key against known_hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHostStatus {
    /// A matching entry exists
    Trusted,
    /// No entry for this host
    Unknown,
    /// An entry exists with a different key
    Changed,
}

pub fn check(path: &Path, host: &str, port: u16, key: &PublicKey) -> KnownHostStatus {
    match russh_keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => KnownHostStatus::Trusted,
        Ok(false) => KnownHostStatus::Unknown,
        Err(russh_keys::Error::KeyChanged { line }) => {
            warn!(host = %host, line, "Host key changed in {:?}", path);
            KnownHostStatus::Changed
        }
        Err(e) => {
            debug!(host = %host, "known_hosts lookup failed: {}", e);
            KnownHostStatus::Unknown
        }
    }
}

/// Record `key` for `host`, unless already present. Failures are logged only.
pub fn learn(path: &Path, host: &str, port: u16, key: &PublicKey) {
    if check(path, host, port, key) == KnownHostStatus::Trusted {
        return;
    }
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Cannot create {:?}: {}", parent, e);
            return;
        }
    }
    match russh_keys::learn_known_hosts_path(host, port, key, path) {
        Ok(()) => debug!(host = %host, "Recorded host key in {:?}", path),
        Err(e) => warn!(host = %host, "Failed to record host key: {}", e),
    }
}

/// [`learn`] for a key held as base64
pub fn learn_base64(path: &Path, host: &str, port: u16, base64: &str) {
    match russh_keys::parse_public_key_base64(base64) {
        Ok(key) => learn(path, host, port, &key),
        Err(e) => warn!(host = %host, "Not recording unparsable host key: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GITHUB_ED25519_B64: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    #[test]
    fn test_learn_then_trusted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ssh").join("known_hosts");
        let key = russh_keys::parse_public_key_base64(GITHUB_ED25519_B64).unwrap();

        assert_eq!(check(&path, "ws-1.ssh.example.dev", 22, &key), KnownHostStatus::Unknown);
        learn(&path, "ws-1.ssh.example.dev", 22, &key);
        assert_eq!(check(&path, "ws-1.ssh.example.dev", 22, &key), KnownHostStatus::Trusted);

        // Learning again does not duplicate the entry
        learn(&path, "ws-1.ssh.example.dev", 22, &key);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().filter(|l| !l.trim().is_empty()).count(), 1);
    }
}
