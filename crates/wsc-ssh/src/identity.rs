//! Candidate SSH identities
//!
//! Keys come from `*.pub` files next to the configured (or default) identity
//! files and from the agent. When the same key shows up in both, the file entry
//! is kept, marked agent-capable, and moved to the front.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tracing::{debug, warn};
use wsc_core::types::RegisteredKey;
use wsc_core::ResolveError;

use crate::agent::{AgentKeySource, SystemAgent};

/// File names tried when nothing is configured, in OpenSSH's order
const DEFAULT_IDENTITY_FILES: &[&str] = &[
    "id_rsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
    "id_xmss",
    "id_dsa",
];

/// A candidate credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    /// Private key path for file-described keys
    pub filename: Option<PathBuf>,
    pub key_type: String,
    pub public_key_base64: String,
    /// Base64 SHA-256 of the wire-format key, unpadded
    pub fingerprint: String,
    pub comment: Option<String>,
    /// The agent holds this key and can sign with it
    pub agent_support: bool,
    /// The private key file exists on disk
    pub is_private_material: bool,
}

impl IdentityKey {
    /// Parse an OpenSSH public key line: `type base64 [comment]`
    pub fn from_openssh_line(line: &str, filename: Option<PathBuf>) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let _declared_type = parts.next()?;
        let base64 = parts.next()?;
        let key = russh_keys::parse_public_key_base64(base64).ok()?;
        let comment: Vec<&str> = parts.collect();

        let mut identity = Self::from_public_key(&key);
        identity.filename = filename;
        identity.comment = (!comment.is_empty()).then(|| comment.join(" "));
        Some(identity)
    }

    pub fn from_public_key(key: &PublicKey) -> Self {
        Self {
            filename: None,
            key_type: key.name().to_string(),
            public_key_base64: key.public_key_base64(),
            fingerprint: key.fingerprint(),
            comment: None,
            agent_support: false,
            is_private_material: false,
        }
    }

    pub fn from_agent_key(key: &PublicKey) -> Self {
        Self {
            agent_support: true,
            ..Self::from_public_key(key)
        }
    }

    pub fn public_key(&self) -> Result<PublicKey, ResolveError> {
        russh_keys::parse_public_key_base64(&self.public_key_base64)
            .map_err(|e| ResolveError::Ssh(format!("Invalid public key: {}", e)))
    }

    fn dedup_key(&self) -> (String, String) {
        (self.key_type.clone(), self.fingerprint.clone())
    }

    /// Short description for logs and tables
    pub fn label(&self) -> String {
        match (&self.filename, &self.comment) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(comment)) => format!("agent: {}", comment),
            (None, None) => format!("agent: {}", self.fingerprint),
        }
    }
}

/// `~/.ssh/id_*` defaults
pub fn default_identity_files() -> Vec<PathBuf> {
    let ssh_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh");
    DEFAULT_IDENTITY_FILES
        .iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

fn split_key_paths(path: &Path) -> (PathBuf, PathBuf) {
    let as_str = path.to_string_lossy();
    match as_str.strip_suffix(".pub") {
        Some(private) => (PathBuf::from(private), path.to_path_buf()),
        None => (path.to_path_buf(), PathBuf::from(format!("{}.pub", as_str))),
    }
}

/// Read the `.pub` companion of an identity file
async fn read_file_key(path: &Path) -> Result<IdentityKey, String> {
    let (private_path, public_path) = split_key_paths(path);

    let content = tokio::fs::read_to_string(&public_path)
        .await
        .map_err(|e| format!("cannot read {:?}: {}", public_path, e))?;
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or_else(|| format!("{:?} is empty", public_path))?;

    let mut key = IdentityKey::from_openssh_line(line, Some(private_path.clone()))
        .ok_or_else(|| format!("{:?} is not an OpenSSH public key", public_path))?;
    key.is_private_material = tokio::fs::metadata(&private_path).await.is_ok();
    Ok(key)
}

/// Merge file and agent keys.
///
/// Agent keys that match a file key promote that file key (agent-capable) to
/// the front, in agent order. Unmatched agent keys follow unless
/// `identities_only`. Remaining file keys come last.
pub fn merge_identities(
    file_keys: Vec<IdentityKey>,
    agent_keys: Vec<IdentityKey>,
    identities_only: bool,
) -> Vec<IdentityKey> {
    let mut remaining = file_keys;
    let mut preferred = Vec::new();
    let mut agent_only = Vec::new();
    let mut seen = HashSet::new();

    for agent_key in agent_keys {
        let id = agent_key.dedup_key();
        if !seen.insert(id.clone()) {
            continue;
        }
        match remaining.iter().position(|k| k.dedup_key() == id) {
            Some(idx) => {
                let mut key = remaining.remove(idx);
                key.agent_support = true;
                preferred.push(key);
            }
            None if !identities_only => agent_only.push(agent_key),
            None => {}
        }
    }

    preferred.extend(agent_only);
    for key in remaining {
        if seen.insert(key.dedup_key()) {
            preferred.push(key);
        }
    }
    preferred
}

fn normalize_fingerprint(fp: &str) -> &str {
    fp.trim()
        .strip_prefix("SHA256:")
        .unwrap_or(fp.trim())
        .trim_end_matches('=')
}

/// Keep only keys registered with the workspace service
pub fn filter_registered(keys: Vec<IdentityKey>, registered: &[RegisteredKey]) -> Vec<IdentityKey> {
    let allowed: HashSet<&str> = registered
        .iter()
        .map(|k| normalize_fingerprint(&k.fingerprint))
        .collect();
    keys.into_iter()
        .filter(|k| allowed.contains(normalize_fingerprint(&k.fingerprint)))
        .collect()
}

/// Discovers identities from files and an agent
#[derive(Clone)]
pub struct IdentityGatherer {
    agent: Arc<dyn AgentKeySource>,
}

impl Default for IdentityGatherer {
    fn default() -> Self {
        Self::new(Arc::new(SystemAgent))
    }
}

impl IdentityGatherer {
    pub fn new(agent: Arc<dyn AgentKeySource>) -> Self {
        Self { agent }
    }

    /// Ordered candidate identities. `hints` are identity file paths; when
    /// empty the platform defaults are used.
    pub async fn gather(
        &self,
        hints: &[PathBuf],
        agent_socket: Option<&Path>,
        identities_only: bool,
    ) -> Vec<IdentityKey> {
        let paths = if hints.is_empty() {
            default_identity_files()
        } else {
            hints.to_vec()
        };

        let mut file_keys: Vec<IdentityKey> = Vec::new();
        for path in &paths {
            match read_file_key(path).await {
                Ok(key) => {
                    if file_keys.iter().any(|k| k.dedup_key() == key.dedup_key()) {
                        debug!(path = ?path, "Duplicate identity, skipping");
                    } else {
                        file_keys.push(key);
                    }
                }
                Err(reason) => debug!("Skipping identity: {}", reason),
            }
        }

        let agent_keys = match agent_socket {
            Some(socket) => match self.agent.list_keys(socket).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Ignoring SSH agent: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let merged = merge_identities(file_keys, agent_keys, identities_only);
        debug!(count = merged.len(), "Gathered identities");
        merged
    }
}
