//! SSH destination and its compact encoding
//!
//! The editor's remote-SSH mechanism takes an opaque authority string. We hand
//! it the lowercase hex of a small JSON object so that user and port survive
//! intact, including their absence:
//!
//! ```text
//! {"hostName":"ws-1.ssh.example.dev","user":"ws-1"}  ->  7b22686f73744e616d65...
//! ```
//!
//! Older authorities were plain `[user@]host[:port]` strings; `decode` still
//! accepts those.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Final connectable SSH target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SshDestination {
    pub hostname: String,
    pub user: Option<String>,
    pub port: Option<u16>,
}

/// JSON shape of the encoded form. Kept separate so the bincode form of
/// `SshDestination` never sees `skip_serializing_if`.
#[derive(Serialize, Deserialize)]
struct EncodedForm {
    #[serde(rename = "hostName")]
    host_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

impl SshDestination {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            user: None,
            port: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Encode into the compact authority string
    pub fn encode(&self) -> String {
        let form = EncodedForm {
            host_name: self.hostname.clone(),
            user: self.user.clone(),
            port: self.port,
        };
        // Serializing a struct of strings and integers cannot fail
        let json = serde_json::to_vec(&form).unwrap_or_default();
        hex::encode(json)
    }

    /// Decode an authority string produced by `encode`, or a legacy
    /// `[user@]host[:port]` string
    pub fn decode(encoded: &str) -> Result<Self, ProtocolError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(ProtocolError::InvalidDestination(
                "empty destination".to_string(),
            ));
        }

        if let Ok(bytes) = hex::decode(encoded) {
            if let Ok(form) = serde_json::from_slice::<EncodedForm>(&bytes) {
                if form.host_name.is_empty() {
                    return Err(ProtocolError::InvalidDestination(
                        "missing hostName".to_string(),
                    ));
                }
                return Ok(Self {
                    hostname: form.host_name,
                    user: form.user,
                    port: form.port,
                });
            }
        }

        Self::parse_plain(encoded)
    }

    fn parse_plain(value: &str) -> Result<Self, ProtocolError> {
        let (user, host_port) = match value.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => {
                return Err(ProtocolError::InvalidDestination(format!(
                    "empty user in {:?}",
                    value
                )))
            }
            None => (None, value),
        };

        let (hostname, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ProtocolError::InvalidDestination(format!("invalid port in {:?}", value))
                })?;
                (host.to_string(), Some(port))
            }
            None => (host_port.to_string(), None),
        };

        if hostname.is_empty() {
            return Err(ProtocolError::InvalidDestination(format!(
                "missing host in {:?}",
                value
            )));
        }

        Ok(Self {
            hostname,
            user,
            port,
        })
    }
}

impl fmt::Display for SshDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.hostname)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}
