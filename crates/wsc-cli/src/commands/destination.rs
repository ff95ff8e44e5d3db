//! Encode/decode commands for the editor's authority strings

use anyhow::{Context, Result};
use wsc_protocol::SshDestination;

/// Print the authority string for `user@host:port`
pub fn encode_command(host: &str, user: Option<String>, port: Option<u16>) -> Result<()> {
    if host.trim().is_empty() {
        anyhow::bail!("Host must not be empty");
    }

    let mut destination = SshDestination::new(host);
    if let Some(user) = user {
        destination = destination.with_user(user);
    }
    if let Some(port) = port {
        destination = destination.with_port(port);
    }
    println!("{}", destination.encode());
    Ok(())
}

/// Print the destination behind an authority string
pub fn decode_command(encoded: &str, json: bool) -> Result<()> {
    let destination = SshDestination::decode(encoded)
        .with_context(|| format!("Not a wsconnect authority: {}", encoded))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&destination)?);
    } else {
        println!("Host: {}", destination.hostname);
        if let Some(user) = &destination.user {
            println!("User: {}", user);
        }
        if let Some(port) = destination.port {
            println!("Port: {}", port);
        }
    }
    Ok(())
}
