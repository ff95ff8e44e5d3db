//! Output formatting utilities for the CLI
//!
//! Tables for identities, the resolution summary, and colored status
//! messages.

use std::io::{self, Write};

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};
use wsc_resolver::Resolution;
use wsc_ssh::IdentityKey;

/// Format gathered identities as an ASCII table, in the order they are tried
pub fn format_identities(keys: &[IdentityKey]) -> String {
    if keys.is_empty() {
        return "No identities found".to_string();
    }

    #[derive(Tabled)]
    struct IdentityRow {
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "TYPE")]
        key_type: String,
        #[tabled(rename = "FINGERPRINT")]
        fingerprint: String,
        #[tabled(rename = "SOURCE")]
        source: String,
        #[tabled(rename = "COMMENT")]
        comment: String,
    }

    let rows: Vec<IdentityRow> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| IdentityRow {
            index: i + 1,
            key_type: k.key_type.clone(),
            fingerprint: truncate(&k.fingerprint, 24),
            source: identity_source(k),
            comment: k.comment.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn identity_source(key: &IdentityKey) -> String {
    match (&key.filename, key.agent_support) {
        (Some(path), true) => format!("{} (agent)", path.display()),
        (Some(path), false) => path.display().to_string(),
        (None, _) => "agent".to_string(),
    }
}

/// Human-readable summary of a resolution
pub fn format_resolution(resolution: &Resolution) -> String {
    let mut output = String::new();
    output.push_str(&format!("Destination: {}\n", resolution.destination));
    output.push_str(&format!("Strategy:    {}\n", resolution.strategy));
    output.push_str(&format!("Encoded:     {}\n", resolution.encoded));
    if let Some(path) = &resolution.ssh_config_path {
        output.push_str(&format!("SSH config:  {}\n", path.display()));
    }
    output
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_tagged<W: Write>(mut out: W, color: Color, tag: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(tag),
        Print(' '),
        ResetColor,
        Print(msg),
        Print('\n')
    );
}

/// Success line on stdout, after the command's actual output
pub fn print_success(msg: &str) {
    print_tagged(io::stdout(), Color::Green, "✓", msg);
}

pub fn print_error(msg: &str) {
    print_tagged(io::stderr(), Color::Red, "✗", msg);
}

pub fn print_warning(msg: &str) {
    print_tagged(io::stderr(), Color::Yellow, "⚠", msg);
}

/// Status chatter goes to stderr so stdout stays parseable
pub fn print_info(msg: &str) {
    print_tagged(io::stderr(), Color::Cyan, "ℹ", msg);
}

fn write_password_notice<W: Write>(mut out: W, destination: &str, password: &str) {
    print_tagged(
        &mut out,
        Color::Yellow,
        "⚠",
        &format!(
            "No registered SSH key matched. When {} asks for a password, enter:",
            destination
        ),
    );
    let _ = writeln!(out, "    {}", password);
}

/// Password the user must type at the SSH prompt, on stderr with the other
/// notices so `--json` output stays parseable
pub fn print_password_notice(destination: &str, password: &str) {
    write_password_notice(io::stderr().lock(), destination, password);
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsc_core::Strategy;
    use wsc_protocol::SshDestination;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("SHA256:abcdefghijklmnop", 10), "SHA256:...");
    }

    #[test]
    fn test_empty_identities() {
        assert_eq!(format_identities(&[]), "No identities found");
    }

    #[test]
    fn test_password_notice_names_destination_and_password() {
        let mut out = Vec::new();
        write_password_notice(&mut out, "ws-1@ws-1.ssh.example.dev", "owner-token");
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("When ws-1@ws-1.ssh.example.dev asks for a password"));
        assert_eq!(lines[1], "    owner-token");
    }

    #[test]
    fn test_format_resolution() {
        let destination = SshDestination::new("ws-1.ssh.example.dev").with_user("ws-1");
        let resolution = Resolution {
            encoded: destination.encode(),
            destination,
            strategy: Strategy::Gateway,
            password: None,
            ssh_config_path: None,
        };
        let text = format_resolution(&resolution);
        assert!(text.contains("Destination: ws-1@ws-1.ssh.example.dev"));
        assert!(text.contains("Strategy:    gateway"));
        assert!(!text.contains("SSH config"));
    }
}
