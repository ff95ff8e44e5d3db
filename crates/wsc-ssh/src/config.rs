//! OpenSSH client configuration
//!
//! Parses the user and system `ssh_config` files into host blocks and computes
//! effective per-host settings with OpenSSH semantics: the first obtained value
//! wins, except `IdentityFile` which accumulates. The user file is consulted
//! before the system file.
//!
//! The store also owns a generated sub-file and a managed block in the user
//! file that `Include`s it:
//!
//! ```text
//! ## START WSCONNECT MANAGED BLOCK
//! Include "/home/me/.ssh/wsconnect/config"
//! ## END WSCONNECT MANAGED BLOCK
//! ```

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};
use wsc_core::config::SshSettings;

pub const MANAGED_BLOCK_START: &str = "## START WSCONNECT MANAGED BLOCK";
pub const MANAGED_BLOCK_END: &str = "## END WSCONNECT MANAGED BLOCK";

/// Include nesting limit, as in OpenSSH
const MAX_INCLUDE_DEPTH: usize = 16;

/// Directives with a canonical spelling. Names are matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    Host,
    HostName,
    User,
    Port,
    IdentityAgent,
    IdentitiesOnly,
    IdentityFile,
    ForwardAgent,
    ProxyJump,
    ProxyCommand,
}

impl Directive {
    pub const ALL: [Directive; 10] = [
        Directive::Host,
        Directive::HostName,
        Directive::User,
        Directive::Port,
        Directive::IdentityAgent,
        Directive::IdentitiesOnly,
        Directive::IdentityFile,
        Directive::ForwardAgent,
        Directive::ProxyJump,
        Directive::ProxyCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Host => "Host",
            Directive::HostName => "HostName",
            Directive::User => "User",
            Directive::Port => "Port",
            Directive::IdentityAgent => "IdentityAgent",
            Directive::IdentitiesOnly => "IdentitiesOnly",
            Directive::IdentityFile => "IdentityFile",
            Directive::ForwardAgent => "ForwardAgent",
            Directive::ProxyJump => "ProxyJump",
            Directive::ProxyCommand => "ProxyCommand",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `Name value` line
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigLine {
    directive: Option<Directive>,
    value: String,
}

/// A `Host` (or `Match`) section
#[derive(Debug, Clone, Default)]
struct HostBlock {
    /// `None` for directives before the first `Host`, which apply everywhere
    patterns: Option<Vec<String>>,
    lines: Vec<ConfigLine>,
}

impl HostBlock {
    fn matches(&self, host: &str) -> bool {
        let Some(patterns) = &self.patterns else {
            return true;
        };
        let mut matched = false;
        for pattern in patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if wildcard_match(negated, host) {
                    return false;
                }
            } else if wildcard_match(pattern, host) {
                matched = true;
            }
        }
        matched
    }
}

/// OpenSSH wildcard syntax (`*` and `?` only) as a [`glob::Pattern`];
/// everything else, brackets included, matches literally
fn ssh_pattern(pattern: &str) -> Option<Pattern> {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' | '?' => escaped.push(c),
            other => escaped.push_str(&Pattern::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    Pattern::new(&escaped).ok()
}

/// `*` and `?` host matching, case-insensitive like OpenSSH host patterns
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    ssh_pattern(pattern).is_some_and(|p| p.matches_with(text, options))
}

fn is_pattern(value: &str) -> bool {
    value.starts_with('!') || value.contains('*') || value.contains('?')
}

/// Split on whitespace, honoring double quotes
fn split_args(value: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in value.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Split `Name value` / `Name=value`
fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let idx = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let name = &line[..idx];
    let rest = line[idx..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim();
    Some((name, rest))
}

fn unquote(value: &str) -> String {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// Expand `~`, `%d`, `%u`, `%h`, `%r` and `%%` in a path-like value
pub fn expand_tokens(value: &str, hostname: &str, remote_user: Option<&str>) -> String {
    let value = if value == "~" {
        home_dir().to_string_lossy().into_owned()
    } else if let Some(rest) = value.strip_prefix("~/") {
        home_dir().join(rest).to_string_lossy().into_owned()
    } else {
        value.to_string()
    };

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('d') => out.push_str(&home_dir().to_string_lossy()),
            Some('u') => out.push_str(&local_user()),
            Some('h') => out.push_str(hostname),
            Some('r') => out.push_str(remote_user.unwrap_or_default()),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Parse config text into blocks, following `Include` relative to `include_base`
fn parse_into(content: &str, include_base: &Path, depth: usize, blocks: &mut Vec<HostBlock>) {
    if blocks.is_empty() {
        blocks.push(HostBlock::default());
    }

    for raw in content.lines() {
        let Some((name, value)) = split_line(raw) else {
            continue;
        };

        if name.eq_ignore_ascii_case("Host") {
            blocks.push(HostBlock {
                patterns: Some(split_args(value)),
                lines: Vec::new(),
            });
            continue;
        }
        if name.eq_ignore_ascii_case("Match") {
            // Match criteria are not evaluated; the block never applies
            debug!("Ignoring Match block: {}", value);
            blocks.push(HostBlock {
                patterns: Some(Vec::new()),
                lines: Vec::new(),
            });
            continue;
        }
        if name.eq_ignore_ascii_case("Include") {
            if depth >= MAX_INCLUDE_DEPTH {
                warn!("Include nesting too deep, skipping {}", value);
                continue;
            }
            for arg in split_args(value) {
                for path in resolve_include(&arg, include_base) {
                    match std::fs::read_to_string(&path) {
                        Ok(text) => parse_into(&text, include_base, depth + 1, blocks),
                        Err(e) => debug!("Skipping include {:?}: {}", path, e),
                    }
                }
            }
            continue;
        }

        let line = ConfigLine {
            directive: Directive::from_name(name),
            value: unquote(value),
        };
        if let Some(block) = blocks.last_mut() {
            block.lines.push(line);
        }
    }
}

/// Expand an `Include` argument into existing files
fn resolve_include(arg: &str, base: &Path) -> Vec<PathBuf> {
    let expanded = expand_tokens(arg, "", None);
    let path = PathBuf::from(&expanded);
    let path = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };

    let Some(path_str) = path.to_str() else {
        return Vec::new();
    };
    if !is_pattern(path_str) {
        return vec![path];
    }
    let Some(pattern) = ssh_pattern(path_str) else {
        return Vec::new();
    };

    // Hidden files only match a pattern that names the dot, as with glob(3)
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    match glob::glob_with(pattern.as_str(), options) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(e) => {
            debug!("Bad include pattern {}: {}", arg, e);
            Vec::new()
        }
    }
}

/// A `ProxyJump` hop: `[user@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpSpec {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl JumpSpec {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = value.strip_prefix("ssh://").unwrap_or(value);
        if value.is_empty() {
            return None;
        }
        let (user, rest) = match value.rsplit_once('@') {
            Some((u, r)) if !u.is_empty() => (Some(u.to_string()), r),
            Some(_) => return None,
            None => (None, value),
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((h, p)) => (h, Some(p.parse::<u16>().ok()?)),
            None => (rest, None),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            user,
            host: host.to_string(),
            port,
        })
    }
}

/// Effective settings for one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfiguration {
    /// Name the configuration was computed for
    pub host: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_agent: Option<String>,
    pub identities_only: Option<bool>,
    pub identity_files: Vec<String>,
    pub forward_agent: Option<bool>,
    pub proxy_jump: Option<String>,
    pub proxy_command: Option<String>,
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

impl HostConfiguration {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }

    fn apply(&mut self, line: &ConfigLine) {
        let value = line.value.clone();
        match line.directive {
            Some(Directive::HostName) if self.hostname.is_none() => self.hostname = Some(value),
            Some(Directive::User) if self.user.is_none() => self.user = Some(value),
            Some(Directive::Port) if self.port.is_none() => match value.parse() {
                Ok(p) => self.port = Some(p),
                Err(_) => warn!(host = %self.host, "Ignoring invalid Port {:?}", value),
            },
            Some(Directive::IdentityAgent) if self.identity_agent.is_none() => {
                self.identity_agent = Some(value)
            }
            Some(Directive::IdentitiesOnly) if self.identities_only.is_none() => {
                self.identities_only = parse_yes_no(&value)
            }
            Some(Directive::IdentityFile) => {
                if !self.identity_files.contains(&value) {
                    self.identity_files.push(value);
                }
            }
            Some(Directive::ForwardAgent) if self.forward_agent.is_none() => {
                self.forward_agent = parse_yes_no(&value)
            }
            Some(Directive::ProxyJump) if self.proxy_jump.is_none() => {
                self.proxy_jump = Some(value)
            }
            Some(Directive::ProxyCommand) if self.proxy_command.is_none() => {
                self.proxy_command = Some(value)
            }
            _ => {}
        }
    }

    /// `HostName` with `%h` expanded, or the host itself
    pub fn effective_hostname(&self) -> String {
        match &self.hostname {
            Some(h) => h.replace("%h", &self.host),
            None => self.host.clone(),
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    pub fn identities_only(&self) -> bool {
        self.identities_only.unwrap_or(false)
    }

    /// Jump hosts in connection order; `ProxyJump none` yields none
    pub fn proxy_jumps(&self) -> Vec<JumpSpec> {
        match self.proxy_jump.as_deref() {
            None => Vec::new(),
            Some(v) if v.eq_ignore_ascii_case("none") => Vec::new(),
            Some(v) => v.split(',').filter_map(JumpSpec::parse).collect(),
        }
    }

    /// `IdentityFile` entries with tokens expanded
    pub fn identity_file_paths(&self) -> Vec<PathBuf> {
        let hostname = self.effective_hostname();
        self.identity_files
            .iter()
            .map(|f| PathBuf::from(expand_tokens(f, &hostname, self.user.as_deref())))
            .collect()
    }
}

/// A `Host` block written into the generated sub-file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub pattern: String,
    pub directives: Vec<(Directive, String)>,
}

impl HostEntry {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            directives: Vec::new(),
        }
    }

    pub fn with(mut self, directive: Directive, value: impl Into<String>) -> Self {
        self.directives.push((directive, value.into()));
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("Host {}\n", self.pattern);
        for (directive, value) in &self.directives {
            out.push_str(&format!("    {} {}\n", directive, value));
        }
        out
    }
}

/// The managed block text for an `Include` of `include_path`
pub fn render_managed_block(include_path: &Path) -> String {
    format!(
        "{}\nInclude \"{}\"\n{}\n",
        MANAGED_BLOCK_START,
        include_path.display(),
        MANAGED_BLOCK_END
    )
}

/// Replace the managed block in place, or prepend it when absent
pub fn apply_managed_block(existing: &str, block: &str) -> String {
    if let Some(start) = existing.find(MANAGED_BLOCK_START) {
        if let Some(end_rel) = existing[start..].find(MANAGED_BLOCK_END) {
            let mut end = start + end_rel + MANAGED_BLOCK_END.len();
            if existing[end..].starts_with("\r\n") {
                end += 2;
            } else if existing[end..].starts_with('\n') {
                end += 1;
            }
            let mut out = String::with_capacity(existing.len() + block.len());
            out.push_str(&existing[..start]);
            out.push_str(block);
            out.push_str(&existing[end..]);
            return out;
        }
    }

    if existing.is_empty() {
        block.to_string()
    } else {
        format!("{}\n{}", block, existing)
    }
}

/// Replace the `Host {pattern}` section of a generated file, or append it
fn upsert_host_entry(existing: &str, entry: &HostEntry) -> String {
    let header = format!("Host {}", entry.pattern);
    let mut out = String::new();
    let mut replaced = false;
    let mut skipping = false;

    for line in existing.split_inclusive('\n') {
        let trimmed = line.trim_end();
        let is_host_line = split_line(trimmed)
            .map(|(name, _)| name.eq_ignore_ascii_case("Host"))
            .unwrap_or(false);

        if is_host_line {
            skipping = false;
            if trimmed == header {
                out.push_str(&entry.render());
                replaced = true;
                skipping = true;
                continue;
            }
        }
        if !skipping {
            out.push_str(line);
        }
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&entry.render());
    }
    out
}

/// Write `content` unless the file already holds exactly these bytes.
/// Returns whether the file changed.
async fn write_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    match tokio::fs::read_to_string(path).await {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(true)
}

async fn read_or_empty(path: &Path) -> io::Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// User and system SSH configuration plus the generated sub-file
#[derive(Debug, Clone)]
pub struct SshConfigStore {
    user_path: PathBuf,
    system_path: PathBuf,
    managed_path: PathBuf,
    user: Vec<HostBlock>,
    system: Vec<HostBlock>,
}

impl SshConfigStore {
    pub fn new(user_path: PathBuf, system_path: PathBuf, managed_path: PathBuf) -> Self {
        Self {
            user_path,
            system_path,
            managed_path,
            user: Vec::new(),
            system: Vec::new(),
        }
    }

    pub fn from_settings(settings: &SshSettings, managed_path: PathBuf) -> Self {
        Self::new(
            settings.user_config_path(),
            settings.system_config_path(),
            managed_path,
        )
    }

    /// Build from in-memory text; includes resolve against the home `.ssh`
    pub fn from_strings(user: &str, system: &str) -> Self {
        let mut store = Self::new(
            PathBuf::from("config"),
            PathBuf::from("ssh_config"),
            PathBuf::from("wsconnect_config"),
        );
        parse_into(user, &home_dir().join(".ssh"), 0, &mut store.user);
        parse_into(system, &system_include_base(), 0, &mut store.system);
        store
    }

    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    pub fn managed_path(&self) -> &Path {
        &self.managed_path
    }

    /// (Re)read both files; missing files count as empty
    pub async fn load_from_filesystem(&mut self) -> io::Result<()> {
        let user = read_or_empty(&self.user_path).await?;
        let system = match read_or_empty(&self.system_path).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Cannot read system SSH config {:?}: {}", self.system_path, e);
                String::new()
            }
        };

        let user_base = self
            .user_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home_dir().join(".ssh"));

        self.user.clear();
        self.system.clear();
        parse_into(&user, &user_base, 0, &mut self.user);
        parse_into(&system, &system_include_base(), 0, &mut self.system);
        debug!(
            user_blocks = self.user.len(),
            system_blocks = self.system.len(),
            "Loaded SSH config"
        );
        Ok(())
    }

    /// Effective settings for `host`
    pub fn get_host_configuration(&self, host: &str) -> HostConfiguration {
        let mut config = HostConfiguration::new(host);
        for block in self.user.iter().chain(self.system.iter()) {
            if block.matches(host) {
                for line in &block.lines {
                    config.apply(line);
                }
            }
        }
        config
    }

    /// Concrete host names from `Host` lines, without patterns
    pub fn get_all_configured_hosts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        for block in self.user.iter().chain(self.system.iter()) {
            for pattern in block.patterns.iter().flatten() {
                if !is_pattern(pattern) && seen.insert(pattern.to_ascii_lowercase()) {
                    hosts.push(pattern.clone());
                }
            }
        }
        hosts
    }

    /// Write `entry` into the generated sub-file, replacing a previous entry
    /// for the same pattern. Returns whether the file changed.
    pub async fn add_host_configuration(&self, entry: &HostEntry) -> io::Result<bool> {
        let existing = read_or_empty(&self.managed_path).await?;
        let updated = upsert_host_entry(&existing, entry);
        write_if_changed(&self.managed_path, &updated).await
    }

    /// Make the user config `Include` the generated sub-file through the
    /// managed block. Returns whether the file changed.
    pub async fn ensure_managed_include(&self) -> io::Result<bool> {
        let existing = read_or_empty(&self.user_path).await?;
        let block = render_managed_block(&self.managed_path);
        let updated = apply_managed_block(&existing, &block);
        let changed = write_if_changed(&self.user_path, &updated).await?;
        if changed {
            debug!(path = ?self.user_path, "Updated managed SSH config block");
        }
        Ok(changed)
    }
}

fn system_include_base() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\ssh")
    } else {
        PathBuf::from("/etc/ssh")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directive_names_case_insensitive() {
        assert_eq!(Directive::from_name("hostname"), Some(Directive::HostName));
        assert_eq!(Directive::from_name("PROXYJUMP"), Some(Directive::ProxyJump));
        assert_eq!(Directive::from_name("ServerAliveInterval"), None);
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.example.dev", "ws-1.example.dev"));
        assert!(wildcard_match("ws-?", "ws-1"));
        assert!(!wildcard_match("ws-?", "ws-12"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("Box", "box"));
        assert!(!wildcard_match("*.dev", "example.com"));
        assert!(wildcard_match("[v6]*", "[v6]:22"));
        assert!(!wildcard_match("[v6]*", "v:22"));
    }

    #[test]
    fn test_first_value_wins_and_identity_files_accumulate() {
        let store = SshConfigStore::from_strings(
            "Host box\n  hostname 10.0.0.5\n  IdentityFile ~/.ssh/box\n\nHost *\n  User fallback\n  HostName ignored\n  IdentityFile ~/.ssh/id_ed25519\n",
            "Host *\n  Port 2222\n  User system\n",
        );

        let config = store.get_host_configuration("box");
        assert_eq!(config.hostname.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.user.as_deref(), Some("fallback"));
        assert_eq!(config.port, Some(2222));
        assert_eq!(
            config.identity_files,
            vec!["~/.ssh/box".to_string(), "~/.ssh/id_ed25519".to_string()]
        );
    }

    #[test]
    fn test_negated_patterns() {
        let store = SshConfigStore::from_strings(
            "Host *.corp !bastion.corp\n  ProxyJump bastion.corp\n",
            "",
        );
        assert_eq!(
            store.get_host_configuration("db.corp").proxy_jump.as_deref(),
            Some("bastion.corp")
        );
        assert_eq!(store.get_host_configuration("bastion.corp").proxy_jump, None);
    }

    #[test]
    fn test_global_directives_before_first_host() {
        let store = SshConfigStore::from_strings("IdentitiesOnly yes\nHost a\n  User x\n", "");
        assert!(store.get_host_configuration("zzz").identities_only());
    }

    #[test]
    fn test_equals_syntax_and_quotes() {
        let store =
            SshConfigStore::from_strings("Host q\n  IdentityAgent=\"/tmp/agent sock\"\n", "");
        assert_eq!(
            store.get_host_configuration("q").identity_agent.as_deref(),
            Some("/tmp/agent sock")
        );
    }

    #[test]
    fn test_configured_hosts_exclude_patterns() {
        let store = SshConfigStore::from_strings(
            "Host alpha beta\nHost *.dev\nHost !gamma\nHost ws-??\nHost alpha\n",
            "Host delta\n",
        );
        assert_eq!(
            store.get_all_configured_hosts(),
            vec!["alpha".to_string(), "beta".to_string(), "delta".to_string()]
        );
    }

    #[test]
    fn test_proxy_jumps() {
        let store = SshConfigStore::from_strings(
            "Host target\n  ProxyJump alice@hop1:2200,hop2\nHost direct\n  ProxyJump none\n",
            "",
        );
        let jumps = store.get_host_configuration("target").proxy_jumps();
        assert_eq!(
            jumps,
            vec![
                JumpSpec {
                    user: Some("alice".into()),
                    host: "hop1".into(),
                    port: Some(2200)
                },
                JumpSpec {
                    user: None,
                    host: "hop2".into(),
                    port: None
                },
            ]
        );
        assert!(store.get_host_configuration("direct").proxy_jumps().is_empty());
    }

    #[test]
    fn test_expand_tokens() {
        let expanded = expand_tokens("%d/keys/%h_%r", "box", Some("me"));
        assert!(expanded.ends_with("/keys/box_me"));
        assert_eq!(expand_tokens("100%%", "h", None), "100%");
    }

    #[tokio::test]
    async fn test_include_is_followed() {
        let dir = TempDir::new().unwrap();
        let included = dir.path().join("conf.d");
        std::fs::create_dir_all(&included).unwrap();
        std::fs::write(included.join("work.conf"), "Host work\n  HostName work.internal\n").unwrap();
        std::fs::write(included.join("notes.txt"), "Host notes\n  HostName notes.internal\n").unwrap();
        std::fs::write(included.join(".hidden.conf"), "Host hidden\n  HostName hidden.internal\n")
            .unwrap();

        let user = dir.path().join("config");
        std::fs::write(&user, "Include conf.d/*.conf\nHost home\n  HostName 192.168.1.2\n")
            .unwrap();

        let mut store = SshConfigStore::new(
            user,
            dir.path().join("missing_system"),
            dir.path().join("generated"),
        );
        store.load_from_filesystem().await.unwrap();

        assert_eq!(
            store.get_host_configuration("work").hostname.as_deref(),
            Some("work.internal")
        );
        assert_eq!(
            store.get_host_configuration("home").hostname.as_deref(),
            Some("192.168.1.2")
        );
        assert!(store.get_host_configuration("notes").hostname.is_none());
        assert!(store.get_host_configuration("hidden").hostname.is_none());
    }

    #[test]
    fn test_managed_block_prepended_once() {
        let block = render_managed_block(Path::new("/tmp/gen"));
        let original = "Host a\n  User b\n";

        let first = apply_managed_block(original, &block);
        assert!(first.starts_with(MANAGED_BLOCK_START));
        assert!(first.ends_with(original));

        let second = apply_managed_block(&first, &block);
        assert_eq!(second, first);
    }

    #[test]
    fn test_managed_block_replaced_in_place() {
        let old = format!(
            "Host a\n{}\nInclude \"/old\"\n{}\nHost b\n",
            MANAGED_BLOCK_START, MANAGED_BLOCK_END
        );
        let block = render_managed_block(Path::new("/new"));
        let updated = apply_managed_block(&old, &block);
        assert_eq!(
            updated,
            format!("Host a\n{}Host b\n", block)
        );
        assert!(!updated.contains("/old"));
    }

    #[tokio::test]
    async fn test_ensure_managed_include_is_byte_stable() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("config");
        std::fs::write(&user, "Host keep\n  User me\n").unwrap();

        let store = SshConfigStore::new(
            user.clone(),
            dir.path().join("system"),
            dir.path().join("wsconnect").join("config"),
        );

        assert!(store.ensure_managed_include().await.unwrap());
        let after_first = std::fs::read(&user).unwrap();

        assert!(!store.ensure_managed_include().await.unwrap());
        let after_second = std::fs::read(&user).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_add_host_configuration_replaces_same_pattern() {
        let dir = TempDir::new().unwrap();
        let store = SshConfigStore::new(
            dir.path().join("config"),
            dir.path().join("system"),
            dir.path().join("generated"),
        );

        let entry = HostEntry::new("*.example.wsc.local")
            .with(Directive::ProxyCommand, "/usr/bin/wsc-proxy %h")
            .with(Directive::User, "me");
        assert!(store.add_host_configuration(&entry).await.unwrap());
        assert!(!store.add_host_configuration(&entry).await.unwrap());

        let other = HostEntry::new("other").with(Directive::Port, "2200");
        store.add_host_configuration(&other).await.unwrap();

        let changed = HostEntry::new("*.example.wsc.local")
            .with(Directive::ProxyCommand, "/opt/wsc-proxy %h");
        store.add_host_configuration(&changed).await.unwrap();

        let content = std::fs::read_to_string(store.managed_path()).unwrap();
        assert_eq!(content.matches("Host *.example.wsc.local").count(), 1);
        assert!(content.contains("/opt/wsc-proxy"));
        assert!(!content.contains("/usr/bin/wsc-proxy"));
        assert!(content.contains("Host other\n    Port 2200\n"));
    }
}
