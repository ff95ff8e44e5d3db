//! Resolver configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs, option_duration_secs};

/// Which workspace API shape to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// Legacy JSON-RPC endpoint
    #[default]
    Server,
    /// REST public API
    Public,
}

/// Configuration for connection resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Workspace service host
    pub host: String,

    /// Backend API shape
    pub api: ApiFlavor,

    /// Allow the local SSH proxy strategy when the host supports it
    pub local_ssh_proxy: bool,

    /// Skip the local SSH proxy even when supported
    pub force_legacy_helper: bool,

    /// Lowest service version that understands the local SSH proxy
    pub min_local_proxy_version: String,

    /// Executable the generated SSH config uses as `ProxyCommand`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_command: Option<PathBuf>,

    /// Shared store, helper binaries and logs
    pub state_dir: PathBuf,

    /// Interval between workspace heartbeats
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    pub helper: HelperSettings,
    pub ssh: SshSettings,
    pub timeouts: Timeouts,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            host: "https://gitpod.io".to_string(),
            api: ApiFlavor::default(),
            local_ssh_proxy: false,
            force_legacy_helper: false,
            min_local_proxy_version: "2023.4.0".to_string(),
            proxy_command: None,
            state_dir: super::default_state_dir(),
            heartbeat_interval: Duration::from_secs(15),
            helper: HelperSettings::default(),
            ssh: SshSettings::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl ResolverConfig {
    /// Directory holding the shared store entries
    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join("state")
    }

    /// Directory for helper logs and generated SSH configs
    pub fn run_dir(&self) -> PathBuf {
        self.state_dir.join("run")
    }

    /// Directory for downloaded helper binaries
    pub fn bin_dir(&self) -> PathBuf {
        self.state_dir.join("bin")
    }

    /// Generated SSH config included from the user's config
    pub fn managed_ssh_config(&self) -> PathBuf {
        self.state_dir.join("ssh").join("config")
    }
}

/// Local helper settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperSettings {
    /// Use this binary instead of downloading one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,

    /// Let the helper open tunnels for forwarded ports automatically
    pub auto_tunnel: bool,

    /// Helper exits after this long without clients
    #[serde(
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_timeout: Option<Duration>,

    pub verbose: bool,

    /// Callback the helper redirects to after browser sign-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_redirect_url: Option<String>,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            install_path: None,
            auto_tunnel: true,
            idle_timeout: Some(Duration::from_secs(3 * 60 * 60)),
            verbose: false,
            auth_redirect_url: None,
        }
    }
}

/// SSH client settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Extra identity files tried when the SSH config names none
    pub identity_files: Vec<PathBuf>,

    /// User SSH client config, default `~/.ssh/config`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_config: Option<PathBuf>,

    /// System SSH client config, default `/etc/ssh/ssh_config`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config: Option<PathBuf>,

    /// Known-hosts file updated after successful probes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,
}

impl SshSettings {
    fn ssh_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ssh")
    }

    pub fn user_config_path(&self) -> PathBuf {
        self.user_config
            .clone()
            .unwrap_or_else(|| Self::ssh_dir().join("config"))
    }

    pub fn system_config_path(&self) -> PathBuf {
        self.system_config.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                PathBuf::from(r"C:\ProgramData\ssh\ssh_config")
            } else {
                PathBuf::from("/etc/ssh/ssh_config")
            }
        })
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.known_hosts
            .clone()
            .unwrap_or_else(|| Self::ssh_dir().join("known_hosts"))
    }
}

/// Network and coordination timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Host key fetch
    #[serde(with = "duration_millis")]
    pub host_keys: Duration,

    /// SSH handshake through authentication
    #[serde(with = "duration_secs")]
    pub handshake: Duration,

    /// Pause between helper RPC retries
    #[serde(with = "duration_millis")]
    pub rpc_retry_delay: Duration,

    /// Lock store polling
    #[serde(with = "duration_millis")]
    pub lock_poll: Duration,

    /// Expected duration of a locked helper install/start
    #[serde(with = "duration_secs")]
    pub lock_lease: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            host_keys: Duration::from_millis(1500),
            handshake: Duration::from_secs(40),
            rpc_retry_delay: Duration::from_millis(1000),
            lock_poll: Duration::from_millis(150),
            lock_lease: Duration::from_secs(300),
        }
    }
}
