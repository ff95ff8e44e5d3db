//! Local helper supervision
//!
//! [`Supervisor::ensure`] makes sure exactly one helper runs per service host
//! across every editor process on the machine. All work happens under the
//! cross-process lock for the host authority, so concurrent callers either
//! perform the install/start or observe its result.
//!
//! ```text
//! NotInstalled -> Installing -> Installed -> Starting -> Running
//! Running -> Reinstalling      (new binary version; old process killed first)
//! Running -> Retrying          (transient RPC failure, helper alive)
//! Running -> Stopped           (fatal RPC failure or process death)
//! ```

mod install;
mod launch;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsc_core::config::ResolverConfig;
use wsc_core::error::ConfigError;
use wsc_core::store::keys;
use wsc_core::types::{host_authority, LocalHelperConfig, LocalHelperInstallation};
use wsc_core::{checkpoint, KeyValueStore, LockCoordinator, ResolveError, StoreExt};

use crate::helper_client::HelperClient;

pub use install::{helper_binary_name, helper_download_url, FetchOutcome, Installer};
pub use launch::{pick_free_port, spawn_detached, LaunchSpec};

/// Lifecycle position of the helper for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    NotInstalled,
    Installing,
    Installed,
    Starting,
    Running,
    Reinstalling,
    Retrying,
    Stopped,
}

impl fmt::Display for HelperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInstalled => "not-installed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reinstalling => "reinstalling",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// In-process view of each host's helper state
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: Arc<DashMap<String, HelperState>>,
}

impl StateTable {
    pub fn get(&self, authority: &str) -> HelperState {
        self.states
            .get(authority)
            .map(|s| *s)
            .unwrap_or(HelperState::NotInstalled)
    }

    pub(crate) fn set(&self, authority: &str, state: HelperState) {
        let previous = self.states.insert(authority.to_string(), state);
        if previous != Some(state) {
            debug!(host = %authority, state = %state, "Helper state");
        }
    }
}

/// Process operations the supervisor needs
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Start `binary` detached and return its pid
    async fn spawn(&self, binary: &Path, spec: &LaunchSpec) -> Result<u32, ResolveError>;

    fn is_alive(&self, pid: u32) -> bool;

    fn terminate(&self, pid: u32) -> Result<(), ResolveError>;
}

/// Real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

#[async_trait]
impl ProcessControl for SystemProcesses {
    async fn spawn(&self, binary: &Path, spec: &LaunchSpec) -> Result<u32, ResolveError> {
        spawn_detached(binary, spec).await
    }

    fn is_alive(&self, pid: u32) -> bool {
        wsc_core::process::is_process_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), ResolveError> {
        wsc_core::process::terminate_process(pid).map_err(ResolveError::from)
    }
}

fn store_error(e: wsc_core::error::StoreError) -> ResolveError {
    ResolveError::lock_failed(&e)
}

/// Installs, upgrades and starts local helpers
pub struct Supervisor {
    config: Arc<ResolverConfig>,
    store: Arc<dyn KeyValueStore>,
    locks: LockCoordinator,
    installer: Installer,
    processes: Arc<dyn ProcessControl>,
    states: StateTable,
}

impl Supervisor {
    pub fn new(
        config: Arc<ResolverConfig>,
        store: Arc<dyn KeyValueStore>,
        processes: Arc<dyn ProcessControl>,
    ) -> Self {
        let locks = LockCoordinator::new(Arc::clone(&store))
            .with_poll_interval(config.timeouts.lock_poll);
        let installer = Installer::new(config.bin_dir());
        Self {
            config,
            store,
            locks,
            installer,
            processes,
            states: StateTable::default(),
        }
    }

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    /// RPC client for a helper returned by [`Self::ensure`]
    pub fn client(&self, config: &LocalHelperConfig) -> HelperClient {
        HelperClient::new(
            config.clone(),
            host_authority(&config.host),
            Arc::clone(&self.processes),
            self.states.clone(),
            self.config.timeouts.rpc_retry_delay,
        )
    }

    /// Running helper for `host`, installing or starting one when needed
    pub async fn ensure(
        &self,
        host: &str,
        cancel: &CancellationToken,
    ) -> Result<LocalHelperConfig, ResolveError> {
        let authority = host_authority(host);
        let lease = self.config.timeouts.lock_lease;

        self.locks
            .with_lock(&authority, lease, cancel, |work| {
                let authority = authority.clone();
                async move {
                    match self.ensure_locked(host, &authority, &work).await {
                        Err(ResolveError::Cancelled) if !cancel.is_cancelled() => {
                            warn!(host = %authority, "Helper lock was taken over during ensure");
                            Err(ResolveError::lock_lost(&authority))
                        }
                        result => result,
                    }
                }
            })
            .await
    }

    async fn ensure_locked(
        &self,
        host: &str,
        authority: &str,
        cancel: &CancellationToken,
    ) -> Result<LocalHelperConfig, ResolveError> {
        let config_key = keys::helper_config(authority);
        let install_key = keys::installation(authority);

        let mut running: Option<LocalHelperConfig> =
            self.store.get_json(&config_key).map_err(store_error)?;
        let cached: Option<LocalHelperInstallation> =
            self.store.get_json(&install_key).map_err(store_error)?;

        if let Some(cfg) = &running {
            if !self.processes.is_alive(cfg.pid) {
                debug!(host = %authority, pid = cfg.pid, "Cached helper is not running");
                self.store.delete(&config_key).map_err(store_error)?;
                running = None;
                self.states.set(authority, HelperState::Stopped);
            }
        }

        let installation = match self.current_installation(host, authority, cached).await? {
            Installation::Unchanged(installation) => installation,
            Installation::Replaced { old, new } => {
                if let Some(cfg) = running.take() {
                    self.states.set(authority, HelperState::Reinstalling);
                    info!(host = %authority, pid = cfg.pid, "Stopping helper for upgrade");
                    if let Err(e) = self.processes.terminate(cfg.pid) {
                        warn!(pid = cfg.pid, "Failed to stop old helper: {}", e);
                    }
                    self.store.delete(&config_key).map_err(store_error)?;
                }
                if let Some(old) = old {
                    if old.etag.is_some() && old.binary_path != new.binary_path {
                        install::discard(&old).await;
                    }
                }
                self.store.set_json(&install_key, &new).map_err(store_error)?;
                self.states.set(authority, HelperState::Installed);
                new
            }
        };
        checkpoint(cancel)?;

        if let Some(cfg) = running {
            self.states.set(authority, HelperState::Running);
            return Ok(cfg);
        }

        self.start(host, authority, &installation, cancel).await
    }

    /// Installation to run: the pinned binary, or the downloaded one after
    /// revalidation
    async fn current_installation(
        &self,
        host: &str,
        authority: &str,
        cached: Option<LocalHelperInstallation>,
    ) -> Result<Installation, ResolveError> {
        if let Some(path) = &self.config.helper.install_path {
            if !install::is_executable_file(path) {
                return Err(ConfigError::Invalid(format!(
                    "helper install_path {:?} is not an executable file",
                    path
                ))
                .into());
            }
            let pinned = LocalHelperInstallation {
                binary_path: path.clone(),
                etag: None,
            };
            return Ok(match cached {
                Some(c) if c == pinned => Installation::Unchanged(c),
                old => Installation::Replaced { old, new: pinned },
            });
        }

        self.states.set(
            authority,
            if cached.is_some() {
                HelperState::Installed
            } else {
                HelperState::Installing
            },
        );
        match self.installer.fetch(host, authority, cached.as_ref()).await {
            Ok(FetchOutcome::Installed(new)) => Ok(Installation::Replaced { old: cached, new }),
            Ok(FetchOutcome::NotModified) => match cached {
                Some(c) => Ok(Installation::Unchanged(c)),
                None => Err(ResolveError::Api("Helper download returned no binary".into())),
            },
            Err(e) => match cached {
                Some(c) if c.binary_path.is_file() => {
                    warn!(host = %authority, "Helper update check failed, using installed binary: {}", e);
                    Ok(Installation::Unchanged(c))
                }
                _ => {
                    self.states.set(authority, HelperState::NotInstalled);
                    Err(e)
                }
            },
        }
    }

    async fn start(
        &self,
        host: &str,
        authority: &str,
        installation: &LocalHelperInstallation,
        cancel: &CancellationToken,
    ) -> Result<LocalHelperConfig, ResolveError> {
        self.states.set(authority, HelperState::Starting);

        let run_dir = self.run_dir(authority);
        let api_port = pick_free_port()?;
        let spec = LaunchSpec::new(host, &self.config.helper, &run_dir, api_port);

        checkpoint(cancel)?;
        let pid = match self.processes.spawn(&installation.binary_path, &spec).await {
            Ok(pid) => pid,
            Err(e) => {
                self.states.set(authority, HelperState::Stopped);
                return Err(e);
            }
        };
        // Nothing records an unpersisted helper, so it must not outlive us
        if let Err(e) = checkpoint(cancel) {
            debug!(host = %authority, pid, "Stopping helper started by an abandoned ensure");
            if let Err(err) = self.processes.terminate(pid) {
                warn!(pid, "Failed to stop helper: {}", err);
            }
            self.states.set(authority, HelperState::Stopped);
            return Err(e);
        }

        let cfg = LocalHelperConfig {
            host: host.to_string(),
            generated_ssh_config_path: spec.generated_ssh_config_path,
            api_port,
            pid,
            log_path: spec.log_path,
        };
        self.store
            .set_json(&keys::helper_config(authority), &cfg)
            .map_err(store_error)?;
        self.states.set(authority, HelperState::Running);
        info!(host = %authority, pid, port = api_port, "Local helper running");
        Ok(cfg)
    }

    fn run_dir(&self, authority: &str) -> PathBuf {
        self.config.run_dir().join(install::sanitize(authority))
    }
}

enum Installation {
    Unchanged(LocalHelperInstallation),
    Replaced {
        old: Option<LocalHelperInstallation>,
        new: LocalHelperInstallation,
    },
}
