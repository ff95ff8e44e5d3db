//! Destination resolution
//!
//! Strategies are tried in a fixed order:
//!
//! 1. local SSH proxy, when the host supports it and it is not disabled
//! 2. direct SSH gateway, verified by a real test connection
//! 3. legacy local helper, only after a recoverable gateway failure and
//!    never for debug workspaces
//!
//! A workspace that is not running fails before any strategy runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsc_core::config::ResolverConfig;
use wsc_core::store::keys;
use wsc_core::traits::{
    Notifier, Prompter, StatusEvent, StatusReporter, UserAction, WorkspaceApi,
};
use wsc_core::types::{host_url, ConnectionParams, DestinationRecord, WorkspaceStatus};
use wsc_core::{checkpoint, KeyValueStore, ResolveError, StoreExt, Strategy};
use wsc_protocol::SshDestination;
use wsc_ssh::agent::{resolve_agent_socket, AgentKeySource, SystemAgent};
use wsc_ssh::identity::filter_registered;
use wsc_ssh::probe::{RusshConnector, SshConnector};
use wsc_ssh::{known_hosts, IdentityGatherer, ProbeTarget, SshConfigStore, SshProber};

use crate::host_keys::fetch_host_keys;
use crate::local_proxy;
use crate::supervisor::{ProcessControl, Supervisor, SystemProcesses};
use crate::version_cache::VersionCache;

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// A usable SSH destination for the editor
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub destination: SshDestination,
    /// Authority string handed to the editor
    pub encoded: String,
    pub strategy: Strategy,
    /// One-time password the user must type, when no identity is usable
    pub password: Option<String>,
    /// SSH config file the editor should connect with instead of the default
    pub ssh_config_path: Option<PathBuf>,
}

impl Resolution {
    fn new(destination: SshDestination, strategy: Strategy) -> Self {
        Self {
            encoded: destination.encode(),
            destination,
            strategy,
            password: None,
            ssh_config_path: None,
        }
    }
}

/// Editor-side collaborators the resolver reports to
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn WorkspaceApi>,
    pub notifier: Arc<dyn Notifier>,
    pub prompter: Arc<dyn Prompter>,
    pub reporter: Arc<dyn StatusReporter>,
}

pub struct Resolver {
    config: Arc<ResolverConfig>,
    store: Arc<dyn KeyValueStore>,
    collaborators: Collaborators,
    connector: Arc<dyn SshConnector>,
    agent: Arc<dyn AgentKeySource>,
    supervisor: Supervisor,
    versions: VersionCache,
    http: Client,
}

impl Resolver {
    pub fn new(
        config: Arc<ResolverConfig>,
        store: Arc<dyn KeyValueStore>,
        collaborators: Collaborators,
    ) -> Self {
        let supervisor = Supervisor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::new(SystemProcesses),
        );
        Self {
            config,
            store,
            collaborators,
            connector: Arc::new(RusshConnector::default()),
            agent: Arc::new(SystemAgent),
            supervisor,
            versions: VersionCache::new(),
            http: Client::builder().build().unwrap_or_default(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn SshConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_agent(mut self, agent: Arc<dyn AgentKeySource>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_processes(mut self, processes: Arc<dyn ProcessControl>) -> Self {
        self.supervisor = Supervisor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            processes,
        );
        self
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn versions(&self) -> &VersionCache {
        &self.versions
    }

    /// Find a working way to reach `params`' workspace over SSH
    pub async fn resolve(
        &self,
        params: &ConnectionParams,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        info!(
            workspace_id = %params.workspace_id,
            host = %params.authority(),
            debug = params.debug_workspace,
            "Resolving SSH destination"
        );

        let result = self.resolve_inner(params, cancel).await;
        match &result {
            Ok(resolution) => {
                info!(
                    workspace_id = %params.workspace_id,
                    strategy = %resolution.strategy,
                    destination = %resolution.destination,
                    "Resolved SSH destination"
                );
                self.persist(params, resolution);
            }
            Err(e) if e.is_reportable() => self.notify_failure(params, e).await,
            Err(_) => debug!(workspace_id = %params.workspace_id, "Resolution cancelled"),
        }
        result
    }

    async fn resolve_inner(
        &self,
        params: &ConnectionParams,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let status = self
            .collaborators
            .api
            .workspace_status(&params.workspace_id)
            .await?;
        checkpoint(cancel)?;
        if !status.phase.is_running() {
            return Err(ResolveError::NoRunningInstance(status.phase));
        }

        if self.local_proxy_supported(&params.host).await {
            checkpoint(cancel)?;
            let result = self.try_local_proxy(params).await;
            self.report(params, Strategy::LocalSshProxy, &result);
            match result {
                Ok(resolution) => return Ok(resolution),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(
                    workspace_id = %params.workspace_id,
                    "Local SSH proxy unavailable, trying gateway: {}", e
                ),
            }
        }
        checkpoint(cancel)?;

        let result = self.try_gateway(params, &status, cancel).await;
        self.report(params, Strategy::Gateway, &result);
        match result {
            Ok(resolution) => return Ok(resolution),
            Err(e) if !e.is_recoverable() || params.debug_workspace => return Err(e),
            Err(e) => {
                info!(workspace_id = %params.workspace_id, "Gateway unavailable, falling back to local helper: {}", e);
                self.collaborators
                    .notifier
                    .info(&format!(
                        "Direct SSH is not available for {} ({}); using the local helper instead.",
                        params.workspace_id, e
                    ))
                    .await;
            }
        }
        checkpoint(cancel)?;

        let result = self.try_local_helper(params, cancel).await;
        self.report(params, Strategy::LocalHelper, &result);
        result
    }

    async fn local_proxy_supported(&self, host: &str) -> bool {
        if !self.config.local_ssh_proxy || self.config.force_legacy_helper {
            return false;
        }
        let supported = self
            .versions
            .at_least(
                &self.http,
                host,
                &self.config.min_local_proxy_version,
                VERSION_TIMEOUT,
            )
            .await;
        debug!(host = %host, supported, "Local SSH proxy capability");
        supported
    }

    fn ssh_config_store(&self) -> SshConfigStore {
        SshConfigStore::from_settings(&self.config.ssh, self.config.managed_ssh_config())
    }

    async fn try_local_proxy(&self, params: &ConnectionParams) -> Result<Resolution, ResolveError> {
        let ssh_config = self.ssh_config_store();
        local_proxy::prepare(
            &ssh_config,
            &params.host,
            self.config.proxy_command.as_deref(),
        )
        .await?;
        Ok(Resolution::new(
            local_proxy::proxy_destination(params),
            Strategy::LocalSshProxy,
        ))
    }

    async fn try_gateway(
        &self,
        params: &ConnectionParams,
        status: &WorkspaceStatus,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let trusted = fetch_host_keys(&self.http, status, self.config.timeouts.host_keys).await?;
        checkpoint(cancel)?;

        let workspace_host = status
            .workspace_host()
            .ok_or_else(|| ResolveError::NoSshGateway(params.workspace_id.clone()))?;
        let gateway_host = format!("{}.ssh.{}", params.workspace_id, workspace_host);
        let user = params.gateway_user();

        let mut ssh_config = self.ssh_config_store();
        if let Err(e) = ssh_config.load_from_filesystem().await {
            warn!("Ignoring unreadable SSH config: {}", e);
        }
        let host_config = ssh_config.get_host_configuration(&gateway_host);
        let agent_socket = resolve_agent_socket(
            host_config.identity_agent.as_deref(),
            &host_config.effective_hostname(),
        );

        let mut hints = self.config.ssh.identity_files.clone();
        hints.extend(host_config.identity_file_paths());
        let gatherer = IdentityGatherer::new(Arc::clone(&self.agent));
        let identities = gatherer
            .gather(&hints, agent_socket.as_deref(), host_config.identities_only())
            .await;
        checkpoint(cancel)?;

        let registered = match self.collaborators.api.registered_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cannot list registered SSH keys: {}", e);
                Vec::new()
            }
        };
        checkpoint(cancel)?;
        let identities = filter_registered(identities, &registered);

        let password = if identities.is_empty() {
            debug!(workspace_id = %params.workspace_id, "No registered identity, using owner token");
            let token = self
                .collaborators
                .api
                .owner_token(&params.workspace_id)
                .await?;
            checkpoint(cancel)?;
            Some(token)
        } else {
            None
        };

        let target = ProbeTarget {
            user: Some(user.clone()),
            identities,
            agent_socket,
            password: password.clone(),
            // A gateway that authenticates but cannot run commands is useless
            verify_output: true,
            ..ProbeTarget::new(gateway_host.clone())
        };
        let prober = SshProber::new(
            Arc::clone(&self.connector),
            gatherer,
            Arc::clone(&self.collaborators.prompter),
            self.config.ssh.known_hosts_path(),
        )
        .with_handshake_timeout(self.config.timeouts.handshake);

        let verified = prober
            .test_connection(&target, &trusted, &ssh_config, cancel)
            .await?;
        known_hosts::learn_base64(
            prober.known_hosts_path(),
            &gateway_host,
            host_config.effective_port(),
            &verified.base64,
        );

        let destination = SshDestination::new(gateway_host).with_user(user);
        if let Some(password) = &password {
            self.collaborators
                .notifier
                .show_password(&destination.to_string(), password)
                .await;
        }

        let mut resolution = Resolution::new(destination, Strategy::Gateway);
        resolution.password = password;
        Ok(resolution)
    }

    async fn try_local_helper(
        &self,
        params: &ConnectionParams,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let helper = self.supervisor.ensure(&params.host, cancel).await?;
        let mut client = self.supervisor.client(&helper);
        let resolved = client.resolve_ssh_connection(params, cancel).await?;

        let auto_tunnel = self.config.helper.auto_tunnel;
        if let Err(e) = client
            .set_auto_tunnel(&params.instance_id, auto_tunnel, cancel)
            .await
        {
            if e.is_cancelled() {
                return Err(e);
            }
            warn!(instance_id = %params.instance_id, "Cannot set auto-tunnel: {}", e);
        }

        let mut resolution = Resolution::new(resolved.destination, Strategy::LocalHelper);
        resolution.ssh_config_path = Some(resolved.generated_config_path);
        Ok(resolution)
    }

    fn report(
        &self,
        params: &ConnectionParams,
        strategy: Strategy,
        result: &Result<Resolution, ResolveError>,
    ) {
        let event = match result {
            Ok(_) => StatusEvent::success(&params.workspace_id, strategy),
            Err(e) if e.is_reportable() => StatusEvent::failure(&params.workspace_id, strategy, e),
            Err(_) => return,
        };
        self.collaborators.reporter.report(event);
    }

    fn persist(&self, params: &ConnectionParams, resolution: &Resolution) {
        let record = DestinationRecord {
            params: params.clone(),
            strategy: resolution.strategy,
        };
        if let Err(e) = self
            .store
            .set_json(&keys::destination(&resolution.encoded), &record)
        {
            warn!(workspace_id = %params.workspace_id, "Cannot persist destination: {}", e);
        }
    }

    async fn notify_failure(&self, params: &ConnectionParams, err: &ResolveError) {
        warn!(workspace_id = %params.workspace_id, kind = err.kind(), "Resolution failed: {}", err);

        let mut actions = Vec::new();
        if let ResolveError::LocalAppUnavailable(log_path) = err {
            actions.push(UserAction::ViewLogs(log_path.clone()));
        }
        if !matches!(err, ResolveError::NoRunningInstance(_)) {
            actions.push(UserAction::Troubleshooting(format!(
                "{}/docs/ssh-troubleshooting",
                host_url(&params.host)
            )));
        }
        self.collaborators
            .notifier
            .error(
                &format!("Cannot connect to workspace {}: {}", params.workspace_id, err),
                &actions,
            )
            .await;
    }
}
