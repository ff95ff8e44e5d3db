//! End-to-end resolution against a fake service host, SSH server and helper

mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wsc_core::config::ResolverConfig;
use wsc_core::store::keys;
use wsc_core::traits::{Outcome, UserAction};
use wsc_core::types::{ConnectionParams, DestinationRecord, WorkspacePhase};
use wsc_core::{KeyValueStore, MemoryStore, ResolveError, StoreExt, Strategy};
use wsc_resolver::{Collaborators, Resolver};

use common::*;

struct Harness {
    dir: TempDir,
    host: Arc<HostState>,
    addr: SocketAddr,
    notifier: Arc<RecordingNotifier>,
    reporter: Arc<RecordingReporter>,
    connector: Arc<FakeConnector>,
    processes: Arc<FakeProcesses>,
    store: Arc<MemoryStore>,
}

impl Harness {
    async fn start() -> Self {
        let host = Arc::new(HostState::default());
        let addr = start_service_host(Arc::clone(&host)).await;
        Self {
            dir: TempDir::new().unwrap(),
            host,
            addr,
            notifier: Arc::new(RecordingNotifier::default()),
            reporter: Arc::new(RecordingReporter::default()),
            connector: Arc::new(FakeConnector::default()),
            processes: Arc::new(FakeProcesses::default()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    fn service_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of a running workspace whose host keys live on the fake host
    fn workspace_url(&self) -> String {
        format!("http://ws-1.localhost:{}", self.addr.port())
    }

    fn params(&self) -> ConnectionParams {
        ConnectionParams::new("ws-1", "i-1", self.service_url())
    }

    fn config(&self) -> ResolverConfig {
        test_config(self.dir.path(), &self.service_url())
    }

    fn resolver(&self, config: ResolverConfig, api: FakeApi) -> Resolver {
        let collaborators = Collaborators {
            api: Arc::new(api),
            notifier: self.notifier.clone(),
            prompter: Arc::new(SilentPrompter),
            reporter: self.reporter.clone(),
        };
        Resolver::new(Arc::new(config), self.store.clone(), collaborators)
            .with_connector(self.connector.clone())
            .with_agent(Arc::new(NoAgent))
            .with_processes(self.processes.clone())
    }

    fn outcomes(&self) -> Vec<(Strategy, Outcome)> {
        self.reporter
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.strategy, e.outcome.clone()))
            .collect()
    }
}

fn failure_kind(outcome: &Outcome) -> Option<&str> {
    match outcome {
        Outcome::Failure { kind, .. } => Some(kind.as_str()),
        _ => None,
    }
}

#[tokio::test]
async fn test_not_running_fails_before_any_strategy() {
    let h = Harness::start().await;
    let api = FakeApi::new(WorkspacePhase::Stopped, Some(h.workspace_url()));
    let resolver = h.resolver(h.config(), api);

    let err = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::NoRunningInstance(WorkspacePhase::Stopped)));
    assert!(err.to_string().contains("stopped"));
    assert_eq!(h.host.host_key_hits.load(Ordering::SeqCst), 0);
    assert!(h.connector.connects.lock().unwrap().is_empty());
    assert_eq!(h.processes.spawn_count(), 0);
    assert!(h.outcomes().is_empty());
    assert_eq!(h.notifier.errors.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_gateway_password_fallback_surfaces_token_once() {
    let h = Harness::start().await;
    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(h.config(), api);

    let resolution = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.strategy, Strategy::Gateway);
    assert_eq!(resolution.destination.hostname, "ws-1.ssh.localhost");
    assert_eq!(resolution.destination.user.as_deref(), Some("ws-1"));
    assert_eq!(resolution.destination.port, None);
    assert_eq!(resolution.password.as_deref(), Some(OWNER_TOKEN));
    assert_eq!(resolution.encoded, resolution.destination.encode());

    let passwords = h.notifier.passwords.lock().unwrap().clone();
    assert_eq!(
        passwords,
        vec![("ws-1@ws-1.ssh.localhost".to_string(), OWNER_TOKEN.to_string())]
    );
    assert_eq!(h.host.host_key_hits.load(Ordering::SeqCst), 1);
    assert_eq!(h.outcomes(), vec![(Strategy::Gateway, Outcome::Success)]);

    let record: DestinationRecord = h
        .store
        .get_json(&keys::destination(&resolution.encoded))
        .unwrap()
        .unwrap();
    assert_eq!(record.strategy, Strategy::Gateway);
    assert_eq!(record.params, h.params());
}

#[tokio::test]
async fn test_gateway_that_cannot_echo_is_rejected() {
    let h = Harness::start().await;
    h.connector.garble_output.store(true, Ordering::SeqCst);
    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(h.config(), api);

    let err = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::SshOutputVerificationFailed));
    assert!(h.notifier.passwords.lock().unwrap().is_empty());
    assert_eq!(h.processes.spawn_count(), 0);
    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(failure_kind(&outcomes[0].1), Some("SSHOutputVerificationFailed"));
    assert!(h.store.keys("ssh-dest:").unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_unavailable_falls_back_to_helper() {
    let h = Harness::start().await;
    *h.host.serve_host_keys.lock().unwrap() = false;

    let pinned = h.dir.path().join("helper");
    write_executable(&pinned);
    let mut config = h.config();
    config.helper.install_path = Some(pinned.clone());

    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(config, api);
    let resolution = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.strategy, Strategy::LocalHelper);
    assert_eq!(resolution.destination.hostname, "ws-1.helper.local");
    assert_eq!(
        resolution.ssh_config_path,
        Some(PathBuf::from("/tmp/helper/ssh_config"))
    );
    assert_eq!(resolution.password, None);
    assert_eq!(*h.processes.spawned.lock().unwrap(), vec![pinned]);

    // Recoverable gateway failure is an info notice, not an error
    assert_eq!(h.notifier.infos.lock().unwrap().len(), 1);
    assert!(h.notifier.errors.lock().unwrap().is_empty());

    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, Strategy::Gateway);
    assert_eq!(failure_kind(&outcomes[0].1), Some("NoSSHGateway"));
    assert_eq!(outcomes[1], (Strategy::LocalHelper, Outcome::Success));
}

#[tokio::test]
async fn test_debug_workspace_never_uses_helper() {
    let h = Harness::start().await;
    *h.host.serve_host_keys.lock().unwrap() = false;

    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(h.config(), api);
    let params = h.params().debug(true);

    let err = resolver
        .resolve(&params, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::NoSshGateway(_)));
    assert_eq!(h.processes.spawn_count(), 0);

    let errors = h.notifier.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]
        .1
        .iter()
        .any(|a| matches!(a, UserAction::Troubleshooting(url) if url.ends_with("/docs/ssh-troubleshooting"))));
}

#[tokio::test]
async fn test_local_proxy_destination_skips_probe() {
    let h = Harness::start().await;
    let mut config = h.config();
    config.local_ssh_proxy = true;
    config.proxy_command = Some(PathBuf::from("/opt/wsc/wsc-proxy"));
    let managed = config.managed_ssh_config();
    let user_config = config.ssh.user_config_path();

    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(config, api);
    let resolution = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.strategy, Strategy::LocalSshProxy);
    assert_eq!(
        resolution.destination.hostname,
        format!("ws-1.127.0.0.1-{}.wsc.local", h.addr.port())
    );
    assert_eq!(resolution.destination.user, None);
    assert_eq!(h.host.host_key_hits.load(Ordering::SeqCst), 0);
    assert!(h.connector.connects.lock().unwrap().is_empty());

    let generated = std::fs::read_to_string(&managed).unwrap();
    assert!(generated.contains("ProxyCommand \"/opt/wsc/wsc-proxy\""));
    let user = std::fs::read_to_string(&user_config).unwrap();
    assert!(user.contains("## START WSCONNECT MANAGED BLOCK"));
    assert!(user.contains(&managed.display().to_string()));
}

#[tokio::test]
async fn test_old_service_version_uses_gateway() {
    let h = Harness::start().await;
    *h.host.version.lock().unwrap() = "2022.11.2".to_string();
    let mut config = h.config();
    config.local_ssh_proxy = true;
    config.proxy_command = Some(PathBuf::from("/opt/wsc/wsc-proxy"));

    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(config, api);
    let resolution = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.strategy, Strategy::Gateway);
    assert_eq!(h.outcomes(), vec![(Strategy::Gateway, Outcome::Success)]);
}

#[tokio::test]
async fn test_missing_proxy_executable_falls_through_to_gateway() {
    let h = Harness::start().await;
    let mut config = h.config();
    config.local_ssh_proxy = true;

    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(config, api);
    let resolution = resolver
        .resolve(&h.params(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.strategy, Strategy::Gateway);
    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].0, Strategy::LocalSshProxy);
    assert_eq!(failure_kind(&outcomes[0].1), Some("NoExtensionIPCServer"));
    assert_eq!(outcomes[1], (Strategy::Gateway, Outcome::Success));
}

#[tokio::test]
async fn test_cancelled_resolution_is_silent() {
    let h = Harness::start().await;
    let api = FakeApi::new(WorkspacePhase::Running, Some(h.workspace_url()));
    let resolver = h.resolver(h.config(), api);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = resolver.resolve(&h.params(), &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(h.outcomes().is_empty());
    assert!(h.notifier.errors.lock().unwrap().is_empty());
    assert!(h.store.keys("ssh-dest:").unwrap().is_empty());
}
