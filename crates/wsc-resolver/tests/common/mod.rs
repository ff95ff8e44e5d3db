//! Fakes shared by the resolver integration suites

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use wsc_core::config::{ResolverConfig, SshSettings};
use wsc_core::traits::{
    InteractivePrompt, Notifier, Prompter, StatusEvent, StatusReporter, UserAction, WorkspaceApi,
};
use wsc_core::types::{RegisteredKey, WorkspacePhase, WorkspaceStatus};
use wsc_core::ResolveError;
use wsc_protocol::{RpcCodec, RpcErrorCode, RpcFrame, RpcMessage, SshDestination};
use wsc_resolver::supervisor::LaunchSpec;
use wsc_resolver::ProcessControl;
use wsc_ssh::agent::AgentKeySource;
use wsc_ssh::probe::{
    HopTarget, HostKeyPolicy, KeyFileAuth, SshConnector, SshLink, Transport, TunnelStream,
    VerifiedHostKey,
};
use wsc_ssh::IdentityKey;

pub const SERVER_KEY: &str =
    "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";
pub const OWNER_TOKEN: &str = "owner-token-123";

// ---------------------------------------------------------------------------
// Service host (host keys, version, helper downloads)
// ---------------------------------------------------------------------------

pub struct HostState {
    pub host_key_hits: AtomicU32,
    pub serve_host_keys: Mutex<bool>,
    pub version: Mutex<String>,
    pub etag: Mutex<String>,
    pub downloads: AtomicU32,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            host_key_hits: AtomicU32::new(0),
            serve_host_keys: Mutex::new(true),
            version: Mutex::new("2023.5.0".to_string()),
            etag: Mutex::new("\"v1\"".to_string()),
            downloads: AtomicU32::new(0),
        }
    }
}

async fn host_keys(State(state): State<Arc<HostState>>) -> Response {
    state.host_key_hits.fetch_add(1, Ordering::SeqCst);
    if *state.serve_host_keys.lock().unwrap() {
        Json(json!([{ "type": "ssh-ed25519", "host_key": SERVER_KEY }])).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn version(State(state): State<Arc<HostState>>) -> Json<Value> {
    Json(Value::String(state.version.lock().unwrap().clone()))
}

async fn helper_binary(State(state): State<Arc<HostState>>, headers: HeaderMap) -> Response {
    let etag = state.etag.lock().unwrap().clone();
    let presented = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if presented == Some(etag.as_str()) {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    state.downloads.fetch_add(1, Ordering::SeqCst);
    ([(ETAG, etag)], "#!/bin/sh\nexec sleep 60\n").into_response()
}

/// Serve the service host endpoints on an ephemeral loopback port
pub async fn start_service_host(state: Arc<HostState>) -> SocketAddr {
    let app = Router::new()
        .route("/_ssh/host_keys", get(host_keys))
        .route("/api/version", get(version))
        .route("/static/bin/:name", get(helper_binary))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ---------------------------------------------------------------------------
// Workspace API
// ---------------------------------------------------------------------------

pub struct FakeApi {
    pub phase: WorkspacePhase,
    pub workspace_url: Option<String>,
    pub registered: Vec<RegisteredKey>,
    pub owner_token_calls: AtomicU32,
}

impl FakeApi {
    pub fn new(phase: WorkspacePhase, workspace_url: Option<String>) -> Self {
        Self {
            phase,
            workspace_url,
            registered: Vec::new(),
            owner_token_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl WorkspaceApi for FakeApi {
    async fn workspace_status(&self, workspace_id: &str) -> Result<WorkspaceStatus, ResolveError> {
        Ok(WorkspaceStatus {
            workspace_id: workspace_id.to_string(),
            instance_id: Some("i-1".to_string()),
            phase: self.phase.clone(),
            workspace_url: self.workspace_url.clone(),
        })
    }

    async fn owner_token(&self, _workspace_id: &str) -> Result<String, ResolveError> {
        self.owner_token_calls.fetch_add(1, Ordering::SeqCst);
        Ok(OWNER_TOKEN.to_string())
    }

    async fn registered_keys(&self) -> Result<Vec<RegisteredKey>, ResolveError> {
        Ok(self.registered.clone())
    }

    async fn send_heartbeat(&self, _instance_id: &str, _was_closed: bool) -> Result<(), ResolveError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Editor collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, Vec<UserAction>)>>,
    pub passwords: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    async fn error(&self, message: &str, actions: &[UserAction]) {
        self.errors
            .lock()
            .unwrap()
            .push((message.to_string(), actions.to_vec()));
    }

    async fn show_password(&self, destination: &str, password: &str) {
        self.passwords
            .lock()
            .unwrap()
            .push((destination.to_string(), password.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<StatusEvent>>,
}

impl StatusReporter for RecordingReporter {
    fn report(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct SilentPrompter;

#[async_trait]
impl Prompter for SilentPrompter {
    async fn passphrase(&self, _key_path: &Path, _attempt: u32) -> Option<String> {
        None
    }

    async fn password(&self, _target: &str, _attempt: u32) -> Option<String> {
        None
    }

    async fn keyboard_interactive(
        &self,
        _name: &str,
        _instructions: &str,
        _prompts: &[InteractivePrompt],
    ) -> Option<Vec<String>> {
        None
    }
}

pub struct NoAgent;

#[async_trait]
impl AgentKeySource for NoAgent {
    async fn list_keys(&self, _socket: &Path) -> Result<Vec<IdentityKey>, ResolveError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// SSH
// ---------------------------------------------------------------------------

/// Accepts the owner token as password and presents [`SERVER_KEY`]
#[derive(Default)]
pub struct FakeConnector {
    pub connects: Mutex<Vec<String>>,
    /// Commands run on the link print something other than asked
    pub garble_output: AtomicBool,
}

#[async_trait]
impl SshConnector for FakeConnector {
    async fn connect(
        &self,
        target: &HopTarget,
        _transport: Transport,
        policy: HostKeyPolicy,
    ) -> Result<Box<dyn SshLink>, ResolveError> {
        self.connects.lock().unwrap().push(target.to_string());
        if let HostKeyPolicy::Trusted(records) = &policy {
            if !HostKeyPolicy::trusts_base64(records, SERVER_KEY) {
                return Err(ResolveError::HostKeyMismatch(target.hostname.clone()));
            }
        }
        Ok(Box::new(FakeLink {
            garble_output: self.garble_output.load(Ordering::SeqCst),
        }))
    }
}

struct FakeLink {
    garble_output: bool,
}

#[async_trait]
impl SshLink for FakeLink {
    fn host_key(&self) -> Option<VerifiedHostKey> {
        Some(VerifiedHostKey {
            key_type: "ssh-ed25519".to_string(),
            base64: SERVER_KEY.to_string(),
            bytes: Vec::new(),
        })
    }

    async fn auth_agent(
        &mut self,
        _user: &str,
        _key: &IdentityKey,
        _agent_socket: &Path,
    ) -> Result<bool, ResolveError> {
        Ok(false)
    }

    async fn auth_key_file(
        &mut self,
        _user: &str,
        _path: &Path,
        _passphrase: Option<&str>,
    ) -> Result<KeyFileAuth, ResolveError> {
        Ok(KeyFileAuth::Rejected)
    }

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<bool, ResolveError> {
        Ok(password == OWNER_TOKEN)
    }

    async fn auth_keyboard_interactive(
        &mut self,
        _user: &str,
        _prompter: &dyn Prompter,
    ) -> Result<bool, ResolveError> {
        Ok(false)
    }

    async fn open_forward(&mut self, _host: &str, _port: u16) -> Result<TunnelStream, ResolveError> {
        let (stream, _peer) = tokio::io::duplex(64);
        Ok(Box::new(stream))
    }

    async fn exec(&mut self, command: &str) -> Result<Vec<u8>, ResolveError> {
        if self.garble_output {
            return Ok(b"Last login: never\n".to_vec());
        }
        let echoed = command.strip_prefix("echo ").unwrap_or_default();
        Ok(format!("{}\n", echoed).into_bytes())
    }

    async fn close(&mut self) {}
}

// ---------------------------------------------------------------------------
// Helper processes
// ---------------------------------------------------------------------------

/// "Spawns" a helper by serving its RPC endpoint in-process
pub struct FakeProcesses {
    next_pid: AtomicU32,
    live: Mutex<HashSet<u32>>,
    pub spawned: Mutex<Vec<PathBuf>>,
    pub terminated: Mutex<Vec<u32>>,
    /// Requests answered with `Unavailable` before the helper serves
    pub warmup: Arc<AtomicU32>,
}

impl Default for FakeProcesses {
    fn default() -> Self {
        Self {
            next_pid: AtomicU32::new(4000),
            live: Mutex::new(HashSet::new()),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            warmup: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl FakeProcesses {
    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn kill(&self, pid: u32) {
        self.live.lock().unwrap().remove(&pid);
    }
}

#[async_trait]
impl ProcessControl for FakeProcesses {
    async fn spawn(&self, binary: &Path, spec: &LaunchSpec) -> Result<u32, ResolveError> {
        let listener = TcpListener::bind(("127.0.0.1", spec.api_port)).await?;
        tokio::spawn(serve_helper(listener, Arc::clone(&self.warmup)));

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(pid);
        self.spawned.lock().unwrap().push(binary.to_path_buf());
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.live.lock().unwrap().contains(&pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), ResolveError> {
        self.live.lock().unwrap().remove(&pid);
        self.terminated.lock().unwrap().push(pid);
        Ok(())
    }
}

pub async fn serve_helper(listener: TcpListener, warmup: Arc<AtomicU32>) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(handle_helper_connection(stream, Arc::clone(&warmup)));
    }
}

async fn handle_helper_connection(stream: TcpStream, warmup: Arc<AtomicU32>) {
    let mut framed = Framed::new(stream, RpcCodec::new());
    while let Some(Ok(frame)) = framed.next().await {
        let still_warming = warmup
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let reply = if still_warming {
            RpcMessage::Error {
                code: RpcErrorCode::Unavailable,
                message: "starting".to_string(),
            }
        } else {
            match frame.message {
                RpcMessage::Ping { .. } => RpcMessage::Pong {
                    version: "test".to_string(),
                },
                RpcMessage::ResolveSshConnection { workspace_id, .. } => RpcMessage::SshConnection {
                    destination: SshDestination::new(format!("{}.helper.local", workspace_id))
                        .with_user(workspace_id),
                    generated_config_path: "/tmp/helper/ssh_config".to_string(),
                },
                RpcMessage::SetAutoTunnel { .. } => RpcMessage::Ack,
                _ => RpcMessage::Error {
                    code: RpcErrorCode::InvalidArgument,
                    message: "unexpected".to_string(),
                },
            }
        };
        if framed.send(RpcFrame::new(frame.request_id, reply)).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Config isolated under `dir`, pointed at `host`
pub fn test_config(dir: &Path, host: &str) -> ResolverConfig {
    let mut config = ResolverConfig {
        host: host.to_string(),
        state_dir: dir.join("state"),
        ssh: SshSettings {
            identity_files: vec![dir.join("no_such_key")],
            user_config: Some(dir.join("ssh").join("config")),
            system_config: Some(dir.join("ssh").join("system_config")),
            known_hosts: Some(dir.join("ssh").join("known_hosts")),
        },
        ..ResolverConfig::default()
    };
    config.timeouts.rpc_retry_delay = Duration::from_millis(20);
    config.timeouts.lock_poll = Duration::from_millis(10);
    config
}

/// Executable stand-in for a pinned helper binary
pub fn write_executable(path: &Path) {
    std::fs::write(path, "#!/bin/sh\nexec sleep 60\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
