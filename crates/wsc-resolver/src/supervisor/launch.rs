//! Spawning the helper as a detached background process

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info, warn};
use wsc_core::config::HelperSettings;
use wsc_core::ResolveError;

/// A helper that exits this quickly after spawn is treated as failed to start
const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(500);

/// Everything the helper process is started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub host: String,
    pub generated_ssh_config_path: PathBuf,
    pub api_port: u16,
    pub log_path: PathBuf,
    pub auto_tunnel: bool,
    pub idle_timeout: Option<Duration>,
    pub verbose: bool,
    pub auth_redirect_url: Option<String>,
}

impl LaunchSpec {
    pub fn new(
        host: &str,
        settings: &HelperSettings,
        run_dir: &Path,
        api_port: u16,
    ) -> Self {
        Self {
            host: host.to_string(),
            generated_ssh_config_path: run_dir.join("ssh_config"),
            api_port,
            log_path: run_dir.join("helper.log"),
            auto_tunnel: settings.auto_tunnel,
            idle_timeout: settings.idle_timeout,
            verbose: settings.verbose,
            auth_redirect_url: settings.auth_redirect_url.clone(),
        }
    }

    /// Environment handed to the helper
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("WSC_HOST", self.host.clone()),
            (
                "WSC_SSH_CONFIG",
                self.generated_ssh_config_path.display().to_string(),
            ),
            ("WSC_API_PORT", self.api_port.to_string()),
            ("WSC_AUTO_TUNNEL", self.auto_tunnel.to_string()),
            ("WSC_VERBOSE", self.verbose.to_string()),
        ];
        if let Some(url) = &self.auth_redirect_url {
            env.push(("WSC_AUTH_REDIRECT_URL", url.clone()));
        }
        if let Some(timeout) = self.idle_timeout {
            env.push(("WSC_IDLE_TIMEOUT", timeout.as_secs().to_string()));
        }
        env
    }
}

/// Reserve an ephemeral loopback port for the helper's RPC endpoint
pub fn pick_free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

async fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(file)
}

/// Start `binary` detached from this process, logging to `spec.log_path`.
///
/// Resolves to the new pid once the process has survived a short startup
/// window; a spawn error or early exit fails fast.
pub async fn spawn_detached(binary: &Path, spec: &LaunchSpec) -> Result<u32, ResolveError> {
    let log = open_log(&spec.log_path).await?;
    let log_err = log.try_clone()?;

    let mut cmd = tokio::process::Command::new(binary);
    cmd.envs(spec.env())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(false);

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let mut child = cmd.spawn().map_err(|e| {
        warn!(binary = ?binary, "Failed to spawn helper: {}", e);
        ResolveError::LocalAppUnavailable(spec.log_path.clone())
    })?;
    let pid = child
        .id()
        .ok_or_else(|| ResolveError::LocalAppUnavailable(spec.log_path.clone()))?;
    debug!(pid, port = spec.api_port, "Helper spawned");

    tokio::select! {
        status = child.wait() => {
            warn!(pid, ?status, "Helper exited during startup");
            Err(ResolveError::LocalAppUnavailable(spec.log_path.clone()))
        }
        _ = tokio::time::sleep(EARLY_EXIT_WINDOW) => {
            info!(pid, host = %spec.host, "Helper started");
            Ok(pid)
        }
    }
}
