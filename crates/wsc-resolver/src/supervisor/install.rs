//! Downloading and installing helper binaries
//!
//! Binaries are fetched from a platform-specific path under the service host.
//! The response `ETag` versions the installation; a cached install is
//! revalidated with `If-None-Match` so an unchanged binary is not downloaded
//! again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use wsc_core::types::{host_url, LocalHelperInstallation};
use wsc_core::ResolveError;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// File name of the helper for the running platform
pub fn helper_binary_name() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    let ext = if cfg!(windows) { ".exe" } else { "" };
    format!("wsc-local-helper-{}-{}{}", os, arch, ext)
}

/// Download URL of the helper for `host`
pub fn helper_download_url(host: &str) -> String {
    format!("{}/static/bin/{}", host_url(host), helper_binary_name())
}

/// Result of revalidating the helper binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The cached installation is current
    NotModified,
    /// A new binary was installed
    Installed(LocalHelperInstallation),
}

/// Fetches helper binaries into a private directory
#[derive(Clone)]
pub struct Installer {
    http: Client,
    bin_dir: PathBuf,
}

impl Installer {
    pub fn new(bin_dir: PathBuf) -> Self {
        let http = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, bin_dir }
    }

    /// Revalidate `cached` against the server, installing a new binary when
    /// the server's version differs
    pub async fn fetch(
        &self,
        host: &str,
        authority: &str,
        cached: Option<&LocalHelperInstallation>,
    ) -> Result<FetchOutcome, ResolveError> {
        let url = helper_download_url(host);
        let cached_etag = cached
            .filter(|c| c.binary_path.is_file())
            .and_then(|c| c.etag.clone());

        let mut request = self.http.get(&url);
        if let Some(etag) = &cached_etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| ResolveError::Api(format!("Helper download from {}: {}", url, e)))?;

        if response.status() == StatusCode::NOT_MODIFIED && cached_etag.is_some() {
            debug!(url = %url, "Helper binary not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(ResolveError::Api(format!(
                "Helper download from {}: unexpected status {}",
                url,
                response.status()
            )));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if etag.is_some() && etag == cached_etag {
            // Server ignored If-None-Match but reports the same version
            return Ok(FetchOutcome::NotModified);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolveError::Api(format!("Helper download from {}: {}", url, e)))?;
        let binary_path = self.write_binary(authority, &body).await?;
        info!(path = ?binary_path, etag = ?etag, "Installed helper binary");

        Ok(FetchOutcome::Installed(LocalHelperInstallation { binary_path, etag }))
    }

    /// Write under a fresh name so a running old binary is never overwritten
    async fn write_binary(&self, authority: &str, content: &[u8]) -> Result<PathBuf, ResolveError> {
        let dir = self.bin_dir.join(sanitize(authority));
        tokio::fs::create_dir_all(&dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;
        }

        let mut suffix = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut suffix);
        let suffix: String = suffix.iter().map(|b| format!("{:02x}", b)).collect();
        let temp_path = dir.join(format!(".download-{}", suffix));
        let final_path = dir.join(format!("{}-{}", suffix, helper_binary_name()));

        tokio::fs::write(&temp_path, content).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o755)).await?;
        }
        tokio::fs::rename(&temp_path, &final_path).await?;
        Ok(final_path)
    }
}

/// Remove a replaced binary. Failures are logged only.
pub async fn discard(installation: &LocalHelperInstallation) {
    if let Err(e) = tokio::fs::remove_file(&installation.binary_path).await {
        debug!(path = ?installation.binary_path, "Could not remove old helper binary: {}", e);
    }
}

/// Whether `path` is a regular file we could execute
pub fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Authority as a single path component
pub fn sanitize(authority: &str) -> String {
    authority
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
