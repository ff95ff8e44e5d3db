//! Workspace service backends
//!
//! Two API shapes exist on the service side: the legacy JSON-RPC endpoint
//! and the REST public API. Both are reduced to [`WorkspaceApi`]; one is
//! picked per session by [`select_backend`].

mod public;
mod server;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use tracing::debug;
use wsc_core::config::{ApiFlavor, ResolverConfig};
use wsc_core::traits::{SessionTokenProvider, WorkspaceApi};
use wsc_core::types::host_url;
use wsc_core::ResolveError;

pub use public::PublicApi;
pub use server::ServerApi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the backend configured for this session
pub fn select_backend(
    config: &ResolverConfig,
    tokens: Arc<dyn SessionTokenProvider>,
) -> Arc<dyn WorkspaceApi> {
    debug!(host = %config.host, api = ?config.api, "Selecting workspace API backend");
    match config.api {
        ApiFlavor::Server => Arc::new(ServerApi::new(&config.host, tokens)),
        ApiFlavor::Public => Arc::new(PublicApi::new(&config.host, tokens)),
    }
}

/// HTTP plumbing shared by both backends
#[derive(Clone)]
struct ApiClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn SessionTokenProvider>,
}

impl ApiClient {
    fn new(host: &str, tokens: Arc<dyn SessionTokenProvider>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: host_url(host),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> Result<String, ResolveError> {
        self.tokens.session_token(&self.base_url).await
    }
}

fn http_error(context: &str, e: reqwest::Error) -> ResolveError {
    ResolveError::Api(format!("{}: {}", context, e))
}

/// Pass successful responses through; turn anything else into an API error
/// carrying the status and body
async fn check_status(context: &str, response: Response) -> Result<Response, ResolveError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ResolveError::Api(format!(
        "{}: unexpected status {} body={}",
        context, status, body
    )))
}
