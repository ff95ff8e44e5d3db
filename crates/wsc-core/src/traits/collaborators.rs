//! External collaborators: user notification, prompting, status reporting and
//! session tokens

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::types::Strategy;

/// Follow-up action offered with an error notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Open the helper's log file
    ViewLogs(PathBuf),
    /// Open a troubleshooting page
    Troubleshooting(String),
}

/// Surfaces messages to the user
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Non-blocking informational message
    async fn info(&self, message: &str);

    /// Actionable error
    async fn error(&self, message: &str, actions: &[UserAction]);

    /// Show a one-time password the user must paste into the SSH prompt
    async fn show_password(&self, destination: &str, password: &str);
}

/// One keyboard-interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractivePrompt {
    pub prompt: String,
    pub echo: bool,
}

/// Asks the user for secrets. `None` means the user dismissed the prompt.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn passphrase(&self, key_path: &Path, attempt: u32) -> Option<String>;

    async fn password(&self, target: &str, attempt: u32) -> Option<String>;

    async fn keyboard_interactive(
        &self,
        name: &str,
        instructions: &str,
        prompts: &[InteractivePrompt],
    ) -> Option<Vec<String>>;
}

/// Result of one strategy attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { kind: String, message: String },
    Skipped,
}

/// Strategy outcome reported for telemetry/status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub workspace_id: String,
    pub strategy: Strategy,
    pub outcome: Outcome,
}

impl StatusEvent {
    pub fn success(workspace_id: &str, strategy: Strategy) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            strategy,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(workspace_id: &str, strategy: Strategy, err: &ResolveError) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            strategy,
            outcome: Outcome::Failure {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Receives strategy outcomes
pub trait StatusReporter: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Supplies bearer tokens for the workspace service
#[async_trait]
pub trait SessionTokenProvider: Send + Sync {
    async fn session_token(&self, host: &str) -> Result<String, ResolveError>;
}
