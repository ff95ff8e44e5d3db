//! Terminal renditions of the editor collaborators

use std::path::Path;

use async_trait::async_trait;
use dialoguer::{Input, Password};
use tracing::{info, warn};
use wsc_core::traits::{
    InteractivePrompt, Notifier, Outcome, Prompter, SessionTokenProvider, StatusEvent,
    StatusReporter, UserAction,
};
use wsc_core::ResolveError;

use crate::output::{print_error, print_info, print_password_notice};

/// Environment variable holding the workspace service session token
pub const SESSION_TOKEN_ENV: &str = "WSC_SESSION_TOKEN";

/// Prints notifications to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

#[async_trait]
impl Notifier for TerminalNotifier {
    async fn info(&self, message: &str) {
        print_info(message);
    }

    async fn error(&self, message: &str, actions: &[UserAction]) {
        print_error(message);
        for action in actions {
            match action {
                UserAction::ViewLogs(path) => print_info(&format!("Logs: {}", path.display())),
                UserAction::Troubleshooting(url) => print_info(&format!("Troubleshooting: {}", url)),
            }
        }
    }

    async fn show_password(&self, destination: &str, password: &str) {
        print_password_notice(destination, password);
    }
}

/// Asks for secrets on the controlling terminal. Any prompt failure,
/// including a non-interactive stdin, counts as dismissal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

async fn blocking_prompt<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> Option<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.ok().flatten()
}

fn secret(prompt: String) -> Option<String> {
    Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()
        .ok()
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn passphrase(&self, key_path: &Path, attempt: u32) -> Option<String> {
        let prompt = if attempt > 1 {
            format!("Wrong passphrase. Passphrase for {}", key_path.display())
        } else {
            format!("Passphrase for {}", key_path.display())
        };
        blocking_prompt(move || secret(prompt)).await
    }

    async fn password(&self, target: &str, attempt: u32) -> Option<String> {
        let prompt = if attempt > 1 {
            format!("Permission denied, try again. {}'s password", target)
        } else {
            format!("{}'s password", target)
        };
        blocking_prompt(move || secret(prompt)).await
    }

    async fn keyboard_interactive(
        &self,
        name: &str,
        instructions: &str,
        prompts: &[InteractivePrompt],
    ) -> Option<Vec<String>> {
        if !name.is_empty() {
            print_info(name);
        }
        if !instructions.is_empty() {
            println!("{}", instructions);
        }
        let prompts = prompts.to_vec();
        blocking_prompt(move || {
            prompts
                .into_iter()
                .map(|p| {
                    let label = p.prompt.trim_end().trim_end_matches(':').to_string();
                    if p.echo {
                        Input::<String>::new()
                            .with_prompt(label)
                            .allow_empty(true)
                            .interact_text()
                            .ok()
                    } else {
                        secret(label)
                    }
                })
                .collect()
        })
        .await
    }
}

/// Sends strategy outcomes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, event: StatusEvent) {
        match &event.outcome {
            Outcome::Success => info!(
                workspace_id = %event.workspace_id,
                strategy = %event.strategy,
                "Strategy succeeded"
            ),
            Outcome::Failure { kind, message } => warn!(
                workspace_id = %event.workspace_id,
                strategy = %event.strategy,
                kind = %kind,
                "Strategy failed: {}",
                message
            ),
            Outcome::Skipped => info!(
                workspace_id = %event.workspace_id,
                strategy = %event.strategy,
                "Strategy skipped"
            ),
        }
    }
}

/// Session token from `WSC_SESSION_TOKEN`
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvTokenProvider;

#[async_trait]
impl SessionTokenProvider for EnvTokenProvider {
    async fn session_token(&self, host: &str) -> Result<String, ResolveError> {
        match std::env::var(SESSION_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ResolveError::Api(format!(
                "No session token for {}; set {}",
                host, SESSION_TOKEN_ENV
            ))),
        }
    }
}
