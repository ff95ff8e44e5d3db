//! Core trait definitions
//!
//! Collaborators the resolver calls out to, and the workspace capability
//! interface it is handed once per session.

mod collaborators;
mod workspace;

pub use collaborators::{
    InteractivePrompt, Notifier, Outcome, Prompter, SessionTokenProvider, StatusEvent,
    StatusReporter, UserAction,
};
pub use workspace::WorkspaceApi;
