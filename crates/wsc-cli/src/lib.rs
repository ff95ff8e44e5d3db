//! wsc-cli: Command-line interface for wsconnect
//!
//! Provides the `wsconnect` CLI, which runs connection resolution with
//! terminal stand-ins for the editor's notification and prompt surfaces.

pub mod commands;
pub mod output;
pub mod terminal;
