//! Lock maintenance commands

use anyhow::{Context, Result};
use wsc_core::config::ResolverConfig;
use wsc_core::LockCoordinator;

use super::open_store;
use crate::output::{print_info, print_success};

/// Remove lock entries whose owner process is gone or whose lease expired
pub fn locks_sweep(config: &ResolverConfig) -> Result<()> {
    let coordinator = LockCoordinator::new(open_store(config));
    let removed = coordinator
        .sweep_stale()
        .context("Failed to sweep locks")?;

    if removed == 0 {
        print_info("No stale locks");
    } else {
        print_success(&format!("Removed {} stale lock(s)", removed));
    }
    Ok(())
}
