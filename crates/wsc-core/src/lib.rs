//! wsc-core: Core abstractions and configuration for wsconnect
//!
//! This crate provides shared types, the error taxonomy, configuration,
//! the persisted key-value store shared by every editor process on the
//! machine, and the lock coordinator built on top of it.

pub mod config;
pub mod error;
pub mod lock;
pub mod process;
pub mod store;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{checkpoint, ResolveError};
pub use lock::{LockCoordinator, LockGuard};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreExt};
pub use types::{ConnectionParams, Strategy, WorkspacePhase};
