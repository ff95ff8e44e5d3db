//! Cooperative cross-process locking over the shared store
//!
//! A lock is a [`LockRecord`] under `lock/{name}`. It is held while present
//! with an unexpired deadline and a live owner. Acquirers poll until the entry
//! is absent or stale, claim it with an atomic create, then confirm the claim
//! by reading it back.
//! While held, a background tick re-reads the entry and fires the guard's
//! cancellation token if another party took it over.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{checkpoint, ResolveError};
use crate::process::is_process_alive;
use crate::store::{keys, KeyValueStore, StoreExt};
use crate::time::{deadline_after, is_expired};
use crate::types::LockRecord;

/// Default interval between store polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Random owner token, 16 bytes hex encoded
fn generate_owner_value() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether a stored lock may be reclaimed by anyone
pub fn is_stale(record: &LockRecord) -> bool {
    is_expired(record.deadline) || !is_process_alive(record.owner_pid)
}

/// Grants named leases backed by a [`KeyValueStore`]
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn KeyValueStore>,
    poll_interval: Duration,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Acquire `name` for roughly `lease`, polling until it is free.
    ///
    /// Store failures surface as [`ResolveError::LockFailed`]; cancelling
    /// `cancel` while waiting yields [`ResolveError::Cancelled`].
    pub async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        cancel: &CancellationToken,
    ) -> Result<LockGuard, ResolveError> {
        let key = keys::lock(name);
        let owner_value = generate_owner_value();
        // Short pause between claim and confirmation so a racing writer's
        // claim lands before we read back
        let settle = self.poll_interval / 10;

        loop {
            checkpoint(cancel)?;

            let existing: Option<LockRecord> = self
                .store
                .get_json(&key)
                .map_err(|e| ResolveError::lock_failed(&e))?;

            let claimable = match &existing {
                None => true,
                Some(record) if is_stale(record) => {
                    debug!(
                        lock = %name,
                        pid = record.owner_pid,
                        "Reclaiming stale lock"
                    );
                    self.store
                        .delete(&key)
                        .map_err(|e| ResolveError::lock_failed(&e))?;
                    true
                }
                Some(_) => false,
            };

            let claimed = claimable && {
                let record = LockRecord {
                    owner_value: owner_value.clone(),
                    deadline: deadline_after(lease + self.poll_interval * 2),
                    owner_pid: std::process::id(),
                };
                self.store
                    .create_json(&key, &record)
                    .map_err(|e| ResolveError::lock_failed(&e))?
            };

            if claimed {
                tokio::time::sleep(settle).await;
                if cancel.is_cancelled() {
                    self.release_if_owner(&key, &owner_value);
                    return Err(ResolveError::Cancelled);
                }

                if self.owns(&key, &owner_value)? {
                    debug!(lock = %name, "Lock acquired");
                    return Ok(LockGuard::start(
                        Arc::clone(&self.store),
                        key,
                        owner_value,
                        self.poll_interval,
                    ));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Run `f` while holding `name`. The lock is released on every exit path,
    /// including panics unwinding through the guard.
    ///
    /// `f` receives a token that fires when either `cancel` fires or the lock
    /// is reclaimed by another party, so work under the lock stops as soon as
    /// it is no longer exclusive.
    pub async fn with_lock<F, Fut, T>(
        &self,
        name: &str,
        lease: Duration,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, ResolveError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResolveError>>,
    {
        let guard = self.acquire(name, lease, cancel).await?;

        let work = cancel.child_token();
        let lost = guard.token();
        let link = work.clone();
        let linker = tokio::spawn(async move {
            tokio::select! {
                _ = lost.cancelled() => link.cancel(),
                _ = link.cancelled() => {}
            }
        });

        let result = f(work).await;
        linker.abort();
        guard.release();
        result
    }

    /// Remove every lock whose deadline passed or whose owner died
    pub fn sweep_stale(&self) -> Result<usize, ResolveError> {
        let lock_keys = self
            .store
            .keys(keys::LOCK_PREFIX)
            .map_err(|e| ResolveError::lock_failed(&e))?;

        let mut removed = 0;
        for key in lock_keys {
            let record: Option<LockRecord> = match self.store.get_json(&key) {
                Ok(r) => r,
                Err(e) => {
                    warn!(key = %key, "Skipping unreadable lock entry: {}", e);
                    continue;
                }
            };
            if let Some(record) = record {
                if is_stale(&record) {
                    self.store
                        .delete(&key)
                        .map_err(|e| ResolveError::lock_failed(&e))?;
                    info!(key = %key, pid = record.owner_pid, "Removed stale lock");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Sweep stale locks every `interval` until `cancel` fires
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.sweep_stale() {
                            warn!("Lock sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    fn owns(&self, key: &str, owner_value: &str) -> Result<bool, ResolveError> {
        let current: Option<LockRecord> = self
            .store
            .get_json(key)
            .map_err(|e| ResolveError::lock_failed(&e))?;
        Ok(current.is_some_and(|r| r.owner_value == owner_value))
    }

    fn release_if_owner(&self, key: &str, owner_value: &str) {
        release_entry(self.store.as_ref(), key, owner_value);
    }
}

/// Deletes the entry unless another party has taken it over since
fn release_entry(store: &dyn KeyValueStore, key: &str, owner_value: &str) {
    match store.get_json::<LockRecord>(key) {
        Ok(Some(record)) if record.owner_value != owner_value => {
            debug!(key = %key, "Lock already taken over, leaving entry");
        }
        Ok(_) => {
            if let Err(e) = store.delete(key) {
                warn!(key = %key, "Failed to release lock: {}", e);
            }
        }
        Err(e) => {
            warn!(key = %key, "Failed to read lock on release: {}", e);
            if let Err(e) = store.delete(key) {
                warn!(key = %key, "Failed to release lock: {}", e);
            }
        }
    }
}

/// A held lock. Dropping it releases the lock.
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    owner_value: String,
    /// Fired when ownership is lost
    lost: CancellationToken,
    /// Stops the ownership tick
    stop: CancellationToken,
    released: bool,
}

impl LockGuard {
    fn start(
        store: Arc<dyn KeyValueStore>,
        key: String,
        owner_value: String,
        poll_interval: Duration,
    ) -> Self {
        let lost = CancellationToken::new();
        let stop = CancellationToken::new();

        let tick_store = Arc::clone(&store);
        let tick_key = key.clone();
        let tick_owner = owner_value.clone();
        let tick_lost = lost.clone();
        let tick_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick_stop.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                let still_ours = match tick_store.get_json::<LockRecord>(&tick_key) {
                    Ok(Some(record)) => record.owner_value == tick_owner,
                    Ok(None) => false,
                    // Transient read failures do not revoke the lease
                    Err(_) => true,
                };
                if !still_ours {
                    warn!(key = %tick_key, "Lock was reclaimed by another party");
                    tick_lost.cancel();
                    break;
                }
            }
        });

        Self {
            store,
            key,
            owner_value,
            lost,
            stop,
            released: false,
        }
    }

    /// Token that fires if the lock is forcibly reclaimed while held
    pub fn token(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly; equivalent to dropping the guard
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stop.cancel();
        release_entry(self.store.as_ref(), &self.key, &self.owner_value);
        debug!(key = %self.key, "Lock released");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
