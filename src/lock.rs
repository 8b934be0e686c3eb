//! Process-wide mutual exclusion per cluster identity
//!
//! Every mutation sequence against a cluster runs while holding that cluster's
//! [`LockToken`]. Sequences for different clusters never contend. The lock is
//! local to this process; two processes driving the same cluster are not
//! coordinated.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::model::ResourceIdentity;

static GLOBAL: OnceLock<Arc<ResourceKeyLock>> = OnceLock::new();

/// Table of async mutexes keyed by [`ResourceIdentity::lock_key`]
///
/// Entries are created on first use and never removed.
#[derive(Debug, Default)]
pub struct ResourceKeyLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResourceKeyLock {
    /// Create an isolated lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// The table shared by the whole process
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Wait until no other sequence holds `identity`, then take it
    ///
    /// Not reentrant: acquiring the same identity again before dropping the
    /// first token never returns.
    pub async fn acquire(&self, identity: &ResourceIdentity) -> LockToken {
        let key = identity.lock_key();
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!(key = %key, "Waiting for cluster lock");
        let guard = mutex.lock_owned().await;
        debug!(key = %key, "Acquired cluster lock");

        LockToken { key, _guard: guard }
    }

    /// Number of identities the table has seen
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no identity has been locked yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// True while some sequence holds `identity`
    pub fn is_locked(&self, identity: &ResourceIdentity) -> bool {
        self.locks
            .get(&identity.lock_key())
            .is_some_and(|m| m.try_lock().is_err())
    }
}

/// Proof of exclusive ownership of one identity
///
/// Dropping the token releases the lock.
#[derive(Debug)]
pub struct LockToken {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockToken {
    /// The lock key this token holds
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release explicitly; equivalent to dropping
    pub fn release(self) {}
}

impl Drop for LockToken {
    fn drop(&mut self) {
        debug!(key = %self.key, "Released cluster lock");
    }
}
