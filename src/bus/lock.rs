use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use log::debug;
use tokio::sync::{Mutex, MutexGuard};

use crate::utils::error::GatewayError;

/// Mutual exclusion for one physical connection.
///
/// Every scan group on the connection and every inbound command write
/// serializes here, so at most one transaction is in flight at any instant.
/// Ordinary callers use the bounded `acquire` so a wedged connection cannot
/// starve them indefinitely; only the reconnection path holds the lock
/// unbounded.
pub struct ConnectionLock {
    name: String,
    inner: Mutex<()>,
    waiters: AtomicUsize,
}

pub struct ConnectionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl ConnectionLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(()),
            waiters: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bounded wait; times out to a no-op failure.
    pub async fn acquire(&self, timeout: Duration) -> Result<ConnectionGuard<'_>, GatewayError> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = tokio::time::timeout(timeout, self.inner.lock()).await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(guard) => Ok(ConnectionGuard { _guard: guard }),
            Err(_) => {
                debug!(
                    "⏳ Lock '{}' not acquired within {:?} ({} waiting)",
                    self.name,
                    timeout,
                    self.waiting()
                );
                Err(GatewayError::LockTimeout)
            }
        }
    }

    /// Unbounded wait, used only by the reconnection path.
    pub async fn acquire_unbounded(&self) -> ConnectionGuard<'_> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let guard = self.inner.lock().await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        ConnectionGuard { _guard: guard }
    }

    /// Current number of tasks blocked on the lock, for observability.
    pub fn waiting(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }
}
