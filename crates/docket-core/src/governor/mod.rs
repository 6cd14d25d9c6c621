//! Concurrency governor: bounds in-flight external calls per named resource
//! across every worker process sharing a slot store.
//!
//! Each acquisition adds a unique token to the named slot set if it holds
//! fewer than `max_concurrent` tokens. Waiters are woken by in-process
//! releases and otherwise poll at a fixed interval, so releases from other
//! processes are observed within one poll. If the shared store errors, that
//! acquisition falls back to a process-local semaphore.

mod local;
mod store;

pub use local::LocalLimiter;
pub use store::{MemorySlotStore, SlotStore, SqliteSlotStore, StoreError};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit};
use tokio::time::Instant;

use crate::config::GovernorConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernorError {
    #[error("no {name} slot became free within {waited:?}")]
    Timeout { name: String, waited: Duration },
}

/// Handle to the governor. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Governor {
    store: Arc<dyn SlotStore>,
    local: Arc<LocalLimiter>,
    released: Arc<Notify>,
    poll_interval: Duration,
    fallback_limit: Option<usize>,
}

impl Governor {
    pub fn new(store: Arc<dyn SlotStore>, config: &GovernorConfig) -> Self {
        Self {
            store,
            local: Arc::new(LocalLimiter::new()),
            released: Arc::new(Notify::new()),
            poll_interval: config.poll_interval(),
            fallback_limit: config.fallback_limit,
        }
    }

    /// Governor over a private in-memory store (single process, tests).
    pub fn in_memory(config: &GovernorConfig) -> Self {
        Self::new(Arc::new(MemorySlotStore::new()), config)
    }

    /// Live slots held under `name` in the shared store.
    pub async fn held(&self, name: &str) -> Result<usize, StoreError> {
        self.store.held(name).await
    }

    /// Wait for a slot under `name`, at most `max_concurrent` held at once.
    ///
    /// `ttl` is refreshed on the whole set at each acquisition so slots of a
    /// crashed holder eventually expire. Fails with
    /// [`GovernorError::Timeout`] once `timeout` elapses.
    pub async fn acquire(
        &self,
        name: &str,
        max_concurrent: usize,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<SlotGuard, GovernorError> {
        let max = max_concurrent.max(1);
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;

        loop {
            // Register before trying so a release between the try and the wait is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.store.try_acquire(name, &token, max, ttl).await {
                Ok(true) => {
                    tracing::trace!(governor = name, %token, "slot acquired");
                    return Ok(SlotGuard {
                        held: Some(Held::Shared {
                            store: Arc::clone(&self.store),
                            released: Arc::clone(&self.released),
                            name: name.to_string(),
                            token,
                        }),
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        governor = name,
                        "slot store unavailable, using local limit: {}",
                        e
                    );
                    return self.acquire_local(name, max, deadline, timeout).await;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GovernorError::Timeout {
                    name: name.to_string(),
                    waited: timeout,
                });
            }
            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn acquire_local(
        &self,
        name: &str,
        max: usize,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<SlotGuard, GovernorError> {
        let limit = self.fallback_limit.unwrap_or(max);
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.local.acquire(name, limit, remaining).await {
            Some(permit) => Ok(SlotGuard {
                held: Some(Held::Local(permit)),
            }),
            None => Err(GovernorError::Timeout {
                name: name.to_string(),
                waited: timeout,
            }),
        }
    }
}

enum Held {
    Shared {
        store: Arc<dyn SlotStore>,
        released: Arc<Notify>,
        name: String,
        token: String,
    },
    Local(OwnedSemaphorePermit),
}

/// A held slot. Call [`SlotGuard::release`]; dropping an unreleased guard
/// releases it from a spawned task.
pub struct SlotGuard {
    held: Option<Held>,
}

impl SlotGuard {
    /// Token of a shared-store slot; `None` for a local fallback permit.
    pub fn token(&self) -> Option<&str> {
        match &self.held {
            Some(Held::Shared { token, .. }) => Some(token),
            _ => None,
        }
    }

    /// The slot came from the local fallback instead of the shared store.
    pub fn is_degraded(&self) -> bool {
        matches!(self.held, Some(Held::Local(_)))
    }

    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            release_held(held).await;
        }
    }
}

async fn release_held(held: Held) {
    match held {
        Held::Shared {
            store,
            released,
            name,
            token,
        } => {
            if let Err(e) = store.release(&name, &token).await {
                // The set TTL reclaims it eventually.
                tracing::warn!(governor = %name, %token, "slot release failed: {}", e);
            }
            released.notify_waiters();
        }
        Held::Local(permit) => drop(permit),
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release_held(held));
            }
            Err(_) => {
                if let Held::Shared { name, token, .. } = &held {
                    tracing::warn!(governor = %name, %token, "slot dropped outside runtime; left to expire");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
