//! Process-local bound used while the shared slot store is unreachable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One semaphore per governor name, created on first use.
///
/// Keeps a single process within its limit when cross-process coordination
/// is lost; it cannot bound the fleet as a whole.
#[derive(Default)]
pub struct LocalLimiter {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl LocalLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, name: &str, limit: usize) -> Arc<Semaphore> {
        let mut map = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1)))),
        )
    }

    /// Wait up to `timeout` for a permit under `name`. `limit` only applies
    /// the first time a name is seen.
    pub async fn acquire(
        &self,
        name: &str,
        limit: usize,
        timeout: Duration,
    ) -> Option<OwnedSemaphorePermit> {
        let sem = self.semaphore(name, limit);
        match tokio::time::timeout(timeout, sem.acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            // The semaphore is never closed, so this is the timeout.
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bound_applies_per_name() {
        let limiter = LocalLimiter::new();
        let t = Duration::from_millis(20);
        let a = limiter.acquire("ocr", 1, t).await;
        assert!(a.is_some());
        assert!(limiter.acquire("ocr", 1, t).await.is_none());
        assert!(limiter.acquire("embed", 1, t).await.is_some());
        drop(a);
        assert!(limiter.acquire("ocr", 1, t).await.is_some());
    }
}
