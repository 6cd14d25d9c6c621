//! Slot stores: where the set of in-flight call tokens per governor name lives.

use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The shared store could not be reached or answered with an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("slot store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// A set of slot tokens per name, bounded at acquisition time.
///
/// Expired entries are purged before each acquisition, and a successful
/// acquisition refreshes the expiry of the whole set for that name.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Add `token` to the set for `name` if it holds fewer than `max` tokens.
    async fn try_acquire(
        &self,
        name: &str,
        token: &str,
        max: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove `token`. Removing an absent token is not an error.
    async fn release(&self, name: &str, token: &str) -> Result<(), StoreError>;

    /// Number of live tokens for `name`.
    async fn held(&self, name: &str) -> Result<usize, StoreError>;
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

const SLOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS governor_slots (
    name TEXT NOT NULL,
    token TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    PRIMARY KEY (name, token)
)
"#;

/// Slot set in a SQLite file shared by every worker process.
#[derive(Clone)]
pub struct SqliteSlotStore {
    pool: Pool<Sqlite>,
}

impl SqliteSlotStore {
    /// Use `pool` (typically the tracker's) and create the slot table if needed.
    pub async fn new(pool: Pool<Sqlite>) -> anyhow::Result<Self> {
        sqlx::query(SLOT_SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn try_acquire(
        &self,
        name: &str,
        token: &str,
        max: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = now_ms();
        let expires = now + ttl.as_millis() as i64;

        sqlx::query("DELETE FROM governor_slots WHERE name = ?1 AND expires_at_ms <= ?2")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;

        // Count and insert in one statement so two processes cannot both see room.
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO governor_slots (name, token, expires_at_ms)
            SELECT ?1, ?2, ?3
            WHERE (SELECT COUNT(*) FROM governor_slots WHERE name = ?1) < ?4
            "#,
        )
        .bind(name)
        .bind(token)
        .bind(expires)
        .bind(max as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(false);
        }
        sqlx::query("UPDATE governor_slots SET expires_at_ms = ?1 WHERE name = ?2")
            .bind(expires)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    async fn release(&self, name: &str, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM governor_slots WHERE name = ?1 AND token = ?2")
            .bind(name)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn held(&self, name: &str) -> Result<usize, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM governor_slots WHERE name = ?1 AND expires_at_ms > ?2",
        )
        .bind(name)
        .bind(now_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

/// In-process slot set with the same semantics as the SQLite store.
#[derive(Default)]
pub struct MemorySlotStore {
    /// name -> (token -> expiry in Unix ms)
    sets: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl MemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sets<T>(&self, f: impl FnOnce(&mut HashMap<String, HashMap<String, i64>>) -> T) -> T {
        let mut sets = self.sets.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sets)
    }
}

#[async_trait]
impl SlotStore for MemorySlotStore {
    async fn try_acquire(
        &self,
        name: &str,
        token: &str,
        max: usize,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = now_ms();
        let expires = now + ttl.as_millis() as i64;
        Ok(self.with_sets(|sets| {
            let set = sets.entry(name.to_string()).or_default();
            set.retain(|_, exp| *exp > now);
            if set.len() >= max || set.contains_key(token) {
                return false;
            }
            set.insert(token.to_string(), expires);
            for exp in set.values_mut() {
                *exp = expires;
            }
            true
        }))
    }

    async fn release(&self, name: &str, token: &str) -> Result<(), StoreError> {
        self.with_sets(|sets| {
            if let Some(set) = sets.get_mut(name) {
                set.remove(token);
            }
        });
        Ok(())
    }

    async fn held(&self, name: &str) -> Result<usize, StoreError> {
        let now = now_ms();
        Ok(self.with_sets(|sets| {
            sets.get(name)
                .map(|set| set.values().filter(|exp| **exp > now).count())
                .unwrap_or(0)
        }))
    }
}
