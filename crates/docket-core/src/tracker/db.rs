//! SQLite-backed tracker handle.
//!
//! Handles connection, schema bootstrap, timestamps and the event channel.
//! Job operations live in `jobs`, stage history in `stages`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

use super::types::{Job, JobEvent, JobEventKind};

/// Capacity of the in-process event channel; slow subscribers lag past this.
const EVENT_CAPACITY: usize = 1024;

/// Lock wait when another worker process holds the database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a claim stays valid without a heartbeat.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        matter_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        current_stage TEXT,
        total_stages INTEGER NOT NULL,
        completed_stages INTEGER NOT NULL DEFAULT 0,
        progress_pct INTEGER NOT NULL DEFAULT 0,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL,
        error_code TEXT,
        error_message TEXT,
        page_count INTEGER NOT NULL DEFAULT 0,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        revision INTEGER NOT NULL DEFAULT 0,
        queued_at INTEGER NOT NULL,
        started_at INTEGER,
        start_pct INTEGER NOT NULL DEFAULT 0,
        completed_at INTEGER,
        updated_at INTEGER NOT NULL,
        not_before_ms INTEGER,
        claimed_by TEXT,
        lease_expires_ms INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS jobs_matter ON jobs (matter_id)",
    "CREATE INDEX IF NOT EXISTS jobs_status ON jobs (status, queued_at)",
    r#"
    CREATE TABLE IF NOT EXISTS stage_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id INTEGER NOT NULL,
        stage TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        status TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        ended_at INTEGER,
        error_message TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stage_records_job ON stage_records (job_id, stage)",
    r#"
    CREATE TABLE IF NOT EXISTS bounding_boxes (
        document_id TEXT NOT NULL,
        id TEXT NOT NULL,
        page INTEGER NOT NULL,
        reading_order INTEGER NOT NULL,
        text TEXT NOT NULL,
        x REAL NOT NULL,
        y REAL NOT NULL,
        width REAL NOT NULL,
        height REAL NOT NULL,
        PRIMARY KEY (document_id, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        document_id TEXT NOT NULL,
        id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        page_start INTEGER NOT NULL,
        page_end INTEGER NOT NULL,
        content TEXT NOT NULL,
        bbox_ids_json TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (document_id, id)
    )
    "#,
];

/// Handle to the tracker database.
///
/// The default file lives under the XDG state directory:
/// `~/.local/state/docket/docket.db`. Several worker processes may open the
/// same file; cross-process writes are serialized by SQLite.
///
/// Each handle has a worker id. Jobs it claims carry that id and a lease the
/// running worker renews; only jobs whose lease lapsed are recovered. Clones
/// share the id.
#[derive(Clone)]
pub struct Tracker {
    pub(crate) pool: Pool<Sqlite>,
    events: broadcast::Sender<JobEvent>,
    worker_id: Arc<str>,
    lease: Duration,
}

impl Tracker {
    /// Path of the default tracker database.
    pub fn default_path() -> Result<std::path::PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("docket")?;
        Ok(xdg_dirs.get_state_home().join("docket").join("docket.db"))
    }

    /// Open (or create) the default tracker database.
    pub async fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database (tests, one-shot tools).
    pub async fn open_in_memory() -> Result<Self> {
        // Single connection: every pooled connection would otherwise get its own empty DB.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: Pool<Sqlite>) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tracker = Tracker {
            pool,
            events,
            worker_id: uuid::Uuid::new_v4().to_string().into(),
            lease: DEFAULT_LEASE,
        };
        tracker.migrate().await?;
        Ok(tracker)
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Lease length for jobs claimed through this handle.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Id recorded as `claimed_by` on jobs this handle claims.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Underlying pool, shared with the governor's slot store.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Receive a snapshot after every job write made through this handle.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, kind: JobEventKind, job: &Job) {
        // No subscribers is fine; events are best-effort.
        let _ = self.events.send(JobEvent {
            kind,
            job: job.clone(),
        });
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Current time as Unix milliseconds (leases, requeue delays).
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
