//! SQLite backlog store
//!
//! Lease fields live inline on each `work_items` row. Every read-then-write
//! sequence runs inside a `BEGIN IMMEDIATE` transaction, and each lease
//! assignment is additionally a conditional `UPDATE ... WHERE lease_owner IS NULL`,
//! so concurrent claimers (tasks or separate processes sharing the file) can
//! never select overlapping items.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::completeness::CompletenessPredicate;
use super::repository::{
    lease_cutoff, AttemptOutcome, BacklogRepository, SaveOutcome, StoreResult, MAX_ERROR_LEN,
};
use crate::models::{
    BacklogStats, ClaimedItem, ItemDetail, ItemId, Lease, RelatedEntity, RelationKind, WorkItem,
    WorkerId,
};
use crate::utils::error::StoreError;
use crate::utils::retry::AttemptPolicy;
use crate::utils::{truncate_text, validate_locator};

/// How long a connection waits on another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS work_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        locator TEXT NOT NULL UNIQUE,
        detail TEXT,
        complete INTEGER NOT NULL DEFAULT 0,
        lease_owner TEXT,
        lease_at TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        retry_at TEXT,
        poisoned INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        CHECK ((lease_owner IS NULL) = (lease_at IS NULL))
    );

    CREATE INDEX IF NOT EXISTS idx_work_items_claimable
        ON work_items(complete, poisoned, lease_owner, id);

    CREATE INDEX IF NOT EXISTS idx_work_items_lease_owner
        ON work_items(lease_owner);

    CREATE TABLE IF NOT EXISTS lookup_entities (
        kind TEXT NOT NULL,
        natural_key TEXT NOT NULL,
        name TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (kind, natural_key)
    );

    CREATE TABLE IF NOT EXISTS item_relations (
        item_id INTEGER NOT NULL REFERENCES work_items(id),
        kind TEXT NOT NULL,
        natural_key TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (item_id, kind, natural_key)
    );
"#;

/// Fixed-width UTC timestamp; lexicographic order equals time order
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn claimed_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimedItem> {
    Ok(ClaimedItem {
        id: ItemId(row.get(0)?),
        locator: row.get(1)?,
        attempts: row.get(2)?,
    })
}

fn upsert_entity_tx(
    conn: &Connection,
    kind: RelationKind,
    entity: &RelatedEntity,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO lookup_entities (kind, natural_key, name, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(kind, natural_key)
         DO UPDATE SET name = excluded.name, updated_at = excluded.updated_at",
        params![kind.as_str(), entity.key, entity.name, now],
    )?;
    Ok(())
}

/// Lease owner of an item, failing unless it is `worker`
fn check_lease(conn: &Connection, id: ItemId, worker: &WorkerId) -> StoreResult<()> {
    let owner: Option<Option<String>> = conn
        .query_row(
            "SELECT lease_owner FROM work_items WHERE id = ?1",
            params![id.get()],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        None => Err(StoreError::NotFound(id)),
        Some(Some(owner)) if owner == worker.as_str() => Ok(()),
        Some(_) => Err(StoreError::LeaseLost {
            item: id,
            worker: worker.clone(),
        }),
    }
}

/// SQLite implementation of [`BacklogRepository`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection; blocking
/// work runs on the tokio blocking pool.
pub struct SqliteBacklogRepository {
    conn: Arc<Mutex<Connection>>,
    predicate: Arc<dyn CompletenessPredicate>,
}

impl SqliteBacklogRepository {
    /// Open (or create) a backlog database file
    pub fn new(
        path: impl AsRef<Path>,
        predicate: Arc<dyn CompletenessPredicate>,
    ) -> StoreResult<Self> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Enable WAL mode for better concurrency across processes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let repo = Self::from_connection(conn, predicate)?;
        tracing::info!(path = %path.display(), "SQLite backlog initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory(predicate: Arc<dyn CompletenessPredicate>) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, predicate)
    }

    fn from_connection(
        conn: Connection,
        predicate: Arc<dyn CompletenessPredicate>,
    ) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            predicate,
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking store task failed: {e}")))?
    }
}

#[async_trait]
impl BacklogRepository for SqliteBacklogRepository {
    async fn enqueue(&self, locator: &str) -> StoreResult<ItemId> {
        validate_locator(locator).map_err(|reason| StoreError::InvalidLocator {
            locator: locator.to_string(),
            reason,
        })?;
        let locator = locator.trim().to_string();

        self.with_conn(move |conn| {
            let now = format_ts(Utc::now());
            conn.execute(
                "INSERT INTO work_items (locator, updated_at) VALUES (?1, ?2)
                 ON CONFLICT(locator) DO NOTHING",
                params![locator, now],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM work_items WHERE locator = ?1",
                params![locator],
                |row| row.get(0),
            )?;
            Ok(ItemId(id))
        })
        .await
    }

    async fn claim_batch(
        &self,
        worker: &WorkerId,
        batch_size: usize,
    ) -> StoreResult<Vec<ClaimedItem>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let worker = worker.clone();
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_ts(Utc::now());

            let candidates = {
                let mut stmt = tx.prepare(
                    "SELECT id, locator, attempts FROM work_items
                     WHERE complete = 0
                       AND poisoned = 0
                       AND lease_owner IS NULL
                       AND (retry_at IS NULL OR retry_at <= ?1)
                     ORDER BY id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now, limit], claimed_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            {
                let mut update = tx.prepare(
                    "UPDATE work_items SET lease_owner = ?1, lease_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND lease_owner IS NULL",
                )?;
                for item in candidates {
                    if update.execute(params![worker.as_str(), now, item.id.get()])? == 1 {
                        claimed.push(item);
                    }
                }
            }

            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn claim_item(&self, worker: &WorkerId, id: ItemId) -> StoreResult<Option<ClaimedItem>> {
        let worker = worker.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_ts(Utc::now());

            let changed = tx.execute(
                "UPDATE work_items SET lease_owner = ?1, lease_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND lease_owner IS NULL",
                params![worker.as_str(), now, id.get()],
            )?;

            let claimed = if changed == 1 {
                Some(tx.query_row(
                    "SELECT id, locator, attempts FROM work_items WHERE id = ?1",
                    params![id.get()],
                    claimed_from_row,
                )?)
            } else {
                None
            };

            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn release_worker(&self, worker: &WorkerId) -> StoreResult<usize> {
        let worker = worker.clone();
        self.with_conn(move |conn| {
            let released = conn.execute(
                "UPDATE work_items SET lease_owner = NULL, lease_at = NULL
                 WHERE lease_owner = ?1",
                params![worker.as_str()],
            )?;
            Ok(released)
        })
        .await
    }

    async fn release_all(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let released = conn.execute(
                "UPDATE work_items SET lease_owner = NULL, lease_at = NULL
                 WHERE lease_owner IS NOT NULL",
                [],
            )?;
            Ok(released)
        })
        .await
    }

    async fn renew_lease(&self, id: ItemId, worker: &WorkerId) -> StoreResult<bool> {
        let worker = worker.clone();
        self.with_conn(move |conn| {
            let now = format_ts(Utc::now());
            let renewed = conn.execute(
                "UPDATE work_items SET lease_owner = ?3, lease_at = ?1, updated_at = ?1
                 WHERE id = ?2
                   AND (lease_owner = ?3
                        OR (lease_owner IS NULL
                            AND complete = 0
                            AND poisoned = 0
                            AND (retry_at IS NULL OR retry_at <= ?1)))",
                params![now, id.get(), worker.as_str()],
            )?;
            Ok(renewed == 1)
        })
        .await
    }

    async fn reclaim_expired(&self, ttl: Duration) -> StoreResult<usize> {
        let Some(cutoff) = lease_cutoff(Utc::now(), ttl) else {
            return Ok(0);
        };
        let cutoff = format_ts(cutoff);

        self.with_conn(move |conn| {
            let reclaimed = conn.execute(
                "UPDATE work_items SET lease_owner = NULL, lease_at = NULL
                 WHERE lease_owner IS NOT NULL AND lease_at < ?1",
                params![cutoff],
            )?;
            Ok(reclaimed)
        })
        .await
    }

    async fn save_detail(
        &self,
        id: ItemId,
        worker: &WorkerId,
        detail: &ItemDetail,
    ) -> StoreResult<SaveOutcome> {
        let worker = worker.clone();
        let complete_now = self.predicate.is_complete(detail);
        let payload = serde_json::to_string(detail)?;
        let detail = detail.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_ts(Utc::now());

            check_lease(&tx, id, &worker)?;

            tx.execute(
                "DELETE FROM item_relations WHERE item_id = ?1",
                params![id.get()],
            )?;
            for kind in RelationKind::all() {
                for (position, entity) in detail.relations(kind).iter().enumerate() {
                    upsert_entity_tx(&tx, kind, entity, &now)?;
                    tx.execute(
                        "INSERT OR IGNORE INTO item_relations (item_id, kind, natural_key, position)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![id.get(), kind.as_str(), entity.key, position as i64],
                    )?;
                }
            }

            // complete only ever goes from 0 to 1
            tx.execute(
                "UPDATE work_items
                 SET detail = ?1,
                     complete = MAX(complete, ?2),
                     last_error = CASE WHEN MAX(complete, ?2) = 1 THEN NULL ELSE last_error END,
                     retry_at = CASE WHEN MAX(complete, ?2) = 1 THEN NULL ELSE retry_at END,
                     updated_at = ?3
                 WHERE id = ?4 AND lease_owner = ?5",
                params![payload, complete_now as i64, now, id.get(), worker.as_str()],
            )?;

            let complete: bool = tx.query_row(
                "SELECT complete FROM work_items WHERE id = ?1",
                params![id.get()],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok(SaveOutcome { complete })
        })
        .await
    }

    async fn record_failure(
        &self,
        id: ItemId,
        worker: &WorkerId,
        reason: &str,
        policy: &AttemptPolicy,
    ) -> StoreResult<AttemptOutcome> {
        let worker = worker.clone();
        let reason = truncate_text(reason, MAX_ERROR_LEN);
        let policy = policy.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = Utc::now();

            check_lease(&tx, id, &worker)?;

            let attempts: u32 = tx.query_row(
                "SELECT attempts FROM work_items WHERE id = ?1",
                params![id.get()],
                |row| row.get(0),
            )?;

            let outcome = AttemptOutcome::from_policy(attempts.saturating_add(1), &policy, now);

            tx.execute(
                "UPDATE work_items
                 SET attempts = ?1, poisoned = ?2, retry_at = ?3, last_error = ?4, updated_at = ?5
                 WHERE id = ?6 AND lease_owner = ?7",
                params![
                    outcome.attempts,
                    outcome.poisoned,
                    outcome.retry_at.map(format_ts),
                    reason,
                    format_ts(now),
                    id.get(),
                    worker.as_str()
                ],
            )?;

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn upsert_entity(&self, kind: RelationKind, entity: &RelatedEntity) -> StoreResult<()> {
        let entity = entity.clone();
        self.with_conn(move |conn| {
            upsert_entity_tx(conn, kind, &entity, &format_ts(Utc::now()))?;
            Ok(())
        })
        .await
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Option<WorkItem>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, locator, detail, complete, lease_owner, lease_at,
                            attempts, last_error, retry_at, poisoned
                     FROM work_items WHERE id = ?1",
                    params![id.get()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, bool>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, u32>(6)?,
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, Option<String>>(8)?,
                            row.get::<_, bool>(9)?,
                        ))
                    },
                )
                .optional()?;

            let Some((
                id,
                locator,
                detail,
                complete,
                lease_owner,
                lease_at,
                attempts,
                last_error,
                retry_at,
                poisoned,
            )) = row
            else {
                return Ok(None);
            };

            let detail = detail
                .map(|raw| serde_json::from_str::<ItemDetail>(&raw))
                .transpose()?;

            let lease = match (lease_owner.and_then(WorkerId::new), lease_at) {
                (Some(owner), Some(at)) => parse_ts(&at).map(|acquired_at| Lease { owner, acquired_at }),
                _ => None,
            };

            Ok(Some(WorkItem {
                id: ItemId(id),
                locator,
                detail,
                lease,
                complete,
                attempts,
                last_error,
                retry_at: retry_at.as_deref().and_then(parse_ts),
                poisoned,
            }))
        })
        .await
    }

    async fn stats(&self) -> StoreResult<BacklogStats> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN complete = 0 AND poisoned = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN complete = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN lease_owner IS NOT NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN complete = 0 AND poisoned = 1 THEN 1 ELSE 0 END), 0)
                 FROM work_items",
                [],
                |row| {
                    Ok(BacklogStats {
                        total: row.get::<_, i64>(0)? as usize,
                        pending: row.get::<_, i64>(1)? as usize,
                        complete: row.get::<_, i64>(2)? as usize,
                        leased: row.get::<_, i64>(3)? as usize,
                        poisoned: row.get::<_, i64>(4)? as usize,
                    })
                },
            )?;
            Ok(stats)
        })
        .await
    }
}
