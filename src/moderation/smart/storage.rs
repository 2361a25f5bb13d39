//! Moderation sample store - SQLite with connection pooling
//!
//! Append-only table of labeled moderation outcomes, one database per
//! profile. Ids ascend with arrival order and `created_at` is assigned by
//! the store, never the caller. Pools are process-wide singletons keyed by
//! database path so every request handler and the trainer share connections.
//!
//! # WAL mode concurrency
//!
//! The database runs in WAL mode: the single writer (SQLite-level) can
//! proceed while readers hold their own pooled connections. Writes are
//! short explicit transactions (a single INSERT), so critical sections stay
//! bounded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

/// Connections per database pool
const POOL_SIZE: u32 = 10;

/// One labeled moderation outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: i64,
    pub text: String,
    /// 0 = pass, 1 = violation
    pub label: i64,
    /// The rule that produced the label (e.g. "keyword", "bow")
    pub category: Option<String>,
    pub created_at: String,
}

type PoolMap = HashMap<PathBuf, Pool<SqliteConnectionManager>>;

fn pools() -> &'static Mutex<PoolMap> {
    static POOLS: OnceLock<Mutex<PoolMap>> = OnceLock::new();
    POOLS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Drop every pool; called on shutdown so tests and the process exit clean
pub fn shutdown_pools() {
    let mut pools = pools().lock().unwrap_or_else(|e| e.into_inner());
    let count = pools.len();
    pools.clear();
    if count > 0 {
        tracing::info!("Sample store pools shut down ({} database(s))", count);
    }
}

fn pool_for(db_path: &Path) -> Result<Pool<SqliteConnectionManager>> {
    let mut pools = pools().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(pool) = pools.get(db_path) {
        return Ok(pool.clone());
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    });
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .build(manager)
        .with_context(|| format!("Failed to open sample store {}", db_path.display()))?;

    // Schema is idempotent; every opener runs it
    pool.get()?
        .execute(
            "CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                label INTEGER NOT NULL,
                category TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create samples table")?;

    pools.insert(db_path.to_path_buf(), pool.clone());
    Ok(pool)
}

/// Handle to one profile's sample database
#[derive(Clone)]
pub struct SampleStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SampleStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            pool: pool_for(db_path)?,
        })
    }

    /// Append a labeled sample. `created_at` is set by the database.
    pub fn append(&self, text: &str, label: i64, category: Option<&str>) -> Result<()> {
        let conn = self.pool.get().context("Sample store pool exhausted")?;
        conn.execute(
            "INSERT INTO samples (text, label, category) VALUES (?1, ?2, ?3)",
            params![text, label, category],
        )
        .context("Failed to insert sample")?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Ids of the most recent `limit` samples
    pub fn recent_ids(&self, limit: usize) -> Result<Vec<i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id FROM samples ORDER BY id DESC LIMIT ?1")?;
        let ids = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Load samples by id; missing ids are skipped silently
    pub fn load_by_ids(&self, ids: &[i64]) -> Result<Vec<Sample>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, text, label, category, created_at FROM samples WHERE id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let samples = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok(Sample {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    label: row.get(2)?,
                    category: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<Sample>, _>>()?;
        Ok(samples)
    }

    /// Most recent sample whose text matches exactly; maintenance surface
    pub fn find_by_text(&self, text: &str) -> Result<Option<Sample>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, label, category, created_at FROM samples
             WHERE text = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![text], |row| {
            Ok(Sample {
                id: row.get(0)?,
                text: row.get(1)?,
                label: row.get(2)?,
                category: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        match rows.next() {
            Some(sample) => Ok(Some(sample?)),
            None => Ok(None),
        }
    }

    /// Trim oldest-first so at most `max_items` rows remain
    pub fn trim_to(&self, max_items: usize) -> Result<usize> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM samples WHERE id NOT IN
             (SELECT id FROM samples ORDER BY id DESC LIMIT ?1)",
            params![max_items as i64],
        )?;
        if deleted > 0 {
            tracing::info!("Trimmed {} old sample(s) from store", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir, name: &str) -> SampleStore {
        SampleStore::open(&dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_ids_are_monotonic_with_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "a.db");
        store.append("first", 0, None).unwrap();
        store.append("second", 1, Some("keyword")).unwrap();
        store.append("third", 0, None).unwrap();

        let ids = store.recent_ids(10).unwrap();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_created_at_is_store_assigned() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "b.db");
        store.append("x", 1, None).unwrap();
        let sample = store.find_by_text("x").unwrap().unwrap();
        assert!(!sample.created_at.is_empty());
        assert_eq!(sample.label, 1);
    }

    #[test]
    fn test_load_by_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "c.db");
        store.append("a", 0, None).unwrap();
        store.append("b", 1, None).unwrap();

        let samples = store.load_by_ids(&[1, 2, 99]).unwrap();
        assert_eq!(samples.len(), 2);

        assert!(store.load_by_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_trim_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "d.db");
        for i in 0..10 {
            store.append(&format!("s{}", i), 0, None).unwrap();
        }
        let deleted = store.trim_to(4).unwrap();
        assert_eq!(deleted, 6);
        assert_eq!(store.recent_ids(10).unwrap(), vec![10, 9, 8, 7]);
    }

    #[test]
    fn test_pools_are_shared_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let store_a = open_store(&dir, "e.db");
        let store_b = open_store(&dir, "e.db");
        store_a.append("from a", 0, None).unwrap();
        // Same database, same pool: b sees a's write
        assert_eq!(store_b.count().unwrap(), 1);
    }
}
