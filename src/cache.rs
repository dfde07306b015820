//! Persistent resolution cache.
//!
//! One row per MAL id in a local SQLite file. Stages read it at start to skip
//! work already done and write to it as soon as each id is resolved, so the
//! cache doubles as the checkpoint of an interrupted run.
//!
//! The connection sits behind a mutex: the scrape worker pool upserts from
//! several threads, and every upsert is one statement, so writes to the same
//! MAL id never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::models::{Entity, IdMap};

/// Ordered schema migrations; `PRAGMA user_version` records how many ran.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        mal_id           INTEGER PRIMARY KEY,
        url              TEXT NOT NULL DEFAULT '',
        release_date     TEXT NOT NULL DEFAULT '',
        media_type       TEXT NOT NULL DEFAULT '',
        anidb_id         INTEGER NOT NULL DEFAULT 0,
        had_anidb_id     INTEGER NOT NULL DEFAULT 0,
        tmdb_id          INTEGER NOT NULL DEFAULT 0,
        anidb_checked_at TEXT,
        cached_at        TEXT NOT NULL,
        last_used        TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_anidb ON cache_entries(anidb_id);
    CREATE INDEX IF NOT EXISTS idx_cache_tmdb ON cache_entries(tmdb_id);
    CREATE INDEX IF NOT EXISTS idx_cache_release_date ON cache_entries(release_date);
    CREATE INDEX IF NOT EXISTS idx_cache_media_type ON cache_entries(media_type);
"#];

const UPSERT_SQL: &str = r#"
    INSERT INTO cache_entries (
        mal_id, url, release_date, media_type,
        anidb_id, had_anidb_id, tmdb_id, anidb_checked_at,
        cached_at, last_used
    )
    VALUES (
        ?1, COALESCE(?2, ''), COALESCE(?3, ''), COALESCE(?4, ''),
        COALESCE(?5, 0), COALESCE(?5, 0) > 0, COALESCE(?6, 0), ?7,
        ?8, ?8
    )
    ON CONFLICT(mal_id) DO UPDATE SET
        url = COALESCE(?2, url),
        release_date = COALESCE(?3, release_date),
        media_type = COALESCE(?4, media_type),
        anidb_id = CASE WHEN COALESCE(?5, 0) > 0 THEN ?5 ELSE anidb_id END,
        had_anidb_id = CASE WHEN COALESCE(?5, 0) > 0 THEN 1 ELSE had_anidb_id END,
        tmdb_id = CASE WHEN COALESCE(?6, 0) > 0 THEN ?6 ELSE tmdb_id END,
        anidb_checked_at = COALESCE(?7, anidb_checked_at),
        last_used = ?8
"#;

const ENTRY_COLUMNS: &str = "mal_id, url, release_date, media_type, anidb_id, had_anidb_id, \
                             tmdb_id, anidb_checked_at, cached_at, last_used";

// ============================================================================
// Types
// ============================================================================

/// External id column used by `id_map`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdField {
    AniDb,
    Tmdb,
}

impl IdField {
    fn column(self) -> &'static str {
        match self {
            IdField::AniDb => "anidb_id",
            IdField::Tmdb => "tmdb_id",
        }
    }
}

/// Fields to merge into a cache row. `None` leaves the stored value alone,
/// and an id of 0 never replaces a stored non-zero id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    pub url: Option<String>,
    pub release_date: Option<String>,
    pub media_type: Option<String>,
    pub anidb_id: Option<u32>,
    pub tmdb_id: Option<u32>,
    /// Record that the detail page was checked, whatever it contained.
    pub anidb_checked: bool,
}

impl CacheUpdate {
    /// Ground-truth fields from the ranking API.
    pub fn from_ranking(entity: &Entity) -> Self {
        Self {
            url: Some(entity.mal_url()),
            release_date: Some(entity.release_date.clone()),
            media_type: Some(entity.media_type.clone()),
            ..Self::default()
        }
    }

    /// Outcome of a detail page scrape.
    pub fn anidb(anidb_id: Option<u32>) -> Self {
        Self {
            anidb_id,
            anidb_checked: true,
            ..Self::default()
        }
    }

    pub fn tmdb(tmdb_id: u32) -> Self {
        Self {
            tmdb_id: Some(tmdb_id),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub mal_id: u32,
    pub url: String,
    pub release_date: String,
    pub media_type: String,
    pub anidb_id: u32,
    pub had_anidb_id: bool,
    pub tmdb_id: u32,
    pub anidb_checked_at: Option<String>,
    pub cached_at: String,
    pub last_used: String,
}

impl CacheEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mal_id: row.get(0)?,
            url: row.get(1)?,
            release_date: row.get(2)?,
            media_type: row.get(3)?,
            anidb_id: row.get(4)?,
            had_anidb_id: row.get(5)?,
            tmdb_id: row.get(6)?,
            anidb_checked_at: row.get(7)?,
            cached_at: row.get(8)?,
            last_used: row.get(9)?,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open cache database {}", path.display()))?;
        Self::init(conn).with_context(|| format!("Failed to initialize cache {}", path.display()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Store whose writes all fail, for exercising warn-and-continue paths.
    #[cfg(test)]
    pub(crate) fn open_read_only_in_memory() -> Result<Self> {
        let store = Self::open_in_memory()?;
        store.conn()?.pragma_update(None, "query_only", true)?;
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("cache connection mutex poisoned"))
    }

    /// Create or merge the row for `mal_id`.
    pub fn upsert(&self, mal_id: u32, update: &CacheUpdate) -> Result<()> {
        let now = now_rfc3339();
        let checked_at = update.anidb_checked.then(|| now.clone());
        let conn = self.conn()?;
        conn.prepare_cached(UPSERT_SQL)?
            .execute(params![
                mal_id,
                update.url,
                update.release_date,
                update.media_type,
                update.anidb_id,
                update.tmdb_id,
                checked_at,
                now,
            ])
            .with_context(|| format!("Failed to upsert cache entry {}", mal_id))?;
        Ok(())
    }

    pub fn get(&self, mal_id: u32) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM cache_entries WHERE mal_id = ?1", ENTRY_COLUMNS);
        let entry = conn
            .prepare_cached(&sql)?
            .query_row(params![mal_id], CacheEntry::from_row)
            .optional()?;
        Ok(entry)
    }

    /// MAL id -> external id for every row where that id is resolved.
    pub fn id_map(&self, field: IdField) -> Result<IdMap> {
        let conn = self.conn()?;
        let column = field.column();
        let sql = format!("SELECT mal_id, {column} FROM cache_entries WHERE {column} > 0");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)))?;

        let mut map = IdMap::default();
        for row in rows {
            let (mal_id, id) = row?;
            map.insert(mal_id, id);
        }
        Ok(map)
    }

    /// Entries released in `year` that still have no AniDB id.
    pub fn entries_by_release_year(&self, year: i32) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM cache_entries
             WHERE release_date >= ?1 AND release_date < ?2 AND anidb_id = 0
             ORDER BY mal_id",
            ENTRY_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![format!("{:04}", year), format!("{:04}", year + 1)],
            CacheEntry::from_row,
        )?;
        let entries = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read cache entries by release year")?;
        Ok(entries)
    }

    /// Returns true if a row was removed.
    pub fn delete(&self, mal_id: u32) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM cache_entries WHERE mal_id = ?1", params![mal_id])?;
        Ok(removed > 0)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = MIGRATIONS.len() as i64;
    if version > target {
        bail!(
            "cache schema version {} is newer than this build supports ({})",
            version,
            target
        );
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("Cache migration {} failed", idx + 1))?;
        tx.pragma_update(None, "user_version", (idx + 1) as i64)?;
        tx.commit()?;
    }
    Ok(())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// TESTS
// ============================================================================
