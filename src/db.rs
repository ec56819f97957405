use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ToSql};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Posting, PostingId, Status};

/// Schema generation written by this build.
/// 1 = legacy layout (TEXT ids, `short_desc` column), 2 = INTEGER ids.
pub const SCHEMA_VERSION: i64 = 2;

const TABLE: &str = "scraped_jobs";
const LEGACY_TABLE: &str = "scraped_jobs_legacy";

const POSTING_COLUMNS: &str = "ID, title, employer, location, contact, phone, \
                               full_description, link, deadline, date_added, status";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store schema version {found} is newer than this build supports ({supported})")]
    UnsupportedVersion { found: i64, supported: i64 },
    #[error("migration from schema v{from} failed, legacy rows left untouched: {source}")]
    MigrationFailed {
        from: i64,
        #[source]
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaSetup {
    Created,
    UpToDate,
    Migrated { copied: usize, dropped: usize },
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening store at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // --- Schema ---

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    /// Brings the store to [`SCHEMA_VERSION`].
    ///
    /// Stores written before the version marker existed carry marker 0 and are
    /// treated as generation 1.
    pub fn setup(&self) -> Result<SchemaSetup, StoreError> {
        let version = self.schema_version()?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version == SCHEMA_VERSION {
            return Ok(SchemaSetup::UpToDate);
        }

        if !self.table_exists(TABLE)? {
            let tx = self.conn.unchecked_transaction()?;
            create_current_table(&tx)?;
            create_indexes(&tx)?;
            tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
            tx.commit()?;
            info!(version = SCHEMA_VERSION, "created posting store");
            return Ok(SchemaSetup::Created);
        }

        warn!(from = version.max(1), to = SCHEMA_VERSION, "legacy store layout, migrating");
        let (copied, dropped) = self
            .migrate_legacy()
            .map_err(|source| StoreError::MigrationFailed {
                from: version.max(1),
                source,
            })?;
        if dropped > 0 {
            warn!(dropped, "legacy rows without a numeric id were not carried over");
        }
        info!(copied, "store migration complete");
        Ok(SchemaSetup::Migrated { copied, dropped })
    }

    /// Runs the whole v1 -> v2 step in one transaction. Returning early drops the
    /// transaction, which rolls back the rename as well.
    fn migrate_legacy(&self) -> rusqlite::Result<(usize, usize)> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute_batch(&format!("ALTER TABLE {TABLE} RENAME TO {LEGACY_TABLE}"))?;
        create_current_table(&tx)?;

        let total: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {LEGACY_TABLE}"), [], |row| {
            row.get(0)
        })?;

        // CAST('abc' AS INTEGER) is 0 in SQLite, so only digit strings and
        // whole-number decimals such as '123.0' are cast; anything else is dropped.
        let copied = tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {TABLE} ({POSTING_COLUMNS})
                 SELECT CAST(raw_id AS INTEGER),
                        COALESCE(title, ''), COALESCE(employer, ''), COALESCE(location, ''),
                        COALESCE(contact, ''), COALESCE(phone, ''),
                        COALESCE(full_description, ''), COALESCE(link, ''),
                        COALESCE(deadline, ''), COALESCE(date_added, date('now')),
                        COALESCE(NULLIF(TRIM(status), ''), ?1)
                 FROM (SELECT *, rowid AS legacy_rowid, TRIM(CAST(ID AS TEXT)) AS raw_id
                       FROM {LEGACY_TABLE})
                 WHERE raw_id GLOB '[0-9]*'
                   AND (raw_id NOT GLOB '*[^0-9]*'
                        OR (raw_id NOT GLOB '*[^0-9.]*'
                            AND raw_id NOT GLOB '*.*.*'
                            AND CAST(raw_id AS REAL) = CAST(raw_id AS INTEGER)))
                 ORDER BY legacy_rowid"
            ),
            [Status::NotSearched.label()],
        )?;

        let reset = normalize_statuses(&tx)?;
        if reset > 0 {
            warn!(reset, "legacy rows with an unknown status were migrated as not searched");
        }

        // The index goes on after the drop so a same-named index on the legacy
        // table cannot shadow it.
        tx.execute_batch(&format!("DROP TABLE {LEGACY_TABLE}"))?;
        create_indexes(&tx)?;
        tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        tx.commit()?;

        let dropped = (total as usize).saturating_sub(copied);
        Ok((copied, dropped))
    }

    fn table_exists(&self, name: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // --- Posting operations ---

    pub fn exists(&self, id: PostingId) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {TABLE} WHERE ID = ?1"),
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn all_ids(&self) -> Result<HashSet<PostingId>> {
        let mut stmt = self.conn.prepare(&format!("SELECT ID FROM {TABLE}"))?;
        let ids = stmt.query_map([], |row| row.get::<_, PostingId>(0))?;
        ids.collect::<Result<HashSet<_>, _>>()
            .context("Failed to read posting ids")
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Inserts the posting unless its id is already stored. Returns whether a row
    /// was written; an existing row is never touched.
    pub fn insert_if_absent(&self, posting: &Posting) -> Result<bool> {
        let changed = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {TABLE} ({POSTING_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                posting.id,
                posting.title,
                posting.employer,
                posting.location,
                posting.contact,
                posting.phone,
                posting.description,
                posting.link,
                posting.deadline,
                posting.date_added,
                posting.status,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn get(&self, id: PostingId) -> Result<Option<Posting>> {
        let result = self.conn.query_row(
            &format!("SELECT {POSTING_COLUMNS} FROM {TABLE} WHERE ID = ?1"),
            [id],
            Self::row_to_posting,
        );
        match result {
            Ok(posting) => Ok(Some(posting)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored posting, newest first.
    pub fn all(&self) -> Result<Vec<Posting>> {
        self.list(None)
    }

    pub fn list(&self, status: Option<Status>) -> Result<Vec<Posting>> {
        let mut sql = format!("SELECT {POSTING_COLUMNS} FROM {TABLE}");
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY date_added DESC, ID DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s], Self::row_to_posting)?
        } else {
            stmt.query_map([], Self::row_to_posting)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list postings")
    }

    pub fn update_status(&self, id: PostingId, status: Status) -> Result<bool> {
        let changed = self.conn.execute(
            &format!("UPDATE {TABLE} SET status = ?1 WHERE ID = ?2"),
            params![status, id],
        )?;
        Ok(changed == 1)
    }

    /// `(id, deadline)` of every posting nobody has acted on yet.
    pub fn not_searched_deadlines(&self) -> Result<Vec<(PostingId, String)>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT ID, deadline FROM {TABLE} WHERE status = ?1"))?;
        let rows = stmt.query_map([Status::NotSearched], |row| {
            Ok((row.get::<_, PostingId>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read deadlines")
    }

    pub fn delete(&self, ids: &[PostingId]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {TABLE} WHERE ID = ?1"))?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<Posting> {
        Ok(Posting {
            id: row.get(0)?,
            title: row.get(1)?,
            employer: row.get(2)?,
            location: row.get(3)?,
            contact: row.get(4)?,
            phone: row.get(5)?,
            description: row.get(6)?,
            link: row.get(7)?,
            deadline: row.get(8)?,
            date_added: row.get(9)?,
            status: row.get(10)?,
        })
    }
}

fn create_current_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE {TABLE} (
            ID INTEGER PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            employer TEXT NOT NULL DEFAULT '',
            full_description TEXT NOT NULL DEFAULT '',
            date_added TEXT NOT NULL,
            deadline TEXT NOT NULL DEFAULT '',
            location TEXT NOT NULL DEFAULT '',
            contact TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            link TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'Not searched'
        );
        "#
    ))
}

/// Rewrites every status to its exact label so reads and status filters see
/// it. Unknown text becomes "Not searched". Returns how many rows were reset.
fn normalize_statuses(conn: &Connection) -> rusqlite::Result<usize> {
    let stored: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(&format!("SELECT ID, status FROM {TABLE}"))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut reset = 0;
    let mut update = conn.prepare(&format!("UPDATE {TABLE} SET status = ?1 WHERE ID = ?2"))?;
    for (id, text) in stored {
        let status = text.parse::<Status>().unwrap_or_else(|_| {
            warn!(id, status = %text, "unknown legacy status, migrating as not searched");
            reset += 1;
            Status::NotSearched
        });
        if status.label() != text {
            update.execute(params![status, id])?;
        }
    }
    Ok(reset)
}

fn create_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{TABLE}_status ON {TABLE}(status);"
    ))
}

// --- SQL conversions ---

impl ToSql for PostingId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.get()))
    }
}

impl FromSql for PostingId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(PostingId::new)
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.label()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse::<Status>()
            .map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}
