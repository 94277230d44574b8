//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Repository trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Repository, StorageError, StorageResult};
use crate::storage::{format_timestamp, parse_timestamp, WordDocument};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
///
/// The connection sits behind a mutex so the repository can be shared across
/// crawl tasks; every upsert runs as one transaction while holding it.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteRepository)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }
}

/// Reads the words of one document
fn load_words(conn: &Connection, document_id: i64) -> StorageResult<HashMap<String, u64>> {
    let mut stmt = conn.prepare("SELECT word, count FROM word_counts WHERE document_id = ?1")?;
    let rows = stmt.query_map(params![document_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut words = HashMap::new();
    for row in rows {
        let (word, count) = row?;
        words.insert(word, count.max(0) as u64);
    }
    Ok(words)
}

/// Adds `words` onto the counts of `document_id`
fn increment_words(
    tx: &Transaction<'_>,
    document_id: i64,
    words: &HashMap<String, u64>,
) -> StorageResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO word_counts (document_id, word, count) VALUES (?1, ?2, ?3)
         ON CONFLICT(document_id, word) DO UPDATE SET count = count + excluded.count",
    )?;
    for (word, count) in words {
        stmt.execute(params![document_id, word, *count as i64])?;
    }
    Ok(())
}

fn row_to_document(
    conn: &Connection,
    id: i64,
    scid: Option<String>,
    last_updated: String,
) -> StorageResult<WordDocument> {
    Ok(WordDocument {
        id,
        scid,
        words: load_words(conn, id)?,
        last_updated: parse_timestamp(&last_updated)?,
    })
}

impl Repository for SqliteRepository {
    fn get_by_key(&self, key: &str) -> StorageResult<Option<WordDocument>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT id, scid, last_updated FROM word_documents WHERE scid = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, scid, last_updated)) => {
                Ok(Some(row_to_document(&conn, id, scid, last_updated)?))
            }
            None => Ok(None),
        }
    }

    fn insert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<WordDocument> {
        let mut conn = self.conn()?;
        let now = Utc::now();

        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO word_documents (scid, last_updated) VALUES (?1, ?2)",
            params![key, format_timestamp(&now)],
        );

        if let Err(rusqlite::Error::SqliteFailure(err, _)) = &inserted {
            if err.code == ErrorCode::ConstraintViolation {
                return Err(StorageError::ConstraintViolation(format!(
                    "document for {} already exists",
                    key
                )));
            }
        }
        inserted?;

        let id = tx.last_insert_rowid();
        increment_words(&tx, id, words)?;
        tx.commit()?;

        Ok(WordDocument {
            id,
            scid: Some(key.to_string()),
            words: words.clone(),
            last_updated: now,
        })
    }

    fn upsert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let now = format_timestamp(&Utc::now());

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO word_documents (scid, last_updated) VALUES (?1, ?2)
             ON CONFLICT(scid) DO UPDATE SET last_updated = excluded.last_updated",
            params![key, now],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM word_documents WHERE scid = ?1",
            params![key],
            |row| row.get(0),
        )?;
        increment_words(&tx, id, words)?;
        tx.commit()?;

        Ok(())
    }

    fn mark_stale(&self, key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE word_documents SET last_updated = ?1 WHERE scid = ?2",
            params![format_timestamp(&DateTime::<Utc>::UNIX_EPOCH), key],
        )?;
        Ok(())
    }

    fn list_documents(&self) -> StorageResult<Vec<WordDocument>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, scid, last_updated FROM word_documents ORDER BY last_updated DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, scid, last_updated)| row_to_document(&conn, id, scid, last_updated))
            .collect()
    }

    fn count_documents(&self) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM word_documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
