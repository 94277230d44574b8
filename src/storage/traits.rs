//! Repository trait and error types
//!
//! This module defines the interface the crawler uses to read and update cached
//! word documents, and the errors a backend can report.

use crate::storage::WordDocument;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid timestamp '{value}': {message}")]
    Timestamp { value: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Cache of word documents keyed by thread key
///
/// Implementations are shared between every branch of every running crawl,
/// so all methods take `&self` and must be safe to call concurrently. Calls
/// may block on I/O; async callers should run them on the blocking pool.
pub trait Repository: Send + Sync {
    /// Gets the document for a thread key, if one exists
    fn get_by_key(&self, key: &str) -> StorageResult<Option<WordDocument>>;

    /// Inserts a new document for `key`
    ///
    /// # Returns
    ///
    /// * `Ok(WordDocument)` - The stored document
    /// * `Err(StorageError::ConstraintViolation)` - A document for `key` exists
    fn insert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<WordDocument>;

    /// Adds `words` to the document for `key` and refreshes its timestamp
    ///
    /// The read-merge-write is atomic per key: concurrent upserts for the same
    /// key never lose counts. A missing document is created.
    fn upsert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<()>;

    /// Moves the document's timestamp outside any freshness window
    ///
    /// Counts are kept; the next request re-crawls and merges into them.
    /// Does nothing when no document exists for `key`.
    fn mark_stale(&self, key: &str) -> StorageResult<()>;

    /// Lists all documents, most recently updated first
    fn list_documents(&self) -> StorageResult<Vec<WordDocument>>;

    /// Counts stored documents
    fn count_documents(&self) -> StorageResult<u64>;
}
