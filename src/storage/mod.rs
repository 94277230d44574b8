//! Storage module for cached word documents
//!
//! This module handles persistence of per-thread word aggregates:
//! - The [`Repository`] interface used by the crawler
//! - A SQLite backend with atomic per-word increments
//! - An in-memory backend for tests and ephemeral deployments
//! - The freshness rule deciding when a cached aggregate can be reused

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::{Repository, StorageError, StorageResult};

use crate::config::{StorageBackend, StorageConfig};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Persisted word aggregate for one thread
#[derive(Debug, Clone, PartialEq)]
pub struct WordDocument {
    pub id: i64,

    /// Thread key (`<subreddit>/comments/<id>`)
    pub scid: Option<String>,

    pub words: HashMap<String, u64>,

    pub last_updated: DateTime<Utc>,
}

impl WordDocument {
    /// Returns true if the document may be served without re-crawling
    ///
    /// The window is inclusive: a document exactly `window` old is fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        is_fresh(self.last_updated, now, window)
    }
}

/// Returns true if `now - last_updated <= window`
pub fn is_fresh(last_updated: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - last_updated <= window
}

/// Opens the repository selected by the configuration
///
/// # Arguments
///
/// * `config` - The storage configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn Repository>)` - Ready-to-share repository
/// * `Err(StorageError)` - Failed to open the backend
pub fn open_repository(config: &StorageConfig) -> StorageResult<Arc<dyn Repository>> {
    match config.backend {
        StorageBackend::Sqlite => {
            tracing::info!("Opening SQLite cache at {}", config.database_path);
            Ok(Arc::new(SqliteRepository::new(Path::new(
                &config.database_path,
            ))?))
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory cache");
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

/// Formats a timestamp for storage (fixed width so text order is time order)
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp
pub(crate) fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::Timestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}
