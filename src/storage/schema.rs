//! Database schema definitions
//!
//! A word document is one row in `word_documents` plus one row per distinct
//! word in `word_counts`, so merging counts is a per-row increment.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One cached aggregate per thread
CREATE TABLE IF NOT EXISTS word_documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scid TEXT UNIQUE,
    last_updated TEXT NOT NULL
);

-- Word frequencies per document
CREATE TABLE IF NOT EXISTS word_counts (
    document_id INTEGER NOT NULL REFERENCES word_documents(id) ON DELETE CASCADE,
    word TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (document_id, word)
);

CREATE INDEX IF NOT EXISTS idx_word_documents_updated ON word_documents(last_updated);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
