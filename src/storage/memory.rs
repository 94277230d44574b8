//! In-memory storage implementation

use crate::storage::traits::{Repository, StorageError, StorageResult};
use crate::storage::WordDocument;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Repository holding documents in a process-local map
///
/// Every operation runs under one lock, which makes upserts atomic per key.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    documents: HashMap<String, WordDocument>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StorageResult<MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Database("memory store mutex poisoned".to_string()))
    }
}

impl Repository for MemoryRepository {
    fn get_by_key(&self, key: &str) -> StorageResult<Option<WordDocument>> {
        Ok(self.state()?.documents.get(key).cloned())
    }

    fn insert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<WordDocument> {
        let mut state = self.state()?;
        if state.documents.contains_key(key) {
            return Err(StorageError::ConstraintViolation(format!(
                "document for {} already exists",
                key
            )));
        }

        let document = WordDocument {
            id: state.allocate_id(),
            scid: Some(key.to_string()),
            words: words.clone(),
            last_updated: Utc::now(),
        };
        state.documents.insert(key.to_string(), document.clone());
        Ok(document)
    }

    fn upsert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<()> {
        let mut state = self.state()?;

        if !state.documents.contains_key(key) {
            let id = state.allocate_id();
            state.documents.insert(
                key.to_string(),
                WordDocument {
                    id,
                    scid: Some(key.to_string()),
                    words: HashMap::new(),
                    last_updated: Utc::now(),
                },
            );
        }

        if let Some(document) = state.documents.get_mut(key) {
            for (word, count) in words {
                *document.words.entry(word.clone()).or_insert(0) += count;
            }
            document.last_updated = Utc::now();
        }

        Ok(())
    }

    fn mark_stale(&self, key: &str) -> StorageResult<()> {
        if let Some(document) = self.state()?.documents.get_mut(key) {
            document.last_updated = DateTime::<Utc>::UNIX_EPOCH;
        }
        Ok(())
    }

    fn list_documents(&self) -> StorageResult<Vec<WordDocument>> {
        let mut documents: Vec<WordDocument> =
            self.state()?.documents.values().cloned().collect();
        documents.sort_by(|a, b| b.last_updated.cmp(&a.last_updated).then(b.id.cmp(&a.id)));
        Ok(documents)
    }

    fn count_documents(&self) -> StorageResult<u64> {
        Ok(self.state()?.documents.len() as u64)
    }
}
