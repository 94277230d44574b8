//! Statistics generation from the word cache
//!
//! This module provides functionality for extracting and displaying
//! cache statistics from the storage layer.

use crate::storage::{Repository, StorageResult};
use crate::words::top_words;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Words listed per document
const TOP_WORDS_PER_DOCUMENT: usize = 5;

/// Summary of one cached thread
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub key: String,
    pub last_updated: DateTime<Utc>,
    pub distinct_words: usize,
    pub total_words: u64,
    pub top_words: Vec<(String, u64)>,
}

/// Cache statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatistics {
    /// Number of cached threads
    pub total_documents: u64,

    /// Distinct words across every document
    pub distinct_words: u64,

    /// Sum of all word counts
    pub total_occurrences: u64,

    /// Documents, most recently updated first
    pub documents: Vec<DocumentSummary>,
}

/// Loads statistics from the repository
///
/// # Arguments
///
/// * `repository` - The cache to query
///
/// # Returns
///
/// * `Ok(CacheStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query the cache
pub fn load_statistics(repository: &dyn Repository) -> StorageResult<CacheStatistics> {
    let total_documents = repository.count_documents()?;
    let documents = repository.list_documents()?;

    let mut vocabulary: HashSet<&str> = HashSet::new();
    let mut total_occurrences = 0;
    let mut summaries = Vec::with_capacity(documents.len());

    for doc in &documents {
        let total_words: u64 = doc.words.values().sum();
        total_occurrences += total_words;
        vocabulary.extend(doc.words.keys().map(String::as_str));

        summaries.push(DocumentSummary {
            key: doc.scid.clone().unwrap_or_else(|| format!("#{}", doc.id)),
            last_updated: doc.last_updated,
            distinct_words: doc.words.len(),
            total_words,
            top_words: top_words(&doc.words, TOP_WORDS_PER_DOCUMENT),
        });
    }

    Ok(CacheStatistics {
        total_documents,
        distinct_words: vocabulary.len() as u64,
        total_occurrences,
        documents: summaries,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CacheStatistics) {
    println!("=== Word Cache Statistics ===\n");

    println!("Overview:");
    println!("  Cached threads: {}", stats.total_documents);
    println!("  Distinct words: {}", stats.distinct_words);
    println!("  Total occurrences: {}", stats.total_occurrences);
    println!();

    if stats.documents.is_empty() {
        return;
    }

    println!("Threads:");
    for doc in &stats.documents {
        println!(
            "  {} (updated {}, {} words, {} distinct)",
            doc.key,
            doc.last_updated.format("%Y-%m-%d %H:%M"),
            doc.total_words,
            doc.distinct_words
        );
        if !doc.top_words.is_empty() {
            let top: Vec<String> = doc
                .top_words
                .iter()
                .map(|(word, count)| format!("{} ({})", word, count))
                .collect();
            println!("    top: {}", top.join(", "));
        }
    }
}

/// Prints the `n` most frequent words of one thread
pub fn print_top_words(thread: &str, words: &std::collections::HashMap<String, u64>, n: usize) {
    let total: u64 = words.values().sum();
    println!("=== {} ===", thread);
    println!("{} words, {} distinct\n", total, words.len());

    for (rank, (word, count)) in top_words(words, n).into_iter().enumerate() {
        println!("{:>4}. {:<24} {}", rank + 1, word, count);
    }
}
