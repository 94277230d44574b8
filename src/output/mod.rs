//! Output module for reporting cached word aggregates
//!
//! This module handles:
//! - Summarizing the cache for the `--stats` mode
//! - Printing a thread's top words for the one-shot `--link` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, print_top_words, CacheStatistics, DocumentSummary};
