//! Crawler module for comment tree expansion
//!
//! This module contains the core crawling logic, including:
//! - Request scheduling and rate limiting
//! - OAuth token handling and the retrying API client
//! - Decoding of comment tree payloads
//! - Recursive tree traversal and word tallying
//! - Request-level coordination with the cache

mod auth;
mod coordinator;
mod fetcher;
mod scheduler;
mod traversal;
pub mod tree;

pub use auth::TokenProvider;
pub use coordinator::{Coordinator, ThreadWords, WordsSource};
pub use fetcher::{build_http_client, is_not_found_sentinel, ApiClient};
pub use scheduler::{RateLimiter, RequestPermit, Scheduler};
pub use traversal::{CrawlContext, Crawler};
pub use tree::{chunk_ids, TreeNode};
