//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlState`: Lifecycle of one thread crawl
//! - `CrawlJob`: Progress counters and cancellation for one running crawl
//! - `JobRegistry`: At most one running crawl per thread key, plus status lookup

mod crawl_state;
mod job;

// Re-export main types
pub use crawl_state::CrawlState;
pub use job::{CrawlJob, JobRegistry, JobSnapshot};
