/// Crawl job state definitions
///
/// This module defines the states a thread crawl moves through.
use serde::Serialize;
use std::fmt;

/// Represents the current state of one thread crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    /// Branches are still being expanded
    Running,

    /// Every root branch finished; some may have logged failures
    Completed,

    /// The crawl could not start or every root branch failed
    Failed,

    /// Cancelled by shutdown or by the crawl timeout
    Cancelled,
}

impl CrawlState {
    /// Returns true if the crawl will make no further progress
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
