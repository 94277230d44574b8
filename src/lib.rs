//! Thread Wordcloud: word frequencies for discussion threads
//!
//! This crate crawls a Reddit thread's full comment tree, including the
//! deferred "more comments" stubs, tallies the words of every comment body and
//! keeps the aggregate in a cache keyed by thread so repeated requests for the
//! same thread do not re-crawl it.

pub mod config;
pub mod crawler;
pub mod link;
pub mod output;
pub mod server;
pub mod state;
pub mod storage;
pub mod words;

use thiserror::Error;

/// Main error type for crawl and cache operations
#[derive(Debug, Error)]
pub enum WordCloudError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid link: {0}")]
    InvalidLink(#[from] LinkError),

    #[error("Not found upstream: {url}")]
    NotFound { url: String },

    #[error("Transient failure for {url} after {attempts} attempts: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Upstream returned HTTP {status} for {url}")]
    Upstream { url: String, status: u16 },

    #[error("Failed to decode {context}: {message}")]
    Decode { context: String, message: String },

    #[error("Cache error: {0}")]
    Cache(#[from] storage::StorageError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WordCloudError {
    /// Builds a decode error for the given payload description
    pub fn decode(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Thread link parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("expected at least 7 '/'-separated segments, got {0}")]
    TooFewSegments(usize),

    #[error("missing {0}")]
    MissingSegment(&'static str),

    #[error("expected a 'comments' segment, got '{0}'")]
    NotACommentsLink(String),
}

/// Result type alias for crawl and cache operations
pub type Result<T> = std::result::Result<T, WordCloudError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for link parsing
pub type LinkResult<T> = std::result::Result<T, LinkError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, ThreadWords, WordsSource};
pub use link::{parse_link, ThreadLink};
pub use storage::{Repository, WordDocument};
pub use words::{normalize, WordCount};
