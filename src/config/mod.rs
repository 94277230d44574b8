//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use thread_wordcloud::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("wordcloud.toml")).unwrap();
//! println!("Serving on {}", config.server.bind);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, CredentialsConfig, RedditConfig, ServerConfig, StorageBackend,
    StorageConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
};
pub use validation::{validate, MAX_JOB_RETENTION_SECS};
