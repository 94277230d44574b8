use crate::config::types::{
    Config, CrawlerConfig, CredentialsConfig, RedditConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
use crate::ConfigError;
use std::net::SocketAddr;
use url::Url;

/// Upstream cap on ids per morechildren call
const MAX_CHUNK_SIZE: u32 = 100;

/// Longest time a finished crawl's status is kept (30 days)
pub const MAX_JOB_RETENTION_SECS: u64 = 30 * 24 * 3600;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_reddit_config(&config.reddit)?;
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;
    if let Some(credentials) = &config.credentials {
        validate_credentials(credentials)?;
    }
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    config.bind.parse::<SocketAddr>().map_err(|e| {
        ConfigError::Validation(format!("bind must be host:port, got '{}': {}", config.bind, e))
    })?;
    Ok(())
}

/// Validates upstream API configuration
fn validate_reddit_config(config: &RedditConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("oauth-base-url", &config.oauth_base_url),
        ("readonly-base-url", &config.readonly_base_url),
        ("token-url", &config.token_url),
    ] {
        validate_http_url(name, value)?;
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.requests_per_second < 1 || config.requests_per_second > 100 {
        return Err(ConfigError::Validation(format!(
            "requests-per-second must be between 1 and 100, got {}",
            config.requests_per_second
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates crawl behavior configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_requests < 1 || config.max_concurrent_requests > 256 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-requests must be between 1 and 256, got {}",
            config.max_concurrent_requests
        )));
    }

    if config.max_fanout < 1 {
        return Err(ConfigError::Validation(
            "max-fanout must be >= 1".to_string(),
        ));
    }

    if config.chunk_size < 1 || config.chunk_size > MAX_CHUNK_SIZE {
        return Err(ConfigError::Validation(format!(
            "chunk-size must be between 1 and {}, got {}",
            MAX_CHUNK_SIZE, config.chunk_size
        )));
    }

    if config.job_retention_secs > MAX_JOB_RETENTION_SECS {
        return Err(ConfigError::Validation(format!(
            "job-retention-secs must be <= {}, got {}",
            MAX_JOB_RETENTION_SECS, config.job_retention_secs
        )));
    }

    if config.crawl_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "crawl-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.backend == StorageBackend::Sqlite && config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty for the sqlite backend".to_string(),
        ));
    }
    Ok(())
}

fn validate_credentials(config: &CredentialsConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("client-id", &config.client_id),
        ("client-secret", &config.client_secret),
        ("username", &config.username),
        ("password", &config.password),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!(
                "credentials.{} cannot be empty",
                name
            )));
        }
    }
    Ok(())
}

/// Validates that a URL parses and uses HTTP or HTTPS
fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url =
        Url::parse(value).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", name, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got {}",
            name,
            url.scheme()
        )));
    }

    Ok(())
}
