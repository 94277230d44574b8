use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub reddit: RedditConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

/// Inbound HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (host:port)
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    /// Base URL for authenticated calls (morechildren, article)
    #[serde(rename = "oauth-base-url", default = "default_oauth_base_url")]
    pub oauth_base_url: String,

    /// Base URL used for the same calls when no credentials are configured
    #[serde(rename = "readonly-base-url", default = "default_readonly_base_url")]
    pub readonly_base_url: String,

    /// OAuth access token endpoint
    #[serde(rename = "token-url", default = "default_token_url")]
    pub token_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Sustained outbound request rate shared by all crawls
    #[serde(rename = "requests-per-second", default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff (milliseconds), doubled per attempt
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of upstream requests in flight at once
    #[serde(rename = "max-concurrent-requests", default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    /// Maximum number of sibling nodes expanded concurrently per node
    #[serde(rename = "max-fanout", default = "default_max_fanout")]
    pub max_fanout: u32,

    /// Stub ids resolved per morechildren call
    #[serde(rename = "chunk-size", default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Days a cached aggregate is served without re-crawling
    #[serde(rename = "freshness-days", default = "default_freshness_days")]
    pub freshness_days: u32,

    /// Upper bound on one thread's crawl before it is cancelled (seconds)
    #[serde(rename = "crawl-timeout-secs", default = "default_crawl_timeout_secs")]
    pub crawl_timeout_secs: u64,

    /// How long a finished crawl's status stays queryable (seconds)
    #[serde(rename = "job-retention-secs", default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            max_fanout: default_max_fanout(),
            chunk_size: default_chunk_size(),
            freshness_days: default_freshness_days(),
            crawl_timeout_secs: default_crawl_timeout_secs(),
            job_retention_secs: default_job_retention_secs(),
        }
    }
}

/// Cache storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path to the SQLite database file (sqlite backend)
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,
}

/// Available cache backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// OAuth script-app credentials
#[derive(Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(rename = "client-id")]
    pub client_id: String,

    #[serde(rename = "client-secret")]
    pub client_secret: String,

    pub username: String,

    pub password: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_oauth_base_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_readonly_base_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_token_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_concurrent_requests() -> u32 {
    8
}

fn default_max_fanout() -> u32 {
    32
}

fn default_chunk_size() -> u32 {
    100
}

fn default_freshness_days() -> u32 {
    7
}

fn default_crawl_timeout_secs() -> u64 {
    900
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_database_path() -> String {
    "./wordcloud.db".to_string()
}
