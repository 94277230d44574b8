use crate::config::types::{Config, CredentialsConfig};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variables that override `[credentials]` fields
const ENV_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
const ENV_USERNAME: &str = "REDDIT_USERNAME";
const ENV_PASSWORD: &str = "REDDIT_PASSWORD";

/// Loads and parses a configuration file from the given path
///
/// Credentials found in the `REDDIT_*` environment variables override the
/// `[credentials]` section before validation.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use thread_wordcloud::config::load_config;
///
/// let config = load_config(Path::new("wordcloud.toml")).unwrap();
/// println!("Requests per second: {}", config.reddit.requests_per_second);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Parses configuration from a TOML string without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overrides credential fields from the environment
///
/// `lookup` abstracts `std::env::var` so the override rules can be tested
/// without touching the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let overrides = [
        ENV_CLIENT_ID,
        ENV_CLIENT_SECRET,
        ENV_USERNAME,
        ENV_PASSWORD,
    ]
    .map(|key| lookup(key).filter(|v| !v.is_empty()));

    if overrides.iter().all(Option::is_none) {
        return;
    }

    let credentials = config
        .credentials
        .get_or_insert_with(CredentialsConfig::default);
    let [client_id, client_secret, username, password] = overrides;

    if let Some(v) = client_id {
        credentials.client_id = v;
    }
    if let Some(v) = client_secret {
        credentials.client_secret = v;
    }
    if let Some(v) = username {
        credentials.username = v;
    }
    if let Some(v) = password {
        credentials.password = v;
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so operators can tell which configuration a running
/// server was started with.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
