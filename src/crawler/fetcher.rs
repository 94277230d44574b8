//! Upstream API client
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent and timeouts
//! - Bearer authentication for the OAuth host
//! - Rate limiting through the shared [`Scheduler`]
//! - Retry logic for transient failures
//! - Error classification

use crate::config::{Config, RedditConfig};
use crate::crawler::auth::TokenProvider;
use crate::crawler::scheduler::Scheduler;
use crate::crawler::tree::{decode_article, decode_more_children, decode_thread, TreeNode};
use crate::link::ThreadLink;
use crate::{Result, WordCloudError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The upstream API configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &RedditConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Body some endpoints return with HTTP 200 for a missing thread
#[derive(Debug, Deserialize)]
struct NotFoundBody {
    message: Option<String>,
    error: Option<u16>,
}

/// Returns true if `body` is the upstream "not found" sentinel
pub fn is_not_found_sentinel(body: &[u8]) -> bool {
    serde_json::from_slice::<NotFoundBody>(body)
        .map(|b| b.error == Some(404) && b.message.as_deref() == Some("Not Found"))
        .unwrap_or(false)
}

/// What to do after one attempt
enum Attempt {
    Done(Vec<u8>),
    Retry(String),
    Reauthenticate,
}

/// Client for the three upstream endpoints the crawler uses
///
/// Thread listings go to the host the thread was linked from without
/// authentication. `morechildren` and article lookups go to the OAuth host
/// with a bearer token, or to the read-only host when no credentials exist.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    scheduler: Arc<Scheduler>,
    tokens: Option<TokenProvider>,
    api_base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl ApiClient {
    /// Creates a client from the application configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The application configuration
    /// * `scheduler` - The process-wide request scheduler
    pub fn new(config: &Config, scheduler: Arc<Scheduler>) -> Result<Self> {
        let http = build_http_client(&config.reddit)?;

        let (tokens, api_base_url) = match &config.credentials {
            Some(credentials) => (
                Some(TokenProvider::new(
                    http.clone(),
                    config.reddit.token_url.clone(),
                    credentials.clone(),
                )),
                config.reddit.oauth_base_url.clone(),
            ),
            None => {
                tracing::warn!(
                    "No API credentials configured, using {} without authentication",
                    config.reddit.readonly_base_url
                );
                (None, config.reddit.readonly_base_url.clone())
            }
        };

        Ok(Self {
            http,
            scheduler,
            tokens,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            max_retries: config.reddit.max_retries,
            retry_backoff: Duration::from_millis(config.reddit.retry_backoff_ms),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    /// Fetches a thread's listing (`GET {thread}.json`)
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<TreeNode>)` - The root nodes (article listing, comment listing)
    /// * `Err(WordCloudError::NotFound)` - The thread does not exist
    pub async fn fetch_thread(
        &self,
        link: &ThreadLink,
        token: &CancellationToken,
    ) -> Result<Vec<TreeNode>> {
        let body = self.get(&link.listing_url(), &[], false, token).await?;
        decode_thread(&body)
    }

    /// Resolves up to one chunk of stub ids into comment nodes
    pub async fn fetch_more_children(
        &self,
        link: &ThreadLink,
        ids: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<TreeNode>> {
        let url = format!("{}/api/morechildren", self.api_base_url);
        let query = [
            ("link_id", link.fullname()),
            ("children", ids.join(",")),
            ("api_type", "json".to_string()),
        ];

        let body = self.get(&url, &query, true, token).await?;
        decode_more_children(&body)
    }

    /// Fetches the subtree below one comment
    ///
    /// Used for stubs that carry no child ids, which the upstream emits when
    /// a reply chain is deeper than it will inline.
    pub async fn fetch_comment_article(
        &self,
        link: &ThreadLink,
        comment_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<TreeNode>> {
        let url = format!(
            "{}/{}/comments/article",
            self.api_base_url, link.subreddit_path
        );
        let query = [
            ("article", link.thread_id.clone()),
            ("comment", comment_id.to_string()),
        ];

        let body = self.get(&url, &query, true, token).await?;
        decode_article(&body)
    }

    /// Sends a GET with rate limiting, retries and error classification
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 404 or sentinel body | Immediate → NotFound |
    /// | HTTP 401 (authenticated) | Refresh token, retry once |
    /// | HTTP 429, HTTP 5xx | Retry with backoff |
    /// | Timeout, connection error | Retry with backoff |
    /// | Other non-2xx | Immediate → Upstream |
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        authenticate: bool,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut attempts = 0u32;
        let mut reauthenticated = false;

        loop {
            attempts += 1;

            match self.attempt(url, query, authenticate, token).await? {
                Attempt::Done(body) => return Ok(body),
                Attempt::Reauthenticate if !reauthenticated => {
                    if let Some(tokens) = &self.tokens {
                        tokens.invalidate().await;
                    }
                    reauthenticated = true;
                    attempts -= 1;
                    tracing::debug!("Token rejected for {}, refreshing", url);
                }
                Attempt::Reauthenticate => {
                    return Err(WordCloudError::Auth(format!(
                        "token rejected twice for {}",
                        url
                    )));
                }
                Attempt::Retry(message) => {
                    if attempts > self.max_retries {
                        return Err(WordCloudError::Transient {
                            url: url.to_string(),
                            attempts,
                            message,
                        });
                    }

                    let delay = self.retry_backoff * 2u32.saturating_pow(attempts - 1);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempts,
                        url,
                        message,
                        delay
                    );

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(WordCloudError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(&str, String)],
        authenticate: bool,
        token: &CancellationToken,
    ) -> Result<Attempt> {
        let _permit = self.scheduler.acquire(token).await?;

        let mut request = self.http.get(url).query(query);
        if authenticate {
            if let Some(tokens) = &self.tokens {
                request = request.bearer_auth(tokens.bearer().await?);
            }
        }

        tracing::debug!("GET {}", url);
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WordCloudError::Cancelled),
            sent = request.send() => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => return Ok(Attempt::Retry(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(WordCloudError::NotFound {
                url: url.to_string(),
            });
        }
        if status == StatusCode::UNAUTHORIZED && authenticate && self.tokens.is_some() {
            return Ok(Attempt::Reauthenticate);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Ok(Attempt::Retry(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(WordCloudError::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Ok(Attempt::Retry(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        if is_not_found_sentinel(&body) {
            return Err(WordCloudError::NotFound {
                url: url.to_string(),
            });
        }

        Ok(Attempt::Done(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrawlerConfig, CredentialsConfig, ServerConfig, StorageConfig};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, credentials: Option<CredentialsConfig>) -> Config {
        Config {
            server: ServerConfig::default(),
            reddit: RedditConfig {
                oauth_base_url: base_url.to_string(),
                readonly_base_url: base_url.to_string(),
                token_url: format!("{}/api/v1/access_token", base_url),
                user_agent: "wordcloud-test/1.0".to_string(),
                requests_per_second: 100,
                request_timeout_secs: 5,
                max_retries: 2,
                retry_backoff_ms: 1,
            },
            crawler: CrawlerConfig::default(),
            storage: StorageConfig {
                backend: crate::config::StorageBackend::Memory,
                database_path: String::new(),
            },
            credentials,
        }
    }

    fn client(config: &Config) -> ApiClient {
        ApiClient::new(config, Arc::new(Scheduler::new(100, 4))).unwrap()
    }

    fn link(server: &MockServer) -> ThreadLink {
        crate::parse_link(&format!("{}/r/test/comments/abc/title/", server.uri())).unwrap()
    }

    fn empty_thread() -> serde_json::Value {
        json!([{"kind": "Listing", "data": {"children": []}}])
    }

    #[test]
    fn test_build_http_client() {
        let config = test_config("http://localhost", None);
        assert!(build_http_client(&config.reddit).is_ok());
    }

    #[test]
    fn test_not_found_sentinel() {
        assert!(is_not_found_sentinel(br#"{"message": "Not Found", "error": 404}"#));
        assert!(!is_not_found_sentinel(br#"{"kind": "Listing", "data": {}}"#));
        assert!(!is_not_found_sentinel(b"[]"));
    }

    #[tokio::test]
    async fn test_fetch_thread_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/test/comments/abc.json"))
            .and(header("user-agent", "wordcloud-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_thread()))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let nodes = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/test/comments/abc.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/test/comments/abc.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_thread()))
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let result = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let result = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(WordCloudError::Transient { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_http_404_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let result = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WordCloudError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_sentinel_body_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": "Not Found", "error": 404})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let result = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WordCloudError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_forbidden_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let result = client(&config)
            .fetch_thread(&link(&server), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(WordCloudError::Upstream { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_more_children_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/morechildren"))
            .and(query_param("link_id", "t3_abc"))
            .and(query_param("children", "a,b,c"))
            .and(query_param("api_type", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"json": {"errors": [], "data": {"things": []}}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let config = test_config(&server.uri(), None);
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let nodes = client(&config)
            .fetch_more_children(&link(&server), &ids, &CancellationToken::new())
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_authenticated_article_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/test/comments/article"))
            .and(query_param("article", "abc"))
            .and(query_param("comment", "c1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_thread()))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = CredentialsConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let config = test_config(&server.uri(), Some(credentials));
        let client = client(&config);
        assert!(client.is_authenticated());

        let nodes = client
            .fetch_comment_article(&link(&server), "c1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_thread()))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();

        let config = test_config(&server.uri(), None);
        let result = client(&config).fetch_thread(&link(&server), &token).await;
        assert!(matches!(result, Err(WordCloudError::Cancelled)));
    }
}
