//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the upstream API and drive the
//! full request cycle: cache lookup, thread fetch, tree expansion, stub
//! resolution and persistence.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thread_wordcloud::config::{parse_config, Config};
use thread_wordcloud::state::CrawlState;
use thread_wordcloud::storage::{
    MemoryRepository, Repository, SqliteRepository, StorageResult, WordDocument,
};
use thread_wordcloud::{Coordinator, WordCloudError, WordsSource};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const THREAD_KEY: &str = "r/test/comments/abc";

/// Creates a test configuration pointing every upstream URL at `server`
fn create_test_config(server: &MockServer) -> Config {
    create_test_config_with_timeout(server, 30)
}

fn create_test_config_with_timeout(server: &MockServer, crawl_timeout_secs: u64) -> Config {
    parse_config(&format!(
        r#"
        [reddit]
        user-agent = "wordcloud-test/1.0"
        oauth-base-url = "{uri}"
        readonly-base-url = "{uri}"
        token-url = "{uri}/api/v1/access_token"
        requests-per-second = 100
        max-retries = 1
        retry-backoff-ms = 1

        [crawler]
        crawl-timeout-secs = {crawl_timeout_secs}

        [storage]
        backend = "memory"
        "#,
        uri = server.uri(),
        crawl_timeout_secs = crawl_timeout_secs
    ))
    .expect("test config should parse")
}

fn thread_link(server: &MockServer) -> String {
    format!("{}/r/test/comments/abc/a_thread_title/", server.uri())
}

fn comment(id: &str, body: &str, replies: Value) -> Value {
    json!({"kind": "t1", "data": {"id": id, "name": format!("t1_{}", id), "body": body, "ups": 1, "replies": replies}})
}

fn stub(ids: &[String], parent_id: &str) -> Value {
    json!({"kind": "more", "data": {"count": ids.len(), "children": ids, "parent_id": parent_id, "id": "_"}})
}

fn listing(children: Vec<Value>) -> Value {
    json!({"kind": "Listing", "data": {"children": children}})
}

/// Thread payload: the article listing, then the comment listing
fn thread(comments: Vec<Value>) -> Value {
    json!([
        listing(vec![json!({"kind": "t3", "data": {"id": "abc", "title": "A thread", "selftext": "ignored"}})]),
        listing(comments),
    ])
}

async fn mount_thread(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/r/test/comments/abc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn words(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
    pairs.iter().map(|(w, c)| (w.to_string(), *c)).collect()
}

/// Repository that counts the non-empty upserts it forwards
#[derive(Default)]
struct CountingRepository {
    inner: MemoryRepository,
    upserts: AtomicUsize,
}

impl CountingRepository {
    fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

impl Repository for CountingRepository {
    fn get_by_key(&self, key: &str) -> StorageResult<Option<WordDocument>> {
        self.inner.get_by_key(key)
    }

    fn insert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<WordDocument> {
        self.inner.insert(key, words)
    }

    fn upsert(&self, key: &str, words: &HashMap<String, u64>) -> StorageResult<()> {
        if !words.is_empty() {
            self.upserts.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.upsert(key, words)
    }

    fn mark_stale(&self, key: &str) -> StorageResult<()> {
        self.inner.mark_stale(key)
    }

    fn list_documents(&self) -> StorageResult<Vec<WordDocument>> {
        self.inner.list_documents()
    }

    fn count_documents(&self) -> StorageResult<u64> {
        self.inner.count_documents()
    }
}

/// Answers `morechildren` with one "resolved" comment per requested id
struct MoreChildrenResponder;

impl Respond for MoreChildrenResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ids: Vec<String> = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "children")
            .map(|(_, value)| value.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        let things: Vec<Value> = ids
            .iter()
            .map(|id| comment(id, "resolved", json!("")))
            .collect();

        ResponseTemplate::new(200)
            .set_body_json(json!({"json": {"errors": [], "data": {"things": things}}}))
    }
}

#[tokio::test]
async fn test_two_comments_aggregate_with_one_upsert() {
    let server = MockServer::start().await;
    mount_thread(
        &server,
        thread(vec![
            comment("c1", "Hello world", json!("")),
            comment("c2", "Hello again", json!("")),
        ]),
    )
    .await;

    let repository = Arc::new(CountingRepository::default());
    let coordinator = Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();

    let answer = coordinator
        .crawl_and_wait(&thread_link(&server))
        .await
        .unwrap();

    assert_eq!(answer.source, WordsSource::Crawled);
    assert_eq!(answer.link.thread_id, "abc");
    assert_eq!(
        answer.words,
        Some(words(&[("hello", 2), ("world", 1), ("again", 1)]))
    );
    assert_eq!(repository.upserts(), 1);

    let status = coordinator.job_status(&thread_link(&server)).unwrap().unwrap();
    assert_eq!(status.state, CrawlState::Completed);
}

#[tokio::test]
async fn test_stub_with_150_ids_uses_two_calls() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (0..150).map(|i| format!("m{}", i)).collect();
    mount_thread(
        &server,
        thread(vec![
            comment("c1", "Top comment", json!("")),
            stub(&ids, "t3_abc"),
        ]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/morechildren"))
        .and(query_param("link_id", "t3_abc"))
        .and(query_param("api_type", "json"))
        .respond_with(MoreChildrenResponder)
        .expect(2)
        .mount(&server)
        .await;

    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let coordinator = Coordinator::new(&create_test_config(&server), repository).unwrap();

    let answer = coordinator
        .crawl_and_wait(&thread_link(&server))
        .await
        .unwrap();
    let words = answer.words.unwrap();
    assert_eq!(words.get("resolved"), Some(&150));
    assert_eq!(words.get("top"), Some(&1));
    assert_eq!(words.get("comment"), Some(&1));

    let requests = server.received_requests().await.unwrap();
    let mut chunk_sizes: Vec<usize> = requests
        .iter()
        .filter(|r| r.url.path() == "/api/morechildren")
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(key, _)| key == "children")
                .map(|(_, value)| value.split(',').count())
        })
        .collect();
    chunk_sizes.sort_unstable();
    assert_eq!(chunk_sizes, vec![50, 100]);
}

#[tokio::test]
async fn test_continuation_stub_fetches_article() {
    let server = MockServer::start().await;
    mount_thread(
        &server,
        thread(vec![comment(
            "deep",
            "Parent text",
            listing(vec![stub(&[], "t1_deep")]),
        )]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/r/test/comments/article"))
        .and(query_param("article", "abc"))
        .and(query_param("comment", "deep"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(vec![json!({"kind": "t3", "data": {"id": "abc"}})]),
            listing(vec![comment(
                "deep",
                "Parent text",
                listing(vec![comment("child", "Hidden reply", json!(""))]),
            )]),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let coordinator = Coordinator::new(&create_test_config(&server), repository).unwrap();

    let answer = coordinator
        .crawl_and_wait(&thread_link(&server))
        .await
        .unwrap();

    // The focal comment appears in both payloads but is counted once
    assert_eq!(
        answer.words,
        Some(words(&[("parent", 1), ("text", 1), ("hidden", 1), ("reply", 1)]))
    );
}

#[tokio::test]
async fn test_fresh_cache_skips_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(thread(vec![])))
        .expect(0)
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::new());
    repository.insert(THREAD_KEY, &words(&[("cached", 3)])).unwrap();

    let coordinator = Coordinator::new(&create_test_config(&server), repository).unwrap();
    let answer = coordinator
        .thread_words(&thread_link(&server))
        .await
        .unwrap();

    assert_eq!(answer.source, WordsSource::Cache);
    assert_eq!(answer.words, Some(words(&[("cached", 3)])));
}

#[tokio::test]
async fn test_missing_thread_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/test/comments/abc.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "Not Found", "error": 404})),
        )
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::new());
    let coordinator =
        Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();

    let result = coordinator.thread_words(&thread_link(&server)).await;

    assert!(matches!(result, Err(WordCloudError::NotFound { .. })));
    assert!(repository.get_by_key(THREAD_KEY).unwrap().is_none());
    let status = coordinator.job_status(&thread_link(&server)).unwrap().unwrap();
    assert_eq!(status.state, CrawlState::Failed);
}

#[tokio::test]
async fn test_background_crawl_completes() {
    let server = MockServer::start().await;
    mount_thread(
        &server,
        thread(vec![comment("c1", "Eventually consistent", json!(""))]),
    )
    .await;

    let repository = Arc::new(MemoryRepository::new());
    let coordinator =
        Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();
    let link = thread_link(&server);

    let answer = coordinator.thread_words(&link).await.unwrap();
    assert_eq!(answer.source, WordsSource::Crawling);
    assert_eq!(answer.words, None);

    let mut state = CrawlState::Running;
    for _ in 0..100 {
        state = coordinator.job_status(&link).unwrap().unwrap().state;
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, CrawlState::Completed);

    let doc = repository.get_by_key(THREAD_KEY).unwrap().unwrap();
    assert_eq!(doc.words, words(&[("eventually", 1), ("consistent", 1)]));

    // A second request is now answered from the cache
    let again = coordinator.thread_words(&link).await.unwrap();
    assert_eq!(again.source, WordsSource::Cache);
}

#[tokio::test]
async fn test_stale_document_is_merged_not_replaced() {
    let server = MockServer::start().await;
    mount_thread(&server, thread(vec![comment("c1", "new words", json!(""))])).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("words.db");
    let repository = Arc::new(SqliteRepository::new(&db_path).unwrap());
    repository.insert(THREAD_KEY, &words(&[("old", 2), ("words", 1)])).unwrap();

    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE word_documents SET last_updated = '2020-01-01T00:00:00.000000Z' WHERE scid = ?1",
            [THREAD_KEY],
        )
        .unwrap();
    }

    let coordinator =
        Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();
    let answer = coordinator
        .crawl_and_wait(&thread_link(&server))
        .await
        .unwrap();

    assert_eq!(
        answer.words,
        Some(words(&[("old", 2), ("words", 2), ("new", 1)]))
    );
    let doc = repository.get_by_key(THREAD_KEY).unwrap().unwrap();
    assert!(doc.last_updated > chrono::Utc::now() - chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_failing_chunk_keeps_other_branches() {
    let server = MockServer::start().await;
    let ids: Vec<String> = (0..3).map(|i| format!("m{}", i)).collect();
    mount_thread(
        &server,
        thread(vec![
            comment("c1", "Still here", json!("")),
            stub(&ids, "t3_abc"),
        ]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/morechildren"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let coordinator = Coordinator::new(&create_test_config(&server), repository).unwrap();

    let answer = coordinator
        .crawl_and_wait(&thread_link(&server))
        .await
        .unwrap();

    assert_eq!(answer.words, Some(words(&[("still", 1), ("here", 1)])));
    let status = coordinator.job_status(&thread_link(&server)).unwrap().unwrap();
    assert!(status.branches_failed >= 1);
}

#[tokio::test]
async fn test_abandoned_request_releases_thread() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/test/comments/abc.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(thread(vec![comment("c1", "Second try", json!(""))]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::new());
    let coordinator =
        Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();
    let link = thread_link(&server);

    // The caller goes away while the thread listing is still loading
    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), coordinator.thread_words(&link)).await;
    assert!(abandoned.is_err());

    let status = coordinator.job_status(&link).unwrap().unwrap();
    assert_eq!(status.state, CrawlState::Cancelled);
    assert_eq!(coordinator.running_jobs(), 0);
    assert!(repository.get_by_key(THREAD_KEY).unwrap().is_none());

    let retry = coordinator.crawl_and_wait(&link).await.unwrap();
    assert_eq!(retry.source, WordsSource::Crawled);
    assert_eq!(retry.words, Some(words(&[("second", 1), ("try", 1)])));
}

#[tokio::test]
async fn test_timed_out_crawl_keeps_partial_words_and_is_recrawled() {
    let server = MockServer::start().await;
    let ids = vec!["m0".to_string()];
    mount_thread(
        &server,
        thread(vec![comment("c1", "partial", json!("")), stub(&ids, "t3_abc")]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/morechildren"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"json": {"errors": [], "data": {"things": []}}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::new());
    let coordinator = Coordinator::new(
        &create_test_config_with_timeout(&server, 1),
        repository.clone(),
    )
    .unwrap();
    let link = thread_link(&server);

    let result = coordinator.crawl_and_wait(&link).await;
    assert!(matches!(result, Err(WordCloudError::Cancelled)));
    assert_eq!(
        coordinator.job_status(&link).unwrap().unwrap().state,
        CrawlState::Cancelled
    );

    let doc = repository.get_by_key(THREAD_KEY).unwrap().unwrap();
    assert_eq!(doc.words, words(&[("partial", 1)]));
    assert!(!doc.is_fresh(chrono::Utc::now(), chrono::Duration::days(7)));

    let next = coordinator.thread_words(&link).await.unwrap();
    assert_eq!(next.source, WordsSource::Crawling);
    coordinator.shutdown();
}

#[tokio::test]
async fn test_failed_branch_leaves_document_stale() {
    let server = MockServer::start().await;
    let ids = vec!["m0".to_string()];
    mount_thread(
        &server,
        thread(vec![comment("c1", "kept", json!("")), stub(&ids, "t3_abc")]),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/api/morechildren"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let repository = Arc::new(MemoryRepository::new());
    let coordinator =
        Coordinator::new(&create_test_config(&server), repository.clone()).unwrap();
    let link = thread_link(&server);

    coordinator.crawl_and_wait(&link).await.unwrap();

    let doc = repository.get_by_key(THREAD_KEY).unwrap().unwrap();
    assert_eq!(doc.words, words(&[("kept", 1)]));
    assert!(!doc.is_fresh(chrono::Utc::now(), chrono::Duration::days(7)));
    assert_ne!(
        coordinator.thread_words(&link).await.unwrap().source,
        WordsSource::Cache
    );
    coordinator.shutdown();
}
