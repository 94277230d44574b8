//! Crawler coordinator - request-level orchestration
//!
//! This module decides, per requested thread, whether to answer from the
//! cache or start a crawl, including:
//! - Serving fresh cached aggregates without touching the upstream API
//! - Deduplicating concurrent requests for the same thread
//! - Creating the placeholder document before traversal starts
//! - Running each root branch as its own task under a crawl timeout

use crate::config::{Config, MAX_JOB_RETENTION_SECS};
use crate::crawler::fetcher::ApiClient;
use crate::crawler::scheduler::Scheduler;
use crate::crawler::traversal::{CrawlContext, Crawler};
use crate::crawler::tree::TreeNode;
use crate::link::{parse_link, ThreadLink};
use crate::state::{CrawlJob, CrawlState, JobRegistry, JobSnapshot};
use crate::storage::{Repository, StorageError, StorageResult};
use crate::{Result, WordCloudError};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Where the words in a [`ThreadWords`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WordsSource {
    /// A fresh cached aggregate
    Cache,

    /// A crawl for the thread is already running; words are partial
    InProgress,

    /// A crawl was started by this request; words are not available yet
    Crawling,

    /// A crawl ran to completion before answering
    Crawled,
}

/// Answer to a word request for one thread
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadWords {
    pub link: ThreadLink,
    pub words: Option<HashMap<String, u64>>,
    pub source: WordsSource,
}

impl ThreadWords {
    pub fn thread_id(&self) -> &str {
        &self.link.thread_id
    }
}

enum Begin {
    Ready(ThreadWords),
    Started {
        ctx: CrawlContext,
        roots: Vec<TreeNode>,
        is_new: bool,
    },
}

/// A claimed job whose crawl task has not been spawned yet
///
/// Dropping the claim before [`JobClaim::release`] cancels the job, so a
/// request abandoned mid-fetch does not leave its key claimed.
struct JobClaim {
    job: Arc<CrawlJob>,
    armed: bool,
}

impl JobClaim {
    fn new(job: Arc<CrawlJob>) -> Self {
        Self { job, armed: true }
    }

    fn release(mut self) -> Arc<CrawlJob> {
        self.armed = false;
        Arc::clone(&self.job)
    }
}

impl Drop for JobClaim {
    fn drop(&mut self) {
        if self.armed && self.job.is_running() {
            tracing::debug!("Request abandoned before its crawl started, releasing job");
            self.job.cancel();
        }
    }
}

/// Main coordinator, shared by every inbound request
pub struct Coordinator {
    crawler: Arc<Crawler>,
    repository: Arc<dyn Repository>,
    jobs: Arc<JobRegistry>,
    freshness: chrono::Duration,
    crawl_timeout: Duration,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The application configuration
    /// * `repository` - The cache repository
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(WordCloudError)` - Failed to build the HTTP client
    pub fn new(config: &Config, repository: Arc<dyn Repository>) -> Result<Self> {
        let scheduler = Arc::new(Scheduler::new(
            config.reddit.requests_per_second,
            config.crawler.max_concurrent_requests as usize,
        ));
        let api = Arc::new(ApiClient::new(config, scheduler)?);
        let crawler = Arc::new(Crawler::new(api, Arc::clone(&repository), &config.crawler));
        let retention = chrono::Duration::seconds(
            config.crawler.job_retention_secs.min(MAX_JOB_RETENTION_SECS) as i64,
        );

        Ok(Self {
            crawler,
            repository,
            jobs: Arc::new(JobRegistry::with_retention(retention)),
            freshness: chrono::Duration::days(i64::from(config.crawler.freshness_days)),
            crawl_timeout: Duration::from_secs(config.crawler.crawl_timeout_secs),
        })
    }

    /// Returns the words for a thread, starting a background crawl if needed
    ///
    /// When a crawl is started the call returns as soon as the thread listing
    /// has been fetched; the aggregate fills in as branches finish. Poll
    /// [`Coordinator::job_status`] to learn when it is complete.
    ///
    /// # Returns
    ///
    /// * `Ok(ThreadWords)` - Cached words, partial words, or a started crawl
    /// * `Err(WordCloudError::InvalidLink)` - The link is not a thread link
    /// * `Err(WordCloudError::NotFound)` - The thread does not exist upstream
    pub async fn thread_words(&self, raw_link: &str) -> Result<ThreadWords> {
        match self.begin(raw_link).await? {
            Begin::Ready(words) => Ok(words),
            Begin::Started { ctx, roots, is_new } => {
                let link = ctx.link.clone();
                self.spawn_crawl(ctx, roots, is_new);
                Ok(ThreadWords {
                    link,
                    words: None,
                    source: WordsSource::Crawling,
                })
            }
        }
    }

    /// Like [`Coordinator::thread_words`], but waits for the crawl to finish
    /// and returns the stored aggregate
    pub async fn crawl_and_wait(&self, raw_link: &str) -> Result<ThreadWords> {
        let (ctx, roots, is_new) = match self.begin(raw_link).await? {
            Begin::Ready(words) => return Ok(words),
            Begin::Started { ctx, roots, is_new } => (ctx, roots, is_new),
        };

        let link = ctx.link.clone();
        let key = ctx.key.clone();
        let job = Arc::clone(&ctx.job);
        self.spawn_crawl(ctx, roots, is_new).await??;

        if job.state() == CrawlState::Cancelled {
            return Err(WordCloudError::Cancelled);
        }

        let document = self
            .with_repository(move |repository| repository.get_by_key(&key))
            .await?;
        Ok(ThreadWords {
            link,
            words: Some(document.map(|d| d.words).unwrap_or_default()),
            source: WordsSource::Crawled,
        })
    }

    /// Progress of the most recent crawl of a thread in this process
    pub fn job_status(&self, raw_link: &str) -> Result<Option<JobSnapshot>> {
        let link = parse_link(raw_link)?;
        Ok(self
            .jobs
            .get(&link.thread_key())
            .map(|job| job.snapshot()))
    }

    pub fn running_jobs(&self) -> usize {
        self.jobs.running_count()
    }

    /// Cancels every running crawl
    ///
    /// Crawl tasks settle on their own; [`Coordinator::wait_idle`] waits for
    /// them.
    pub fn shutdown(&self) {
        let running = self.jobs.running_count();
        if running > 0 {
            tracing::info!("Cancelling {} running crawls", running);
        }
        self.jobs.cancel_all();
    }

    /// Waits until no crawl is running, up to `limit`
    ///
    /// Returns false if crawls were still running when `limit` passed.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.jobs.running_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    async fn begin(&self, raw_link: &str) -> Result<Begin> {
        let link = parse_link(raw_link)?;
        let key = link.thread_key();

        // A running crawl keeps its document fresh
        if self.jobs.get(&key).is_some_and(|job| job.is_running()) {
            tracing::debug!("Crawl of {} already running", key);
            return self.in_progress(link).await;
        }

        let document = {
            let key = key.clone();
            self.with_repository(move |repository| repository.get_by_key(&key))
                .await?
        };

        if let Some(doc) = &document {
            if doc.is_fresh(Utc::now(), self.freshness) {
                tracing::debug!("Serving {} from cache", key);
                return Ok(Begin::Ready(ThreadWords {
                    link,
                    words: Some(doc.words.clone()),
                    source: WordsSource::Cache,
                }));
            }
        }

        let Some(job) = self.jobs.start(&key) else {
            tracing::debug!("Crawl of {} started concurrently", key);
            return self.in_progress(link).await;
        };
        let claim = JobClaim::new(job);

        claim.job.record_api_call();
        let roots = match self.crawler.api().fetch_thread(&link, claim.job.token()).await {
            Ok(roots) => roots,
            Err(WordCloudError::Cancelled) => {
                claim.job.finish(CrawlState::Cancelled);
                return Err(WordCloudError::Cancelled);
            }
            Err(e) => {
                claim.job.finish(CrawlState::Failed);
                return Err(e);
            }
        };

        let is_new = document.is_none();
        tracing::info!(
            "Crawling {} ({} root nodes, {})",
            key,
            roots.len(),
            if is_new { "new" } else { "stale" }
        );
        Ok(Begin::Started {
            ctx: CrawlContext::new(link, claim.release()),
            roots,
            is_new,
        })
    }

    async fn in_progress(&self, link: ThreadLink) -> Result<Begin> {
        let key = link.thread_key();
        let document = self
            .with_repository(move |repository| repository.get_by_key(&key))
            .await?;
        Ok(Begin::Ready(ThreadWords {
            link,
            words: document.map(|d| d.words),
            source: WordsSource::InProgress,
        }))
    }

    /// Prepares the document, runs each root node as its own task and settles
    /// the job when all end
    fn spawn_crawl(
        &self,
        ctx: CrawlContext,
        roots: Vec<TreeNode>,
        is_new: bool,
    ) -> JoinHandle<Result<()>> {
        let crawler = Arc::clone(&self.crawler);
        let repository = Arc::clone(&self.repository);
        let timeout = self.crawl_timeout;

        tokio::spawn(async move {
            let job = Arc::clone(&ctx.job);

            match prepare_document(&repository, &ctx.key, is_new).await {
                Ok(()) => {}
                Err(WordCloudError::Cache(StorageError::ConstraintViolation(_))) => {
                    tracing::debug!("Another writer created {} first", ctx.key);
                    job.finish(CrawlState::Cancelled);
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!("Could not prepare the document for {}: {}", ctx.key, e);
                    job.finish(CrawlState::Failed);
                    return Err(e);
                }
            }

            let branches: Vec<JoinHandle<Result<()>>> = roots
                .into_iter()
                .map(|root| {
                    let crawler = Arc::clone(&crawler);
                    let ctx = ctx.clone();
                    tokio::spawn(async move { crawler.crawl_root(&root, &ctx).await })
                })
                .collect();
            let total = branches.len();

            let all = join_all(branches);
            tokio::pin!(all);
            let mut timed_out = false;
            let results = match tokio::time::timeout(timeout, &mut all).await {
                Ok(results) => results,
                Err(_) => {
                    tracing::warn!("Crawl of {} timed out after {:?}", ctx.key, timeout);
                    timed_out = true;
                    job.token().cancel();
                    all.await
                }
            };

            let mut failed = 0;
            let mut cancelled = timed_out;
            for result in results {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(WordCloudError::Cancelled)) => cancelled = true,
                    Ok(Err(e)) => {
                        failed += 1;
                        tracing::warn!("Root branch of {} failed: {}", ctx.key, e);
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!("Root branch task of {} panicked: {}", ctx.key, e);
                    }
                }
            }

            let state = if cancelled {
                CrawlState::Cancelled
            } else if total > 0 && failed == total {
                CrawlState::Failed
            } else {
                CrawlState::Completed
            };

            // Must be stale before the job settles
            let incomplete = state != CrawlState::Completed || job.snapshot().branches_failed > 0;
            if incomplete {
                let key = ctx.key.clone();
                match blocking(&repository, move |repository| repository.mark_stale(&key)).await {
                    Ok(()) => tracing::info!(
                        "Crawl of {} incomplete, it will be re-crawled on the next request",
                        ctx.key
                    ),
                    Err(e) => tracing::error!("Could not mark {} stale: {}", ctx.key, e),
                }
            }
            job.finish(state);

            let snapshot = job.snapshot();
            tracing::info!(
                "Crawl of {} {}: {} API calls, {} upserts, {} failed branches",
                ctx.key,
                snapshot.state,
                snapshot.api_calls,
                snapshot.upserts,
                snapshot.branches_failed
            );
            Ok(())
        })
    }

    async fn with_repository<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Repository) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        blocking(&self.repository, f).await
    }
}

/// Creates the placeholder for a new thread, or restarts a stale document's
/// clock so re-crawls merge into it
async fn prepare_document(
    repository: &Arc<dyn Repository>,
    key: &str,
    is_new: bool,
) -> Result<()> {
    let key = key.to_string();
    blocking(repository, move |repository| {
        if is_new {
            repository.insert(&key, &HashMap::new()).map(|_| ())
        } else {
            repository.upsert(&key, &HashMap::new())
        }
    })
    .await
}

/// Runs a repository call on the blocking pool
async fn blocking<T, F>(repository: &Arc<dyn Repository>, f: F) -> Result<T>
where
    F: FnOnce(&dyn Repository) -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    let repository = Arc::clone(repository);
    Ok(tokio::task::spawn_blocking(move || f(repository.as_ref())).await??)
}
