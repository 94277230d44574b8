//! Crawl jobs and the registry that deduplicates them

use crate::state::CrawlState;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Lifecycle {
    state: CrawlState,
    finished_at: Option<DateTime<Utc>>,
}

/// One running or finished thread crawl
#[derive(Debug)]
pub struct CrawlJob {
    key: String,
    token: CancellationToken,
    started_at: DateTime<Utc>,
    lifecycle: Mutex<Lifecycle>,

    branches_started: AtomicU64,
    branches_finished: AtomicU64,
    branches_failed: AtomicU64,
    api_calls: AtomicU64,
    upserts: AtomicU64,
}

/// Point-in-time view of a job, as reported by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub key: String,
    pub state: CrawlState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub branches_started: u64,
    pub branches_finished: u64,
    pub branches_failed: u64,
    pub api_calls: u64,
    pub upserts: u64,
}

impl CrawlJob {
    pub fn new(key: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            key: key.into(),
            token,
            started_at: Utc::now(),
            lifecycle: Mutex::new(Lifecycle {
                state: CrawlState::Running,
                finished_at: None,
            }),
            branches_started: AtomicU64::new(0),
            branches_finished: AtomicU64::new(0),
            branches_failed: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
        }
    }

    /// Token observed by every branch of this crawl
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CrawlState {
        self.lifecycle().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle().finished_at
    }

    /// Moves a running job into `state`; finished jobs keep their first outcome
    pub fn finish(&self, state: CrawlState) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state.is_active() && state.is_terminal() {
            lifecycle.state = state;
            lifecycle.finished_at = Some(Utc::now());
        }
    }

    /// Cancels every branch and marks the job cancelled
    pub fn cancel(&self) {
        self.token.cancel();
        self.finish(CrawlState::Cancelled);
    }

    pub fn record_branch_started(&self) {
        self.branches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_branch_finished(&self) {
        self.branches_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_branch_failed(&self) {
        self.branches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (state, finished_at) = {
            let lifecycle = self.lifecycle();
            (lifecycle.state, lifecycle.finished_at)
        };

        JobSnapshot {
            key: self.key.clone(),
            state,
            started_at: self.started_at,
            finished_at,
            branches_started: self.branches_started.load(Ordering::Relaxed),
            branches_finished: self.branches_finished.load(Ordering::Relaxed),
            branches_failed: self.branches_failed.load(Ordering::Relaxed),
            api_calls: self.api_calls(),
            upserts: self.upserts(),
        }
    }
}

/// Seconds a finished job stays in the registry by default
pub const DEFAULT_JOB_RETENTION_SECS: i64 = 3600;

/// Jobs by thread key
///
/// At most one job per key is running at a time. Finished jobs stay for the
/// retention period so their status can be polled, then are pruned the next
/// time a job starts.
#[derive(Debug)]
pub struct JobRegistry {
    root: CancellationToken,
    jobs: Mutex<HashMap<String, Arc<CrawlJob>>>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(Duration::seconds(DEFAULT_JOB_RETENTION_SECS))
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            root: CancellationToken::new(),
            jobs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<CrawlJob>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims `key` for a new crawl
    ///
    /// # Returns
    ///
    /// * `Some(job)` - The caller owns the new crawl
    /// * `None` - A crawl for `key` is already running
    pub fn start(&self, key: &str) -> Option<Arc<CrawlJob>> {
        let mut jobs = self.jobs();

        if jobs.get(key).is_some_and(|job| job.is_running()) {
            return None;
        }

        Self::prune(&mut jobs, Utc::now() - self.retention);

        let job = Arc::new(CrawlJob::new(key, self.root.child_token()));
        jobs.insert(key.to_string(), Arc::clone(&job));
        Some(job)
    }

    /// Drops finished jobs older than `cutoff`; running jobs are never pruned
    fn prune(jobs: &mut HashMap<String, Arc<CrawlJob>>, cutoff: DateTime<Utc>) {
        let before = jobs.len();
        jobs.retain(|_, job| job.finished_at().map_or(true, |at| at > cutoff));

        let pruned = before - jobs.len();
        if pruned > 0 {
            tracing::trace!("Pruned {} finished crawl jobs", pruned);
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CrawlJob>> {
        self.jobs().get(key).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.jobs().values().filter(|job| job.is_running()).count()
    }

    /// Cancels every running job
    ///
    /// Jobs stay running until their tasks observe the cancellation and
    /// finish them.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}
