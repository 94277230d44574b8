//! Recursive comment tree expansion
//!
//! Each node kind is handled as follows:
//!
//! | Node | Action |
//! |------|--------|
//! | Listing | Expand children concurrently, each into a fresh count; merge and upsert once |
//! | Stub with ids | One `morechildren` call per chunk of ids; each chunk expanded like a listing |
//! | Stub without ids | Article lookup for the parent comment; its replies expanded like a listing |
//! | Comment | Tally the body into the caller's count, then expand the replies |
//!
//! A failing branch is logged and counted; its siblings carry on and their
//! counts are still merged. Cancellation stops the whole traversal.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::ApiClient;
use crate::crawler::tree::{chunk_ids, focus_replies, Stub, TreeNode};
use crate::link::ThreadLink;
use crate::state::CrawlJob;
use crate::storage::Repository;
use crate::words::{normalize, WordCount};
use crate::{Result, WordCloudError};
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-crawl state shared by every branch of one thread
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub link: ThreadLink,
    pub key: String,
    pub job: Arc<CrawlJob>,
}

impl CrawlContext {
    pub fn new(link: ThreadLink, job: Arc<CrawlJob>) -> Self {
        Self {
            key: link.thread_key(),
            link,
            job,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        self.job.token()
    }
}

/// Expands tree nodes and persists their word counts
pub struct Crawler {
    api: Arc<ApiClient>,
    repository: Arc<dyn Repository>,
    max_fanout: usize,
    chunk_size: usize,
}

impl Crawler {
    pub fn new(api: Arc<ApiClient>, repository: Arc<dyn Repository>, config: &CrawlerConfig) -> Self {
        Self {
            api,
            repository,
            max_fanout: config.max_fanout.max(1) as usize,
            chunk_size: config.chunk_size.max(1) as usize,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Crawls one root node of a thread as an independent branch
    ///
    /// Anything the node tallies into its own count (a root comment) is
    /// upserted once the branch finishes.
    pub async fn crawl_root(&self, node: &TreeNode, ctx: &CrawlContext) -> Result<()> {
        let count = WordCount::new();
        let result = self.expand(node, &count, ctx).await;

        self.flush(ctx, count).await?;
        result
    }

    /// Expands `node`, tallying comment text into `dest`
    ///
    /// # Arguments
    ///
    /// * `node` - The node to expand
    /// * `dest` - Count owned by the calling branch
    /// * `ctx` - The crawl this node belongs to
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The node and everything below it was expanded; failed
    ///   sub-branches have been logged
    /// * `Err(WordCloudError::Cancelled)` - The crawl was cancelled
    /// * `Err(WordCloudError)` - This node itself could not be expanded
    pub fn expand<'a>(
        &'a self,
        node: &'a TreeNode,
        dest: &'a WordCount,
        ctx: &'a CrawlContext,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if ctx.token().is_cancelled() {
                return Err(WordCloudError::Cancelled);
            }

            match node {
                TreeNode::Listing { children } => self.expand_listing(children, ctx).await,
                TreeNode::Stub(stub) => self.expand_stub(stub, ctx).await,
                TreeNode::Comment(comment) => {
                    dest.extend(normalize(&comment.body));
                    self.expand(&comment.replies, dest, ctx).await
                }
            }
        }
        .boxed()
    }

    async fn expand_listing(&self, children: &[TreeNode], ctx: &CrawlContext) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }

        let branches: Vec<_> = children
            .iter()
            .map(|child| async move {
                let count = WordCount::new();
                let result = self.expand_branch(child, &count, ctx).await;
                (count, result)
            })
            .collect();
        let results: Vec<(WordCount, Result<()>)> = stream::iter(branches)
            .buffer_unordered(self.max_fanout)
            .collect()
            .await;

        let merged = WordCount::merge_all(results.iter().map(|(count, _)| count));
        self.flush(ctx, merged).await?;

        if results
            .iter()
            .any(|(_, result)| matches!(result, Err(WordCloudError::Cancelled)))
        {
            return Err(WordCloudError::Cancelled);
        }
        Ok(())
    }

    /// Expands one child, isolating its failure from its siblings
    async fn expand_branch(
        &self,
        node: &TreeNode,
        dest: &WordCount,
        ctx: &CrawlContext,
    ) -> Result<()> {
        ctx.job.record_branch_started();
        let result = self.expand(node, dest, ctx).await;

        match &result {
            Ok(()) => ctx.job.record_branch_finished(),
            Err(WordCloudError::Cancelled) => {}
            Err(e) => {
                ctx.job.record_branch_failed();
                tracing::warn!("Branch ({}) of {} failed: {}", node.kind(), ctx.key, e);
            }
        }
        result
    }

    async fn expand_stub(&self, stub: &Stub, ctx: &CrawlContext) -> Result<()> {
        if stub.child_ids.is_empty() {
            return self.expand_continuation(stub, ctx).await;
        }

        let chunks = chunk_ids(&stub.child_ids, self.chunk_size);
        tracing::debug!(
            "Resolving {} stub ids under {} in {} chunks",
            stub.child_ids.len(),
            stub.parent_id,
            chunks.len()
        );

        let results: Vec<Result<()>> = stream::iter(chunks)
            .map(|chunk| self.expand_chunk(chunk, ctx))
            .buffer_unordered(self.max_fanout)
            .collect()
            .await;

        let mut failed = 0;
        for result in results {
            match result {
                Ok(()) => {}
                Err(WordCloudError::Cancelled) => return Err(WordCloudError::Cancelled),
                Err(e) => {
                    failed += 1;
                    ctx.job.record_branch_failed();
                    tracing::warn!("Stub chunk under {} of {} failed: {}", stub.parent_id, ctx.key, e);
                }
            }
        }

        if failed > 0 {
            tracing::debug!("{} chunks under {} failed", failed, stub.parent_id);
        }
        Ok(())
    }

    async fn expand_chunk(&self, ids: Vec<String>, ctx: &CrawlContext) -> Result<()> {
        ctx.job.record_api_call();
        let nodes = self
            .api
            .fetch_more_children(&ctx.link, &ids, ctx.token())
            .await?;

        tracing::trace!("Chunk of {} ids resolved to {} nodes", ids.len(), nodes.len());
        self.expand_listing(&nodes, ctx).await
    }

    /// Handles a stub that only says "continue this thread"
    async fn expand_continuation(&self, stub: &Stub, ctx: &CrawlContext) -> Result<()> {
        let Some(comment_id) = stub.parent_id.strip_prefix("t1_") else {
            tracing::debug!(
                "Skipping empty stub under {} of {}",
                stub.parent_id,
                ctx.key
            );
            return Ok(());
        };

        ctx.job.record_api_call();
        let nodes = self
            .api
            .fetch_comment_article(&ctx.link, comment_id, ctx.token())
            .await?;

        let nodes = focus_replies(nodes, comment_id);
        self.expand_listing(&nodes, ctx).await
    }

    /// Persists whatever `count` holds, including the part of a cancelled branch
    /// that was tallied before the cancellation
    async fn flush(&self, ctx: &CrawlContext, count: WordCount) -> Result<()> {
        if count.is_empty() {
            return Ok(());
        }
        self.upsert(ctx, count.into_inner()).await
    }

    async fn upsert(&self, ctx: &CrawlContext, words: HashMap<String, u64>) -> Result<()> {
        let repository = Arc::clone(&self.repository);
        let key = ctx.key.clone();
        let distinct = words.len();

        tokio::task::spawn_blocking(move || repository.upsert(&key, &words)).await??;

        ctx.job.record_upsert();
        tracing::trace!("Upserted {} words into {}", distinct, ctx.key);
        Ok(())
    }
}
