//! Thread link handling
//!
//! This module turns a thread URL pasted by a user into a [`ThreadLink`], the
//! structured identity every API URL and the cache key are derived from.

use crate::LinkError;
use std::fmt;

/// Minimum number of '/'-separated segments in a thread URL:
/// `scheme:`, `""`, domain, subreddit type, subreddit name, `comments`, id
const MIN_SEGMENTS: usize = 7;

/// Structured identity of one discussion thread
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadLink {
    /// URL scheme without the trailing colon (e.g. "https")
    pub scheme: String,

    /// Host the thread was linked from (e.g. "www.reddit.com")
    pub domain: String,

    /// Two-segment subreddit path (e.g. "r/rust")
    pub subreddit_path: String,

    /// Base-36 thread id (e.g. "1abcde")
    pub thread_id: String,
}

impl ThreadLink {
    /// Stable cache key for this thread: `<subreddit_path>/comments/<thread_id>`
    pub fn thread_key(&self) -> String {
        format!("{}/comments/{}", self.subreddit_path, self.thread_id)
    }

    /// Canonical thread URL without slug or trailing slash
    pub fn canonical_url(&self) -> String {
        format!(
            "{}://{}/{}",
            self.scheme,
            self.domain,
            self.thread_key()
        )
    }

    /// URL of the JSON listing for this thread
    pub fn listing_url(&self) -> String {
        format!("{}.json", self.canonical_url())
    }

    /// Reddit "fullname" of the thread (`t3_<id>`), used as `link_id`
    pub fn fullname(&self) -> String {
        format!("t3_{}", self.thread_id)
    }
}

impl fmt::Display for ThreadLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.thread_key())
    }
}

/// Parses a thread URL into a [`ThreadLink`]
///
/// The URL is split on `/` and read at fixed offsets:
///
/// ```text
/// https: / "" / www.reddit.com / r / rust / comments / 1abcde / optional_slug / ...
///   0      1          2          3    4        5         6
/// ```
///
/// # Arguments
///
/// * `raw` - The URL as supplied by the caller
///
/// # Returns
///
/// * `Ok(ThreadLink)` - The parsed thread identity
/// * `Err(LinkError)` - Too few segments, or a required segment is empty
///
/// # Examples
///
/// ```
/// use thread_wordcloud::link::parse_link;
///
/// let link = parse_link("https://www.reddit.com/r/rust/comments/1abcde/some_title/").unwrap();
/// assert_eq!(link.thread_key(), "r/rust/comments/1abcde");
/// ```
pub fn parse_link(raw: &str) -> Result<ThreadLink, LinkError> {
    let parts: Vec<&str> = raw.trim().split('/').collect();

    if parts.len() < MIN_SEGMENTS {
        return Err(LinkError::TooFewSegments(parts.len()));
    }

    let scheme = parts[0]
        .strip_suffix(':')
        .filter(|s| !s.is_empty())
        .ok_or(LinkError::MissingSegment("scheme"))?;

    if !parts[1].is_empty() {
        return Err(LinkError::MissingSegment("'//' after scheme"));
    }

    let domain = parts[2];
    if domain.is_empty() {
        return Err(LinkError::MissingSegment("domain"));
    }

    let (kind, name) = (parts[3], parts[4]);
    if kind.is_empty() || name.is_empty() {
        return Err(LinkError::MissingSegment("subreddit"));
    }

    if parts[5] != "comments" {
        return Err(LinkError::NotACommentsLink(parts[5].to_string()));
    }

    // A link without a slug may carry the query or fragment on the id itself
    let thread_id = parts[6]
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    if thread_id.is_empty() {
        return Err(LinkError::MissingSegment("thread id"));
    }

    Ok(ThreadLink {
        scheme: scheme.to_ascii_lowercase(),
        domain: domain.to_ascii_lowercase(),
        subreddit_path: format!("{}/{}", kind, name),
        thread_id: thread_id.to_string(),
    })
}
