//! Comment tree decoding
//!
//! Upstream payloads wrap every node as `{"kind": ..., "data": {...}}`. The
//! `kind` is inspected once here and the node becomes a [`TreeNode`] variant;
//! nothing downstream looks at raw JSON again.

use crate::{Result, WordCloudError};
use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;

/// Ids resolved per `morechildren` call
pub const MAX_MORE_CHILDREN: usize = 100;

/// One node of a thread's comment tree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawNode")]
pub enum TreeNode {
    /// Container of sibling nodes
    Listing { children: Vec<TreeNode> },

    /// Deferred children that need a follow-up call
    Stub(Stub),

    /// Comment body plus its replies
    Comment(Comment),
}

/// A `more` placeholder
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stub {
    pub child_ids: Vec<String>,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub ups: i64,
    pub replies: Box<TreeNode>,
}

impl TreeNode {
    pub fn empty_listing() -> Self {
        TreeNode::Listing {
            children: Vec::new(),
        }
    }

    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            TreeNode::Listing { .. } => "listing",
            TreeNode::Stub(_) => "stub",
            TreeNode::Comment(_) => "comment",
        }
    }
}

#[derive(Deserialize)]
struct RawNode {
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<TreeNode>,
}

#[derive(Deserialize)]
struct StubData {
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    parent_id: String,
}

#[derive(Deserialize)]
struct CommentData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    ups: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_replies")]
    replies: Option<TreeNode>,
}

impl TryFrom<RawNode> for TreeNode {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> std::result::Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "Listing" => {
                let data: ListingData = serde_json::from_value(raw.data)?;
                Ok(TreeNode::Listing {
                    children: data.children,
                })
            }
            "more" => {
                let data: StubData = serde_json::from_value(raw.data)?;
                Ok(TreeNode::Stub(Stub {
                    child_ids: data.children,
                    parent_id: data.parent_id,
                }))
            }
            _ => {
                let data: CommentData = serde_json::from_value(raw.data)?;
                Ok(TreeNode::Comment(Comment {
                    id: data.id,
                    body: data.body.unwrap_or_default(),
                    ups: data.ups.unwrap_or(0),
                    replies: Box::new(data.replies.unwrap_or_else(TreeNode::empty_listing)),
                }))
            }
        }
    }
}

/// `replies` is `""` when a comment has none, otherwise a nested node
fn deserialize_replies<'de, D>(deserializer: D) -> std::result::Result<Option<TreeNode>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null | Value::String(_) => Ok(None),
        value => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingPayload {
    Many(Vec<TreeNode>),
    One(TreeNode),
}

impl ListingPayload {
    fn into_nodes(self) -> Vec<TreeNode> {
        match self {
            ListingPayload::Many(nodes) => nodes,
            ListingPayload::One(node) => vec![node],
        }
    }
}

#[derive(Deserialize)]
struct MoreChildrenEnvelope {
    json: MoreChildrenJson,
}

#[derive(Deserialize)]
struct MoreChildrenJson {
    #[serde(default)]
    errors: Vec<Value>,
    #[serde(default)]
    data: Option<MoreChildrenData>,
}

#[derive(Deserialize)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<TreeNode>,
}

/// Decodes a thread listing (`GET {thread}.json`) into its root nodes
///
/// The upstream returns an array of two listings (the article, then the
/// top-level comments); a single listing object is also accepted.
pub fn decode_thread(bytes: &[u8]) -> Result<Vec<TreeNode>> {
    serde_json::from_slice::<ListingPayload>(bytes)
        .map(ListingPayload::into_nodes)
        .map_err(|e| WordCloudError::decode("thread listing", e))
}

/// Decodes a `morechildren` response into the resolved nodes
///
/// # Returns
///
/// * `Ok(Vec<TreeNode>)` - The resolved nodes, flat
/// * `Err(WordCloudError::Decode)` - Malformed body or non-empty `errors`
pub fn decode_more_children(bytes: &[u8]) -> Result<Vec<TreeNode>> {
    let envelope: MoreChildrenEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| WordCloudError::decode("morechildren response", e))?;

    if !envelope.json.errors.is_empty() {
        return Err(WordCloudError::Decode {
            context: "morechildren response".to_string(),
            message: Value::Array(envelope.json.errors).to_string(),
        });
    }

    Ok(envelope
        .json
        .data
        .map(|data| data.things)
        .unwrap_or_default())
}

/// Decodes a single-comment article response
pub fn decode_article(bytes: &[u8]) -> Result<Vec<TreeNode>> {
    serde_json::from_slice::<ListingPayload>(bytes)
        .map(ListingPayload::into_nodes)
        .map_err(|e| WordCloudError::decode("comment article", e))
}

/// Replaces the comment `focal_id` by its replies
///
/// Only listings are searched, never comment replies. The focal comment's body
/// was already counted by the branch that found the stub.
pub fn focus_replies(nodes: Vec<TreeNode>, focal_id: &str) -> Vec<TreeNode> {
    nodes
        .into_iter()
        .map(|node| match node {
            TreeNode::Listing { children } => TreeNode::Listing {
                children: focus_replies(children, focal_id),
            },
            TreeNode::Comment(comment) if comment.id == focal_id => *comment.replies,
            other => other,
        })
        .collect()
}

/// Splits stub ids into ordered chunks of at most `size`
pub fn chunk_ids(ids: &[String], size: usize) -> Vec<Vec<String>> {
    ids.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}
