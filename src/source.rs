//! Item source boundary and thread collapsing
//!
//! The social-media client itself lives outside this crate. It hands over raw
//! posts; `collapse_posts` folds reposts and conversation fragments into one
//! `Item` per conversation.

use crate::error::SourceError;
use crate::models::{Item, Post};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Access credential pair for the requester's timeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub access_token_secret: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, access_token_secret: impl Into<String>) -> Self {
        Credentials {
            access_token: access_token.into(),
            access_token_secret: access_token_secret.into(),
        }
    }
}

/// Supplies the items for one refresh. Each item's text is non-empty and its
/// `conversation_id` is unique within the batch.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch(&self, credentials: &Credentials) -> Result<Vec<Item>, SourceError>;
}

fn retweet_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Inline repost text runs to the end of its line
    RE.get_or_init(|| Regex::new(r"\bRT\b.*").expect("static regex"))
}

/// Expand a post with the text of the post it references (when that post is
/// in the same batch), recursively. Returns the text and constituent ids.
fn expand_post<'a>(
    post: &'a Post,
    by_id: &HashMap<&'a str, &'a Post>,
    visited: &mut HashSet<&'a str>,
) -> (String, Vec<String>) {
    visited.insert(post.id.as_str());
    let own_text = retweet_marker().replace_all(&post.text, "").to_string();

    let referenced = post
        .referenced_id
        .as_deref()
        .filter(|id| !visited.contains(id))
        .and_then(|id| by_id.get(id).copied());

    match referenced {
        Some(inner) => {
            let (inner_text, inner_ids) = expand_post(inner, by_id, visited);
            let mut ids = vec![post.id.clone()];
            ids.extend(inner_ids);
            (format!("{}<RETWEET>\n{}\n</RETWEET>", own_text, inner_text), ids)
        }
        None => (own_text, vec![post.id.clone()]),
    }
}

/// Collapse raw posts into one item per conversation, in first-seen order
pub fn collapse_posts(posts: &[Post]) -> Vec<Item> {
    let by_id: HashMap<&str, &Post> = posts.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut order: Vec<&str> = Vec::new();
    let mut threads: HashMap<&str, (String, Vec<String>)> = HashMap::new();

    for post in posts {
        let mut visited = HashSet::new();
        let (text, ids) = expand_post(post, &by_id, &mut visited);

        match threads.get_mut(post.conversation_id.as_str()) {
            Some((existing_text, existing_ids)) => {
                existing_text.push('\n');
                existing_text.push_str(&text);
                existing_ids.extend(ids);
            }
            None => {
                order.push(post.conversation_id.as_str());
                threads.insert(post.conversation_id.as_str(), (text, ids));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|conversation_id| {
            let (text, ids) = threads.remove(conversation_id)?;
            if text.trim().is_empty() {
                tracing::debug!("[Source] Dropping empty thread {}", conversation_id);
                return None;
            }
            Some(Item::new(text, conversation_id, ids))
        })
        .collect()
}

/// Reads a JSON array of posts from disk. Credentials are not used.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileSource { path: path.into() }
    }
}

#[async_trait]
impl ItemSource for JsonFileSource {
    async fn fetch(&self, _credentials: &Credentials) -> Result<Vec<Item>, SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        let posts: Vec<Post> = serde_json::from_str(&raw)?;
        let items = collapse_posts(&posts);
        tracing::info!("[Source] {} posts collapsed into {} threads", posts.len(), items.len());
        Ok(items)
    }
}
