use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use threadscope_lib::ai_client::{CompletionClient, CompletionRequest};
use threadscope_lib::cache::{MemoryStore, ResultCache};
use threadscope_lib::error::{CompletionError, SourceError};
use threadscope_lib::keywords::literal_hashtags;
use threadscope_lib::settings::Settings;
use threadscope_lib::summary::{LEAF_FALLBACK, META_FALLBACK};
use threadscope_lib::{CacheStatus, Cluster, Credentials, Item, ItemSource, Pipeline, TopicService};

struct StaticSource(Vec<Item>);

#[async_trait]
impl ItemSource for StaticSource {
    async fn fetch(&self, _credentials: &Credentials) -> Result<Vec<Item>, SourceError> {
        Ok(self.0.clone())
    }
}

struct UnreachableSource;

#[async_trait]
impl ItemSource for UnreachableSource {
    async fn fetch(&self, _credentials: &Credentials) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unavailable("connection refused".to_string()))
    }
}

/// Plays the model: echoes hashtags for keyword prompts and answers every
/// summary prompt in the expected shape
struct ScriptedModel;

fn quoted_body(prompt: &str) -> &str {
    prompt.split("\"\"\"").nth(1).unwrap_or("").trim()
}

#[async_trait]
impl CompletionClient for ScriptedModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let prompt = request.user_prompt();
        let body = quoted_body(prompt);
        let first_word = body.split_whitespace().next().unwrap_or("something");

        if prompt.starts_with("TWEET:") {
            let tags: Vec<String> = literal_hashtags(body).into_iter().collect();
            return Ok(tags.join(" "));
        }
        if prompt.starts_with("TWEET_SUMMARIES") {
            return Ok("These all cover AI.\nTOPIC: 14 tweets are about artificial intelligence".to_string());
        }
        if prompt.contains("More specifically") {
            return Ok(format!(
                "14 tweets are about artificial intelligence. More specifically, 7 are about {} research.",
                first_word
            ));
        }
        Ok(format!("TOPIC: people are talking about {}", first_word))
    }
}

struct BrokenModel;

#[async_trait]
impl CompletionClient for BrokenModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Err(CompletionError::Api { status: 503, body: "overloaded".to_string() })
    }
}

fn item(text: &str, convo: &str) -> Item {
    Item::new(text, convo, vec![convo.to_string()])
}

fn service(source: impl ItemSource + 'static, client: impl CompletionClient + 'static) -> TopicService {
    let settings = Settings::default();
    let pipeline = Pipeline::new(Arc::new(source), Arc::new(client), &settings);
    TopicService::new(pipeline, ResultCache::new(Arc::new(MemoryStore::new())))
}

fn total_items(roots: &[Cluster]) -> usize {
    roots.iter().map(Cluster::total_item_count).sum()
}

#[tokio::test]
async fn test_no_shared_keywords_yields_only_misc() {
    let items: Vec<Item> = (0..10)
        .map(|i| item(&format!("note{} on its own #k{}", i, i), &format!("c{}", i)))
        .collect();
    let service = service(StaticSource(items), ScriptedModel);

    let report = service.topics_for("alice", &Credentials::default()).await.unwrap();
    assert_eq!(report.roots.len(), 1);
    let misc = &report.roots[0];
    assert!(misc.is_misc());
    assert!(misc.is_leaf());
    assert_eq!(misc.items().len(), 10);
}

#[tokio::test]
async fn test_seven_sharing_one_keyword_form_one_cluster() {
    let items: Vec<Item> = (0..7)
        .map(|i| item(&format!("post{} about x #x #u{}", i, i), &format!("c{}", i)))
        .collect();
    let service = service(StaticSource(items), ScriptedModel);

    let report = service.topics_for("alice", &Credentials::default()).await.unwrap();
    assert_eq!(report.roots.len(), 1);
    let only = &report.roots[0];
    assert!(!only.is_misc());
    assert_eq!(only.pivots, BTreeSet::from(["#x".to_string()]));
    assert_eq!(only.items().len(), 7);
    assert_eq!(only.summary.as_deref(), Some("7 people are talking about post0."));
}

#[tokio::test(start_paused = true)]
async fn test_failing_model_still_builds_and_caches() {
    let mut items: Vec<Item> = (0..7)
        .map(|i| item(&format!("robots robots #x {}", i), &format!("c{}", i)))
        .collect();
    items.push(item("lonely gardening note", "g"));
    let service = service(StaticSource(items), BrokenModel);

    let first = service.topics_for("alice", &Credentials::default()).await.unwrap();
    assert_eq!(first.status, CacheStatus::Built);
    assert_eq!(total_items(&first.roots), 8);
    for root in &first.roots {
        for leaf in root.leaves() {
            assert_eq!(leaf.summary.as_deref(), Some(LEAF_FALLBACK));
        }
        if !root.is_leaf() {
            assert_eq!(root.summary.as_deref(), Some(META_FALLBACK));
        }
    }

    let second = service.topics_for("alice", &Credentials::default()).await.unwrap();
    assert_eq!(second.status, CacheStatus::Fresh);
    assert_eq!(second.roots, first.roots);
}

#[tokio::test]
async fn test_children_refined_under_parent_theme() {
    let mut items = Vec::new();
    for i in 0..7 {
        items.push(item(&format!("vision paper {} #ai #vision", i), &format!("v{}", i)));
        items.push(item(&format!("speech model {} #ai #speech", i), &format!("s{}", i)));
    }
    let service = service(StaticSource(items), ScriptedModel);

    let report = service.topics_for("alice", &Credentials::default()).await.unwrap();
    assert_eq!(report.roots.len(), 1);
    let parent = &report.roots[0];
    assert_eq!(parent.children().len(), 2);
    assert!(parent.pivots.contains("#ai"));
    assert_eq!(parent.summary.as_deref(), Some("14 tweets are about artificial intelligence."));

    for child in parent.children() {
        let summary = child.summary.as_deref().unwrap();
        assert!(
            summary.starts_with("14 total are about artificial intelligence; more specifically, 7 are about"),
            "unexpected child summary: {}",
            summary
        );
    }
}

#[tokio::test]
async fn test_fetch_failure_leaves_no_entry() {
    let service = service(UnreachableSource, ScriptedModel);

    let err = service.topics_for("alice", &Credentials::default()).await.unwrap_err();
    assert!(err.is_fetch_failure());
    assert_eq!(err.user_message(), "Service unavailable, please try again later.");
    assert!(service.cache().status("alice").unwrap().is_none());
}
