//! Summaries for every node of the topic tree
//!
//! Three passes, all through the same strategy runner:
//! 1. Leaf: one sentence per leaf cluster from its item texts
//! 2. Umbrella (bottom-up): one theme per internal node from its children's summaries
//! 3. Refine (top-down): each child is re-summarized as a specialization of its
//!    parent's theme, so children read consistently under their parent
//!
//! Failures never abort the tree. A call that keeps failing after retries gets
//! the strategy's fallback text; a reply that does not parse gets an explicit
//! parse-error text with the raw reply attached.

use crate::ai_client::{CompletionClient, CompletionRequest};
use crate::models::{Cluster, ClusterBody};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::settings::Settings;
use crate::utils::joined_item_text;
use futures::future::{join_all, BoxFuture};
use futures::{stream, FutureExt, StreamExt};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

pub const LEAF_FALLBACK: &str = "Unable to generate summary";
pub const META_FALLBACK: &str = "API error";
pub const PARSE_ERROR: &str = "error parsing model output";
pub const MULTIPLE_TOPICS: &str = "MULTIPLE TOPICS";

const SUMMARY_PROMPT: &str = r#"TWEETS:
"""
{tweets_text}
"""

Generate a summary of TWEETS. Rules:

- The summary must begin with "{count_phrase}"
- The summary must be no more than 1 sentence.
- The summary must only mention topics discussed in a majority of the tweets.
{pivot_rule}
State the summary on a single line prefixed with the TOPIC label."#;

const META_SUMMARY_PROMPT: &str = r#"TWEET_SUMMARIES
"""
{summaries}
"""

What common theme unites all these tweets? Rules:

- The theme must begin with "{num_tweets} tweets are about"
- The theme must be no more than 1 sentence.
- The theme must be discussed in a majority of the tweets.

Think out loud, then state the topic prefixed with the TOPIC label."#;

const RESUMMARY_PROMPT: &str = r#"TWEETS:
"""
{tweets_text}
"""

What topic do all TWEETS have in common? Rules:

- The topic must be no more than 1 sentence.
- The topic must be discussed in a majority of the tweets.
- The topic must be related to {hashtags}
- The topic must begin with "{num_parent_tweets} tweets are about {parent_topic}. More specifically, {num_tweets} are about"

Do not think. Just say the topic and only the topic."#;

fn about_trigger() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\babout\b").expect("static regex"))
}

fn specifically_trigger() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)more specifically,?").expect("static regex"))
}

/// The line carrying the TOPIC label, with the label stripped. A reply that is
/// a single line counts as its own topic line.
fn topic_line(reply: &str) -> Option<&str> {
    let labeled = reply
        .lines()
        .filter_map(|line| line.find("TOPIC").map(|at| &line[at + "TOPIC".len()..]))
        .last();

    let line = match labeled {
        Some(rest) => rest,
        None => {
            let mut lines = reply.lines().filter(|l| !l.trim().is_empty());
            let only = lines.next()?;
            if lines.next().is_some() {
                return None;
            }
            only
        }
    };
    Some(line.trim_start_matches(|c: char| c == ':' || c.is_whitespace()))
}

/// Trim whitespace, quotes and trailing sentence punctuation
fn clean_fragment(text: &str) -> Option<String> {
    let cleaned = text
        .trim()
        .trim_matches('"')
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == '"' || c.is_whitespace());
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Everything after the first standalone "about"
fn after_about(text: &str) -> Option<String> {
    let m = about_trigger().find(text)?;
    clean_fragment(&text[m.end()..])
}

/// Topic fragment of a TOPIC-labeled reply ("N tweets are about X" -> "X")
pub fn parse_topic(reply: &str) -> Option<String> {
    after_about(topic_line(reply)?)
}

/// Child fragment of a refinement reply ("... More specifically, M are about X" -> "X")
pub fn parse_refinement(reply: &str) -> Option<String> {
    let line = topic_line(reply).unwrap_or(reply);
    let m = specifically_trigger().find(line)?;
    after_about(&line[m.end()..])
}

fn count_phrase(count: usize) -> String {
    if count == 1 {
        "1 person is talking about".to_string()
    } else {
        format!("{} people are talking about", count)
    }
}

fn hashtags(pivots: &BTreeSet<String>) -> String {
    pivots.iter().cloned().collect::<Vec<_>>().join(" ")
}

/// One kind of summarization step: how to prompt, how to read the reply, and
/// how to phrase the stored sentence
trait SummaryStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn fallback(&self) -> &'static str;
    fn prompt(&self, node: &Cluster) -> String;
    fn parse(&self, reply: &str) -> Option<String>;
    fn compose(&self, node: &Cluster, topic: &str) -> String;
}

struct LeafStrategy {
    char_limit: usize,
}

impl SummaryStrategy for LeafStrategy {
    fn name(&self) -> &'static str {
        "leaf summary"
    }

    fn fallback(&self) -> &'static str {
        LEAF_FALLBACK
    }

    fn prompt(&self, node: &Cluster) -> String {
        let pivot_rule = if node.pivots.is_empty() {
            String::new()
        } else {
            format!("- The summary must be related to {}\n", hashtags(&node.pivots))
        };
        SUMMARY_PROMPT
            .replace("{tweets_text}", &joined_item_text(node.items(), self.char_limit))
            .replace("{count_phrase}", &count_phrase(node.items().len()))
            .replace("{pivot_rule}", &pivot_rule)
    }

    fn parse(&self, reply: &str) -> Option<String> {
        parse_topic(reply)
    }

    fn compose(&self, node: &Cluster, topic: &str) -> String {
        let count = node.items().len();
        let sentence = format!("{} {}.", count_phrase(count), topic);
        if count > 3 && sentence.matches('.').count() > 2 {
            return MULTIPLE_TOPICS.to_string();
        }
        sentence
    }
}

struct UmbrellaStrategy;

impl SummaryStrategy for UmbrellaStrategy {
    fn name(&self) -> &'static str {
        "meta summary"
    }

    fn fallback(&self) -> &'static str {
        META_FALLBACK
    }

    fn prompt(&self, node: &Cluster) -> String {
        let summaries = node
            .children()
            .iter()
            .filter_map(|c| c.summary.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");
        META_SUMMARY_PROMPT
            .replace("{summaries}", &summaries)
            .replace("{num_tweets}", &node.total_item_count().to_string())
    }

    fn parse(&self, reply: &str) -> Option<String> {
        parse_topic(reply)
    }

    fn compose(&self, node: &Cluster, topic: &str) -> String {
        format!("{} tweets are about {}.", node.total_item_count(), topic)
    }
}

struct RefineStrategy<'a> {
    parent_count: usize,
    parent_topic: &'a str,
    char_limit: usize,
}

impl SummaryStrategy for RefineStrategy<'_> {
    fn name(&self) -> &'static str {
        "refined summary"
    }

    fn fallback(&self) -> &'static str {
        META_FALLBACK
    }

    fn prompt(&self, node: &Cluster) -> String {
        RESUMMARY_PROMPT
            .replace("{tweets_text}", &joined_item_text(node.all_items(), self.char_limit))
            .replace("{hashtags}", &hashtags(&node.pivots))
            .replace("{num_parent_tweets}", &self.parent_count.to_string())
            .replace("{parent_topic}", self.parent_topic)
            .replace("{num_tweets}", &node.total_item_count().to_string())
    }

    fn parse(&self, reply: &str) -> Option<String> {
        parse_refinement(reply)
    }

    fn compose(&self, node: &Cluster, topic: &str) -> String {
        format!(
            "{} total are about {}; more specifically, {} are about {}.",
            self.parent_count,
            self.parent_topic,
            node.total_item_count(),
            topic
        )
    }
}

/// Result of one strategy run: the sentence to store, plus the bare topic
/// fragment when the reply parsed
struct Outcome {
    text: String,
    topic: Option<String>,
}

pub struct Summarizer {
    client: Arc<dyn CompletionClient>,
    model: String,
    retry: RetryPolicy,
    leaf_workers: usize,
    meta_workers: usize,
    char_limit: usize,
}

impl Summarizer {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Summarizer {
            client,
            model: model.into(),
            retry: RetryPolicy::default(),
            leaf_workers: 10,
            meta_workers: 7,
            char_limit: 10_000,
        }
    }

    pub fn from_settings(client: Arc<dyn CompletionClient>, settings: &Settings) -> Self {
        Summarizer {
            client,
            model: settings.model.clone(),
            retry: RetryPolicy::from_settings(settings),
            leaf_workers: settings.leaf_workers.max(1),
            meta_workers: settings.meta_workers.max(1),
            char_limit: settings.prompt_char_limit,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn run(&self, strategy: &dyn SummaryStrategy, node: &Cluster) -> Outcome {
        let request = CompletionRequest::new(&self.model, strategy.prompt(node));
        let label = format!("{} for {}", strategy.name(), node.id);

        match retry_with_backoff(&self.retry, &label, || self.client.complete(&request)).await {
            Err(_) => Outcome {
                text: strategy.fallback().to_string(),
                topic: None,
            },
            Ok(reply) => match strategy.parse(&reply) {
                Some(topic) => Outcome {
                    text: strategy.compose(node, &topic),
                    topic: Some(topic),
                },
                None => {
                    tracing::warn!("[Summary] Could not parse {} for {}", strategy.name(), node.id);
                    Outcome {
                        text: format!("{}: {}", PARSE_ERROR, reply),
                        topic: None,
                    }
                }
            },
        }
    }

    /// Summarize every node of `tree`. The input is left untouched; the result
    /// has the same shape with summaries filled in.
    pub async fn summarize(&self, tree: &[Cluster]) -> Vec<Cluster> {
        let leaf_summaries = self.summarize_leaves(tree).await;
        let with_leaves: Vec<Cluster> = tree.iter().map(|root| apply_summaries(root, &leaf_summaries)).collect();

        let roots: Vec<_> = with_leaves
            .into_iter()
            .map(|root| async move {
                let id = root.id.clone();
                let (root, topics) = self.umbrella_pass(root).await;
                let topic = topics.get(&root.id).cloned();
                (id, self.refine_pass(root, topic, &topics).await)
            })
            .collect();
        let mut finished: HashMap<String, Cluster> =
            stream::iter(roots).buffer_unordered(self.meta_workers).collect().await;

        tree.iter()
            .filter_map(|root| finished.remove(&root.id))
            .collect()
    }

    /// Leaf pass. Returns summaries keyed by cluster id.
    async fn summarize_leaves(&self, tree: &[Cluster]) -> HashMap<String, String> {
        let pending: Vec<&Cluster> = tree
            .iter()
            .flat_map(Cluster::leaves)
            .filter(|leaf| leaf.summary.is_none())
            .collect();
        tracing::info!("[Summary] Summarizing {} clusters", pending.len());

        let strategy = LeafStrategy { char_limit: self.char_limit };
        let strategy = &strategy;
        let calls: Vec<_> = pending
            .into_iter()
            .map(|leaf| async move { (leaf.id.clone(), self.run(strategy, leaf).await.text) })
            .collect();
        stream::iter(calls).buffer_unordered(self.leaf_workers).collect().await
    }

    /// Bottom-up: give every internal node an umbrella summary once its
    /// children have theirs. Returns the parsed theme of each internal node.
    fn umbrella_pass(&self, node: Cluster) -> BoxFuture<'_, (Cluster, HashMap<String, String>)> {
        async move {
            let Cluster { id, pivots, summary, body } = node;
            let children = match body {
                ClusterBody::Leaf { items } => {
                    let leaf = Cluster { id, pivots, summary, body: ClusterBody::Leaf { items } };
                    return (leaf, HashMap::new());
                }
                ClusterBody::Internal { children } => children,
            };

            let mut topics = HashMap::new();
            let mut ready = Vec::with_capacity(children.len());
            for (child, child_topics) in join_all(children.into_iter().map(|c| self.umbrella_pass(c))).await {
                topics.extend(child_topics);
                ready.push(child);
            }

            let node = Cluster { id, pivots, summary, body: ClusterBody::Internal { children: ready } };
            if node.summary.is_some() || node.children().iter().all(|c| c.summary.is_none()) {
                return (node, topics);
            }

            let outcome = self.run(&UmbrellaStrategy, &node).await;
            if let Some(topic) = outcome.topic {
                topics.insert(node.id.clone(), topic);
            }
            (node.with_summary(outcome.text), topics)
        }
        .boxed()
    }

    /// Top-down: re-anchor each child of `node` to the node's theme, then
    /// descend. Children of a node whose theme is unknown keep their summaries.
    fn refine_pass<'a>(
        &'a self,
        node: Cluster,
        topic: Option<String>,
        umbrella_topics: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Cluster> {
        async move {
            let Cluster { id, pivots, summary, body } = node;
            let children = match body {
                ClusterBody::Leaf { items } => {
                    return Cluster { id, pivots, summary, body: ClusterBody::Leaf { items } };
                }
                ClusterBody::Internal { children } => children,
            };

            let parent_count: usize = children.iter().map(Cluster::total_item_count).sum();
            let mut refined: HashMap<String, Outcome> = match topic.as_deref() {
                Some(parent_topic) => {
                    let strategy = RefineStrategy {
                        parent_count,
                        parent_topic,
                        char_limit: self.char_limit,
                    };
                    let strategy = &strategy;
                    let pending: Vec<_> = children
                        .iter()
                        .map(|child| async move { (child.id.clone(), self.run(strategy, child).await) })
                        .collect();
                    stream::iter(pending).buffer_unordered(self.meta_workers).collect().await
                }
                None => HashMap::new(),
            };

            let mut descended = Vec::with_capacity(children.len());
            for child in children {
                let (child, child_topic) = match refined.remove(&child.id) {
                    Some(outcome) => {
                        let child_topic = outcome.topic.or_else(|| umbrella_topics.get(&child.id).cloned());
                        (child.with_summary(outcome.text), child_topic)
                    }
                    None => {
                        let child_topic = umbrella_topics.get(&child.id).cloned();
                        (child, child_topic)
                    }
                };
                descended.push(self.refine_pass(child, child_topic, umbrella_topics).await);
            }

            Cluster { id, pivots, summary, body: ClusterBody::Internal { children: descended } }
        }
        .boxed()
    }
}

/// Copy of `node` with summaries from `summaries` filled in by cluster id
fn apply_summaries(node: &Cluster, summaries: &HashMap<String, String>) -> Cluster {
    let body = match &node.body {
        ClusterBody::Leaf { items } => ClusterBody::Leaf { items: items.clone() },
        ClusterBody::Internal { children } => ClusterBody::Internal {
            children: children.iter().map(|c| apply_summaries(c, summaries)).collect(),
        },
    };
    Cluster {
        id: node.id.clone(),
        pivots: node.pivots.clone(),
        summary: summaries.get(&node.id).cloned().or_else(|| node.summary.clone()),
        body,
    }
}
