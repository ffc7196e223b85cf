//! Keyword extraction
//!
//! Primary: ask the completion model for topic hashtags per item
//! Fallback: TF-scored keywords from the item text (no network)
//!
//! Hashtags written literally in the text are always kept.

use crate::ai_client::{CompletionClient, CompletionRequest};
use crate::models::{normalize_keyword, Item};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::utils::safe_truncate;
use futures::{stream, StreamExt};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Stop words to filter out
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can",
    "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "me",
    "him", "her", "us", "them", "my", "your", "his", "its", "our", "their", "what", "which",
    "who", "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few",
    "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "just", "also", "now", "here", "there", "then", "once",
    "if", "because", "as", "until", "while", "about", "against", "between", "into",
    "through", "during", "before", "after", "above", "below", "from", "up", "down", "out",
    "off", "over", "under", "again", "further", "any", "like", "get", "got", "getting",
    "make", "made", "making", "use", "using", "used", "need", "want", "know", "think",
    "see", "look", "find", "give", "tell", "say", "said", "go", "going", "come", "take",
    "yes", "yeah", "okay", "ok", "sure", "right", "well", "actually", "really",
    "thing", "things", "something", "anything", "everything", "way", "ways", "time",
    "new", "old", "good", "bad", "first", "last", "long", "great", "little",
    "today", "people", "don't", "it's", "i'm", "can't", "one", "two",
    "rt", "http", "https", "amp", "retweet", "tweet", "tweets", "thread",
];

const KEYWORD_PROMPT: &str = r#"TWEET:
"""
{text}
"""

List the hashtags that describe the topics of TWEET. Rules:

- Return between 1 and 5 hashtags.
- Prefer broad topics (for example #ai or #startups) over long phrases.
- Reuse hashtags that already appear in TWEET.

Reply with the hashtags only, separated by spaces."#;

fn hashtag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#[\p{L}\p{N}_][\p{L}\p{N}_-]*").expect("static regex"))
}

/// Hashtags written literally in `text`, normalized
pub fn literal_hashtags(text: &str) -> BTreeSet<String> {
    hashtag_pattern()
        .find_iter(text)
        .filter_map(|m| normalize_keyword(m.as_str()))
        .collect()
}

/// Parse a model reply into hashtags. Bare words are accepted when the model
/// forgot the `#`.
pub fn parse_keyword_response(text: &str) -> BTreeSet<String> {
    let tagged = literal_hashtags(text);
    if !tagged.is_empty() {
        return tagged;
    }
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty() && w.len() <= 30)
        .filter_map(normalize_keyword)
        .take(5)
        .collect()
}

/// Extract keywords from text using TF-like scoring, returned as hashtags
pub fn local_keywords(text: &str, top_n: usize) -> BTreeSet<String> {
    let stop_set: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let without_links: String = text
        .split_whitespace()
        .filter(|w| !w.starts_with("http") && !w.starts_with('@') && !w.starts_with('#'))
        .collect::<Vec<_>>()
        .join(" ");

    // Count word frequencies
    let mut word_counts: HashMap<String, usize> = HashMap::new();
    let mut total_words = 0;

    for word in tokenize(&without_links) {
        if word.len() < 3 || word.len() > 25 {
            continue;
        }
        if stop_set.contains(word.as_str()) {
            continue;
        }
        // Skip numbers
        if word.chars().all(|c| c.is_numeric()) {
            continue;
        }
        *word_counts.entry(word).or_insert(0) += 1;
        total_words += 1;
    }

    let mut keywords = literal_hashtags(text);
    if total_words == 0 {
        return keywords;
    }

    let mut scored: Vec<(String, f64)> = word_counts
        .into_iter()
        .map(|(word, count)| {
            let tf = count as f64 / total_words as f64;
            // Boost multi-occurrence words
            let boost = if count > 1 { 1.0 + (count as f64).ln() } else { 1.0 };
            (word, tf * boost)
        })
        .collect();

    // Score descending, then alphabetical so ties are stable
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    keywords.extend(
        scored
            .into_iter()
            .take(top_n)
            .filter_map(|(word, _)| normalize_keyword(&word)),
    );
    keywords
}

/// Tokenize text into lowercase words
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_matches('\'').to_string())
        .collect()
}

/// Attaches keyword sets to items through the completion capability
pub struct KeywordExtractor {
    client: Arc<dyn CompletionClient>,
    model: String,
    retry: RetryPolicy,
    workers: usize,
    char_limit: usize,
}

impl KeywordExtractor {
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        KeywordExtractor {
            client,
            model: model.into(),
            retry: RetryPolicy::default(),
            workers: 10,
            char_limit: 10_000,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_char_limit(mut self, char_limit: usize) -> Self {
        self.char_limit = char_limit;
        self
    }

    /// Keywords for one item. Falls back to local extraction when the model
    /// cannot be reached.
    pub async fn keywords_for(&self, item: &Item) -> BTreeSet<String> {
        let prompt = KEYWORD_PROMPT.replace("{text}", safe_truncate(&item.text, self.char_limit));
        let request = CompletionRequest::new(&self.model, prompt);
        let label = format!("keywords for {}", item.conversation_id);

        let mut keywords = match retry_with_backoff(&self.retry, &label, || self.client.complete(&request)).await {
            Ok(reply) => parse_keyword_response(&reply),
            Err(_) => local_keywords(&item.text, 5),
        };
        keywords.extend(literal_hashtags(&item.text));
        keywords
    }

    /// Attach keywords to every item. Results are paired back by conversation
    /// id, so completion order does not matter.
    pub async fn extract(&self, items: Vec<Item>) -> Vec<Item> {
        let calls: Vec<_> = items
            .iter()
            .map(|item| async move { (item.conversation_id.clone(), self.keywords_for(item).await) })
            .collect();
        let found: HashMap<String, BTreeSet<String>> =
            stream::iter(calls).buffer_unordered(self.workers).collect().await;

        tracing::info!("[Keywords] Tagged {} threads", found.len());

        items
            .into_iter()
            .map(|item| {
                let keywords = found.get(&item.conversation_id).cloned().unwrap_or_default();
                item.with_keywords(keywords)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EchoTags;

    #[async_trait]
    impl CompletionClient for EchoTags {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            // Tag by the first word after the opening quotes
            let prompt = request.user_prompt();
            let body = prompt.split("\"\"\"").nth(1).unwrap_or("").trim();
            let first = body.split_whitespace().next().unwrap_or("none");
            Ok(format!("#{} #Shared", first))
        }
    }

    /// Tags like `EchoTags`, but the first-submitted item ("alpha") replies last
    struct SlowAlpha {
        finished: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for SlowAlpha {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            let prompt = request.user_prompt();
            let first = prompt.split("\"\"\"").nth(1).unwrap_or("").split_whitespace().next().unwrap_or("none");
            let delay = if first == "alpha" { 30 } else { 1 };
            tokio::time::sleep(Duration::from_secs(delay)).await;
            self.finished.lock().unwrap().push(first.to_string());
            Ok(format!("#{}", first))
        }
    }

    struct Down;

    #[async_trait]
    impl CompletionClient for Down {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
            Err(CompletionError::Other("offline".to_string()))
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1) }
    }

    #[test]
    fn test_literal_hashtags() {
        let tags = literal_hashtags("Shipping #Rust 1.80 today! #rust #open-source #");
        assert_eq!(tags, BTreeSet::from(["#rust".to_string(), "#open-source".to_string()]));
    }

    #[test]
    fn test_parse_keyword_response_bare_words() {
        let tags = parse_keyword_response("ai, startups funding");
        assert!(tags.contains("#ai"));
        assert!(tags.contains("#startups"));
        assert!(tags.contains("#funding"));
    }

    #[test]
    fn test_local_keywords() {
        let text = "Rust programming is great for systems programming. Rust is memory safe. #oss";
        let keywords = local_keywords(text, 2);
        assert!(keywords.contains("#rust"));
        assert!(keywords.contains("#programming"));
        assert!(keywords.contains("#oss"));
        assert!(!keywords.contains("#is"));
    }

    #[tokio::test]
    async fn test_extract_pairs_by_conversation() {
        let extractor = KeywordExtractor::new(Arc::new(EchoTags), "test-model").with_workers(3);
        let items = vec![
            Item::new("alpha thread", "c1", vec![]),
            Item::new("beta thread #extra", "c2", vec![]),
            Item::new("gamma thread", "c3", vec![]),
        ];
        let tagged = extractor.extract(items).await;

        assert_eq!(tagged.len(), 3);
        assert!(tagged[0].has_keyword("#alpha"));
        assert!(tagged[1].has_keyword("#beta"));
        assert!(tagged[1].has_keyword("#extra"));
        assert!(tagged[2].has_keyword("#gamma"));
        assert!(tagged.iter().all(|i| i.has_keyword("#shared")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_pairs_out_of_order_replies() {
        let client = Arc::new(SlowAlpha { finished: Mutex::new(Vec::new()) });
        let extractor = KeywordExtractor::new(client.clone(), "test-model").with_workers(3);
        let items = vec![
            Item::new("alpha thread", "c1", vec![]),
            Item::new("beta thread", "c2", vec![]),
            Item::new("gamma thread", "c3", vec![]),
        ];
        let tagged = extractor.extract(items).await;

        let finished = client.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 3);
        assert_eq!(finished[2], "alpha");

        assert_eq!(tagged[0].conversation_id, "c1");
        assert_eq!(tagged[0].keywords, BTreeSet::from(["#alpha".to_string()]));
        assert_eq!(tagged[1].keywords, BTreeSet::from(["#beta".to_string()]));
        assert_eq!(tagged[2].keywords, BTreeSet::from(["#gamma".to_string()]));
    }

    #[tokio::test]
    async fn test_extract_falls_back_to_local() {
        let extractor = KeywordExtractor::new(Arc::new(Down), "test-model").with_retry(fast_retry());
        let items = vec![Item::new("compilers compilers compilers #llvm", "c1", vec![])];
        let tagged = extractor.extract(items).await;
        assert!(tagged[0].has_keyword("#compilers"));
        assert!(tagged[0].has_keyword("#llvm"));
    }
}
