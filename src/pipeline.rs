//! End-to-end build: fetch -> keywords -> clusters -> tree -> summaries

use crate::ai_client::CompletionClient;
use crate::cache::{ClusterReport, ResultCache};
use crate::clustering::{cluster, ClusterParams};
use crate::error::PipelineError;
use crate::hierarchy::meta_cluster;
use crate::keywords::{local_keywords, KeywordExtractor};
use crate::models::{sort_for_display, Cluster, Item};
use crate::retry::RetryPolicy;
use crate::settings::Settings;
use crate::source::{Credentials, ItemSource};
use crate::summary::Summarizer;
use std::sync::Arc;

pub struct Pipeline {
    source: Arc<dyn ItemSource>,
    extractor: KeywordExtractor,
    summarizer: Summarizer,
    params: ClusterParams,
}

impl Pipeline {
    pub fn new(source: Arc<dyn ItemSource>, client: Arc<dyn CompletionClient>, settings: &Settings) -> Self {
        let extractor = KeywordExtractor::new(client.clone(), settings.model.clone())
            .with_retry(RetryPolicy::from_settings(settings))
            .with_workers(settings.keyword_workers)
            .with_char_limit(settings.prompt_char_limit);
        Pipeline {
            source,
            extractor,
            summarizer: Summarizer::from_settings(client, settings),
            params: ClusterParams::default(),
        }
    }

    pub fn with_params(mut self, params: ClusterParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.extractor = self.extractor.with_retry(retry);
        self.summarizer = self.summarizer.with_retry(retry);
        self
    }

    /// Run every stage for one requester. Only a fetch failure or a broken
    /// tree aborts; model failures end up as fallback text in the tree.
    pub async fn build(&self, credentials: &Credentials) -> Result<Vec<Cluster>, PipelineError> {
        let items = self.source.fetch(credentials).await?;
        let fetched = items.len();
        tracing::info!("[Pipeline] Fetched {} threads", fetched);

        let items = self.extractor.extract(items).await;
        let roots = arrange(items, &self.params)?;
        let roots = self.summarizer.summarize(&roots).await;

        tracing::info!("[Pipeline] Built {} topics from {} threads", roots.len(), fetched);
        Ok(sort_for_display(roots))
    }
}

/// Cluster and meta-cluster tagged items, checking that every item landed
/// exactly once
fn arrange(items: Vec<Item>, params: &ClusterParams) -> Result<Vec<Cluster>, PipelineError> {
    let expected = items.len();
    let roots = meta_cluster(cluster(items, params));

    let placed: usize = roots.iter().map(Cluster::total_item_count).sum();
    if placed != expected {
        return Err(PipelineError::Build(format!(
            "{} threads in, {} placed in the topic tree",
            expected, placed
        )));
    }
    Ok(roots)
}

/// Topic tree without any model calls: local keywords, no summaries
pub fn offline_tree(items: Vec<Item>, params: &ClusterParams) -> Result<Vec<Cluster>, PipelineError> {
    let tagged = items
        .into_iter()
        .map(|item| {
            let keywords = local_keywords(&item.text, 5);
            item.with_keywords(keywords)
        })
        .collect();
    Ok(sort_for_display(arrange(tagged, params)?))
}

/// The pipeline behind the per-identity cache
pub struct TopicService {
    pipeline: Pipeline,
    cache: ResultCache,
}

impl TopicService {
    pub fn new(pipeline: Pipeline, cache: ResultCache) -> Self {
        TopicService { pipeline, cache }
    }

    pub async fn topics_for(&self, identity: &str, credentials: &Credentials) -> Result<ClusterReport, PipelineError> {
        self.cache
            .get_or_build(identity, || self.pipeline.build(credentials))
            .await
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    fn item(text: &str, convo: &str) -> Item {
        Item::new(text, convo, vec![convo.to_string()])
    }

    #[test]
    fn test_offline_tree_places_every_item() {
        let mut items = Vec::new();
        for i in 0..5 {
            items.push(item(&format!("compilers and parsers, part {} #rust", i), &format!("r{}", i)));
        }
        items.push(item("sourdough starter tips", "bread"));
        items.push(item("marathon training plan", "run"));

        let roots = offline_tree(items, &ClusterParams::default()).unwrap();
        let total: usize = roots.iter().map(Cluster::total_item_count).sum();
        assert_eq!(total, 7);
        assert!(roots.iter().any(|r| r.pivots.contains("#rust")));
        assert!(roots.last().unwrap().is_misc());
        assert!(roots.iter().all(|r| r.summary.is_none()));
    }

    #[test]
    fn test_offline_tree_empty() {
        assert!(offline_tree(Vec::new(), &ClusterParams::default()).unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_error_messages() {
        let fetch = PipelineError::Fetch(SourceError::Unauthorized);
        assert!(fetch.user_message().contains("unavailable"));
        let build = PipelineError::Build("x".to_string());
        assert!(build.user_message().contains("retry"));
    }
}
