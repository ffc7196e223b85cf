//! Clustering module - greedy hashtag clustering
//!
//! Items are grouped by their keywords, most frequent keyword first:
//! - Size gate: keywords shared by too many items are too generic to pivot on
//! - Pack: thin candidates grow toward a useful size via their own keywords
//! - Commit: candidates above the minimum size become clusters, the rest go back
//!
//! Whatever is left at the end forms one "misc" cluster.
//!
//! The pool of unclustered items is passed by value through each step and
//! handed back, so no step holds an alias into another's working set.

use crate::models::{Cluster, Item, MISC_CLUSTER_ID};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Unclustered items keyed by conversation id (ordered, so runs are reproducible)
type Pool = BTreeMap<String, Item>;

/// Size thresholds for the greedy pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Initial candidates must be strictly smaller than this
    pub size_cap: usize,
    /// Pack step stops growing a candidate at this size
    pub pack_target: usize,
    /// Candidates must be strictly larger than this to commit
    pub min_cluster: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            size_cap: 8,
            pack_target: 7,
            min_cluster: 3,
        }
    }
}

/// Count how many items carry each keyword
pub fn keyword_counts<'a, I>(items: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = &'a Item>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        for keyword in &item.keywords {
            *counts.entry(keyword.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Keywords by descending count, ties broken by keyword text
pub fn ranked_keywords(counts: &HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts.iter().map(|(k, c)| (k.clone(), *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Keywords carried by more than half of `items`
pub fn majority_keywords(items: &[Item]) -> BTreeSet<String> {
    let half = items.len() / 2;
    keyword_counts(items)
        .into_iter()
        .filter(|(_, count)| *count > half)
        .map(|(keyword, _)| keyword)
        .collect()
}

/// Move every pool item carrying `keyword` out of the pool
fn take_matching(mut pool: Pool, keyword: &str) -> (Pool, Vec<Item>) {
    let ids: Vec<String> = pool
        .values()
        .filter(|item| item.has_keyword(keyword))
        .map(|item| item.conversation_id.clone())
        .collect();
    let taken = ids.iter().filter_map(|id| pool.remove(id)).collect();
    (pool, taken)
}

/// Grow `candidate` toward `target` one item at a time. Each round ranks the
/// keywords inside the candidate and pulls in the first pool item carrying
/// the highest-ranked keyword that still has one. Stops at the target or when
/// no keyword yields an item.
fn pack(mut pool: Pool, mut candidate: Vec<Item>, target: usize) -> (Pool, Vec<Item>) {
    while candidate.len() < target {
        let ranked = ranked_keywords(&keyword_counts(&candidate));
        let next = ranked.iter().find_map(|(keyword, _)| {
            pool.values()
                .find(|item| item.has_keyword(keyword))
                .map(|item| item.conversation_id.clone())
        });

        match next.and_then(|id| pool.remove(&id)) {
            Some(item) => candidate.push(item),
            None => break,
        }
    }
    (pool, candidate)
}

/// Partition `items` into disjoint leaf clusters covering the whole input.
/// Deterministic for a given input set.
pub fn cluster(items: Vec<Item>, params: &ClusterParams) -> Vec<Cluster> {
    let total = items.len();
    let mut pool: Pool = items
        .into_iter()
        .map(|item| (item.conversation_id.clone(), item))
        .collect();
    if pool.len() < total {
        tracing::warn!(
            "[Clustering] {} items shared a conversation id and were merged away",
            total - pool.len()
        );
    }

    let ranked = ranked_keywords(&keyword_counts(pool.values()));
    let mut consumed: BTreeSet<String> = BTreeSet::new();
    let mut clusters: Vec<Cluster> = Vec::new();

    for (keyword, _) in ranked {
        if consumed.contains(&keyword) {
            continue;
        }

        let (rest, candidate) = take_matching(pool, &keyword);
        pool = rest;

        if candidate.is_empty() {
            continue;
        }
        if candidate.len() >= params.size_cap {
            tracing::debug!("[Clustering] Skipping {} ({} items, too generic)", keyword, candidate.len());
            pool.extend(candidate.into_iter().map(|item| (item.conversation_id.clone(), item)));
            continue;
        }

        let (rest, candidate) = pack(pool, candidate, params.pack_target);
        pool = rest;

        if candidate.len() > params.min_cluster {
            let mut pivots = majority_keywords(&candidate);
            pivots.insert(keyword.clone());
            tracing::debug!("[Clustering] Committed {} with {} items", keyword, candidate.len());
            consumed.extend(pivots.iter().cloned());
            clusters.push(Cluster::leaf(format!("leaf-{}", clusters.len()), candidate, pivots));
        } else {
            // Abandon: everything goes back untouched
            pool.extend(candidate.into_iter().map(|item| (item.conversation_id.clone(), item)));
        }
    }

    if !pool.is_empty() {
        clusters.push(Cluster::leaf(MISC_CLUSTER_ID, pool.into_values().collect(), BTreeSet::new()));
    }

    tracing::info!(
        "[Clustering] {} items -> {} clusters",
        total,
        clusters.len()
    );
    clusters
}
