//! Meta-clustering: groups leaf clusters into a topic tree
//!
//! Each cluster is treated as one unit whose keywords are its pivots. The
//! most widely shared pivot forms the first group, and so on. There is no
//! size cap and no packing here: a keyword either groups every remaining
//! cluster that carries it, or promotes a lone carrier to a root unchanged.

use crate::clustering::ranked_keywords;
use crate::models::Cluster;
use std::collections::{BTreeSet, HashMap};

/// Pivots present in more than half of `clusters`
fn majority_pivots(clusters: &[Cluster]) -> BTreeSet<String> {
    let half = clusters.len() / 2;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for cluster in clusters {
        for pivot in &cluster.pivots {
            *counts.entry(pivot.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > half)
        .map(|(pivot, _)| pivot.to_string())
        .collect()
}

/// Group clusters that share pivots into a forest. Every non-empty input
/// cluster ends up in exactly one place in the output; empty ones are dropped.
pub fn meta_cluster(clusters: Vec<Cluster>) -> Vec<Cluster> {
    let input_count = clusters.len();
    let clusters: Vec<Cluster> = clusters
        .into_iter()
        .filter(|cluster| {
            let keep = cluster.total_item_count() > 0;
            if !keep {
                tracing::debug!("[Hierarchy] Dropping empty cluster {}", cluster.id);
            }
            keep
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for cluster in &clusters {
        for pivot in &cluster.pivots {
            *counts.entry(pivot.clone()).or_insert(0) += 1;
        }
    }

    // Slots are emptied as clusters get claimed
    let mut pool: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    let mut roots: Vec<Cluster> = Vec::new();
    let mut groups = 0;

    for (keyword, _) in ranked_keywords(&counts) {
        let relevant: Vec<Cluster> = pool
            .iter_mut()
            .filter(|slot| matches!(slot, Some(c) if c.pivots.contains(&keyword)))
            .filter_map(Option::take)
            .collect();

        match relevant.len() {
            0 => {}
            1 => roots.extend(relevant),
            n => {
                let pivots = majority_pivots(&relevant);
                tracing::debug!("[Hierarchy] Grouped {} clusters under {}", n, keyword);
                roots.push(Cluster::internal(format!("meta-{}", groups), relevant, pivots));
                groups += 1;
            }
        }
    }

    // Unclaimed clusters (misc, or anything without pivots) stand alone
    roots.extend(pool.into_iter().flatten());

    tracing::info!(
        "[Hierarchy] {} clusters -> {} roots ({} groups)",
        input_count,
        roots.len(),
        groups
    );
    roots
}
