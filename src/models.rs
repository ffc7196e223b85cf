use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Raw post as handed over by the item source, before thread collapsing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub text: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    /// Id of the post this one reposts/quotes, if any
    #[serde(rename = "referencedId", default)]
    pub referenced_id: Option<String>,
}

/// One collapsed conversation ("thread") with its keyword set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub text: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "postIds")]
    pub post_ids: Vec<String>,
    /// Normalized keywords: lowercase, deduplicated, `#`-prefixed
    #[serde(default)]
    pub keywords: BTreeSet<String>,
}

impl Item {
    pub fn new(text: impl Into<String>, conversation_id: impl Into<String>, post_ids: Vec<String>) -> Self {
        Item {
            text: text.into(),
            conversation_id: conversation_id.into(),
            post_ids,
            keywords: BTreeSet::new(),
        }
    }

    /// Returns a copy carrying `keywords`. Items are never mutated after this.
    pub fn with_keywords<I, S>(self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Item {
            keywords: keywords
                .into_iter()
                .filter_map(|k| normalize_keyword(k.as_ref()))
                .collect(),
            ..self
        }
    }

    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.contains(keyword)
    }
}

/// Case-fold a keyword and give it a single leading `#`.
/// Returns None for empty or punctuation-only input.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches('#')
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("#{}", trimmed.to_lowercase()))
}

/// Shape of a cluster node: either it owns items or it owns child clusters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBody {
    Leaf { items: Vec<Item> },
    Internal { children: Vec<Cluster> },
}

/// Node of the topic tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    /// Stable id within one build, used to pair concurrent results back to nodes
    pub id: String,
    pub pivots: BTreeSet<String>,
    pub summary: Option<String>,
    pub body: ClusterBody,
}

/// Id given to the catch-all cluster of items no keyword could group
pub const MISC_CLUSTER_ID: &str = "misc";

impl Cluster {
    pub fn leaf(id: impl Into<String>, items: Vec<Item>, pivots: BTreeSet<String>) -> Self {
        Cluster {
            id: id.into(),
            pivots,
            summary: None,
            body: ClusterBody::Leaf { items },
        }
    }

    pub fn internal(id: impl Into<String>, children: Vec<Cluster>, pivots: BTreeSet<String>) -> Self {
        Cluster {
            id: id.into(),
            pivots,
            summary: None,
            body: ClusterBody::Internal { children },
        }
    }

    pub fn with_summary(self, summary: impl Into<String>) -> Self {
        Cluster {
            summary: Some(summary.into()),
            ..self
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, ClusterBody::Leaf { .. })
    }

    pub fn is_misc(&self) -> bool {
        self.id == MISC_CLUSTER_ID
    }

    /// Items owned directly by this node (empty for internal nodes)
    pub fn items(&self) -> &[Item] {
        match &self.body {
            ClusterBody::Leaf { items } => items,
            ClusterBody::Internal { .. } => &[],
        }
    }

    /// Direct children (empty for leaves)
    pub fn children(&self) -> &[Cluster] {
        match &self.body {
            ClusterBody::Leaf { .. } => &[],
            ClusterBody::Internal { children } => children,
        }
    }

    /// Own items plus the recursive counts of all children
    pub fn total_item_count(&self) -> usize {
        self.items().len()
            + self
                .children()
                .iter()
                .map(Cluster::total_item_count)
                .sum::<usize>()
    }

    /// Every item reachable from this node, depth-first
    pub fn all_items(&self) -> Vec<&Item> {
        let mut out: Vec<&Item> = self.items().iter().collect();
        for child in self.children() {
            out.extend(child.all_items());
        }
        out
    }

    /// Every leaf reachable from this node (the node itself if it is a leaf)
    pub fn leaves(&self) -> Vec<&Cluster> {
        match &self.body {
            ClusterBody::Leaf { .. } => vec![self],
            ClusterBody::Internal { children } => children.iter().flat_map(Cluster::leaves).collect(),
        }
    }
}

/// Sort roots for display: largest first, misc always last
pub fn sort_for_display(mut roots: Vec<Cluster>) -> Vec<Cluster> {
    roots.sort_by(|a, b| {
        a.is_misc()
            .cmp(&b.is_misc())
            .then_with(|| b.total_item_count().cmp(&a.total_item_count()))
    });
    roots
}
