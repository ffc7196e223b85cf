//! Per-identity cache of finished topic trees
//!
//! Entries live for the freshness window. A placeholder tree is written before
//! a build starts so concurrent requests see "in progress" instead of
//! starting their own build; a placeholder older than the placeholder window
//! is assumed to belong to a crashed build and is ignored. Any build failure
//! deletes the entry so the next request starts clean.

pub mod store;

pub use store::{CacheEntry, CacheStore, MemoryStore, SqliteStore};

use crate::error::{CacheError, PipelineError};
use crate::models::Cluster;
use crate::settings::Settings;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

pub const PLACEHOLDER_ID: &str = "loading";
pub const PLACEHOLDER_SUMMARY: &str = "Your topics are still being computed, please check back in a few minutes.";

/// The tree stored while a build is running
pub fn placeholder_tree() -> Vec<Cluster> {
    vec![Cluster::leaf(PLACEHOLDER_ID, Vec::new(), BTreeSet::new()).with_summary(PLACEHOLDER_SUMMARY)]
}

pub fn is_placeholder(roots: &[Cluster]) -> bool {
    matches!(roots, [only] if only.is_leaf()
        && only.items().is_empty()
        && only.summary.as_deref() == Some(PLACEHOLDER_SUMMARY))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from a fresh cache entry
    Fresh,
    /// Built by this request
    Built,
    /// Another build is running; `roots` is the placeholder
    InProgress,
}

/// What the presentation layer gets: tree roots plus when they will be rebuilt
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub roots: Vec<Cluster>,
    pub built_at: DateTime<Utc>,
    pub next_refresh: DateTime<Utc>,
    pub status: CacheStatus,
}

/// Snapshot of one identity's entry, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub created_at: DateTime<Utc>,
    pub age_secs: i64,
    pub next_refresh: DateTime<Utc>,
    pub in_progress: bool,
    pub expired: bool,
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    freshness: Duration,
    placeholder_window: Duration,
    clock: Clock,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        ResultCache {
            store,
            freshness: Duration::hours(24),
            placeholder_window: Duration::minutes(3),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn from_settings(store: Arc<dyn CacheStore>, settings: &Settings) -> Self {
        Self::new(store).with_windows(settings.freshness_window(), settings.placeholder_window())
    }

    pub fn with_windows(mut self, freshness: Duration, placeholder_window: Duration) -> Self {
        self.freshness = freshness;
        self.placeholder_window = placeholder_window;
        self
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn write(&self, identity: &str, roots: &[Cluster], at: DateTime<Utc>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            payload: serde_json::to_string(roots)?,
            created_at: at,
        };
        self.store.put(identity, &entry)
    }

    /// A usable entry for `identity`, if any. Expired, corrupt and abandoned
    /// entries are deleted on the way.
    fn lookup(&self, identity: &str) -> Result<Option<ClusterReport>, CacheError> {
        let Some(entry) = self.store.get(identity)? else {
            tracing::info!("[Cache] Miss for {}", identity);
            return Ok(None);
        };

        let age = self.now() - entry.created_at;
        if age > self.freshness {
            tracing::info!("[Cache] Entry for {} expired ({}s old)", identity, age.num_seconds());
            self.store.delete(identity)?;
            return Ok(None);
        }

        let roots: Vec<Cluster> = match serde_json::from_str(&entry.payload) {
            Ok(roots) => roots,
            Err(e) => {
                tracing::warn!("[Cache] Corrupt entry for {}: {}", identity, e);
                self.store.delete(identity)?;
                return Ok(None);
            }
        };

        if is_placeholder(&roots) {
            if age > self.placeholder_window {
                tracing::warn!("[Cache] Abandoned build for {} ({}s old), rebuilding", identity, age.num_seconds());
                self.store.delete(identity)?;
                return Ok(None);
            }
            tracing::info!("[Cache] Build already running for {}", identity);
            return Ok(Some(ClusterReport {
                roots,
                built_at: entry.created_at,
                next_refresh: entry.created_at + self.placeholder_window,
                status: CacheStatus::InProgress,
            }));
        }

        tracing::info!("[Cache] Hit for {} ({}s old)", identity, age.num_seconds());
        Ok(Some(ClusterReport {
            roots,
            built_at: entry.created_at,
            next_refresh: entry.created_at + self.freshness,
            status: CacheStatus::Fresh,
        }))
    }

    /// Cached tree for `identity`, or the result of `build` when there is none.
    /// On build failure the entry is removed and the error returned as is.
    pub async fn get_or_build<F, Fut>(&self, identity: &str, build: F) -> Result<ClusterReport, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Cluster>, PipelineError>>,
    {
        if let Some(report) = self.lookup(identity)? {
            return Ok(report);
        }

        self.write(identity, &placeholder_tree(), self.now())?;

        let roots = match build().await {
            Ok(roots) => roots,
            Err(e) => {
                tracing::warn!("[Cache] Build for {} failed: {}", identity, e);
                self.discard(identity);
                return Err(e);
            }
        };

        let built_at = self.now();
        if let Err(e) = self.write(identity, &roots, built_at) {
            self.discard(identity);
            return Err(e.into());
        }
        tracing::info!("[Cache] Stored {} roots for {}", roots.len(), identity);

        Ok(ClusterReport {
            roots,
            built_at,
            next_refresh: built_at + self.freshness,
            status: CacheStatus::Built,
        })
    }

    fn discard(&self, identity: &str) {
        if let Err(e) = self.store.delete(identity) {
            tracing::warn!("[Cache] Could not clear entry for {}: {}", identity, e);
        }
    }

    pub fn invalidate(&self, identity: &str) -> Result<(), CacheError> {
        self.store.delete(identity)
    }

    pub fn status(&self, identity: &str) -> Result<Option<EntryInfo>, CacheError> {
        let Some(entry) = self.store.get(identity)? else {
            return Ok(None);
        };
        let age = self.now() - entry.created_at;
        let in_progress = serde_json::from_str::<Vec<Cluster>>(&entry.payload)
            .map(|roots| is_placeholder(&roots))
            .unwrap_or(false);
        Ok(Some(EntryInfo {
            created_at: entry.created_at,
            age_secs: age.num_seconds(),
            next_refresh: entry.created_at + self.freshness,
            in_progress,
            expired: age > self.freshness,
        }))
    }
}
