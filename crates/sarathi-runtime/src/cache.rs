//! Stage B verdict cache.
//!
//! Resubmitted cases skip the classifier call. Keys hash the normalized
//! case text (lowercased, whitespace collapsed), so trivial edits to
//! spacing or case still hit.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use sarathi_core::AcceptanceDecision;

/// In-memory cache of Stage B decisions.
pub struct VerdictCache {
    cache: Cache<u64, AcceptanceDecision>,
}

impl VerdictCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn key(text: &str) -> u64 {
        let normalized = text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        hasher.finish()
    }

    pub async fn get(&self, text: &str) -> Option<AcceptanceDecision> {
        self.cache.get(&Self::key(text)).await
    }

    pub async fn insert(&self, text: &str, decision: AcceptanceDecision) {
        self.cache.insert(Self::key(text), decision).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for VerdictCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
