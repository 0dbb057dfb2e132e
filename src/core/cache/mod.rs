//! Content-addressed embedding cache
//!
//! Keys are SHA-256 over `(model, input)`, so identical texts share one
//! entry regardless of caller. Hit/miss counters are kept per tenant.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Embedding cache configuration
#[derive(Debug, Clone)]
pub struct EmbeddingCacheConfig {
    /// Entry lifetime
    pub ttl: Duration,
    /// Entry cap; inserts beyond it evict expired entries first and are
    /// otherwise dropped
    pub max_entries: usize,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Per-tenant hit/miss counters
#[derive(Default)]
pub struct TenantStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TenantStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// TTL-bounded cache of embedding vectors
pub struct EmbeddingCache {
    config: EmbeddingCacheConfig,
    entries: DashMap<String, CacheEntry>,
    stats: DashMap<String, TenantStats>,
}

impl EmbeddingCache {
    pub fn new(config: EmbeddingCacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    fn cache_key(model: &str, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(input.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up one input's vector, counting the outcome against `tenant`.
    pub fn get(&self, tenant: &str, model: &str, input: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(model, input);
        let hit = self.entries.get(&key).and_then(|entry| {
            if entry.inserted_at.elapsed() < self.config.ttl {
                Some(entry.vector.clone())
            } else {
                None
            }
        });

        let stats = self.stats.entry(tenant.to_string()).or_default();
        match &hit {
            Some(_) => stats.hits.fetch_add(1, Ordering::Relaxed),
            None => stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    /// Store one input's vector.
    pub fn insert(&self, model: &str, input: &str, vector: Vec<f32>) {
        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
            if self.entries.len() >= self.config.max_entries {
                debug!("embedding cache full; dropping insert");
                return;
            }
        }
        self.entries.insert(
            Self::cache_key(model, input),
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Hit/miss counters for a tenant; `(0, 0)` when never seen.
    pub fn tenant_counters(&self, tenant: &str) -> (u64, u64) {
        self.stats
            .get(tenant)
            .map(|s| (s.hits(), s.misses()))
            .unwrap_or((0, 0))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&self) {
        let ttl = self.config.ttl;
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }
}
