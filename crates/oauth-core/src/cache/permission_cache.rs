//! Permission decision cache.
//!
//! Bounded LRU keyed by the `(user, resource, permission)` triple. Every
//! entry is stamped with the store generation it was computed under; a
//! lookup under a newer generation is a miss, which is how grant writes
//! invalidate without a pub/sub channel.
//!
//! Production systems spanning processes accept bounded staleness equal to
//! the TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PermissionCacheKey {
    pub user_id: Uuid,
    pub resource: String,
    pub permission: String,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    allowed: bool,
    generation: u64,
    expires_at: Instant,
    /// recency stamp; stale queue positions are skipped lazily on eviction
    seq: u64,
}

struct CacheInner {
    map: HashMap<PermissionCacheKey, CacheEntry>,
    order: VecDeque<(u64, PermissionCacheKey)>,
    next_seq: u64,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct PermissionCache {
    capacity: usize,
    ttl: Duration,
    inner: RwLock<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PermissionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: RwLock::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached decision if it is unexpired and was computed under
    /// the current store generation.
    pub async fn get(&self, key: &PermissionCacheKey, generation: u64) -> Option<bool> {
        let mut inner = self.inner.write().await;

        let entry = match inner.map.get(key) {
            Some(entry) => entry.clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if entry.expires_at <= Instant::now() || entry.generation != generation {
            inner.map.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // touch for recency
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(live) = inner.map.get_mut(key) {
            live.seq = seq;
        }
        inner.order.push_back((seq, key.clone()));

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.allowed)
    }

    pub async fn insert(&self, key: PermissionCacheKey, allowed: bool, generation: u64) {
        let mut inner = self.inner.write().await;

        while inner.map.len() >= self.capacity {
            match inner.order.pop_front() {
                Some((seq, candidate)) => {
                    let evict = inner
                        .map
                        .get(&candidate)
                        .is_some_and(|entry| entry.seq == seq);
                    if evict {
                        inner.map.remove(&candidate);
                    }
                    // stale queue positions (touched entries) are skipped
                }
                None => break,
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.map.insert(
            key.clone(),
            CacheEntry {
                allowed,
                generation,
                expires_at: Instant::now() + self.ttl,
                seq,
            },
        );
        inner.order.push_back((seq, key));
    }

    /// Clear entire cache
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.map.clear();
        inner.order.clear();
    }

    /// Get cache statistics for monitoring
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            total_entries: inner.map.len(),
            hits,
            misses,
            hit_rate,
        }
    }
}
