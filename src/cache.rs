//! Single-flight TTL cache for authorization server metadata
//!
//! Backs both the discovery document cache (keyed by issuer) and the key set
//! cache (keyed by JWKS URI). Each key owns its own slot guarded by an async
//! mutex, so a refresh of one issuer never blocks readers of another.
//!
//! Concurrent callers asking for the same stale or missing key queue on the
//! slot lock. The first one fetches; everyone who was already waiting when
//! that fetch finished receives its result without fetching again. A failed
//! forced refresh is only shared with callers that have no fresh entry to
//! fall back on. An entry is written only after a fetch succeeds, so a
//! cancelled or failed fetch leaves the previous entry untouched.
//!
//! Forced refreshes are rate limited per key: an entry younger than the
//! refresh cooldown is returned instead of being refetched.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Thread-safe per-key single-flight cache with TTL expiry
pub struct SingleFlightCache<V, E> {
    /// Slots keyed by cache key
    slots: DashMap<String, Arc<Slot<V, E>>>,
    /// Time-to-live for fetched values
    ttl: Duration,
    /// Minimum entry age before a forced refresh refetches
    refresh_cooldown: Duration,
    /// Cache statistics
    stats: CacheStats,
}

/// Per-key state
struct Slot<V, E> {
    /// Bumped after every completed fetch, read before taking the lock
    generation: AtomicU64,
    state: Mutex<SlotState<V, E>>,
}

struct SlotState<V, E> {
    entry: Option<CachedValue<V>>,
    /// Outcome of the most recent completed fetch, shared with waiters
    last: Option<Result<V, E>>,
}

/// A cached value with TTL metadata
struct CachedValue<V> {
    value: V,
    fetched_at: Instant,
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Served from a fresh entry
    hits: AtomicU64,
    /// Fetches actually performed
    fetches: AtomicU64,
    /// Callers that received another caller's in-flight result
    shared: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Fresh-entry hits
    pub hits: u64,
    /// Fetches performed
    pub fetches: u64,
    /// Results shared from an in-flight fetch
    pub shared: u64,
    /// Current number of keys
    pub size: usize,
}

impl<V, E> Default for Slot<V, E> {
    fn default() -> Self {
        Self {
            generation: AtomicU64::new(0),
            state: Mutex::new(SlotState {
                entry: None,
                last: None,
            }),
        }
    }
}

impl<V, E> SingleFlightCache<V, E>
where
    V: Clone,
    E: Clone,
{
    /// Create a new empty cache
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            refresh_cooldown: Duration::ZERO,
            stats: CacheStats::default(),
        }
    }

    /// Refuse forced refreshes of entries younger than `cooldown`
    #[must_use]
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    /// Return the fresh value for `key`, or run `fetch` to obtain one.
    ///
    /// With `force_refresh` the TTL is replaced by the refresh cooldown, and
    /// a fetch that completed while this caller was queued is still shared
    /// rather than repeated.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `fetch` (this caller's or the one it
    /// was waiting on).
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, force_refresh: bool, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);

        let observed = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if slot.generation.load(Ordering::Acquire) != observed {
            let share = match &state.last {
                Some(Ok(_)) => true,
                // A plain read with a fresh entry outlives someone else's failed refresh
                Some(Err(_)) => force_refresh || fresh_value(state.entry.as_ref(), self.ttl).is_none(),
                None => false,
            };
            if share {
                if let Some(last) = state.last.clone() {
                    trace!(key = %key, "Sharing in-flight fetch result");
                    self.stats.shared.fetch_add(1, Ordering::Relaxed);
                    return last;
                }
            }
        }

        let max_age = if force_refresh { self.refresh_cooldown } else { self.ttl };
        if let Some(value) = fresh_value(state.entry.as_ref(), max_age) {
            if force_refresh {
                debug!(key = %key, "Refresh cooldown active, serving cached entry");
            }
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let result = fetch().await;

        if let Ok(value) = &result {
            state.entry = Some(CachedValue {
                value: value.clone(),
                fetched_at: Instant::now(),
            });
        }
        state.last = Some(result.clone());
        slot.generation.fetch_add(1, Ordering::Release);

        result
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            shared: self.stats.shared.load(Ordering::Relaxed),
            size: self.slots.len(),
        }
    }

    fn slot(&self, key: &str) -> Arc<Slot<V, E>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(key.to_string()).or_default().value())
    }
}

/// The cached value, if it is younger than `max_age`
fn fresh_value<V: Clone>(entry: Option<&CachedValue<V>>, max_age: Duration) -> Option<V> {
    entry
        .filter(|e| e.fetched_at.elapsed() < max_age)
        .map(|e| e.value.clone())
}
