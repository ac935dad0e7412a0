//! Keyed time-to-live cache with stale-serve on refresh failure.
//!
//! Every probe owns one [`TtlCache`]. A value is fresh while
//! `now - computed_at < ttl`; a stale value is recomputed on the next
//! request. When recomputation fails, the previous value is served (marked
//! [`Freshness::Stale`]) instead of the error, so a flaky utility degrades
//! the display rather than blanking it.
//!
//! A failed computation is remembered for [`retry_interval`]: until it
//! passes, callers get the stale value (or the cold error) without another
//! attempt, so a missing or hanging utility is not re-run on every request.
//!
//! Concurrency: each key has its own async slot lock, held across the
//! computation. Concurrent callers for the same key wait for the in-flight
//! computation and then observe its result; at most one computation per
//! key runs at any time. Different keys never block each other.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Whether a [`Cached`] value is within its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Served past expiry because the refresh failed with `error`.
    Stale { error: String },
}

/// A value returned from the cache with its provenance.
#[derive(Debug)]
pub struct Cached<V> {
    pub value: Arc<V>,
    pub computed_at: DateTime<Utc>,
    pub age: Duration,
    pub freshness: Freshness,
}

impl<V> Clone for Cached<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            computed_at: self.computed_at,
            age: self.age,
            freshness: self.freshness.clone(),
        }
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    computed_at: Instant,
    computed_wall: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.computed_at) < self.ttl
    }

    fn cached(&self, now: Instant, freshness: Freshness) -> Cached<V> {
        Cached {
            value: Arc::clone(&self.value),
            computed_at: self.computed_wall,
            age: now.saturating_duration_since(self.computed_at),
            freshness,
        }
    }
}

/// Longest wait before a failed computation is attempted again.
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// `min(ttl, MAX_RETRY_INTERVAL)`.
pub fn retry_interval(ttl: Duration) -> Duration {
    ttl.min(MAX_RETRY_INTERVAL)
}

struct Failure<E> {
    error: E,
    at: Instant,
}

struct SlotState<V, E> {
    entry: Option<CacheEntry<V>>,
    failure: Option<Failure<E>>,
}

impl<V, E> Default for SlotState<V, E> {
    fn default() -> Self {
        Self {
            entry: None,
            failure: None,
        }
    }
}

type Slot<V, E> = Arc<tokio::sync::Mutex<SlotState<V, E>>>;

pub struct TtlCache<K, V, E> {
    slots: Mutex<HashMap<K, Slot<V, E>>>,
}

impl<K, V, E> Default for TtlCache<K, V, E> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    E: Clone + Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Slot<V, E> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Return the fresh value for `key`, or run `compute` and store its
    /// result.
    ///
    /// On compute failure the existing entry is left untouched; its value is
    /// returned as [`Freshness::Stale`]. With no entry the error is returned.
    /// Either way `compute` is not run again for [`retry_interval`]`(ttl)`.
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> Result<Cached<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(&key);
        let mut state = slot.lock().await;

        let now = Instant::now();
        if let Some(current) = state.entry.as_ref().filter(|e| e.is_fresh(now)) {
            trace!(?key, "cache hit");
            return Ok(current.cached(now, Freshness::Fresh));
        }

        let backing_off = state
            .failure
            .as_ref()
            .filter(|f| now.saturating_duration_since(f.at) < retry_interval(ttl));
        if let Some(failure) = backing_off {
            trace!(?key, "recent failure, not retrying yet");
            return match state.entry.as_ref() {
                Some(previous) => Ok(previous.cached(
                    now,
                    Freshness::Stale {
                        error: failure.error.to_string(),
                    },
                )),
                None => Err(failure.error.clone()),
            };
        }

        debug!(?key, stale = state.entry.is_some(), "cache miss, computing");
        match compute().await {
            Ok(value) => {
                let computed_at = Instant::now();
                let mut computed_wall = Utc::now();
                // Wall clock may step backwards; the stamp must not.
                if let Some(previous) = state.entry.as_ref() {
                    computed_wall = computed_wall.max(previous.computed_wall);
                }
                let fresh = CacheEntry {
                    value: Arc::new(value),
                    computed_at,
                    computed_wall,
                    ttl,
                };
                let cached = fresh.cached(computed_at, Freshness::Fresh);
                state.entry = Some(fresh);
                state.failure = None;
                Ok(cached)
            }
            Err(err) => {
                let at = Instant::now();
                state.failure = Some(Failure {
                    error: err.clone(),
                    at,
                });
                match state.entry.as_ref() {
                    Some(previous) => {
                        warn!(?key, error = %err, "refresh failed, serving stale value");
                        Ok(previous.cached(
                            at,
                            Freshness::Stale {
                                error: err.to_string(),
                            },
                        ))
                    }
                    None => {
                        warn!(?key, error = %err, "computation failed with nothing cached");
                        Err(err)
                    }
                }
            }
        }
    }

    /// Install a value computed earlier, e.g. restored from disk.
    ///
    /// Ignored when the key already holds a value or when `computed_at` is
    /// already older than `ttl`. Returns whether the value was installed.
    pub async fn seed(&self, key: K, value: V, computed_at: DateTime<Utc>, ttl: Duration) -> bool {
        let age = (Utc::now() - computed_at).to_std().unwrap_or(Duration::ZERO);
        if age >= ttl {
            return false;
        }
        let Some(instant) = Instant::now().checked_sub(age) else {
            return false;
        };

        let slot = self.slot(&key);
        let mut state = slot.lock().await;
        if state.entry.is_some() {
            return false;
        }
        state.entry = Some(CacheEntry {
            value: Arc::new(value),
            computed_at: instant,
            computed_wall: computed_at,
            ttl,
        });
        debug!(?key, age = %humantime::format_duration(age), "seeded cache entry");
        true
    }
}
