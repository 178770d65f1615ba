//! Request coalescing with a short-lived success cache.
//!
//! # Responsibilities
//! - Attach concurrent identical requests to one in-flight operation
//! - Serve recent successes from a TTL cache before starting new work
//! - Drop the in-flight entry the moment the operation settles
//! - Fail in-flight operations on shutdown
//!
//! # Design Decisions
//! - The map holds a weak handle; callers hold the strong ones. When every
//!   caller has given up the operation is dropped and its entry removed
//! - Entries carry a generation so a stale cleanup never removes a newer entry
//! - Failures are never cached

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::DedupConfig;
use crate::dedup::RequestSignature;
use crate::error::FetchError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

const COMPONENT: &str = "request deduplicator";

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Aggregate deduplication metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupMetrics {
    pub total_requests: u64,
    pub coalesced_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub in_flight: usize,
    pub cache_entries: usize,
}

struct InFlight<T> {
    generation: u64,
    handle: WeakShared<BoxFuture<'static, Result<T, FetchError>>>,
}

struct CachedValue<T> {
    value: T,
    expires_at: Instant,
}

struct Inner<T> {
    cache_enabled: bool,
    cache_ttl: Duration,
    max_cache_entries: usize,
    in_flight: DashMap<RequestSignature, InFlight<T>>,
    cache: Mutex<HashMap<RequestSignature, CachedValue<T>>>,
    next_generation: AtomicU64,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    shutdown: Shutdown,
}

impl<T: Clone> Inner<T> {
    fn cached(&self, signature: &RequestSignature) -> Option<T> {
        if !self.cache_enabled {
            return None;
        }
        let mut cache = self.cache.lock();
        match cache.get(signature) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                cache.remove(signature);
                None
            }
            None => None,
        }
    }

    fn store(&self, signature: &RequestSignature, value: T) {
        if !self.cache_enabled || self.max_cache_entries == 0 {
            return;
        }

        let now = Instant::now();
        let mut cache = self.cache.lock();
        if !cache.contains_key(signature) && cache.len() >= self.max_cache_entries {
            cache.retain(|_, entry| entry.expires_at > now);
            if cache.len() >= self.max_cache_entries {
                let soonest = cache
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone());
                if let Some(key) = soonest {
                    cache.remove(&key);
                }
            }
        }
        cache.insert(
            signature.clone(),
            CachedValue {
                value,
                expires_at: now + self.cache_ttl,
            },
        );
    }
}

/// Removes the in-flight entry when the operation settles or is dropped.
struct EntryGuard<T> {
    inner: Arc<Inner<T>>,
    signature: RequestSignature,
    generation: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.inner
            .in_flight
            .remove_if(&self.signature, |_, entry| entry.generation == generation);
    }
}

/// Coalesces identical concurrent requests.
pub struct Deduplicator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache_enabled: config.cache_enabled,
                cache_ttl: Duration::from_millis(config.cache_ttl_ms),
                max_cache_entries: config.max_cache_entries,
                in_flight: DashMap::new(),
                cache: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                total_requests: AtomicU64::new(0),
                coalesced_requests: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                shutdown: Shutdown::new(),
            }),
        }
    }

    /// Run `operation` unless an identical request is in flight or a fresh
    /// result is cached. Coalesced callers share the same outcome.
    pub async fn request<F, Fut>(
        &self,
        signature: RequestSignature,
        operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if self.inner.shutdown.is_triggered() {
            return Err(FetchError::ShuttingDown { component: COMPONENT });
        }
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);

        let handle = match self.inner.in_flight.entry(signature.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get().handle.upgrade() {
                Some(handle) => {
                    self.inner.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                    metrics::record_dedup("coalesced");
                    tracing::debug!(signature = %signature, "Coalescing onto in-flight request");
                    handle
                }
                None => {
                    // Every caller of the previous operation went away.
                    let (generation, handle) = self.start(&signature, operation());
                    if let Some(weak) = handle.downgrade() {
                        occupied.insert(InFlight { generation, handle: weak });
                    }
                    handle
                }
            },
            Entry::Vacant(vacant) => {
                if let Some(value) = self.inner.cached(&signature) {
                    self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_dedup("cache_hit");
                    tracing::debug!(signature = %signature, "Serving cached response");
                    return Ok(value);
                }
                self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_dedup("miss");

                let (generation, handle) = self.start(&signature, operation());
                if let Some(weak) = handle.downgrade() {
                    vacant.insert(InFlight { generation, handle: weak });
                }
                handle
            }
        };

        handle.await
    }

    fn start<Fut>(&self, signature: &RequestSignature, operation: Fut) -> (u64, SharedOutcome<T>)
    where
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let guard = EntryGuard {
            inner: self.inner.clone(),
            signature: signature.clone(),
            generation,
        };
        let handle = drive(guard, operation).boxed().shared();
        (generation, handle)
    }

    /// Drop every cached success. In-flight operations are untouched.
    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }

    /// Remove expired cache entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.cache.lock();
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at > now);
        before - cache.len()
    }

    pub fn metrics(&self) -> DedupMetrics {
        DedupMetrics {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.inner.coalesced_requests.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.len(),
            cache_entries: self.inner.cache.lock().len(),
        }
    }

    pub fn reset_metrics(&self) {
        self.inner.total_requests.store(0, Ordering::Relaxed);
        self.inner.coalesced_requests.store(0, Ordering::Relaxed);
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        self.inner.cache_misses.store(0, Ordering::Relaxed);
    }

    /// Fail every in-flight operation and refuse new requests.
    pub fn shutdown(&self) {
        let interrupted = self.inner.shutdown.receiver_count();
        if !self.inner.shutdown.trigger() {
            return;
        }
        let in_flight = self.inner.in_flight.len();
        self.inner.in_flight.clear();
        self.inner.cache.lock().clear();
        tracing::info!(in_flight, interrupted, "Request deduplicator shut down");
    }
}

async fn drive<T, Fut>(guard: EntryGuard<T>, operation: Fut) -> Result<T, FetchError>
where
    T: Clone,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut shutdown = guard.inner.shutdown.subscribe();
    if guard.inner.shutdown.is_triggered() {
        return Err(FetchError::ShuttingDown { component: COMPONENT });
    }

    let result = tokio::select! {
        result = operation => result,
        _ = shutdown.recv() => Err(FetchError::ShuttingDown { component: COMPONENT }),
    };

    if let Ok(value) = &result {
        guard.inner.store(&guard.signature, value.clone());
    }
    result
}
