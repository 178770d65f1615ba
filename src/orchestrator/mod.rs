//! Pipeline composition.
//!
//! # Data Flow
//! ```text
//! fetch(url, options, priority)
//!     → DeadlineGuard (one budget for everything below)
//!     → RetryManager (breaker check, attempt, classify, backoff)
//!     → Deduplicator (GET/HEAD or opted in; coalesce or serve from cache)
//!     → ConnectionPool (admission by priority)
//!     → Transport (raw network call)
//! ```
//!
//! # Design Decisions
//! - The orchestrator owns exactly one instance of each component
//! - Non-success statuses become errors inside the deduplicated operation,
//!   so failures are shared by coalesced callers but never cached
//! - Every public entry point resolves; nothing is left unsettled

pub mod metrics;

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::config::{EndpointKey, ExpiryPolicy, FetchConfig};
use crate::dedup::{Deduplicator, RequestSignature};
use crate::error::FetchError;
use crate::lifecycle::Shutdown;
use crate::pool::{ConnectionPool, Priority};
use crate::resilience::{DeadlineGuard, RetryManager};
use crate::transport::{FetchOptions, FetchRequest, FetchResponse, HttpTransport, Transport};

use self::metrics::FetchRecorder;
pub use self::metrics::{DetailedMetrics, FetchMetrics, PipelineMetrics};

/// Records returned by `detailed_metrics`.
const RECENT_OPERATIONS: usize = 50;

/// One entry of a batch fetch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub url: String,
    pub options: FetchOptions,
    pub priority: Priority,
}

impl BatchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: FetchOptions::default(),
            priority: Priority::default(),
        }
    }

    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

struct Inner {
    config: FetchConfig,
    api_timeout: Duration,
    retry: RetryManager,
    dedup: Deduplicator<FetchResponse>,
    pool: ConnectionPool,
    deadline: DeadlineGuard,
    metrics: FetchRecorder,
    shutdown: Shutdown,
}

impl Inner {
    fn endpoint_key(&self, url: &Url) -> String {
        match self.config.circuit_breaker.key_by {
            EndpointKey::Url => {
                let mut url = url.clone();
                url.set_fragment(None);
                url.to_string()
            }
            EndpointKey::Origin => url.origin().ascii_serialization(),
        }
    }

    /// Retry loop around single attempts. Owns everything it touches so it
    /// can be spawned when the expiry policy is `abandon`.
    async fn pipeline(
        self: Arc<Self>,
        request: FetchRequest,
        priority: Priority,
        endpoint: String,
        label: String,
        coalescable: bool,
    ) -> Result<FetchResponse, FetchError> {
        self.retry
            .execute_with_retry(&endpoint, &label, || {
                self.clone().attempt(request.clone(), priority, coalescable)
            })
            .await
    }

    async fn attempt(
        self: Arc<Self>,
        request: FetchRequest,
        priority: Priority,
        coalescable: bool,
    ) -> Result<FetchResponse, FetchError> {
        let signature = (coalescable && self.config.dedup.enabled)
            .then(|| RequestSignature::from_request(&request));

        let pool = self.pool.clone();
        let call = async move { pool.request(&request, priority).await?.error_for_status() };

        match signature {
            Some(signature) => self.dedup.request(signature, move || call).await,
            None => call.await,
        }
    }
}

/// The resilient fetch pipeline.
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build a pipeline over the reqwest transport.
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a pipeline over a caller-supplied transport.
    pub fn with_transport(config: FetchConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Inner {
            api_timeout: config.api_timeout(),
            retry: RetryManager::new(config.retry.clone(), config.circuit_breaker.clone()),
            dedup: Deduplicator::new(&config.dedup),
            pool: ConnectionPool::new(config.pool.max_connections, transport),
            deadline: DeadlineGuard::new(&config.deadline),
            metrics: FetchRecorder::default(),
            shutdown: Shutdown::new(),
            config,
        };
        tracing::debug!(
            profile = ?inner.config.profile,
            max_connections = inner.config.pool.max_connections,
            api_timeout_ms = inner.api_timeout.as_millis() as u64,
            "Fetch pipeline ready"
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.inner.config
    }

    /// Fetch `url` and decode the body as JSON.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
        priority: Priority,
    ) -> Result<T, FetchError> {
        self.run(url, options, priority, |response| response.json()).await
    }

    /// Fetch `url` and return the raw response.
    pub async fn fetch_response(
        &self,
        url: &str,
        options: FetchOptions,
        priority: Priority,
    ) -> Result<FetchResponse, FetchError> {
        self.run(url, options, priority, Ok).await
    }

    /// Fetch every request independently; one failure never affects the others.
    /// Results are returned in request order.
    ///
    /// Requests start in descending priority order (stable within a tier), so
    /// when the batch saturates the pool the free slots go to the highest
    /// priorities and the rest queue.
    pub async fn fetch_batch<T: DeserializeOwned>(
        &self,
        requests: Vec<BatchRequest>,
    ) -> Vec<Result<T, FetchError>> {
        let count = requests.len();
        let mut indexed: Vec<(usize, BatchRequest)> = requests.into_iter().enumerate().collect();
        indexed.sort_by_key(|(_, request)| Reverse(request.priority));

        let mut settled = join_all(indexed.into_iter().map(|(index, request)| async move {
            let BatchRequest {
                url,
                options,
                priority,
            } = request;
            (index, self.fetch::<T>(&url, options, priority).await)
        }))
        .await;
        settled.sort_by_key(|(index, _)| *index);
        let results: Vec<_> = settled.into_iter().map(|(_, result)| result).collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(requests = count, failed, "Batch fetch settled");
        results
    }

    /// Fetch `url` at the default priority, substituting `fallback` for any failure.
    pub async fn fetch_with_fallback<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
        fallback: T,
    ) -> T {
        self.fetch_with_fallback_at(url, options, Priority::default(), fallback)
            .await
    }

    /// Like [`Orchestrator::fetch_with_fallback`] with an explicit admission priority.
    pub async fn fetch_with_fallback_at<T: DeserializeOwned>(
        &self,
        url: &str,
        options: FetchOptions,
        priority: Priority,
        fallback: T,
    ) -> T {
        match self.fetch(url, options, priority).await {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(url, error = %error, "Fetch failed, using fallback");
                self.inner.metrics.record_fallback();
                fallback
            }
        }
    }

    async fn run<T, D>(
        &self,
        url: &str,
        options: FetchOptions,
        priority: Priority,
        decode: D,
    ) -> Result<T, FetchError>
    where
        D: FnOnce(FetchResponse) -> Result<T, FetchError>,
    {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "fetch",
            %request_id,
            method = %options.method,
            url,
            %priority
        );

        async move {
            let started = Instant::now();
            let result = self.execute(url, &options, priority).await.and_then(decode);
            self.inner.metrics.record(&result, started.elapsed());
            if let Err(error) = &result {
                tracing::debug!(error = %error, "Fetch failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        url: &str,
        options: &FetchOptions,
        priority: Priority,
    ) -> Result<FetchResponse, FetchError> {
        if self.inner.shutdown.is_triggered() {
            return Err(FetchError::ShuttingDown {
                component: "orchestrator",
            });
        }

        let request = FetchRequest::new(url, options)?;
        let label = options
            .label
            .clone()
            .unwrap_or_else(|| format!("{} {}", request.method, request.url));
        let endpoint = self.inner.endpoint_key(&request.url);
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.inner.api_timeout);

        let pipeline = self.inner.clone().pipeline(
            request,
            priority,
            endpoint,
            label.clone(),
            options.coalescable(),
        );

        match self.inner.config.deadline.on_expiry {
            ExpiryPolicy::Cancel => {
                self.inner
                    .deadline
                    .with_deadline(pipeline, timeout, &label)
                    .await
            }
            ExpiryPolicy::Abandon => {
                self.inner
                    .deadline
                    .with_deadline_detached(pipeline.in_current_span(), timeout, &label)
                    .await
            }
        }
    }

    /// Summary across every component.
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics::new(
            self.inner.metrics.snapshot(),
            self.inner.pool.metrics(),
            self.inner.dedup.metrics(),
            self.inner.retry.metrics(),
            self.inner.deadline.metrics(),
        )
    }

    /// Summary plus breaker snapshots and recent deadline records.
    pub fn detailed_metrics(&self) -> DetailedMetrics {
        DetailedMetrics {
            summary: self.metrics(),
            circuit_breakers: self.inner.retry.breaker_snapshots(),
            recent_operations: self.inner.deadline.recent_operations(RECENT_OPERATIONS),
        }
    }

    /// Clear the success cache, circuit breakers and all counters.
    /// Pool capacity and slot accounting are left alone.
    pub fn reset(&self) {
        self.inner.dedup.clear_cache();
        self.inner.dedup.reset_metrics();
        self.inner.retry.reset();
        self.inner.deadline.reset();
        self.inner.metrics.reset();
        tracing::info!("Pipeline metrics reset");
    }

    /// Tear down the pool and deduplicator. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.trigger() {
            return;
        }
        self.inner.pool.shutdown();
        self.inner.dedup.shutdown();
        tracing::info!("Fetch pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }
}
