//! Process-wide metadata cache with TTL expiry and request coalescing.
//!
//! One schema document is fetched per endpoint and parsed once; every entity
//! type it describes becomes a [`CacheRecord`] keyed by `endpoint + entity`.
//!
//! # Coalescing
//!
//! Callers that miss the cache while a fetch for the same endpoint is in
//! flight, and that fetch started less than `coalesce_window` ago, await the
//! same future instead of issuing another request. `force_refresh` skips the
//! freshness check but still joins such a fetch.
//!
//! # Ordering
//!
//! Every fetch is stamped with a generation taken when it starts. A finished
//! fetch is dropped when a newer fetch for the same endpoint was already
//! applied, so a slow response that lands after a newer one never wins.
//! A superseded caller is answered from the records, never from its own
//! document. Invalidation raises a floor so fetches started before it cannot
//! repopulate the busted keys; a floor is dropped once a newer fetch for the
//! endpoint has been applied.
//!
//! Record changes are published on a broadcast channel (see
//! [`MetadataCache::subscribe`]) for owners of derived state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::MetadataError;
use crate::loader::load_metadata_url;
use crate::parser::SchemaDocument;
use crate::transport::Transport;
use crate::types::EntityDescriptor;

/// Default lifetime of a cached record (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default window during which concurrent misses share one fetch.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(300);

const EVENT_CAPACITY: usize = 64;

/// Cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub coalesce_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            coalesce_window: DEFAULT_COALESCE_WINDOW,
        }
    }
}

impl CacheConfig {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint: String,
    pub entity: String,
}

impl CacheKey {
    pub fn new(endpoint: &str, entity: &str) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint).to_string(),
            entity: entity.to_string(),
        }
    }
}

/// A parsed entity type and its validity window.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub data: Arc<EntityDescriptor>,
    pub fetched_at: Instant,
    pub expires_at: Instant,
    generation: u64,
}

impl CacheRecord {
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Change notifications published by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { endpoint: String, entity: String },
    Invalidated { endpoint: String, entity: String },
    Cleared,
}

type FetchResult = Result<Arc<SchemaDocument>, MetadataError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    generation: u64,
    started_at: Instant,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    records: HashMap<CacheKey, CacheRecord>,
    in_flight: HashMap<String, InFlight>,
    last_generation: u64,
    /// Newest generation applied per endpoint.
    applied: HashMap<String, u64>,
    /// Fetches at or below these generations must not write the key.
    floors: HashMap<CacheKey, u64>,
    global_floor: u64,
}

impl CacheState {
    fn applied_generation(&self, endpoint: &str) -> u64 {
        self.applied.get(endpoint).copied().unwrap_or_default()
    }

    /// True when `key` was busted after a fetch of `generation` started.
    fn invalidated_since(&self, key: &CacheKey, generation: u64) -> bool {
        generation <= self.global_floor
            || self
                .floors
                .get(key)
                .is_some_and(|floor| generation <= *floor)
    }
}

struct CacheInner {
    transport: Arc<dyn Transport>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

/// Shared metadata cache. Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MetadataCache {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, CacheConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                transport,
                config,
                state: Mutex::new(CacheState::default()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get the descriptor of `entity` at `endpoint`.
    ///
    /// Serves a valid cached record unless `force_refresh` is set; otherwise
    /// fetches (or joins a coalescing fetch of) the endpoint's document.
    ///
    /// # Errors
    ///
    /// Transport failures, malformed documents and unknown entity names are
    /// returned as-is and leave no record behind for the requested key.
    pub async fn get(
        &self,
        endpoint: &str,
        entity: &str,
        force_refresh: bool,
    ) -> Result<Arc<EntityDescriptor>, MetadataError> {
        let key = CacheKey::new(endpoint, entity);

        let (generation, fetch) = {
            let mut state = self.inner.lock();
            let now = Instant::now();

            if !force_refresh {
                let cached = state
                    .records
                    .get(&key)
                    .map(|record| (record.is_valid_at(now), record.data.clone()));
                match cached {
                    Some((true, data)) => {
                        tracing::debug!(endpoint = %key.endpoint, entity, "metadata cache hit");
                        return Ok(data);
                    }
                    Some((false, _)) => {
                        tracing::debug!(
                            endpoint = %key.endpoint,
                            entity,
                            "metadata cache entry expired"
                        );
                        state.records.remove(&key);
                    }
                    None => {
                        tracing::debug!(endpoint = %key.endpoint, entity, "metadata cache miss");
                    }
                }
            }

            self.inner.join_or_start(&mut state, &key.endpoint, now)
        };

        let document = fetch.await?;
        let not_found = || MetadataError::EntityNotFound {
            endpoint: key.endpoint.clone(),
            entity: entity.to_string(),
        };

        {
            let state = self.inner.lock();
            if let Some(record) = state.records.get(&key) {
                if record.generation >= generation {
                    return Ok(record.data.clone());
                }
            }
            // A newer document won; it is the only answer, even if it
            // dropped this entity.
            if !state.invalidated_since(&key, generation)
                && state.applied_generation(&key.endpoint) > generation
            {
                return Err(not_found());
            }
        }

        // Applied, or invalidated while in flight: answer from the document
        // we were handed.
        document
            .entity(entity)
            .cloned()
            .map(Arc::new)
            .ok_or_else(not_found)
    }

    /// The current valid record for a key, without fetching.
    pub fn peek(&self, endpoint: &str, entity: &str) -> Option<CacheRecord> {
        let state = self.inner.lock();
        state
            .records
            .get(&CacheKey::new(endpoint, entity))
            .filter(|r| r.is_valid_at(Instant::now()))
            .cloned()
    }

    /// Drop the record for one entity. Fetches already in flight will not
    /// restore it.
    pub fn invalidate(&self, endpoint: &str, entity: &str) {
        let key = CacheKey::new(endpoint, entity);
        {
            let mut state = self.inner.lock();
            state.records.remove(&key);
            state.in_flight.remove(&key.endpoint);
            let floor = state.last_generation;
            state.floors.insert(key.clone(), floor);
        }
        tracing::debug!(endpoint = %key.endpoint, entity, "metadata invalidated");
        self.inner.publish(CacheEvent::Invalidated {
            endpoint: key.endpoint,
            entity: key.entity,
        });
    }

    /// Drop every record for every endpoint.
    pub fn invalidate_all(&self) {
        {
            let mut state = self.inner.lock();
            state.records.clear();
            state.in_flight.clear();
            state.floors.clear();
            state.global_floor = state.last_generation;
        }
        tracing::debug!("metadata cache cleared");
        self.inner.publish(CacheEvent::Cleared);
    }

    /// Subscribe to record changes.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // No invariant spans a panic inside the critical sections.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn join_or_start(
        self: &Arc<Self>,
        state: &mut CacheState,
        endpoint: &str,
        now: Instant,
    ) -> (u64, SharedFetch) {
        if let Some(in_flight) = state.in_flight.get(endpoint) {
            if now.duration_since(in_flight.started_at) < self.config.coalesce_window {
                tracing::debug!(
                    endpoint,
                    generation = in_flight.generation,
                    "joining in-flight metadata fetch"
                );
                return (in_flight.generation, in_flight.fetch.clone());
            }
        }

        state.last_generation += 1;
        let generation = state.last_generation;
        let fetch = self.start_fetch(endpoint.to_string(), generation);
        state.in_flight.insert(
            endpoint.to_string(),
            InFlight {
                generation,
                started_at: now,
                fetch: fetch.clone(),
            },
        );
        (generation, fetch)
    }

    fn start_fetch(self: &Arc<Self>, endpoint: String, generation: u64) -> SharedFetch {
        let transport = self.transport.clone();
        let cache: Weak<Self> = Arc::downgrade(self);

        async move {
            let result = fetch_document(transport.as_ref(), &endpoint).await;
            if let Some(cache) = cache.upgrade() {
                cache.finish(&endpoint, generation, &result);
            }
            result
        }
        .boxed()
        .shared()
    }

    fn finish(&self, endpoint: &str, generation: u64, result: &FetchResult) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            if state
                .in_flight
                .get(endpoint)
                .is_some_and(|f| f.generation == generation)
            {
                state.in_flight.remove(endpoint);
            }

            let document = match result {
                Ok(document) => document,
                Err(error) => {
                    tracing::warn!(endpoint, %error, "metadata fetch failed");
                    return;
                }
            };

            if generation <= state.global_floor {
                tracing::debug!(
                    endpoint,
                    generation,
                    "discarding metadata fetched before cache clear"
                );
                return;
            }

            let applied = state.applied.entry(endpoint.to_string()).or_default();
            if generation < *applied {
                tracing::debug!(
                    endpoint,
                    generation,
                    current = *applied,
                    "discarding superseded metadata"
                );
                return;
            }
            *applied = generation;

            let now = Instant::now();
            let expires_at = now + self.config.ttl;

            for descriptor in document.entities() {
                let key = CacheKey::new(endpoint, &descriptor.name);
                if state.floors.get(&key).is_some_and(|floor| generation <= *floor) {
                    continue;
                }
                state.records.insert(
                    key,
                    CacheRecord {
                        data: Arc::new(descriptor.clone()),
                        fetched_at: now,
                        expires_at,
                        generation,
                    },
                );
                events.push(CacheEvent::Updated {
                    endpoint: endpoint.to_string(),
                    entity: descriptor.name.clone(),
                });
            }

            // Entity types that disappeared from a newer document.
            state.records.retain(|key, record| {
                key.endpoint != endpoint
                    || record.generation >= generation
                    || document.entity(&key.entity).is_some()
            });

            // Older fetches for this endpoint are now discarded whole, so
            // floors they could hit are spent.
            state
                .floors
                .retain(|key, floor| key.endpoint != endpoint || *floor > generation);
        }

        for event in events {
            self.publish(event);
        }
    }
}

async fn fetch_document(transport: &dyn Transport, endpoint: &str) -> FetchResult {
    let xml = load_metadata_url(transport, endpoint).await?;
    Ok(Arc::new(SchemaDocument::parse(&xml)?))
}

fn normalize_endpoint(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}
