//! Read-model cache
//!
//! Maps a query key to the last successful result of its producer. Entries
//! past their ttl are treated as absent. Concurrent misses on one key share a
//! single producer run; failures are handed to every waiter and never stored.

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::common::Result;

/// A cached value and when it was fetched
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(key: &str, value: T, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            value,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// `now - fetched_at <= ttl`
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        self.age_at(now) <= self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    future: SharedResult<T>,
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, InFlight<T>>,
    next_flight_id: u64,
}

/// Single-flight TTL cache keyed by query string
pub struct ReadModelCache<T> {
    ttl: Duration,
    state: Mutex<CacheState<T>>,
}

impl<T> ReadModelCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight_id: 0,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the fresh value for `key`, or run `producer` (once, however many
    /// callers are waiting) and cache its successful result.
    pub async fn get<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let ttl = self.ttl;
        self.get_with_ttl(key, producer, move |_| ttl).await
    }

    /// Like `get`, but the stored entry lives for `ttl_of(value)`
    pub async fn get_with_ttl<F, Fut, L>(&self, key: &str, producer: F, ttl_of: L) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        L: FnOnce(&T) -> Duration,
    {
        let (flight_id, future) = {
            let mut state = self.state.lock();

            let fresh = state
                .entries
                .get(key)
                .filter(|entry| entry.is_fresh())
                .map(|entry| entry.value.clone());
            if let Some(value) = fresh {
                debug!("Read-model cache hit for {}", key);
                return Ok(value);
            }
            if state.entries.remove(key).is_some() {
                debug!("Read-model entry {} is stale", key);
            }

            let joined = state
                .in_flight
                .get(key)
                .map(|flight| (flight.id, flight.future.clone()));
            match joined {
                Some(joined) => {
                    debug!("Joining in-flight producer for {}", key);
                    joined
                }
                None => {
                    let id = state.next_flight_id;
                    state.next_flight_id += 1;
                    let future = producer().boxed().shared();
                    state.in_flight.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut state = self.state.lock();
        // Only the flight still registered for this key may store its result;
        // an invalidation in the meantime discards it.
        if state.in_flight.get(key).map(|flight| flight.id) == Some(flight_id) {
            state.in_flight.remove(key);
            if let Ok(value) = &result {
                let ttl = ttl_of(value);
                state
                    .entries
                    .insert(key.to_string(), CacheEntry::new(key, value.clone(), ttl));
            }
        }

        result
    }

    /// Fresh cached value, without producing one
    pub fn peek(&self, key: &str) -> Option<T> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.value.clone())
    }

    pub fn invalidate(&self, key: &str) {
        let mut state = self.state.lock();
        state.entries.remove(key);
        state.in_flight.remove(key);
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut state = self.state.lock();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        state.in_flight.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    /// Drop entries past their ttl (call periodically)
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh_at(now));
        before - state.entries.len()
    }

    /// Number of stored entries, fresh or not
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
