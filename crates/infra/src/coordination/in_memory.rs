//! In-memory coordination store for tests/dev.
//!
//! TTLs are evaluated lazily against an injected [`Clock`], so tests can expire
//! leases and locks by advancing a `ManualClock` instead of sleeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use stationhub_core::{Clock, SystemClock};

use super::{CoordinationStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    sorted: HashMap<String, HashMap<String, i64>>,
}

impl State {
    /// Live entry for `key`, dropping it first if its TTL has passed.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Entry> {
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get_mut(key)
    }
}

/// Single-process stand-in for the shared store.
///
/// Share one instance (behind an `Arc`) between several simulated scheduler
/// instances to exercise leadership and claim races.
#[derive(Debug)]
pub struct InMemoryCoordinationStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryCoordinationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn arc(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    /// Simulate losing connectivity: every call fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State, DateTime<Utc>) -> T) -> StoreResult<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Command("state lock poisoned".to_string()))?;
        Ok(f(&mut state, self.clock.now()))
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let expires_at = self.expiry(ttl);
        self.with_state(|state, now| {
            if state.live(key, now).is_some() {
                return false;
            }
            state.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(expires_at),
                },
            );
            true
        })
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|t| self.expiry(t));
        self.with_state(|state, _now| {
            state.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        })
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_state(|state, now| state.live(key, now).map(|e| e.value.clone()))
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let expires_at = self.expiry(ttl);
        self.with_state(|state, now| match state.live(key, now) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                true
            }
            None => false,
        })
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_state(|state, now| {
            // Like DEL, removes a key of either kind.
            let had_value = state.live(key, now).is_some();
            state.values.remove(key);
            let had_set = state.sorted.remove(key).is_some();
            had_value || had_set
        })
    }

    fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.with_state(|state, now| {
            let matches = state.live(key, now).is_some_and(|e| e.value == value);
            if matches {
                state.values.remove(key);
            }
            matches
        })
    }

    fn sorted_add(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.with_state(|state, _now| {
            state
                .sorted
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), score);
        })
    }

    fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        self.with_state(|state, _now| {
            let Some(set) = state.sorted.get(key) else {
                return Vec::new();
            };
            let mut hits: Vec<(String, i64)> = set
                .iter()
                .filter(|(_, score)| (min..=max).contains(*score))
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            // Same tie-break as Redis: score, then member.
            hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            hits.into_iter().skip(offset).take(limit).collect()
        })
    }

    fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_state(|state, _now| {
            state
                .sorted
                .get_mut(key)
                .is_some_and(|set| set.remove(member).is_some())
        })
    }

    fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        self.with_state(|state, _now| state.sorted.get(key).map_or(0, |set| set.len()))
    }
}
