//! Coordination store: the shared, crash-prone key-value store every instance
//! talks to.
//!
//! Correctness of leadership, per-job claims and the job queue rests entirely
//! on the atomic primitives below. Implementations must make each call atomic
//! on its own; no multi-key transactions are required.

use std::sync::Arc;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use in_memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCoordinationStore;

/// Coordination store error.
///
/// Every variant is treated as transient by the scheduler: the operation is
/// retried on the next tick.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Atomic primitives offered by the coordination store.
pub trait CoordinationStore: Send + Sync + core::fmt::Debug {
    /// Set `key` to `value` with a TTL only if `key` does not exist.
    /// Returns `true` when this call created the key.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Unconditionally set `key`, optionally with a TTL.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Reset the TTL of an existing key. Returns `false` if the key is gone.
    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `value` (compare-and-delete).
    fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Add or re-score `member` in the sorted set at `key`.
    fn sorted_add(&self, key: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ascending by score, skipping the
    /// first `offset` and returning at most `limit`.
    fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>>;

    /// Remove `member`. Removing a missing member is not an error.
    fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    fn sorted_len(&self, key: &str) -> StoreResult<usize>;
}

impl<S> CoordinationStore for Arc<S>
where
    S: CoordinationStore + ?Sized,
{
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        (**self).set_if_absent(key, value, ttl)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl)
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        (**self).expire(key, ttl)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        (**self).delete_if_equals(key, value)
    }

    fn sorted_add(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        (**self).sorted_add(key, member, score)
    }

    fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        (**self).sorted_range_by_score(key, min, max, offset, limit)
    }

    fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        (**self).sorted_remove(key, member)
    }

    fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        (**self).sorted_len(key)
    }
}
