//! Redis-backed coordination store (optional, `redis` feature).
//!
//! Key-value primitives map onto `SET NX PX`, `PEXPIRE`, `GET`, `DEL` and a
//! small Lua compare-and-delete; the job queue maps onto a sorted set scored by
//! epoch millis.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{CoordinationStore, StoreError, StoreResult};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisCoordinationStore {
    client: Arc<redis::Client>,
    compare_and_delete: Arc<redis::Script>,
}

impl RedisCoordinationStore {
    /// Create a store from a connection URL (e.g. `redis://localhost:6379`).
    ///
    /// Connections are opened per call, so a Redis restart heals on the next
    /// tick without reconnect logic.
    pub fn new(redis_url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            compare_and_delete: Arc::new(redis::Script::new(COMPARE_AND_DELETE)),
        })
    }

    fn connection(&self) -> StoreResult<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn command_error(op: &str, e: redis::RedisError) -> StoreError {
    StoreError::Command(format!("{op} failed: {e}"))
}

impl CoordinationStore for RedisCoordinationStore {
    #[instrument(skip(self, value), err)]
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut conn)
            .map_err(|e| command_error("SET NX", e))?;
        Ok(reply.is_some())
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: String = cmd.query(&mut conn).map_err(|e| command_error("SET", e))?;
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("GET", e))
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query(&mut conn)
            .map_err(|e| command_error("PEXPIRE", e))?;
        Ok(updated == 1)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("DEL", e))?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, value), err)]
    fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke(&mut conn)
            .map_err(|e| command_error("compare-and-delete", e))?;
        Ok(removed > 0)
    }

    fn sorted_add(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_error("ZADD", e))?;
        Ok(())
    }

    fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let mut conn = self.connection()?;
        // Scores come back as doubles; epoch millis fit exactly in an f64.
        let rows: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(i64::try_from(offset).unwrap_or(i64::MAX))
            .arg(i64::try_from(limit).unwrap_or(i64::MAX))
            .query(&mut conn)
            .map_err(|e| command_error("ZRANGEBYSCORE", e))?;
        Ok(rows
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    fn sorted_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_error("ZREM", e))?;
        Ok(removed > 0)
    }

    fn sorted_len(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.connection()?;
        redis::cmd("ZCARD")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("ZCARD", e))
    }
}
