//! Redis-backed store shared by every gateway process.
//!
//! Connections come from a `deadpool-redis` pool. The sliding-window hit runs
//! as a Lua script so prune, count, conditional add and expire happen in one
//! server-side step.

use std::collections::HashMap;
use std::time::Duration;

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};

use super::{ResilienceStore, StoreError, WindowHit};

/// KEYS[1] window key; ARGV now, window, limit, ttl, member.
/// Returns {count_before, admitted, oldest_score_or_empty}.
const WINDOW_HIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[5])
    admitted = 1
end
redis.call('EXPIRE', key, ttl)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = ''
if oldest[2] then
    oldest_score = oldest[2]
end
return {count, admitted, oldest_score}
"#;

/// Redis implementation of [`ResilienceStore`].
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create a pool; connections are opened lazily on first use.
    pub fn connect(url: &str, max_connections: usize) -> Result<Self, StoreError> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("failed to create Redis pool: {}", e)))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn command_error(e: ::redis::RedisError) -> StoreError {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl ResilienceStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = ::redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(command_error)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl_secs(ttl) as u64)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await.map_err(command_error)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.hgetall(key).await.map_err(command_error)
    }

    async fn hash_set_ex(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = ::redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs(ttl))
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn window_hit(
        &self,
        key: &str,
        now: f64,
        window: Duration,
        limit: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<WindowHit, StoreError> {
        let mut conn = self.conn().await?;
        let (count, admitted, oldest): (u64, i64, String) = ::redis::Script::new(WINDOW_HIT_SCRIPT)
            .key(key)
            .arg(now)
            .arg(window.as_secs_f64())
            .arg(limit)
            .arg(ttl_secs(ttl))
            .arg(member)
            .invoke_async(&mut *conn)
            .await
            .map_err(command_error)?;

        let oldest = if oldest.is_empty() {
            None
        } else {
            Some(oldest.parse::<f64>().map_err(|e| StoreError::Malformed {
                key: key.to_string(),
                reason: e.to_string(),
            })?)
        };

        Ok(WindowHit {
            count,
            admitted: admitted == 1,
            oldest,
        })
    }

    async fn window_count(&self, key: &str, now: f64, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let (count,): (u64,) = ::redis::pipe()
            .atomic()
            .zrembyscore(key, 0, now - window.as_secs_f64())
            .ignore()
            .zcard(key)
            .query_async(&mut *conn)
            .await
            .map_err(command_error)?;
        Ok(count)
    }
}
