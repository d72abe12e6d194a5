//! Redis-backed counters, shared by every instance behind a load balancer

use super::store::{CounterStore, StoreError, WindowCount};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

// Increment, start the window on the first hit, report the remaining TTL.
const HIT_SCRIPT: &str = r#"
local hits = redis.call('INCR', KEYS[1])
if hits == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {hits, ttl}
"#;

pub struct RedisStore {
    connection: ConnectionManager,
    script: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!("Failed to create Redis client for rate limiting: {}", e);
            StoreError::from(e)
        })?;

        let connection = ConnectionManager::new(client).await?;

        let store = Self {
            connection,
            script: redis::Script::new(HIT_SCRIPT),
        };
        store.health_check().await?;

        debug!("Connected to Redis for rate limiting");
        Ok(store)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let (hits, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowCount {
            hits,
            reset_after: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0)),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn tracked_keys(&self) -> Option<usize> {
        None
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                message: format!("unexpected PING reply: {pong}"),
            })
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
