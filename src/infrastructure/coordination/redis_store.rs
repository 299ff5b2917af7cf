use crate::domain::ports::CoordinationStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use tracing::info;

/// Compare-and-set: swap only when the current value matches the expectation.
/// ARGV[1] = '1' when the key is expected absent, ARGV[2] = expected value,
/// ARGV[3] = new value.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if cur == false then
    redis.call('SET', KEYS[1], ARGV[3])
    return 1
  end
  return 0
end
if cur == ARGV[2] then
  redis.call('SET', KEYS[1], ARGV[3])
  return 1
end
return 0
"#;

/// Counter increment that arms the TTL on first touch, so rate-limit windows
/// expire on their own.
const INCR_TTL_SCRIPT: &str = r#"
local v = redis.call('INCR', KEYS[1])
if v == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return v
"#;

/// Coordination store backed by Redis. All operations go through a
/// `ConnectionManager`, which transparently reconnects.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn: ConnectionManager,
    cas: Script,
    incr_ttl: Script,
}

impl RedisCoordinationStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).context("Invalid coordination store URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to coordination store")?;
        info!("Connected to coordination store: {}", url);
        Ok(Self {
            conn,
            cas: Script::new(CAS_SCRIPT),
            incr_ttl: Script::new(INCR_TTL_SCRIPT),
        })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .context("Coordination store GET failed")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(key, value)
            .await
            .context("Coordination store SET failed")?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .context("Coordination store SETEX failed")?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas
            .key(key)
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(expected.unwrap_or_default())
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .context("Coordination store CAS failed")?;
        Ok(swapped == 1)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .incr_ttl
            .key(key)
            .arg(ttl.as_millis() as i64)
            .invoke_async(&mut conn)
            .await
            .context("Coordination store INCR failed")?;
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .context("Coordination store DEL failed")?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(channel, message)
            .await
            .context("Coordination store PUBLISH failed")?;
        Ok(())
    }
}
