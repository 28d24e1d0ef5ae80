//! Redis-backed [`SharedStore`].
//!
//! Rate-limit windows map onto Redis sorted sets and are updated by one Lua
//! script per call. Cached values are plain strings with `PX` expiry. Every
//! process pointed at the same Redis shares one view of the limits and the
//! cache.

use crate::error::StoreError;
use crate::store::SharedStore;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use rootcause::prelude::Report;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::instrument;

/// Keys deleted per `DEL` when clearing a prefix.
const DELETE_BATCH: usize = 500;

/// Trims the window, counts it and admits the member only below the limit.
///
/// KEYS[1] window key; ARGV: expired-at score, member, score, max, ttl (ms).
/// Returns the window size after the insert, or -1 when full.
static ADMIT_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count >= tonumber(ARGV[4]) then
  return -1
end
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return count + 1
",
    )
});

/// A shared store talking to Redis through a multiplexed connection manager.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn command_error(command: &'static str, e: &redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    } else {
        StoreError::CommandFailed {
            command,
            reason: e.to_string(),
        }
    }
}

/// Escapes glob metacharacters so a literal prefix can be used with `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisStore {
    /// Connects to Redis at `url` (e.g. `redis://localhost:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, Report<StoreError>> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable {
            reason: e.to_string(),
        })?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, Report<StoreError>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| command_error("GET", &e))?;
        Ok(value)
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Report<StoreError>> {
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .pset_ex(key, value, millis(ttl))
                    .await
                    .map_err(|e| command_error("PSETEX", &e))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| command_error("SET", &e))?;
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete(&self, key: &str) -> Result<bool, Report<StoreError>> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| command_error("DEL", &e))?;
        Ok(removed > 0)
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, Report<StoreError>> {
        let keys: Vec<String> = {
            let mut scan_conn = self.manager.clone();
            let mut iter = scan_conn
                .scan_match::<_, String>(glob_escape(prefix))
                .await
                .map_err(|e| command_error("SCAN", &e))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut conn = self.manager.clone();
        let mut removed = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let count: i64 = conn
                .del(batch)
                .await
                .map_err(|e| command_error("DEL", &e))?;
            removed += u64::try_from(count).unwrap_or(0);
        }
        Ok(removed)
    }

    #[instrument(level = "debug", skip(self))]
    async fn sorted_set_len(&self, key: &str) -> Result<u64, Report<StoreError>> {
        let mut conn = self.manager.clone();
        let count: u64 = conn
            .zcard(key)
            .await
            .map_err(|e| command_error("ZCARD", &e))?;
        Ok(count)
    }

    #[instrument(level = "debug", skip(self))]
    async fn sorted_set_admit(
        &self,
        key: &str,
        expired_at: i64,
        member: &str,
        score: i64,
        max: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, Report<StoreError>> {
        let mut conn = self.manager.clone();
        let size: i64 = ADMIT_SCRIPT
            .key(key)
            .arg(expired_at)
            .arg(member)
            .arg(score)
            .arg(max)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| command_error("EVALSHA", &e))?;
        Ok(u64::try_from(size).ok())
    }
}
