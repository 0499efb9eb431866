//! Distributed named locks over Redis.
//!
//! Acquisition is the standard `SET key token NX PX ttl` loop with capped
//! exponential backoff and a bounded overall deadline. Release compares the
//! stored token before deleting, so a holder whose TTL lapsed can never
//! delete a successor's lock. Guards release explicitly on the normal path
//! and from `Drop` on early exits.

use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{trace, warn};
use uuid::Uuid;

use scrollcap_core::{defaults, Error, HeldLock, LockManager, LockName, Result};

/// Delete KEYS[1] only while it still holds ARGV[1].
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis implementation of [`LockManager`].
pub struct RedisLockManager {
    conn: ConnectionManager,
    acquire_timeout: Duration,
    ttl: Duration,
}

impl RedisLockManager {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            acquire_timeout: Duration::from_millis(defaults::LOCK_ACQUIRE_TIMEOUT_MS),
            ttl: Duration::from_millis(defaults::LOCK_TTL_MS),
        }
    }

    pub fn with_timeouts(mut self, acquire_timeout: Duration, ttl: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self.ttl = ttl;
        self
    }
}

#[async_trait::async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(&self, name: LockName) -> Result<Box<dyn HeldLock>> {
        let key = name.as_str();
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut delay = Duration::from_millis(defaults::LOCK_RETRY_DELAY_MS);

        loop {
            let mut conn = self.conn.clone();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(self.ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                trace!(lock = key, "lock acquired");
                return Ok(Box::new(RedisLockGuard {
                    conn: self.conn.clone(),
                    key,
                    token,
                    released: false,
                    runtime: tokio::runtime::Handle::current(),
                }));
            }

            if started.elapsed() >= self.acquire_timeout {
                return Err(Error::LockTimeout {
                    name: key,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(defaults::LOCK_RETRY_DELAY_CAP_MS));
        }
    }
}

/// A held Redis lock.
pub struct RedisLockGuard {
    conn: ConnectionManager,
    key: &'static str,
    token: String,
    released: bool,
    runtime: tokio::runtime::Handle,
}

impl RedisLockGuard {
    async fn do_release(mut conn: ConnectionManager, key: &'static str, token: String) {
        let released: redis::RedisResult<i32> = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await;
        match released {
            Ok(1) => trace!(lock = key, "lock released"),
            Ok(_) => warn!(lock = key, "lock already expired at release"),
            Err(e) => warn!(lock = key, error = %e, "lock release failed"),
        }
    }
}

#[async_trait::async_trait]
impl HeldLock for RedisLockGuard {
    async fn release(mut self: Box<Self>) -> Result<()> {
        self.released = true;
        Self::do_release(self.conn.clone(), self.key, self.token.clone()).await;
        Ok(())
    }
}

impl Drop for RedisLockGuard {
    fn drop(&mut self) {
        if !self.released {
            let conn = self.conn.clone();
            let key = self.key;
            let token = std::mem::take(&mut self.token);
            // Drop cannot await; hand the release to the runtime.
            self.runtime.spawn(async move {
                RedisLockGuard::do_release(conn, key, token).await;
            });
        }
    }
}
