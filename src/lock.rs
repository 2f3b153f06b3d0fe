//! A simple distributed lock on top of the shard router.
//!
//! A lock is a key holding the unix time at which it expires. It is taken
//! with `SETNX` and given a TTL with `EXPIRE`. If a holder died between the
//! two, the key has no TTL; such a lock is recognised by its stored deadline
//! being in the past and is taken over.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::resp::RespValue;
use crate::router::{ShardError, ShardRouter};

pub struct ShardLock<'a> {
    router: &'a mut ShardRouter,
    prefix: String,
}

impl<'a> ShardLock<'a> {
    pub fn new(router: &'a mut ShardRouter) -> Self {
        Self {
            router,
            prefix: "lock:".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Tries to take the lock for `ttl` (rounded down to whole seconds, at
    /// least one). Returns false if someone else holds it.
    pub async fn acquire(&mut self, name: &str, ttl: Duration) -> Result<bool, ShardError> {
        let key = self.key(name);
        let ttl_secs = ttl.as_secs().max(1);

        for _ in 0..2 {
            let deadline = unix_now() + ttl_secs;
            if self.router.setnx(&key, deadline).await? == RespValue::Integer(1) {
                self.router.expire(&key, ttl_secs).await?;
                debug!(lock = %key, ttl_secs, "lock acquired");
                return Ok(true);
            }

            let stored = self.router.get(&key).await?;
            let expired = stored
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
                .is_some_and(|held_until| held_until < unix_now());

            if !expired {
                return Ok(false);
            }

            warn!(lock = %key, "taking over expired lock");
            self.router.del(vec![key.clone().into()]).await?;
        }

        Ok(false)
    }

    /// Releases the lock. Returns whether a lock key was removed.
    pub async fn release(&mut self, name: &str) -> Result<bool, ShardError> {
        let key = self.key(name);
        let removed = self.router.del(vec![key.into()]).await?;
        Ok(removed > 0)
    }

    pub async fn is_locked(&mut self, name: &str) -> Result<bool, ShardError> {
        let key = self.key(name);
        Ok(!self.router.get(&key).await?.is_null())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
