use crate::error::{AppError, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Atomically increments a fixed-window counter and sets its expiry on first write,
/// using a server-side script so the two operations can't race under concurrent callers.
const INCR_AND_EXPIRE_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Redis-backed fixed-window counter used by the rate limiter's three axes. Fails closed:
/// any connectivity error is surfaced to the caller as `AppError::Unavailable` rather than
/// silently treated as "under limit".
#[derive(Clone)]
pub struct CounterStore {
    conn: ConnectionManager,
}

impl CounterStore {
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Increments the counter for `key` within the current window, creating it with a
    /// `window_secs` TTL if this is the first hit, and returns the post-increment count.
    ///
    /// # Errors
    /// Returns `AppError::Unavailable` if the counter store is unreachable.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub(crate) async fn increment(&self, key: &str, window_secs: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(INCR_AND_EXPIRE_SCRIPT);
        let count: u64 = script
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "counter store unreachable");
                AppError::Unavailable
            })?;
        Ok(count)
    }

    /// Reads the current count for `key` without incrementing, returning `0` if absent.
    ///
    /// # Errors
    /// Returns `AppError::Unavailable` if the counter store is unreachable.
    pub(crate) async fn peek(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(key).await.map_err(|e| {
            tracing::warn!(error = %e, "counter store unreachable");
            AppError::Unavailable
        })?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::INCR_AND_EXPIRE_SCRIPT;

    #[test]
    fn script_source_is_nonempty() {
        assert!(!INCR_AND_EXPIRE_SCRIPT.trim().is_empty());
    }
}
