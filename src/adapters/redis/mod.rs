use crate::config::CounterStoreConfig;

pub mod counters;

pub use counters::CounterStore;

/// Thin wrapper around a Redis connection manager, used solely as a sliding-window
/// counter store for the rate limiter. No pubsub, no caching: one client, one purpose.
#[derive(Clone)]
pub struct RedisClient {
    conn: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient").finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Opens a connection manager to the counter store.
    ///
    /// # Errors
    /// Returns an error if the initial connection fails.
    pub async fn new(config: &CounterStoreConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.counter_store_url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    #[must_use]
    pub fn connection(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }

    /// Pings the counter store to check connectivity.
    ///
    /// # Errors
    /// Returns an error if the ping fails.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.connection();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
