use crate::adapters::database::DbPool;
use crate::adapters::redis::RedisClient;
use crate::config::HealthConfig;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
struct Metrics {
    status: Gauge<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("keytrans-directory");
        Self {
            status: meter
                .i64_gauge("keytrans_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

/// Backs the management server's `/readyz` probe: bounded-timeout checks of the
/// Postgres pool and the Redis-backed counter store.
#[derive(Clone, Debug)]
pub struct HealthService {
    pool: DbPool,
    counter_store: RedisClient,
    config: HealthConfig,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(pool: DbPool, counter_store: RedisClient, config: HealthConfig) -> Self {
        Self { pool, counter_store, config, metrics: Metrics::new() }
    }

    /// Checks database connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the database is unreachable.
    pub async fn check_db(&self) -> Result<(), String> {
        let db_timeout = Duration::from_millis(self.config.db_timeout_ms);

        match timeout(db_timeout, sqlx::query("SELECT 1").execute(&self.pool)).await {
            Ok(Ok(_)) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "database")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err(format!("database connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err("database connection timed out".to_string())
            }
        }
    }

    /// Checks counter-store (Redis) connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the counter store is unreachable.
    pub async fn check_counter_store(&self) -> Result<(), String> {
        let counter_store_timeout = Duration::from_millis(self.config.counter_store_timeout_ms);

        match timeout(counter_store_timeout, self.counter_store.ping()).await {
            Ok(Ok(())) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "counter_store")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "counter_store")]);
                Err(format!("counter store connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "counter_store")]);
                Err("counter store connection timed out".to_string())
            }
        }
    }
}
