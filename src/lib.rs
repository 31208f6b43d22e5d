pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;
pub mod workers;

use crate::adapters::database::key_repo::KeyRepository;
use crate::adapters::database::transparency_repo::TransparencyRepository;
use crate::adapters::redis::{CounterStore, RedisClient};
use crate::config::Config;
use crate::services::bundle_assembler::BundleAssembler;
use crate::services::health_service::HealthService;
use crate::services::key_service::KeyService;
use crate::services::proof_signer::ProofSigner;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::transparency_service::TransparencyService;
use crate::workers::EpochSealer;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct Resources {
    pub pool: adapters::database::DbPool,
    pub counter_store: RedisClient,
}

#[derive(Clone, Debug)]
pub struct Services {
    pub key_service: KeyService,
    pub bundle_assembler: BundleAssembler,
    pub rate_limit_service: RateLimitService,
    pub transparency_service: TransparencyService,
}

#[derive(Debug)]
pub struct App {
    pub resources: Resources,
    pub services: Services,
    pub health_service: HealthService,
    pub workers: Workers,
}

#[derive(Debug)]
pub struct Workers {
    pub epoch_sealer: EpochSealer,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut tasks = Vec::new();

        let epoch_sealer = self.epoch_sealer;
        tasks.push(tokio::spawn(async move {
            epoch_sealer.run(shutdown_rx).await;
        }));

        tasks
    }
}

/// Builder for constructing and wiring the application object graph.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<adapters::database::DbPool>,
    counter_store: Option<RedisClient>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    /// Creates a new builder with the provided configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, pool: None, counter_store: None, shutdown_rx: None }
    }

    /// Sets the database connection pool.
    #[must_use]
    pub fn with_database(mut self, pool: adapters::database::DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the counter-store (Redis) client backing the rate limiter.
    #[must_use]
    pub fn with_counter_store(mut self, counter_store: RedisClient) -> Self {
        self.counter_store = Some(counter_store);
        self
    }

    /// Sets the shutdown receiver for coordinating graceful exit.
    #[must_use]
    pub fn with_shutdown_rx(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(rx);
        self
    }

    /// Builds the application components by wiring all services and repositories.
    ///
    /// # Errors
    /// Returns an error if mandatory dependencies (pool, counter store, etc.) are
    /// missing, or if the signing key fails to load.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(self) -> anyhow::Result<App> {
        let pool = self.pool.ok_or_else(|| anyhow::anyhow!("database pool is required"))?;
        let counter_store = self.counter_store.ok_or_else(|| anyhow::anyhow!("counter store is required"))?;
        let _shutdown_rx = self.shutdown_rx.ok_or_else(|| anyhow::anyhow!("shutdown receiver is required"))?;

        let config = &self.config;

        let resources = Resources { pool: pool.clone(), counter_store: counter_store.clone() };

        // Initialize repositories.
        let key_repo = KeyRepository::new();
        let transparency_repo = TransparencyRepository::new();

        let trusted_proxies = parse_trusted_proxies(&config.server.trusted_proxies)?;
        let signer = Arc::new(ProofSigner::load(&config.signing)?);
        register_active_signing_key(&pool, &transparency_repo, &signer).await?;

        // Initialize core services.
        let key_service = KeyService::new(pool.clone(), key_repo.clone(), transparency_repo.clone(), config.keys.clone());
        let bundle_assembler = BundleAssembler::new(pool.clone(), key_repo);
        let rate_limit_service = RateLimitService::new(
            CounterStore::new(counter_store.connection()),
            config.rate_limit.clone(),
            trusted_proxies,
        );
        let transparency_service = TransparencyService::new(pool.clone(), transparency_repo.clone());
        let health_service = HealthService::new(pool.clone(), counter_store.clone(), config.health.clone());

        let services = Services { key_service, bundle_assembler, rate_limit_service, transparency_service };

        let workers = Workers {
            epoch_sealer: EpochSealer::new(pool, transparency_repo, signer, config.sealing.clone()),
        };

        Ok(App { resources, services, health_service, workers })
    }
}

/// Registers the process's active signing key in the `signing_keys` table so
/// `ListSigningKeys` (§4.6) can serve it to clients verifying epochs this process
/// signs. Idempotent across restarts: `insert_signing_key` is `ON CONFLICT DO NOTHING`
/// on fingerprint.
async fn register_active_signing_key(
    pool: &adapters::database::DbPool,
    transparency_repo: &TransparencyRepository,
    signer: &ProofSigner,
) -> anyhow::Result<()> {
    let key = crate::domain::transparency::SigningKeyInfo {
        fingerprint: signer.fingerprint().to_string(),
        public_key: signer.public_key().to_vec(),
        algorithm: signer.algorithm(),
        valid_from: time::OffsetDateTime::now_utc(),
        valid_until: None,
    };
    let mut conn = pool.acquire().await?;
    transparency_repo.insert_signing_key(&mut conn, &key).await?;
    Ok(())
}

fn parse_trusted_proxies(csv: &str) -> anyhow::Result<Vec<ipnetwork::IpNetwork>> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e| anyhow::anyhow!("invalid trusted proxy CIDR {s:?}: {e}")))
        .collect()
}

/// Runs database migrations.
///
/// # Errors
/// Returns an error if migrations fail.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &adapters::database::DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await.map_err(Into::into)
}

/// Sets up a panic hook that logs the panic message and location.
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .map_or_else(|| payload.downcast_ref::<String>().map_or_else(|| "Box<Any>", String::as_str), |s| *s);

        let location = panic_info.location().map_or_else(
            || "unknown".to_string(),
            |location| format!("{}:{}:{}", location.file(), location.line(), location.column()),
        );

        tracing::error!(
            panic.message = %msg,
            panic.location = %location,
            "application panicked"
        );
    }));
}

/// Returns a future that completes when a termination signal is received.
///
/// # Panics
/// Panics if the signal handlers cannot be installed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received, starting graceful shutdown...");
}

/// Spawns a task that listens for OS signals and broadcasts a shutdown signal.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });
}
