use keytrans_directory::api::MgmtState;
use keytrans_directory::config::Config;
use keytrans_directory::{AppBuilder, adapters, telemetry};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    keytrans_directory::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_server");
    let (api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx, workers) = async {
        // Phase 1: infrastructure setup (resources).
        let pool = adapters::database::init_pool(&config.database.database_url).await?;
        keytrans_directory::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        keytrans_directory::spawn_signal_handler(shutdown_tx.clone());

        let counter_store = adapters::redis::RedisClient::new(&config.counter_store).await?;

        // Phase 2: component wiring (pure logic, no side effects).
        let app = AppBuilder::new(config.clone())
            .with_database(pool)
            .with_counter_store(counter_store)
            .with_shutdown_rx(shutdown_rx.clone())
            .initialize()
            .await?;

        // Phase 3: runtime setup (listeners and routers).
        let app_state = keytrans_directory::api::AppState {
            key_service: app.services.key_service,
            bundle_assembler: app.services.bundle_assembler,
            rate_limit_service: app.services.rate_limit_service,
            transparency_service: app.services.transparency_service,
            config: config.clone(),
        };
        let app_router = keytrans_directory::api::app_router(app_state, shutdown_rx.clone());
        let mgmt_app = keytrans_directory::api::mgmt_router(MgmtState { health_service: app.health_service });

        let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;

        tracing::info!(address = %api_addr, "listening");
        tracing::info!(address = %mgmt_addr, "management server listening");

        let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<
            (
                tokio::net::TcpListener,
                tokio::net::TcpListener,
                axum::Router,
                axum::Router,
                watch::Sender<bool>,
                watch::Receiver<bool>,
                keytrans_directory::Workers,
            ),
            anyhow::Error,
        >((api_listener, mgmt_listener, app_router, mgmt_app, shutdown_tx, shutdown_rx, app.workers))
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: start runtime (explicit spawning and listening).
    let worker_tasks = workers.spawn_all(shutdown_rx.clone());

    let mut api_rx = shutdown_rx.clone();
    let api_server = axum::serve(api_listener, app_router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = api_rx.wait_for(|&s| s).await;
        });

    let mut mgmt_rx = shutdown_rx.clone();
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = mgmt_rx.wait_for(|&s| s).await;
        });

    if let Err(e) = tokio::try_join!(api_server, mgmt_server) {
        tracing::error!(error = %e, "server error");
    }

    // Phase 5: graceful shutdown orchestration.
    let _ = shutdown_tx.send(true);
    tokio::select! {
        () = async {
            futures::future::join_all(worker_tasks).await;
        } => {
            tracing::info!("background tasks finished");
        }
        () = tokio::time::sleep(std::time::Duration::from_secs(config.server.shutdown_timeout_secs)) => {
            tracing::warn!("timeout waiting for background tasks to finish");
        }
    }

    telemetry_guard.shutdown();
    Ok(())
}
