use crate::config::Config;
use crate::services::bundle_assembler::BundleAssembler;
use crate::services::health_service::HealthService;
use crate::services::key_service::KeyService;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::transparency_service::TransparencyService;
use axum::Router;
use axum::routing::{get, post};
use std::time::Duration;
use tokio::sync::watch;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod dto;
pub mod health;
pub mod keys;
pub mod middleware;
pub mod transparency;

/// Shared state for the public-facing API router.
#[derive(Clone, Debug)]
pub struct AppState {
    pub key_service: KeyService,
    pub bundle_assembler: BundleAssembler,
    pub rate_limit_service: RateLimitService,
    pub transparency_service: TransparencyService,
    pub config: Config,
}

/// Shared state for the separate management router (`/healthz`, `/readyz`), kept off
/// the public port so liveness/readiness probes never compete with client traffic for
/// connection-pool capacity or get exposed behind a public load balancer.
#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

/// Builds the public API router: key upload/fetch, bundle fetch, and the transparency
/// log's read surface. `_shutdown_rx` is accepted so callers can wire per-request
/// cancellation in future without changing this signature; not yet used directly since
/// `axum::serve`'s `with_graceful_shutdown` is driven from `main` instead.
///
/// Reads and writes carry different deadlines (§5: 15s read, 30s write by default), so
/// the mutating routes are built and timeout-layered separately before merging with the
/// read-only ones.
#[must_use]
pub fn app_router(state: AppState, _shutdown_rx: watch::Receiver<bool>) -> Router {
    let read_timeout = Duration::from_secs(state.config.server.request_timeout_read_secs);
    let write_timeout = Duration::from_secs(state.config.server.request_timeout_write_secs);

    let read_routes = Router::new()
        .route("/keys/identity", get(keys::get_identity_key))
        .route("/keys/prekeys/count", get(keys::pre_key_count))
        .route("/keys/status", get(keys::key_status))
        .route("/bundles/{user}", get(keys::get_bundle))
        .route("/transparency/root", get(transparency::root))
        .route("/transparency/consistency", get(transparency::consistency))
        .route("/transparency/inclusion", get(transparency::inclusion))
        .route("/transparency/audit-log", get(transparency::audit_log))
        .route("/transparency/signing-keys", get(transparency::signing_keys))
        .route("/transparency/client-state", get(transparency::get_client_state))
        .layer(TimeoutLayer::new(read_timeout));

    let write_routes = Router::new()
        .route("/keys/identity", post(keys::upload_identity_key))
        .route("/keys/prekey", post(keys::upload_signed_pre_key))
        .route("/keys/prekeys", post(keys::upload_one_time_pre_keys))
        .route("/keys/sealed-sender", post(keys::upload_sealed_sender_key))
        .route("/transparency/client-state", post(transparency::record_client_state))
        .layer(TimeoutLayer::new(write_timeout));

    read_routes
        .merge(write_routes)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Builds the management router: liveness and readiness probes only.
#[must_use]
pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new()
        .route("/healthz", get(health::livez))
        .route("/readyz", get(health::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
