use crate::api::MgmtState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// Liveness probe: returns 200 OK as long as the process is up.
pub async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe: checks connectivity to the database and the counter store.
pub async fn readyz(State(state): State<MgmtState>) -> impl IntoResponse {
    let (db_res, counter_store_res) =
        tokio::join!(state.health_service.check_db(), state.health_service.check_counter_store());

    let mut status_code = StatusCode::OK;
    let db_status = if let Err(e) = db_res {
        tracing::warn!(error = %e, component = "database", "readiness probe failed");
        status_code = StatusCode::SERVICE_UNAVAILABLE;
        "error"
    } else {
        "ok"
    };

    let counter_store_status = if let Err(e) = counter_store_res {
        tracing::warn!(error = %e, component = "counter_store", "readiness probe failed");
        status_code = StatusCode::SERVICE_UNAVAILABLE;
        "error"
    } else {
        "ok"
    };

    (
        status_code,
        Json(json!({
            "status": if status_code == StatusCode::OK { "ok" } else { "error" },
            "database": db_status,
            "counter_store": counter_store_status,
        })),
    )
}
