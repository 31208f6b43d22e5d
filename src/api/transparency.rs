use crate::api::AppState;
use crate::api::dto::transparency::{
    AuditLogQuery, ClientStateDto, ClientStateQuery, ConsistencyProofDto, ConsistencyQuery, InclusionProofDto,
    InclusionQuery, RecordClientStateRequest, RecordClientStateResponse, SignedTreeHeadDto, SigningKeyDto,
};
use crate::api::middleware::AuthUser;
use crate::error::{AppError, Result};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use base64::{Engine as _, engine::general_purpose::STANDARD};

const DEFAULT_AUDIT_LOG_LIMIT: i64 = 100;
const MAX_AUDIT_LOG_LIMIT: i64 = 1000;

/// `GET /transparency/root`: the latest signed tree head. Public — any client can audit
/// the log without proving who they are.
pub async fn root(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let epoch = state.transparency_service.latest_signed_head().await?.ok_or(AppError::NotFound)?;
    Ok(Json(SignedTreeHeadDto::from(epoch)))
}

/// `GET /transparency/consistency`: a consistency proof between two sealed epochs.
pub async fn consistency(
    State(state): State<AppState>,
    Query(query): Query<ConsistencyQuery>,
) -> Result<impl IntoResponse> {
    let proof = state.transparency_service.consistency_proof(query.from, query.to).await?;
    Ok(Json(ConsistencyProofDto::from(proof)))
}

/// `GET /transparency/inclusion`: an inclusion proof for a user's leaf. Requires auth so
/// the log doesn't become a cheap way to enumerate which user IDs have committed leaves.
pub async fn inclusion(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<InclusionQuery>,
) -> Result<impl IntoResponse> {
    let proof = state.transparency_service.inclusion_proof(query.user_id, query.epoch).await?;
    Ok(Json(InclusionProofDto::from(proof)))
}

/// `GET /transparency/audit-log`: a page of sealed epochs.
pub async fn audit_log(State(state): State<AppState>, Query(query): Query<AuditLogQuery>) -> Result<impl IntoResponse> {
    let from_epoch = query.from_epoch.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LOG_LIMIT).clamp(1, MAX_AUDIT_LOG_LIMIT);

    let epochs = state.transparency_service.audit_log(from_epoch, limit).await?;
    let dtos: Vec<SignedTreeHeadDto> = epochs.into_iter().map(Into::into).collect();
    Ok(Json(dtos))
}

/// `GET /transparency/signing-keys`: current and historical signing keys, so a client
/// can verify signatures over epochs it audits retroactively.
pub async fn signing_keys(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let keys = state.transparency_service.signing_keys().await?;
    let dtos: Vec<SigningKeyDto> = keys.into_iter().map(Into::into).collect();
    Ok(Json(dtos))
}

/// `POST /transparency/client-state`: records a device's self-reported last-verified
/// epoch, so the client can later demonstrate the root hash it audited was never rolled
/// back (consistency, not the server's concern to enforce against its own history).
pub async fn record_client_state(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<RecordClientStateRequest>,
) -> Result<impl IntoResponse> {
    let root_hash_bytes =
        STANDARD.decode(&payload.root_hash).map_err(|e| AppError::KeyFormat(format!("invalid base64 root hash: {e}")))?;
    let root_hash: [u8; 32] = root_hash_bytes
        .try_into()
        .map_err(|_| AppError::KeyFormat("root hash must be exactly 32 bytes".into()))?;

    state
        .transparency_service
        .record_client_state(auth_user.user_id, payload.device_id, payload.epoch, root_hash)
        .await?;

    Ok(Json(RecordClientStateResponse { success: true, epoch: payload.epoch }))
}

/// `GET /transparency/client-state`: a device's last-reported verification state.
pub async fn get_client_state(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ClientStateQuery>,
) -> Result<impl IntoResponse> {
    let state_row = state.transparency_service.client_state(auth_user.user_id, &query.device_id).await?;
    Ok(Json(ClientStateDto::from(state_row)))
}
