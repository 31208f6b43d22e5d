use crate::api::AppState;
use crate::api::dto::crypto::PublicKeyDto;
use crate::api::dto::keys::{
    IdentityKeyDto, KeyStatusResponse, OneTimePreKeyUploadDto, PreKeyBundleDto, PreKeyCountResponse,
    SealedSenderKeyDto, SignedPreKeyDto, StoredCountResponse, UploadIdentityKeyRequest, UploadOneTimePreKeysRequest,
    UploadSealedSenderKeyRequest, UploadSignedPreKeyRequest,
};
use crate::api::middleware::AuthUser;
use crate::domain::crypto::{PublicKeyBytes, SignatureBytes};
use crate::error::{AppError, Result};
use axum::extract::{ConnectInfo, Path, State};
use axum::response::IntoResponse;
use axum::{Json, http::StatusCode};
use std::net::SocketAddr;
use uuid::Uuid;

/// `POST /keys/identity`
pub async fn upload_identity_key(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UploadIdentityKeyRequest>,
) -> Result<impl IntoResponse> {
    let public_key = PublicKeyBytes::try_from(payload.public_key).map_err(AppError::KeyFormat)?;
    let identity_key = state.key_service.store_identity_key(auth_user.user_id, public_key).await?;
    Ok((StatusCode::OK, Json(IdentityKeyDto::from(identity_key))))
}

/// `GET /keys/identity`
pub async fn get_identity_key(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let identity_key = state.key_service.get_identity_key(auth_user.user_id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(IdentityKeyDto::from(identity_key)))
}

/// `POST /keys/prekey`
pub async fn upload_signed_pre_key(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UploadSignedPreKeyRequest>,
) -> Result<impl IntoResponse> {
    let public_key = PublicKeyBytes::try_from(payload.public_key).map_err(AppError::KeyFormat)?;
    let signature = SignatureBytes::try_from(payload.signature).map_err(AppError::KeyFormat)?;

    let signed_pre_key =
        state.key_service.store_signed_pre_key(auth_user.user_id, payload.key_id, public_key, signature).await?;
    Ok((StatusCode::OK, Json(SignedPreKeyDto::from(signed_pre_key))))
}

const MAX_ONE_TIME_PREKEYS_PER_REQUEST: usize = 100;

/// `POST /keys/prekeys`
pub async fn upload_one_time_pre_keys(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UploadOneTimePreKeysRequest>,
) -> Result<impl IntoResponse> {
    if payload.prekeys.len() > MAX_ONE_TIME_PREKEYS_PER_REQUEST {
        return Err(AppError::KeyQuota(format!(
            "at most {MAX_ONE_TIME_PREKEYS_PER_REQUEST} one-time prekeys may be uploaded per request"
        )));
    }

    let mut keys = Vec::with_capacity(payload.prekeys.len());
    for k in payload.prekeys {
        let public_key = PublicKeyBytes::try_from(k.public_key).map_err(AppError::KeyFormat)?;
        keys.push((k.key_id, public_key));
    }

    let stored = state.key_service.store_one_time_pre_keys(auth_user.user_id, keys).await?;
    Ok((StatusCode::OK, Json(StoredCountResponse { stored })))
}

/// `GET /keys/prekeys/count`
pub async fn pre_key_count(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let count = state.key_service.available_count(auth_user.user_id).await?;
    Ok(Json(PreKeyCountResponse { count }))
}

/// `GET /keys/status`
pub async fn key_status(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let status = state.key_service.key_status(auth_user.user_id).await?;
    Ok(Json(KeyStatusResponse {
        e2ee_ready: status.e2ee_ready(),
        has_identity_key: status.has_identity_key,
        has_signed_prekey: status.has_signed_prekey,
        signed_prekey_expired: status.signed_prekey_expired,
        one_time_prekey_count: status.one_time_prekey_count,
    }))
}

/// `POST /keys/sealed-sender`
pub async fn upload_sealed_sender_key(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UploadSealedSenderKeyRequest>,
) -> Result<impl IntoResponse> {
    let public_key = PublicKeyBytes::try_from(payload.public_key).map_err(AppError::KeyFormat)?;
    let key = state.key_service.upsert_sealed_sender_key(auth_user.user_id, public_key).await?;
    Ok((StatusCode::OK, Json(SealedSenderKeyDto::from(key))))
}

/// `GET /bundles/{user}`: the three-axis rate limiter guards this endpoint since it is
/// the one a drain attacker would hit repeatedly against a single target.
pub async fn get_bundle(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(target): Path<Uuid>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse> {
    let client_ip = state.rate_limit_service.extractor.identify_client_ip(&headers, peer_addr.ip());

    let decision = state.rate_limit_service.check_bundle_fetch(auth_user.user_id, target, client_ip).await?;
    match decision {
        crate::services::rate_limit_service::RateLimitDecision::Ok => {}
        crate::services::rate_limit_service::RateLimitDecision::RateLimited => {
            return Err(AppError::RateLimited { targeted: false });
        }
        crate::services::rate_limit_service::RateLimitDecision::RateLimitedTargeted => {
            return Err(AppError::RateLimited { targeted: true });
        }
    }

    let bundle = state.bundle_assembler.get_bundle(target, auth_user.user_id).await?;
    Ok(Json(PreKeyBundleDto::from(bundle)))
}
