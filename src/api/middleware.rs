use crate::api::AppState;
use crate::domain::auth::Claims;
use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use uuid::Uuid;

/// Authenticated caller identity, extracted from a `Bearer` JWT issued upstream by the
/// platform's account service. This core never issues tokens, only verifies them.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = parts.headers.get(header::AUTHORIZATION).ok_or(AppError::Auth)?;
        let header_str = header_value.to_str().map_err(|_| AppError::Auth)?;
        let token = header_str.strip_prefix("Bearer ").ok_or(AppError::Auth)?;

        let claims = Claims::decode(token, &state.config.auth.jwt_secret)?;
        Ok(Self { user_id: claims.sub })
    }
}
