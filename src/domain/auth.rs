use crate::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by the bearer token issued upstream by the platform's account service.
/// This core only verifies tokens; it never issues them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: u64) -> Self {
        let expiration = jsonwebtoken::get_current_timestamp() as usize + ttl_secs as usize;
        Self { sub: user_id, exp: expiration }
    }

    /// # Errors
    /// Returns an error if the secret cannot encode the claims (practically infallible).
    pub fn encode(&self, secret: &str) -> Result<String, AppError> {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            self,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|_| AppError::Auth)
    }

    /// # Errors
    /// Returns `AppError::Auth` if the token is malformed, expired, or the signature
    /// does not verify under `secret`.
    pub fn decode(token: &str, secret: &str) -> Result<Self, AppError> {
        let token_data = jsonwebtoken::decode::<Self>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
            &jsonwebtoken::Validation::default(),
        )
        .map_err(|_| AppError::Auth)?;
        Ok(token_data.claims)
    }
}
