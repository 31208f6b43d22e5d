use crate::domain::crypto::{PublicKeyBytes, SignatureBytes};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// Base64-encoded public key bytes on the wire; suite is inferred on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyDto(pub String);

impl From<&PublicKeyBytes> for PublicKeyDto {
    fn from(pk: &PublicKeyBytes) -> Self {
        Self(STANDARD.encode(pk.as_bytes()))
    }
}

impl TryFrom<PublicKeyDto> for PublicKeyBytes {
    type Error = String;
    fn try_from(dto: PublicKeyDto) -> Result<Self, Self::Error> {
        let bytes = STANDARD.decode(dto.0).map_err(|e| format!("invalid base64 public key: {e}"))?;
        Self::try_new(bytes)
    }
}

/// Base64-encoded signature bytes on the wire; suite is inferred on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureDto(pub String);

impl From<&SignatureBytes> for SignatureDto {
    fn from(sig: &SignatureBytes) -> Self {
        Self(STANDARD.encode(sig.as_bytes()))
    }
}

impl TryFrom<SignatureDto> for SignatureBytes {
    type Error = String;
    fn try_from(dto: SignatureDto) -> Result<Self, Self::Error> {
        let bytes = STANDARD.decode(dto.0).map_err(|e| format!("invalid base64 signature: {e}"))?;
        Self::try_new(bytes)
    }
}
