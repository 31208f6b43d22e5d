use crate::api::dto::crypto::{PublicKeyDto, SignatureDto};
use crate::domain::keys::{IdentityKey, OneTimePreKey, PreKeyBundle, SealedSenderKey, SignedPreKey};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIdentityKeyRequest {
    pub public_key: PublicKeyDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeyDto {
    pub user_id: uuid::Uuid,
    pub public_key: PublicKeyDto,
    pub fingerprint: String,
    pub version: i32,
    pub created_at: OffsetDateTime,
}

impl From<IdentityKey> for IdentityKeyDto {
    fn from(k: IdentityKey) -> Self {
        Self {
            user_id: k.user_id,
            public_key: PublicKeyDto::from(&k.public_key),
            fingerprint: k.fingerprint,
            version: k.version,
            created_at: k.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSignedPreKeyRequest {
    pub key_id: i32,
    pub public_key: PublicKeyDto,
    pub signature: SignatureDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKeyDto {
    pub key_id: i32,
    pub fingerprint: String,
    pub public_key: PublicKeyDto,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl From<SignedPreKey> for SignedPreKeyDto {
    fn from(k: SignedPreKey) -> Self {
        Self {
            key_id: k.key_id,
            fingerprint: k.fingerprint,
            public_key: PublicKeyDto::from(&k.public_key),
            expires_at: k.expires_at,
            created_at: k.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKeyUploadDto {
    pub key_id: i32,
    pub public_key: PublicKeyDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOneTimePreKeysRequest {
    pub prekeys: Vec<OneTimePreKeyUploadDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimePreKeyDto {
    pub key_id: i32,
    pub public_key: PublicKeyDto,
}

impl From<OneTimePreKey> for OneTimePreKeyDto {
    fn from(k: OneTimePreKey) -> Self {
        Self { key_id: k.key_id, public_key: PublicKeyDto::from(&k.public_key) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSealedSenderKeyRequest {
    pub public_key: PublicKeyDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSenderKeyDto {
    pub version: i32,
    pub fingerprint: String,
    pub public_key: PublicKeyDto,
    pub expires_at: OffsetDateTime,
}

impl From<SealedSenderKey> for SealedSenderKeyDto {
    fn from(k: SealedSenderKey) -> Self {
        Self {
            version: k.version,
            fingerprint: k.fingerprint,
            public_key: PublicKeyDto::from(&k.public_key),
            expires_at: k.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundleDto {
    pub user_id: uuid::Uuid,
    pub bundle_version: i32,
    pub generated_at: OffsetDateTime,
    pub identity_key: IdentityKeyDto,
    pub signed_pre_key: SignedPreKeyDto,
    pub one_time_pre_key: Option<OneTimePreKeyDto>,
    pub sealed_sender_key: Option<SealedSenderKeyDto>,
}

impl From<PreKeyBundle> for PreKeyBundleDto {
    fn from(b: PreKeyBundle) -> Self {
        Self {
            user_id: b.user_id,
            bundle_version: b.bundle_version,
            generated_at: b.generated_at,
            identity_key: b.identity_key.into(),
            signed_pre_key: b.signed_pre_key.into(),
            one_time_pre_key: b.one_time_pre_key.map(Into::into),
            sealed_sender_key: b.sealed_sender_key.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyCountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCountResponse {
    pub stored: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatusResponse {
    pub e2ee_ready: bool,
    pub has_identity_key: bool,
    pub has_signed_prekey: bool,
    pub signed_prekey_expired: bool,
    pub one_time_prekey_count: i64,
}
