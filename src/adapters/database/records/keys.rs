use crate::domain::crypto::{PublicKeyBytes, SignatureBytes};
use crate::domain::keys::{IdentityKey, KeyStatus, OneTimePreKey, OneTimePreKeyStatus, SealedSenderKey, SignedPreKey};
use time::OffsetDateTime;
use uuid::Uuid;

fn status_from_str(s: &str) -> Result<KeyStatus, String> {
    match s {
        "active" => Ok(KeyStatus::Active),
        "rotated" => Ok(KeyStatus::Rotated),
        "revoked" => Ok(KeyStatus::Revoked),
        other => Err(format!("unknown key status: {other}")),
    }
}

fn otpk_status_from_str(s: &str) -> Result<OneTimePreKeyStatus, String> {
    match s {
        "available" => Ok(OneTimePreKeyStatus::Available),
        "claimed" => Ok(OneTimePreKeyStatus::Claimed),
        "consumed" => Ok(OneTimePreKeyStatus::Consumed),
        other => Err(format!("unknown one-time prekey status: {other}")),
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct IdentityKeyRecord {
    pub user_id: Uuid,
    pub public_key: Vec<u8>,
    pub fingerprint: String,
    pub version: i32,
    pub status: String,
    pub created_at: OffsetDateTime,
}

impl TryFrom<IdentityKeyRecord> for IdentityKey {
    type Error = String;
    fn try_from(r: IdentityKeyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: r.user_id,
            public_key: PublicKeyBytes::try_new(r.public_key)?,
            fingerprint: r.fingerprint,
            version: r.version,
            status: status_from_str(&r.status)?,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SignedPreKeyRecord {
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub fingerprint: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl TryFrom<SignedPreKeyRecord> for SignedPreKey {
    type Error = String;
    fn try_from(r: SignedPreKeyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: r.user_id,
            key_id: r.key_id,
            public_key: PublicKeyBytes::try_new(r.public_key)?,
            signature: SignatureBytes::try_new(r.signature)?,
            fingerprint: r.fingerprint,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OneTimePreKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: Vec<u8>,
    pub status: String,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<OneTimePreKeyRecord> for OneTimePreKey {
    type Error = String;
    fn try_from(r: OneTimePreKeyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            key_id: r.key_id,
            public_key: PublicKeyBytes::try_new(r.public_key)?,
            status: otpk_status_from_str(&r.status)?,
            claimed_by: r.claimed_by,
            claimed_at: r.claimed_at,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SealedSenderKeyRecord {
    pub user_id: Uuid,
    pub public_key: Vec<u8>,
    pub fingerprint: String,
    pub version: i32,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl TryFrom<SealedSenderKeyRecord> for SealedSenderKey {
    type Error = String;
    fn try_from(r: SealedSenderKeyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: r.user_id,
            public_key: PublicKeyBytes::try_new(r.public_key)?,
            fingerprint: r.fingerprint,
            version: r.version,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
    }
}
