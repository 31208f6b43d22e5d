use crate::domain::crypto::{KeySuite, PublicKeyBytes, SignatureBytes};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Rotated,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneTimePreKeyStatus {
    Available,
    Claimed,
    Consumed,
}

#[derive(Debug, Clone)]
pub struct IdentityKey {
    pub user_id: Uuid,
    pub public_key: PublicKeyBytes,
    pub fingerprint: String,
    pub version: i32,
    pub status: KeyStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SignedPreKey {
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: PublicKeyBytes,
    pub signature: SignatureBytes,
    pub fingerprint: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct OneTimePreKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_id: i32,
    pub public_key: PublicKeyBytes,
    pub status: OneTimePreKeyStatus,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct SealedSenderKey {
    pub user_id: Uuid,
    pub public_key: PublicKeyBytes,
    pub fingerprint: String,
    pub version: i32,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// A single user's bundle, assembled for a specific requester.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub user_id: Uuid,
    pub bundle_version: i32,
    pub generated_at: OffsetDateTime,
    pub identity_key: IdentityKey,
    pub signed_pre_key: SignedPreKey,
    pub one_time_pre_key: Option<OneTimePreKey>,
    pub sealed_sender_key: Option<SealedSenderKey>,
}

impl PreKeyBundle {
    /// `2` if any component uses a post-quantum suite, `1` if the bundle is pure P-256.
    #[must_use]
    pub fn infer_version(identity_suite: KeySuite, signed_prekey_suite: KeySuite) -> i32 {
        if identity_suite == KeySuite::P256 && signed_prekey_suite == KeySuite::P256 { 1 } else { 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUpdateKind {
    Created,
    Rotated,
    Revoked,
}

/// A durable, crash-safe record of a change to commit into the transparency log.
#[derive(Debug, Clone)]
pub struct KeyUpdate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub identity_fingerprint: String,
    pub signed_prekey_fingerprint: String,
    pub version: i32,
    pub kind: KeyUpdateKind,
    pub enqueued_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_version_is_one_for_pure_classical_suite() {
        assert_eq!(PreKeyBundle::infer_version(KeySuite::P256, KeySuite::P256), 1);
    }

    #[test]
    fn bundle_version_is_two_when_any_component_is_post_quantum() {
        assert_eq!(PreKeyBundle::infer_version(KeySuite::Dilithium3, KeySuite::Kyber1024), 2);
        assert_eq!(PreKeyBundle::infer_version(KeySuite::P256, KeySuite::Kyber1024), 2);
    }
}
