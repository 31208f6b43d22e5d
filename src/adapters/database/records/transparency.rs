use crate::domain::transparency::{Epoch, LeafData, SigningAlgorithm, SigningKeyInfo};
use time::OffsetDateTime;
use uuid::Uuid;

fn bytes32(v: Vec<u8>, field: &str) -> Result<[u8; 32], String> {
    v.try_into().map_err(|_| format!("{field} must be 32 bytes"))
}

#[derive(Debug, sqlx::FromRow)]
pub struct CommittedLeafRecord {
    pub user_id: Uuid,
    pub identity_fingerprint: String,
    pub signed_prekey_fingerprint: String,
    pub version: i32,
    pub timestamp: OffsetDateTime,
}

impl From<CommittedLeafRecord> for LeafData {
    fn from(r: CommittedLeafRecord) -> Self {
        Self {
            user_id: r.user_id,
            identity_fingerprint: r.identity_fingerprint,
            signed_prekey_fingerprint: r.signed_prekey_fingerprint,
            version: r.version,
            timestamp: r.timestamp,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct EpochRecord {
    pub epoch_number: i64,
    pub root_hash: Vec<u8>,
    pub tree_size: i64,
    pub previous_root_hash: Option<Vec<u8>>,
    pub signature: Vec<u8>,
    pub signing_key_fingerprint: String,
    pub created_at: OffsetDateTime,
}

impl TryFrom<EpochRecord> for Epoch {
    type Error = String;
    fn try_from(r: EpochRecord) -> Result<Self, Self::Error> {
        let previous_root_hash = r.previous_root_hash.map(|v| bytes32(v, "previous_root_hash")).transpose()?;
        Ok(Self {
            epoch_number: r.epoch_number,
            root_hash: bytes32(r.root_hash, "root_hash")?,
            tree_size: r.tree_size,
            previous_root_hash,
            signature: r.signature,
            signing_key_fingerprint: r.signing_key_fingerprint,
            created_at: r.created_at,
        })
    }
}

/// A single changed (non-default) node in the sparse tree, keyed by the epoch at which
/// it was last written and its path prefix at a given depth.
#[derive(Debug, sqlx::FromRow)]
pub struct MerkleNodeRecord {
    pub epoch_number: i64,
    pub depth: i32,
    pub path_prefix: Vec<u8>,
    pub hash: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SigningKeyRecord {
    pub fingerprint: String,
    pub public_key: Vec<u8>,
    pub algorithm: String,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
}

impl TryFrom<SigningKeyRecord> for SigningKeyInfo {
    type Error = String;
    fn try_from(r: SigningKeyRecord) -> Result<Self, Self::Error> {
        let algorithm = match r.algorithm.as_str() {
            "ed25519" => SigningAlgorithm::Ed25519,
            "p256_ecdsa" => SigningAlgorithm::P256Ecdsa,
            other => return Err(format!("unknown signing algorithm: {other}")),
        };
        Ok(Self {
            fingerprint: r.fingerprint,
            public_key: r.public_key,
            algorithm,
            valid_from: r.valid_from,
            valid_until: r.valid_until,
        })
    }
}
