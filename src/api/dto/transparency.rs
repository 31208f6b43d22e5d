use crate::domain::transparency::{
    ChangedLeaf, ClientState, ConsistencyProof, Epoch, InclusionProof, LeafData, SigningAlgorithm, SigningKeyInfo,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

fn b64_32(bytes: &[u8; 32]) -> String {
    STANDARD.encode(bytes)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTreeHeadDto {
    pub epoch_number: i64,
    pub root_hash: String,
    pub tree_size: i64,
    pub previous_root_hash: Option<String>,
    pub signature: String,
    pub signing_key_fingerprint: String,
    pub timestamp: OffsetDateTime,
}

impl From<Epoch> for SignedTreeHeadDto {
    fn from(e: Epoch) -> Self {
        Self {
            epoch_number: e.epoch_number,
            root_hash: b64_32(&e.root_hash),
            tree_size: e.tree_size,
            previous_root_hash: e.previous_root_hash.as_ref().map(b64_32),
            signature: STANDARD.encode(&e.signature),
            signing_key_fingerprint: e.signing_key_fingerprint,
            timestamp: e.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafDataDto {
    pub user_id: Uuid,
    pub identity_key_fingerprint: String,
    pub signed_prekey_fingerprint: String,
    pub key_version: i32,
    pub timestamp: OffsetDateTime,
}

impl From<&LeafData> for LeafDataDto {
    fn from(l: &LeafData) -> Self {
        Self {
            user_id: l.user_id,
            identity_key_fingerprint: l.identity_fingerprint.clone(),
            signed_prekey_fingerprint: l.signed_prekey_fingerprint.clone(),
            key_version: l.version,
            timestamp: l.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProofDto {
    pub epoch_number: i64,
    pub leaf_hash: String,
    pub leaf_data: LeafDataDto,
    pub sibling_path: Vec<String>,
    pub path_bits: String,
    pub root_hash: String,
}

impl From<InclusionProof> for InclusionProofDto {
    fn from(p: InclusionProof) -> Self {
        Self {
            epoch_number: p.epoch_number,
            leaf_hash: b64_32(&p.leaf_hash),
            leaf_data: LeafDataDto::from(&p.leaf),
            sibling_path: p.sibling_path.iter().map(b64_32).collect(),
            path_bits: STANDARD.encode(p.path_bits),
            root_hash: b64_32(&p.root_hash),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedLeafDto {
    pub from_leaf: Option<LeafDataDto>,
    pub to_leaf: LeafDataDto,
    pub from_proof: Option<InclusionProofDto>,
    pub to_proof: InclusionProofDto,
}

impl From<ChangedLeaf> for ChangedLeafDto {
    fn from(c: ChangedLeaf) -> Self {
        Self {
            from_leaf: c.from_leaf.as_ref().map(LeafDataDto::from),
            to_leaf: LeafDataDto::from(&c.to_leaf),
            from_proof: c.from_proof.map(InclusionProofDto::from),
            to_proof: InclusionProofDto::from(c.to_proof),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyProofDto {
    pub from_epoch: i64,
    pub to_epoch: i64,
    pub from_root: String,
    pub to_root: String,
    pub changed_leaves: Vec<ChangedLeafDto>,
}

impl From<ConsistencyProof> for ConsistencyProofDto {
    fn from(p: ConsistencyProof) -> Self {
        Self {
            from_epoch: p.from_epoch,
            to_epoch: p.to_epoch,
            from_root: b64_32(&p.from_root),
            to_root: b64_32(&p.to_root),
            changed_leaves: p.changed_leaves.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningKeyDto {
    pub fingerprint: String,
    pub public_key: String,
    pub algorithm: &'static str,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
}

impl From<SigningKeyInfo> for SigningKeyDto {
    fn from(k: SigningKeyInfo) -> Self {
        Self {
            fingerprint: k.fingerprint,
            public_key: STANDARD.encode(&k.public_key),
            algorithm: match k.algorithm {
                SigningAlgorithm::Ed25519 => "ed25519",
                SigningAlgorithm::P256Ecdsa => "p256_ecdsa",
            },
            valid_from: k.valid_from,
            valid_until: k.valid_until,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordClientStateRequest {
    pub device_id: String,
    pub epoch: i64,
    pub root_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordClientStateResponse {
    pub success: bool,
    pub epoch: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStateDto {
    pub device_id: String,
    pub last_verified_epoch: i64,
    pub last_verified_root_hash: String,
    pub verified_at: OffsetDateTime,
}

impl From<ClientState> for ClientStateDto {
    fn from(s: ClientState) -> Self {
        Self {
            device_id: s.device_id,
            last_verified_epoch: s.last_verified_epoch,
            last_verified_root_hash: b64_32(&s.last_verified_root_hash),
            verified_at: s.verified_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub from_epoch: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConsistencyQuery {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Deserialize)]
pub struct InclusionQuery {
    pub user_id: Uuid,
    pub epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ClientStateQuery {
    pub device_id: String,
}
