use time::OffsetDateTime;
use uuid::Uuid;

/// Depth of the sparse Merkle tree (one bit of the leaf index per level).
pub const TREE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Ed25519,
    P256Ecdsa,
}

/// The canonical value committed to the tree at a user's leaf index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafData {
    pub user_id: Uuid,
    pub identity_fingerprint: String,
    pub signed_prekey_fingerprint: String,
    pub version: i32,
    pub timestamp: OffsetDateTime,
}

impl LeafData {
    /// Canonical byte encoding hashed to produce the leaf's tree value.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + self.identity_fingerprint.len() + self.signed_prekey_fingerprint.len() + 12);
        buf.extend_from_slice(self.user_id.as_bytes());
        buf.extend_from_slice(self.identity_fingerprint.as_bytes());
        buf.extend_from_slice(self.signed_prekey_fingerprint.as_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&(self.timestamp.unix_timestamp() as u64).to_be_bytes());
        buf
    }
}

/// One committed root of the transparency log.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub epoch_number: i64,
    pub root_hash: [u8; 32],
    pub tree_size: i64,
    pub previous_root_hash: Option<[u8; 32]>,
    pub signature: Vec<u8>,
    pub signing_key_fingerprint: String,
    pub created_at: OffsetDateTime,
}

impl Epoch {
    /// The exact bytes signed by the Proof Signer for this epoch's head.
    #[must_use]
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + 8 + 8);
        buf.extend_from_slice(&(self.epoch_number as u64).to_be_bytes());
        buf.extend_from_slice(&self.root_hash);
        buf.extend_from_slice(&(self.tree_size as u64).to_be_bytes());
        buf.extend_from_slice(&(self.created_at.unix_timestamp() as u64).to_be_bytes());
        buf
    }
}

#[derive(Debug, Clone)]
pub struct SigningKeyInfo {
    pub fingerprint: String,
    pub public_key: Vec<u8>,
    pub algorithm: SigningAlgorithm,
    pub valid_from: OffsetDateTime,
    pub valid_until: Option<OffsetDateTime>,
}

/// A client's last-known-good view of the log, as reported by that client.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub user_id: Uuid,
    pub device_id: String,
    pub last_verified_epoch: i64,
    pub last_verified_root_hash: [u8; 32],
    pub verified_at: OffsetDateTime,
}

/// Proof that a leaf is included in the tree at a given epoch.
#[derive(Debug, Clone)]
pub struct InclusionProof {
    pub epoch_number: i64,
    pub leaf: LeafData,
    pub leaf_hash: [u8; 32],
    /// One sibling hash per tree level, root-adjacent last.
    pub sibling_path: Vec<[u8; 32]>,
    /// The 256-bit leaf index, bit `i` selects the branch taken at depth `i`.
    pub path_bits: [u8; 32],
    pub root_hash: [u8; 32],
}

/// A single leaf whose value changed between two epochs, with proof at both ends.
#[derive(Debug, Clone)]
pub struct ChangedLeaf {
    pub from_leaf: Option<LeafData>,
    pub to_leaf: LeafData,
    pub from_proof: Option<InclusionProof>,
    pub to_proof: InclusionProof,
}

/// Proof that the tree at `to_epoch` is an append/update extension of `from_epoch`.
#[derive(Debug, Clone)]
pub struct ConsistencyProof {
    pub from_epoch: i64,
    pub to_epoch: i64,
    pub from_root: [u8; 32],
    pub to_root: [u8; 32],
    pub changed_leaves: Vec<ChangedLeaf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_leaf() -> LeafData {
        LeafData {
            user_id: Uuid::nil(),
            identity_fingerprint: "aaaaaaaaaaaaaaaa".into(),
            signed_prekey_fingerprint: "bbbbbbbbbbbbbbbb".into(),
            version: 1,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn canonical_bytes_are_deterministic() {
        let a = sample_leaf().canonical_bytes();
        let b = sample_leaf().canonical_bytes();
        assert_eq!(a, b);
    }
}
