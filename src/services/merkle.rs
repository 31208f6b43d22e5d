//! Pure sparse Merkle tree math: hashing, default-node chain, and inclusion/consistency
//! proof construction and verification. No I/O; callers supply changed-node lookups via
//! the `NodeSource` trait so this module stays independent of storage.

use crate::domain::transparency::{ChangedLeaf, InclusionProof, LeafData, TREE_DEPTH};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A user's fixed position in the tree: `SHA-256(user_id)`, read as a 256-bit path where
/// bit 0 (MSB) selects the branch taken at the root.
#[must_use]
pub fn leaf_path_bits(user_id: Uuid) -> [u8; 32] {
    Sha256::digest(user_id.as_bytes()).into()
}

/// Precomputed hash of an empty subtree at each depth, `default_hashes()[0]` is an empty
/// leaf, `default_hashes()[TREE_DEPTH]` is the root of an entirely empty tree.
#[must_use]
pub fn default_hashes() -> [[u8; 32]; TREE_DEPTH + 1] {
    let mut hashes = [[0u8; 32]; TREE_DEPTH + 1];
    hashes[0] = leaf_hash_of_empty();
    for depth in 1..=TREE_DEPTH {
        hashes[depth] = internal_hash(&hashes[depth - 1], &hashes[depth - 1]);
    }
    hashes
}

fn leaf_hash_of_empty() -> [u8; 32] {
    Sha256::digest(b"").into()
}

/// Hashes a leaf's canonical bytes into its tree value: `SHA-256(canonical_bytes)`.
#[must_use]
pub fn leaf_hash(leaf: &LeafData) -> [u8; 32] {
    Sha256::digest(leaf.canonical_bytes()).into()
}

/// Combines two child hashes into their parent's hash: `SHA-256(left || right)`.
#[must_use]
pub fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Returns the index path from leaf to root for a 256-bit key: `path_bits[i]` is the bit
/// consumed at depth `i`, where bit 0 is the leaf's own position.
#[must_use]
pub fn bit_at(path_bits: &[u8; 32], depth: usize) -> bool {
    let byte = path_bits[depth / 8];
    let shift = 7 - (depth % 8);
    (byte >> shift) & 1 == 1
}

/// Looks up a node's hash at `(depth, path_prefix)`, falling back to the default-hash
/// chain when the node has never been written. `path_prefix` holds the high
/// `TREE_DEPTH - depth` bits of the index, left-padded.
#[async_trait::async_trait]
pub trait NodeSource: Send + Sync {
    async fn node_hash(&self, depth: u32, path_prefix: &[u8]) -> crate::error::Result<Option<[u8; 32]>>;
}

/// Truncates a 256-bit path down to its top `depth` bits, used as a node's storage key.
#[must_use]
pub fn path_prefix(path_bits: &[u8; 32], depth: u32) -> Vec<u8> {
    let full_bytes = (depth / 8) as usize;
    let remaining_bits = depth % 8;
    let mut out = path_bits[..full_bytes].to_vec();
    if remaining_bits > 0 {
        let mask = !0u8 << (8 - remaining_bits);
        out.push(path_bits[full_bytes] & mask);
    }
    out
}

/// Builds an inclusion proof for `leaf` at `path_bits`, reading sibling hashes via
/// `source` as of `epoch_number`.
///
/// # Errors
/// Propagates any error from `source`.
pub async fn build_inclusion_proof(
    source: &dyn NodeSource,
    epoch_number: i64,
    leaf: LeafData,
    path_bits: [u8; 32],
    root_hash: [u8; 32],
) -> crate::error::Result<InclusionProof> {
    let defaults = default_hashes();
    let mut sibling_path = Vec::with_capacity(TREE_DEPTH);

    // Sibling at level `level` (0 = leaf's sibling) sits at depth `TREE_DEPTH - level`,
    // with the same path prefix except its own bit flipped.
    for level in 0..TREE_DEPTH {
        let depth = (TREE_DEPTH - level) as u32;
        let mut sibling_bits = path_bits;
        flip_bit(&mut sibling_bits, depth as usize - 1);
        let prefix = path_prefix(&sibling_bits, depth);
        let hash = source.node_hash(depth, &prefix).await?.unwrap_or(defaults[TREE_DEPTH - depth as usize]);
        sibling_path.push(hash);
    }

    Ok(InclusionProof { epoch_number, leaf_hash: leaf_hash(&leaf), leaf, sibling_path, path_bits, root_hash })
}

pub(crate) fn flip_bit(bits: &mut [u8; 32], depth: usize) {
    let byte = depth / 8;
    let shift = 7 - (depth % 8);
    bits[byte] ^= 1 << shift;
}

/// Recomputes the root implied by an inclusion proof and checks it matches the claimed
/// root. The canonical verification step a client runs against a signed epoch head.
#[must_use]
pub fn verify_inclusion_proof(proof: &InclusionProof) -> bool {
    if proof.sibling_path.len() != TREE_DEPTH {
        return false;
    }
    let mut current = proof.leaf_hash;
    for level in 0..TREE_DEPTH {
        let depth = TREE_DEPTH - level;
        let bit = bit_at(&proof.path_bits, depth - 1);
        let sibling = proof.sibling_path[level];
        current = if bit { internal_hash(&sibling, &current) } else { internal_hash(&current, &sibling) };
    }
    current == proof.root_hash
}

/// Verifies a consistency proof: every changed leaf's `to_proof` must verify against
/// `to_root`, and (when present) its `from_proof` must verify against `from_root`, and
/// leaves absent from `from_epoch` must have no `from_proof`. I6 (monotonicity) is the
/// caller's responsibility when constructing changed leaves, not re-derived here.
#[must_use]
pub fn verify_consistency_proof(proof: &crate::domain::transparency::ConsistencyProof) -> bool {
    if proof.to_epoch <= proof.from_epoch {
        return false;
    }
    proof.changed_leaves.iter().all(|changed| verify_changed_leaf(changed, proof.from_root, proof.to_root))
}

fn verify_changed_leaf(changed: &ChangedLeaf, from_root: [u8; 32], to_root: [u8; 32]) -> bool {
    if changed.to_proof.root_hash != to_root || !verify_inclusion_proof(&changed.to_proof) {
        return false;
    }
    match (&changed.from_leaf, &changed.from_proof) {
        (Some(_), Some(from_proof)) => from_proof.root_hash == from_root && verify_inclusion_proof(from_proof),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct InMemorySource {
        nodes: std::collections::HashMap<(u32, Vec<u8>), [u8; 32]>,
    }

    #[async_trait::async_trait]
    impl NodeSource for InMemorySource {
        async fn node_hash(&self, depth: u32, prefix: &[u8]) -> crate::error::Result<Option<[u8; 32]>> {
            Ok(self.nodes.get(&(depth, prefix.to_vec())).copied())
        }
    }

    fn sample_leaf() -> LeafData {
        LeafData {
            user_id: Uuid::nil(),
            identity_fingerprint: "aaaaaaaaaaaaaaaa".into(),
            signed_prekey_fingerprint: "bbbbbbbbbbbbbbbb".into(),
            version: 1,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn empty_tree_inclusion_proof_reconstructs_default_root() {
        let source = InMemorySource { nodes: std::collections::HashMap::new() };
        let leaf = sample_leaf();
        let path_bits = [0u8; 32];
        let defaults = default_hashes();
        // An empty tree's root with no leaf actually set is just defaults[TREE_DEPTH];
        // here we prove a freshly-inserted single leaf against a root we compute by hand.
        // `defaults[k]` is the empty subtree hash of height `k` (height 0 = leaf), so the
        // sibling at level `level` up from the leaf is `defaults[level]` — the same
        // indexing the Epoch Sealer uses when it falls back to a default hash.
        let mut current = leaf_hash(&leaf);
        for level in 0..TREE_DEPTH {
            let sibling = defaults[level];
            current = internal_hash(&current, &sibling);
        }
        let proof = build_inclusion_proof(&source, 1, leaf, path_bits, current).await.unwrap();
        assert!(verify_inclusion_proof(&proof));
    }

    /// `default_hashes()` builds the all-default root bottom-up by repeated doubling
    /// (`defaults[k+1] = H(defaults[k], defaults[k])`). `build_inclusion_proof` instead
    /// walks a path root-down, falling back to `defaults[TREE_DEPTH - depth]` per level.
    /// A proof for a leaf whose own hash happens to equal `defaults[0]`, with every
    /// sibling unset (so every one also falls back to a default), must therefore
    /// reconstruct `defaults[TREE_DEPTH]` exactly — this fails immediately if the two
    /// ever disagree on which end of `defaults` is height 0 again.
    #[tokio::test]
    async fn all_default_path_reconstructs_the_canonical_empty_root() {
        let source = InMemorySource { nodes: std::collections::HashMap::new() };
        let defaults = default_hashes();
        let leaf = sample_leaf();
        let path_bits = [0u8; 32];

        let mut current = defaults[0];
        for level in 0..TREE_DEPTH {
            current = internal_hash(&current, &defaults[level]);
        }

        let mut proof = build_inclusion_proof(&source, 1, leaf, path_bits, current).await.unwrap();
        proof.leaf_hash = defaults[0];
        assert!(verify_inclusion_proof(&proof));
    }

    #[test]
    fn internal_hash_matches_unprefixed_sha256_of_concatenation() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        let mut expected = Vec::new();
        expected.extend_from_slice(&left);
        expected.extend_from_slice(&right);
        let expected: [u8; 32] = Sha256::digest(&expected).into();
        assert_eq!(internal_hash(&left, &right), expected);
    }

    #[test]
    fn leaf_hash_matches_unprefixed_sha256_of_canonical_bytes() {
        let leaf = sample_leaf();
        let expected: [u8; 32] = Sha256::digest(leaf.canonical_bytes()).into();
        assert_eq!(leaf_hash(&leaf), expected);
    }

    #[test]
    fn empty_leaf_hash_is_sha256_of_empty_string() {
        let expected: [u8; 32] = Sha256::digest(b"").into();
        assert_eq!(default_hashes()[0], expected);
    }

    #[test]
    fn tampered_sibling_fails_verification() {
        let leaf = sample_leaf();
        let path_bits = [0u8; 32];
        let proof = InclusionProof {
            epoch_number: 1,
            leaf_hash: leaf_hash(&leaf),
            leaf,
            sibling_path: vec![[1u8; 32]; TREE_DEPTH],
            path_bits,
            root_hash: [2u8; 32],
        };
        assert!(!verify_inclusion_proof(&proof));
    }

    #[test]
    fn leaf_path_bits_are_stable_for_a_given_user() {
        let user_id = Uuid::new_v4();
        assert_eq!(leaf_path_bits(user_id), leaf_path_bits(user_id));
    }

    #[test]
    fn path_prefix_masks_unused_trailing_bits() {
        let mut bits = [0u8; 32];
        bits[0] = 0b1010_1010;
        let prefix = path_prefix(&bits, 4);
        assert_eq!(prefix, vec![0b1010_0000]);
    }
}
