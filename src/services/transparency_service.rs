//! C4: read-side facade over the transparency log. Owns no write path of its own — the
//! Epoch Sealer is the sole writer — but exposes the signed head, inclusion proofs,
//! consistency proofs, the audit log, signing-key history, and client-verified state.

use crate::adapters::database::DbPool;
use crate::adapters::database::transparency_repo::TransparencyRepository;
use crate::domain::transparency::{
    ChangedLeaf, ClientState, ConsistencyProof, Epoch, InclusionProof, SigningKeyInfo,
};
use crate::error::{AppError, Result};
use crate::services::merkle::{self, NodeSource, leaf_path_bits};
use time::OffsetDateTime;
use uuid::Uuid;

/// Reads node hashes as of a fixed epoch, acquiring a pool connection per lookup. Kept
/// intentionally simple: proof construction touches at most `TREE_DEPTH` nodes per call,
/// not a hot path relative to bundle fetches.
struct PooledNodeSource {
    pool: DbPool,
    repo: TransparencyRepository,
    epoch_number: i64,
}

#[async_trait::async_trait]
impl NodeSource for PooledNodeSource {
    async fn node_hash(&self, depth: u32, path_prefix: &[u8]) -> Result<Option<[u8; 32]>> {
        let mut conn = self.pool.acquire().await?;
        self.repo.fetch_node_at_or_before(&mut conn, self.epoch_number, depth, path_prefix).await
    }
}

#[derive(Clone, Debug)]
pub struct TransparencyService {
    pool: DbPool,
    repo: TransparencyRepository,
}

impl TransparencyService {
    #[must_use]
    pub const fn new(pool: DbPool, repo: TransparencyRepository) -> Self {
        Self { pool, repo }
    }

    /// The most recently sealed epoch, if the log has sealed one yet.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub async fn latest_signed_head(&self) -> Result<Option<Epoch>> {
        let mut conn = self.pool.acquire().await?;
        self.repo.fetch_latest_epoch(&mut conn).await
    }

    /// Builds an inclusion proof for `user_id` at `epoch_number`, or at the latest sealed
    /// epoch when `epoch_number` is `None`.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if no epoch has been sealed yet, or if `user_id` has
    /// no committed leaf at or before the target epoch.
    pub async fn inclusion_proof(&self, user_id: Uuid, epoch_number: Option<i64>) -> Result<InclusionProof> {
        let mut conn = self.pool.acquire().await?;

        let epoch = match epoch_number {
            Some(n) => self.repo.fetch_epoch(&mut conn, n).await?.ok_or(AppError::NotFound)?,
            None => self.repo.fetch_latest_epoch(&mut conn).await?.ok_or(AppError::NotFound)?,
        };

        let leaf = self.repo.fetch_committed_leaf(&mut conn, user_id, epoch.epoch_number).await?.ok_or(AppError::NotFound)?;

        let path_bits = leaf_path_bits(user_id);
        let source = PooledNodeSource { pool: self.pool.clone(), repo: self.repo.clone(), epoch_number: epoch.epoch_number };
        merkle::build_inclusion_proof(&source, epoch.epoch_number, leaf, path_bits, epoch.root_hash).await
    }

    /// Builds a consistency proof between two sealed epochs, carrying every leaf that
    /// changed in between with inclusion proofs at both ends. I6 (monotonicity) is
    /// enforced at write time by the Epoch Sealer, not re-derived here.
    ///
    /// # Errors
    /// Returns `AppError::KeyPrecondition` if `from_epoch >= to_epoch`, or
    /// `AppError::NotFound` if either epoch was never sealed.
    pub async fn consistency_proof(&self, from_epoch: i64, to_epoch: i64) -> Result<ConsistencyProof> {
        if from_epoch >= to_epoch {
            return Err(AppError::KeyPrecondition("from_epoch must be strictly less than to_epoch".into()));
        }

        let mut conn = self.pool.acquire().await?;
        let from = self.repo.fetch_epoch(&mut conn, from_epoch).await?.ok_or(AppError::NotFound)?;
        let to = self.repo.fetch_epoch(&mut conn, to_epoch).await?.ok_or(AppError::NotFound)?;

        let changed_users = self.repo.fetch_users_changed_between(&mut conn, from_epoch, to_epoch).await?;

        let from_source =
            PooledNodeSource { pool: self.pool.clone(), repo: self.repo.clone(), epoch_number: from.epoch_number };
        let to_source =
            PooledNodeSource { pool: self.pool.clone(), repo: self.repo.clone(), epoch_number: to.epoch_number };

        let mut changed_leaves = Vec::with_capacity(changed_users.len());
        for user_id in changed_users {
            let path_bits = leaf_path_bits(user_id);

            let from_leaf = self.repo.fetch_committed_leaf(&mut conn, user_id, from_epoch).await?;
            let to_leaf = self
                .repo
                .fetch_committed_leaf(&mut conn, user_id, to_epoch)
                .await?
                .ok_or_else(|| AppError::Fatal(format!("user {user_id} changed but has no leaf at to_epoch")))?;

            let from_proof = match from_leaf.clone() {
                Some(leaf) => {
                    Some(merkle::build_inclusion_proof(&from_source, from_epoch, leaf, path_bits, from.root_hash).await?)
                }
                None => None,
            };
            let to_proof =
                merkle::build_inclusion_proof(&to_source, to_epoch, to_leaf.clone(), path_bits, to.root_hash).await?;

            changed_leaves.push(ChangedLeaf { from_leaf, to_leaf, from_proof, to_proof });
        }

        Ok(ConsistencyProof {
            from_epoch,
            to_epoch,
            from_root: from.root_hash,
            to_root: to.root_hash,
            changed_leaves,
        })
    }

    /// An ordered page of sealed epochs, for public audit.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub async fn audit_log(&self, from_epoch: i64, limit: i64) -> Result<Vec<Epoch>> {
        let mut conn = self.pool.acquire().await?;
        self.repo.fetch_epoch_range(&mut conn, from_epoch, limit).await
    }

    /// All signing keys ever used, current and historical.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub async fn signing_keys(&self) -> Result<Vec<SigningKeyInfo>> {
        let mut conn = self.pool.acquire().await?;
        self.repo.list_signing_keys(&mut conn).await
    }

    /// Records a client's self-reported last-verified epoch and root hash.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub async fn record_client_state(
        &self,
        user_id: Uuid,
        device_id: String,
        last_verified_epoch: i64,
        last_verified_root_hash: [u8; 32],
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let state =
            ClientState { user_id, device_id, last_verified_epoch, last_verified_root_hash, verified_at: OffsetDateTime::now_utc() };
        self.repo.upsert_client_state(&mut conn, &state).await
    }

    /// Fetches a client's last-reported verification state.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the client has never reported state.
    pub async fn client_state(&self, user_id: Uuid, device_id: &str) -> Result<ClientState> {
        let mut conn = self.pool.acquire().await?;
        self.repo.fetch_client_state(&mut conn, user_id, device_id).await?.ok_or(AppError::NotFound)
    }
}
