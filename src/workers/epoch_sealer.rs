//! C5: the transparency log's single writer. Drains the pending key-update queue,
//! recomputes the touched path of the sparse Merkle tree, seals a new signed epoch, and
//! commits all of it in one transaction. Guarded by a Postgres advisory lock so exactly
//! one process performs a given seal even when several replicas run this worker.

use crate::adapters::database::DbPool;
use crate::adapters::database::transparency_repo::TransparencyRepository;
use crate::config::SealingConfig;
use crate::domain::keys::KeyUpdate;
use crate::domain::transparency::{Epoch, LeafData, TREE_DEPTH};
use crate::error::{AppError, Result};
use crate::services::merkle;
use crate::services::proof_signer::ProofSigner;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    iterations_total: Counter<u64>,
    leaves_sealed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("keytrans-directory");
        Self {
            iterations_total: meter
                .u64_counter("keytrans_sealer_iterations_total")
                .with_description("Epoch sealer iterations by outcome")
                .build(),
            leaves_sealed_total: meter
                .u64_counter("keytrans_sealer_leaves_total")
                .with_description("Leaves committed across all sealed epochs")
                .build(),
        }
    }
}

/// C5: periodically (or when the pending queue grows large) seals a new epoch.
#[derive(Debug)]
pub struct EpochSealer {
    pool: DbPool,
    repo: TransparencyRepository,
    signer: Arc<ProofSigner>,
    config: SealingConfig,
    metrics: Metrics,
}

impl EpochSealer {
    #[must_use]
    pub fn new(pool: DbPool, repo: TransparencyRepository, signer: Arc<ProofSigner>, config: SealingConfig) -> Self {
        Self { pool, repo, signer, config, metrics: Metrics::new() }
    }

    /// Runs until shutdown, sealing on a fixed interval or as soon as the pending queue
    /// crosses `batch_threshold`, whichever comes first.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let poll = Duration::from_secs(self.config.interval_secs).min(Duration::from_secs(5)).max(Duration::from_secs(1));
        let mut poll_interval = tokio::time::interval(poll);
        let mut last_seal = tokio::time::Instant::now();
        let seal_every = Duration::from_secs(self.config.interval_secs);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = poll_interval.tick() => {
                    let due = last_seal.elapsed() >= seal_every;
                    let over_threshold = self.pending_over_threshold().await.unwrap_or(false);
                    if due || over_threshold {
                        match self.seal_once().instrument(tracing::info_span!("epoch_seal_iteration")).await {
                            Ok(Some(epoch_number)) => {
                                tracing::info!(epoch_number, "sealed new epoch");
                                self.metrics.iterations_total.add(1, &[KeyValue::new("outcome", "sealed")]);
                            }
                            Ok(None) => {
                                self.metrics.iterations_total.add(1, &[KeyValue::new("outcome", "empty")]);
                            }
                            Err(e) => {
                                tracing::error!(error = ?e, "epoch seal iteration failed");
                                self.metrics.iterations_total.add(1, &[KeyValue::new("outcome", "error")]);
                            }
                        }
                        last_seal = tokio::time::Instant::now();
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("epoch sealer shutting down...");
    }

    async fn pending_over_threshold(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let count = self.repo.count_pending_key_updates(&mut conn).await?;
        Ok(count >= i64::try_from(self.config.batch_threshold).unwrap_or(i64::MAX))
    }

    /// Seals a new epoch if the pending queue is non-empty. Returns the new epoch number,
    /// or `None` if there was nothing to seal.
    ///
    /// # Errors
    /// Returns `AppError::Fatal` if a drained update violates the monotonicity invariant
    /// (a new leaf version lower than the one already committed), or `AppError::Store` if
    /// any database operation fails.
    #[tracing::instrument(skip(self), err)]
    pub async fn seal_once(&self) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;
        self.repo.acquire_sealer_lock(&mut tx).await?;

        let updates = self.repo.drain_pending_key_updates(&mut tx, i64::MAX).await?;
        if updates.is_empty() {
            tx.commit().await?;
            return Ok(None);
        }

        let prev_epoch = self.repo.fetch_latest_epoch(&mut tx).await?;
        let prev_epoch_number = prev_epoch.as_ref().map_or(0, |e| e.epoch_number);
        let new_epoch_number = prev_epoch_number + 1;

        let root = self.apply_updates(&mut tx, prev_epoch_number, new_epoch_number, &updates).await?;
        let tree_size = self.repo.count_committed_users(&mut tx, new_epoch_number).await?;

        let epoch = Epoch {
            epoch_number: new_epoch_number,
            root_hash: root,
            tree_size,
            previous_root_hash: prev_epoch.map(|e| e.root_hash),
            signature: Vec::new(),
            signing_key_fingerprint: self.signer.fingerprint().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        let signature = self.signer.sign(&epoch.signed_payload());
        let epoch = Epoch { signature, ..epoch };

        self.repo.insert_epoch(&mut tx, &epoch).await?;
        tx.commit().await?;

        self.metrics.leaves_sealed_total.add(u64::try_from(updates.len()).unwrap_or(u64::MAX), &[]);
        Ok(Some(new_epoch_number))
    }

    /// Commits every drained update's leaf and recomputes the touched path of internal
    /// nodes, maintaining an in-memory overlay so later leaves in the same batch see the
    /// effect of earlier ones on shared ancestors. Returns the batch's new root hash.
    async fn apply_updates(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        prev_epoch_number: i64,
        new_epoch_number: i64,
        updates: &[KeyUpdate],
    ) -> Result<[u8; 32]> {
        let defaults = merkle::default_hashes();
        let mut overlay: HashMap<(u32, Vec<u8>), [u8; 32]> = HashMap::new();

        for update in updates {
            let existing_version = self.repo.fetch_latest_leaf_version(&mut *tx, update.user_id, prev_epoch_number).await?;
            if let Some(existing) = existing_version {
                if update.version < existing {
                    return Err(AppError::Fatal(format!(
                        "monotonicity violation for user {}: incoming version {} is lower than committed version {existing}",
                        update.user_id, update.version
                    )));
                }
            }

            let leaf = LeafData {
                user_id: update.user_id,
                identity_fingerprint: update.identity_fingerprint.clone(),
                signed_prekey_fingerprint: update.signed_prekey_fingerprint.clone(),
                version: update.version,
                timestamp: update.enqueued_at,
            };

            self.repo
                .record_committed_leaf(
                    &mut *tx,
                    new_epoch_number,
                    leaf.user_id,
                    &leaf.identity_fingerprint,
                    &leaf.signed_prekey_fingerprint,
                    leaf.version,
                    leaf.timestamp,
                )
                .await?;

            let path_bits = merkle::leaf_path_bits(leaf.user_id);
            let mut current = merkle::leaf_hash(&leaf);
            let leaf_depth = u32::try_from(TREE_DEPTH).expect("TREE_DEPTH fits u32");
            overlay.insert((leaf_depth, merkle::path_prefix(&path_bits, leaf_depth)), current);

            for level in 0..TREE_DEPTH {
                let depth = leaf_depth - u32::try_from(level).expect("level fits u32");
                let mut sibling_bits = path_bits;
                merkle::flip_bit(&mut sibling_bits, depth as usize - 1);
                let sibling_prefix = merkle::path_prefix(&sibling_bits, depth);
                let sibling = self
                    .node_or_default(&mut *tx, &overlay, depth, &sibling_prefix, prev_epoch_number, &defaults)
                    .await?;

                let bit = merkle::bit_at(&path_bits, depth as usize - 1);
                current = if bit { merkle::internal_hash(&sibling, &current) } else { merkle::internal_hash(&current, &sibling) };

                let parent_depth = depth - 1;
                let parent_prefix = merkle::path_prefix(&path_bits, parent_depth);
                overlay.insert((parent_depth, parent_prefix), current);
            }
        }

        let nodes: Vec<(u32, Vec<u8>, [u8; 32])> = overlay.into_iter().map(|((d, p), h)| (d, p, h)).collect();
        let root = nodes
            .iter()
            .find(|(depth, prefix, _)| *depth == 0 && prefix.is_empty())
            .map(|(_, _, hash)| *hash)
            .ok_or_else(|| AppError::Fatal("sealer produced no root node".into()))?;

        self.repo.write_changed_nodes(&mut *tx, new_epoch_number, &nodes).await?;
        Ok(root)
    }

    async fn node_or_default(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        overlay: &HashMap<(u32, Vec<u8>), [u8; 32]>,
        depth: u32,
        prefix: &[u8],
        prev_epoch_number: i64,
        defaults: &[[u8; 32]; TREE_DEPTH + 1],
    ) -> Result<[u8; 32]> {
        if let Some(hash) = overlay.get(&(depth, prefix.to_vec())) {
            return Ok(*hash);
        }
        if let Some(hash) = self.repo.fetch_node_at_or_before(&mut *tx, prev_epoch_number, depth, prefix).await? {
            return Ok(hash);
        }
        let height = TREE_DEPTH - depth as usize;
        Ok(defaults[height])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_never_exceeds_five_seconds() {
        let config = SealingConfig { interval_secs: 3600, batch_threshold: 1024 };
        let poll = Duration::from_secs(config.interval_secs).min(Duration::from_secs(5)).max(Duration::from_secs(1));
        assert_eq!(poll, Duration::from_secs(5));
    }

    #[test]
    fn poll_interval_never_drops_below_one_second() {
        let config = SealingConfig { interval_secs: 0, batch_threshold: 1024 };
        let poll = Duration::from_secs(config.interval_secs).min(Duration::from_secs(5)).max(Duration::from_secs(1));
        assert_eq!(poll, Duration::from_secs(1));
    }
}
