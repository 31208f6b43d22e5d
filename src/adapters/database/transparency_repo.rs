use crate::adapters::database::records::{EpochRecord, SigningKeyRecord};
use crate::adapters::database::records::transparency::{CommittedLeafRecord, MerkleNodeRecord};
use crate::domain::keys::{KeyUpdate, KeyUpdateKind};
use crate::domain::transparency::{ClientState, Epoch, LeafData, SigningKeyInfo};
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fixed key for the single-writer advisory lock guarding epoch sealing.
const SEALER_ADVISORY_LOCK_KEY: i64 = 0x4B45_5954_5241_4E53; // "KEYTRANS" packed

#[derive(Clone, Debug, Default)]
pub struct TransparencyRepository {}

impl TransparencyRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Acquires the single-writer sealing lock for the duration of the current
    /// transaction. Blocks if another sealer run is in flight elsewhere.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn acquire_sealer_lock(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(SEALER_ADVISORY_LOCK_KEY).execute(conn).await?;
        Ok(())
    }

    /// Enqueues a durable pending key update. Crash-safe: survives until drained by a
    /// sealing run.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn enqueue_key_update(&self, conn: &mut PgConnection, update: &KeyUpdate) -> Result<()> {
        let kind = match update.kind {
            KeyUpdateKind::Created => "created",
            KeyUpdateKind::Rotated => "rotated",
            KeyUpdateKind::Revoked => "revoked",
        };
        sqlx::query(
            r"
            INSERT INTO key_update_queue
                (id, user_id, identity_fingerprint, signed_prekey_fingerprint, version, kind, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(update.id)
        .bind(update.user_id)
        .bind(&update.identity_fingerprint)
        .bind(&update.signed_prekey_fingerprint)
        .bind(update.version)
        .bind(kind)
        .bind(update.enqueued_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Counts all pending updates, used to decide whether to seal out-of-cycle.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn count_pending_key_updates(&self, conn: &mut PgConnection) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM key_update_queue").fetch_one(conn).await?;
        Ok(count)
    }

    /// Drains up to `limit` pending updates in enqueue order, within the caller's
    /// transaction. Must be called with the sealer lock held.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn drain_pending_key_updates(
        &self,
        conn: &mut PgConnection,
        limit: i64,
    ) -> Result<Vec<KeyUpdate>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: Uuid,
            user_id: Uuid,
            identity_fingerprint: String,
            signed_prekey_fingerprint: String,
            version: i32,
            kind: String,
            enqueued_at: OffsetDateTime,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r"
            DELETE FROM key_update_queue
            WHERE id IN (SELECT id FROM key_update_queue ORDER BY enqueued_at ASC LIMIT $1)
            RETURNING id, user_id, identity_fingerprint, signed_prekey_fingerprint, version, kind, enqueued_at
            ",
        )
        .bind(limit)
        .fetch_all(conn)
        .await?;

        rows.into_iter()
            .map(|r| {
                let kind = match r.kind.as_str() {
                    "created" => KeyUpdateKind::Created,
                    "rotated" => KeyUpdateKind::Rotated,
                    "revoked" => KeyUpdateKind::Revoked,
                    other => return Err(AppError::Fatal(format!("unknown key update kind: {other}"))),
                };
                Ok(KeyUpdate {
                    id: r.id,
                    user_id: r.user_id,
                    identity_fingerprint: r.identity_fingerprint,
                    signed_prekey_fingerprint: r.signed_prekey_fingerprint,
                    version: r.version,
                    kind,
                    enqueued_at: r.enqueued_at,
                })
            })
            .collect()
    }

    /// Fetches the leaf most recently committed for `user_id` at or before
    /// `epoch_number`, used to enforce the monotonicity invariant (I6) and to build
    /// consistency proofs.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_latest_leaf_version(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        at_or_before_epoch: i64,
    ) -> Result<Option<i32>> {
        let version: Option<i32> = sqlx::query_scalar(
            "SELECT version FROM committed_leaves WHERE user_id = $1 AND epoch_number <= $2 \
             ORDER BY epoch_number DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(at_or_before_epoch)
        .fetch_optional(conn)
        .await?;
        Ok(version)
    }

    /// Records the leaf committed for a user at a given epoch, for later lookup by
    /// `fetch_latest_leaf_version` and proof reconstruction.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn record_committed_leaf(
        &self,
        conn: &mut PgConnection,
        epoch_number: i64,
        user_id: Uuid,
        identity_fingerprint: &str,
        signed_prekey_fingerprint: &str,
        version: i32,
        timestamp: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO committed_leaves
                (epoch_number, user_id, identity_fingerprint, signed_prekey_fingerprint, version, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(epoch_number)
        .bind(user_id)
        .bind(identity_fingerprint)
        .bind(signed_prekey_fingerprint)
        .bind(version)
        .bind(timestamp)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Fetches the leaf most recently committed for `user_id` at or before
    /// `epoch_number`, used to reconstruct inclusion and consistency proofs. `None` means
    /// the user had no committed leaf at that point in the log's history.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_committed_leaf(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        at_or_before_epoch: i64,
    ) -> Result<Option<LeafData>> {
        let row: Option<CommittedLeafRecord> = sqlx::query_as(
            "SELECT user_id, identity_fingerprint, signed_prekey_fingerprint, version, timestamp \
             FROM committed_leaves WHERE user_id = $1 AND epoch_number <= $2 \
             ORDER BY epoch_number DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(at_or_before_epoch)
        .fetch_optional(conn)
        .await?;

        Ok(row.map(LeafData::from))
    }

    /// Counts distinct users with a committed leaf at or before `at_or_before_epoch`,
    /// i.e. the tree's non-default leaf count as of that epoch.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn count_committed_users(&self, conn: &mut PgConnection, at_or_before_epoch: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT user_id) FROM committed_leaves WHERE epoch_number <= $1",
        )
        .bind(at_or_before_epoch)
        .fetch_one(conn)
        .await?;
        Ok(count)
    }

    /// Upserts the (sparse) set of internal/leaf nodes whose hash changed in this epoch.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn write_changed_nodes(
        &self,
        conn: &mut PgConnection,
        epoch_number: i64,
        nodes: &[(u32, Vec<u8>, [u8; 32])],
    ) -> Result<()> {
        for (depth, path_prefix, hash) in nodes {
            sqlx::query(
                "INSERT INTO merkle_nodes (epoch_number, depth, path_prefix, hash) VALUES ($1, $2, $3, $4)",
            )
            .bind(epoch_number)
            .bind(i32::try_from(*depth).unwrap_or(i32::MAX))
            .bind(path_prefix)
            .bind(hash.as_slice())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Looks up the node hash at `(depth, path_prefix)` as of the nearest epoch
    /// `<= epoch_number` that touched it. Returns `None` if the node has never been
    /// written (the caller should fall back to the default-hash chain).
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_node_at_or_before(
        &self,
        conn: &mut PgConnection,
        epoch_number: i64,
        depth: u32,
        path_prefix: &[u8],
    ) -> Result<Option<[u8; 32]>> {
        let row: Option<MerkleNodeRecord> = sqlx::query_as(
            r"
            SELECT epoch_number, depth, path_prefix, hash FROM merkle_nodes
            WHERE depth = $1 AND path_prefix = $2 AND epoch_number <= $3
            ORDER BY epoch_number DESC LIMIT 1
            ",
        )
        .bind(i32::try_from(depth).unwrap_or(i32::MAX))
        .bind(path_prefix)
        .bind(epoch_number)
        .fetch_optional(conn)
        .await?;

        row.map(|r| {
            let arr: [u8; 32] = r.hash.try_into().map_err(|_| AppError::Fatal("node hash not 32 bytes".into()))?;
            Ok(arr)
        })
        .transpose()
    }

    /// Inserts the next epoch. Caller must hold the sealer lock and must have already
    /// validated `epoch.previous_root_hash` matches the current head (I5).
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn insert_epoch(&self, conn: &mut PgConnection, epoch: &Epoch) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO epochs (epoch_number, root_hash, tree_size, previous_root_hash, signature, signing_key_fingerprint, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(epoch.epoch_number)
        .bind(epoch.root_hash.as_slice())
        .bind(epoch.tree_size)
        .bind(epoch.previous_root_hash.as_ref().map(<[u8]>::to_vec))
        .bind(&epoch.signature)
        .bind(&epoch.signing_key_fingerprint)
        .bind(epoch.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Fetches the most recently committed epoch, if any.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_latest_epoch(&self, conn: &mut PgConnection) -> Result<Option<Epoch>> {
        let row: Option<EpochRecord> = sqlx::query_as(
            "SELECT epoch_number, root_hash, tree_size, previous_root_hash, signature, signing_key_fingerprint, created_at \
             FROM epochs ORDER BY epoch_number DESC LIMIT 1",
        )
        .fetch_optional(conn)
        .await?;

        row.map(Epoch::try_from).transpose().map_err(AppError::Fatal)
    }

    /// Fetches a specific epoch by number.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_epoch(&self, conn: &mut PgConnection, epoch_number: i64) -> Result<Option<Epoch>> {
        let row: Option<EpochRecord> = sqlx::query_as(
            "SELECT epoch_number, root_hash, tree_size, previous_root_hash, signature, signing_key_fingerprint, created_at \
             FROM epochs WHERE epoch_number = $1",
        )
        .bind(epoch_number)
        .fetch_optional(conn)
        .await?;

        row.map(Epoch::try_from).transpose().map_err(AppError::Fatal)
    }

    /// Fetches an ordered page of epochs for the audit log, starting at `from_epoch`.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_epoch_range(
        &self,
        conn: &mut PgConnection,
        from_epoch: i64,
        limit: i64,
    ) -> Result<Vec<Epoch>> {
        let rows: Vec<EpochRecord> = sqlx::query_as(
            "SELECT epoch_number, root_hash, tree_size, previous_root_hash, signature, signing_key_fingerprint, created_at \
             FROM epochs WHERE epoch_number >= $1 ORDER BY epoch_number ASC LIMIT $2",
        )
        .bind(from_epoch)
        .bind(limit)
        .fetch_all(conn)
        .await?;

        rows.into_iter().map(|r| Epoch::try_from(r).map_err(AppError::Fatal)).collect()
    }

    /// Finds all users whose committed leaf changed strictly between two epochs
    /// (exclusive of `from_epoch`, inclusive of `to_epoch`).
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_users_changed_between(
        &self,
        conn: &mut PgConnection,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<Uuid>> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM committed_leaves WHERE epoch_number > $1 AND epoch_number <= $2",
        )
        .bind(from_epoch)
        .bind(to_epoch)
        .fetch_all(conn)
        .await?;
        Ok(users)
    }

    /// Inserts a new signing key (the prior active one's `valid_until` must already have
    /// been set by the caller as part of rotation).
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn insert_signing_key(&self, conn: &mut PgConnection, key: &SigningKeyInfo) -> Result<()> {
        let algorithm = match key.algorithm {
            crate::domain::transparency::SigningAlgorithm::Ed25519 => "ed25519",
            crate::domain::transparency::SigningAlgorithm::P256Ecdsa => "p256_ecdsa",
        };
        sqlx::query(
            "INSERT INTO signing_keys (fingerprint, public_key, algorithm, valid_from, valid_until) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(&key.fingerprint)
        .bind(&key.public_key)
        .bind(algorithm)
        .bind(key.valid_from)
        .bind(key.valid_until)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Lists all known signing keys, historical and current.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn list_signing_keys(&self, conn: &mut PgConnection) -> Result<Vec<SigningKeyInfo>> {
        let rows: Vec<SigningKeyRecord> =
            sqlx::query_as("SELECT fingerprint, public_key, algorithm, valid_from, valid_until FROM signing_keys ORDER BY valid_from ASC")
                .fetch_all(conn)
                .await?;

        rows.into_iter().map(|r| SigningKeyInfo::try_from(r).map_err(AppError::Fatal)).collect()
    }

    /// Upserts a client's self-reported last-verified epoch/root.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    pub(crate) async fn upsert_client_state(&self, conn: &mut PgConnection, state: &ClientState) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO client_state (user_id, device_id, last_verified_epoch, last_verified_root_hash, verified_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, device_id) DO UPDATE
            SET last_verified_epoch = $3, last_verified_root_hash = $4, verified_at = $5
            ",
        )
        .bind(state.user_id)
        .bind(&state.device_id)
        .bind(state.last_verified_epoch)
        .bind(state.last_verified_root_hash.as_slice())
        .bind(state.verified_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Fetches a client's last-reported verification state.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub(crate) async fn fetch_client_state(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        device_id: &str,
    ) -> Result<Option<ClientState>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            user_id: Uuid,
            device_id: String,
            last_verified_epoch: i64,
            last_verified_root_hash: Vec<u8>,
            verified_at: OffsetDateTime,
        }

        let row: Option<Row> = sqlx::query_as(
            "SELECT user_id, device_id, last_verified_epoch, last_verified_root_hash, verified_at \
             FROM client_state WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(conn)
        .await?;

        row.map(|r| {
            let hash: [u8; 32] =
                r.last_verified_root_hash.try_into().map_err(|_| AppError::Fatal("root hash not 32 bytes".into()))?;
            Ok(ClientState {
                user_id: r.user_id,
                device_id: r.device_id,
                last_verified_epoch: r.last_verified_epoch,
                last_verified_root_hash: hash,
                verified_at: r.verified_at,
            })
        })
        .transpose()
    }
}
