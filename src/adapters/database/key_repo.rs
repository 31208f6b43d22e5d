use crate::adapters::database::records::{
    IdentityKeyRecord, OneTimePreKeyRecord, SealedSenderKeyRecord, SignedPreKeyRecord,
};
use crate::domain::crypto::{PublicKeyBytes, SignatureBytes};
use crate::domain::keys::{IdentityKey, OneTimePreKey, SealedSenderKey, SignedPreKey};
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct KeyRepository {}

impl KeyRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Marks the user's current active identity key (if any) `rotated` and inserts a new
    /// active row with `version = prior + 1` (or `1` if there was none). I1.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(level = "debug", skip(self, conn, public_key), err)]
    pub(crate) async fn rotate_identity_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        public_key: &PublicKeyBytes,
    ) -> Result<IdentityKey> {
        let prior_version: Option<i32> = sqlx::query_scalar(
            "UPDATE identity_keys SET status = 'rotated' WHERE user_id = $1 AND status = 'active' RETURNING version",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        let version = prior_version.unwrap_or(0) + 1;
        let fingerprint = public_key.fingerprint();

        let row: IdentityKeyRecord = sqlx::query_as(
            r"
            INSERT INTO identity_keys (user_id, public_key, fingerprint, version, status, created_at)
            VALUES ($1, $2, $3, $4, 'active', now())
            RETURNING user_id, public_key, fingerprint, version, status, created_at
            ",
        )
        .bind(user_id)
        .bind(public_key.as_bytes())
        .bind(&fingerprint)
        .bind(version)
        .fetch_one(&mut *conn)
        .await?;

        IdentityKey::try_from(row).map_err(AppError::KeyFormat)
    }

    /// Fetches the user's current active identity key, locking the row for update.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn fetch_active_identity_key_for_update(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<IdentityKey>> {
        let row: Option<IdentityKeyRecord> = sqlx::query_as(
            "SELECT user_id, public_key, fingerprint, version, status, created_at \
             FROM identity_keys WHERE user_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(IdentityKey::try_from).transpose().map_err(AppError::KeyFormat)
    }

    /// Fetches the user's current active identity key (read-only).
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn fetch_active_identity_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<IdentityKey>> {
        let row: Option<IdentityKeyRecord> = sqlx::query_as(
            "SELECT user_id, public_key, fingerprint, version, status, created_at \
             FROM identity_keys WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(IdentityKey::try_from).transpose().map_err(AppError::KeyFormat)
    }

    /// Upserts a signed prekey for `(user_id, key_id)`. Overwrites public key, signature
    /// and timestamps on conflict rather than keeping the prior row — see the
    /// upsert-not-insert-after-status-change contract.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(level = "debug", skip(self, conn, public_key, signature), err)]
    pub(crate) async fn upsert_signed_pre_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        key_id: i32,
        public_key: &PublicKeyBytes,
        signature: &SignatureBytes,
        ttl_days: i64,
    ) -> Result<SignedPreKey> {
        let fingerprint = public_key.fingerprint();

        let row: SignedPreKeyRecord = sqlx::query_as(
            r"
            INSERT INTO signed_pre_keys (user_id, key_id, public_key, signature, fingerprint, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, now(), now() + make_interval(days => $6))
            ON CONFLICT (user_id, key_id) DO UPDATE
            SET public_key = $3, signature = $4, fingerprint = $5, created_at = now(),
                expires_at = now() + make_interval(days => $6)
            RETURNING user_id, key_id, public_key, signature, fingerprint, created_at, expires_at
            ",
        )
        .bind(user_id)
        .bind(key_id)
        .bind(public_key.as_bytes())
        .bind(signature.as_bytes())
        .bind(&fingerprint)
        .bind(ttl_days)
        .fetch_one(&mut *conn)
        .await?;

        SignedPreKey::try_from(row).map_err(AppError::KeyFormat)
    }

    /// Fetches the user's most recently uploaded signed prekey.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn fetch_latest_signed_pre_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<SignedPreKey>> {
        let row: Option<SignedPreKeyRecord> = sqlx::query_as(
            "SELECT user_id, key_id, public_key, signature, fingerprint, created_at, expires_at \
             FROM signed_pre_keys WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(SignedPreKey::try_from).transpose().map_err(AppError::KeyFormat)
    }

    /// Inserts a batch of one-time prekeys, ignoring any `(user_id, key_id)` collisions.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(level = "debug", skip(self, conn, keys), err)]
    pub(crate) async fn insert_one_time_pre_keys(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        keys: &[(i32, PublicKeyBytes)],
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut key_ids = Vec::with_capacity(keys.len());
        let mut public_keys = Vec::with_capacity(keys.len());
        for (key_id, pk) in keys {
            key_ids.push(*key_id);
            public_keys.push(pk.as_bytes());
        }

        sqlx::query(
            r"
            INSERT INTO one_time_pre_keys (id, user_id, key_id, public_key, status, created_at)
            SELECT gen_random_uuid(), $1, k, pk, 'available', now()
            FROM UNNEST($2::int4[], $3::bytea[]) AS t(k, pk)
            ON CONFLICT (user_id, key_id) WHERE status != 'consumed' DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(&key_ids)
        .bind(&public_keys)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Atomically claims a single available one-time prekey for `user_id`, transitioning
    /// it to `consumed` and recording `requester_id`. Selection is lowest `key_id` first,
    /// with `FOR UPDATE SKIP LOCKED` guaranteeing no two concurrent claimants receive the
    /// same row. I4.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn claim_one_time_pre_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        requester_id: Uuid,
    ) -> Result<Option<OneTimePreKey>> {
        let row: Option<OneTimePreKeyRecord> = sqlx::query_as(
            r"
            WITH target AS (
                SELECT id FROM one_time_pre_keys
                WHERE user_id = $1 AND status = 'available'
                ORDER BY key_id ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE one_time_pre_keys
            SET status = 'consumed', claimed_by = $2, claimed_at = now()
            WHERE id IN (SELECT id FROM target)
            RETURNING id, user_id, key_id, public_key, status, claimed_by, claimed_at, created_at
            ",
        )
        .bind(user_id)
        .bind(requester_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(OneTimePreKey::try_from).transpose().map_err(AppError::KeyFormat)
    }

    /// Counts one-time prekeys currently `available` for a user. I3.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn count_available_one_time_pre_keys(&self, conn: &mut PgConnection, user_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM one_time_pre_keys WHERE user_id = $1 AND status = 'available'")
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }

    /// Returns whether the signed prekey's `expires_at` has already passed.
    #[must_use]
    pub fn is_expired(expires_at: OffsetDateTime) -> bool {
        expires_at < OffsetDateTime::now_utc()
    }

    /// Inserts a new sealed-sender key version for a user. Versions are append-only;
    /// fetch callers always take the newest unexpired row.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(level = "debug", skip(self, conn, public_key), err)]
    pub(crate) async fn upsert_sealed_sender_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        public_key: &PublicKeyBytes,
        ttl_days: i64,
    ) -> Result<SealedSenderKey> {
        let fingerprint = public_key.fingerprint();

        let next_version: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM sealed_sender_keys WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

        let row: SealedSenderKeyRecord = sqlx::query_as(
            r"
            INSERT INTO sealed_sender_keys (user_id, public_key, fingerprint, version, created_at, expires_at)
            VALUES ($1, $2, $3, $4, now(), now() + make_interval(days => $5))
            RETURNING user_id, public_key, fingerprint, version, created_at, expires_at
            ",
        )
        .bind(user_id)
        .bind(public_key.as_bytes())
        .bind(&fingerprint)
        .bind(next_version)
        .bind(ttl_days)
        .fetch_one(&mut *conn)
        .await?;

        SealedSenderKey::try_from(row).map_err(AppError::KeyFormat)
    }

    /// Fetches a user's newest unexpired sealed-sender key, if any.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn), err)]
    pub(crate) async fn fetch_active_sealed_sender_key(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<SealedSenderKey>> {
        let row: Option<SealedSenderKeyRecord> = sqlx::query_as(
            "SELECT user_id, public_key, fingerprint, version, created_at, expires_at \
             FROM sealed_sender_keys WHERE user_id = $1 AND expires_at > now() \
             ORDER BY version DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(SealedSenderKey::try_from).transpose().map_err(AppError::KeyFormat)
    }
}
