use crate::adapters::database::DbPool;
use crate::adapters::database::key_repo::KeyRepository;
use crate::adapters::database::transparency_repo::TransparencyRepository;
use crate::config::KeysConfig;
use crate::domain::crypto::{PublicKeyBytes, SignatureBytes, verify_signature};
use crate::domain::keys::{IdentityKey, KeyUpdate, KeyUpdateKind, SealedSenderKey, SignedPreKey};
use crate::error::{AppError, Result};
use backon::{ExponentialBuilder, Retryable};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Transient-store retry policy for the facade write path (§4.1): up to 3 attempts,
/// 50ms -> 200ms -> 800ms. Constraint violations surface as `KeyFormat`/`KeyQuota`/
/// `KeySignature`/`KeyPrecondition` and are never retried, only `AppError::Store`.
fn store_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(800))
        .with_max_times(3)
}

fn is_transient_store_error(err: &AppError) -> bool {
    matches!(err, AppError::Store(_))
}

#[derive(Clone, Debug)]
struct Metrics {
    uploads_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("keytrans-directory");
        Self {
            uploads_total: meter
                .u64_counter("keytrans_key_uploads_total")
                .with_description("Key upload requests processed, by kind")
                .build(),
        }
    }
}

/// Summary of a user's current key state, backing `GET /keys/status`.
#[derive(Debug, Clone, Copy)]
pub struct KeyStatusSummary {
    pub has_identity_key: bool,
    pub has_signed_prekey: bool,
    pub signed_prekey_expired: bool,
    pub one_time_prekey_count: i64,
}

impl KeyStatusSummary {
    #[must_use]
    pub const fn e2ee_ready(&self) -> bool {
        self.has_identity_key && self.has_signed_prekey && !self.signed_prekey_expired
    }
}

/// C1: owns the identity/signed/one-time prekey tables, enforces signature chaining
/// (I2), quota (I3), and enqueues a durable `KeyUpdate` for every change the Epoch
/// Sealer must eventually commit. Each operation runs in its own transaction, matching
/// the facade's three independent upload endpoints.
#[derive(Clone, Debug)]
pub struct KeyService {
    pool: DbPool,
    repo: KeyRepository,
    transparency_repo: TransparencyRepository,
    config: KeysConfig,
    metrics: Metrics,
}

impl KeyService {
    #[must_use]
    pub fn new(pool: DbPool, repo: KeyRepository, transparency_repo: TransparencyRepository, config: KeysConfig) -> Self {
        Self { pool, repo, transparency_repo, config, metrics: Metrics::new() }
    }

    /// `StoreIdentityKey`: always rotate-or-create — marks any prior active key
    /// `rotated` and inserts a new active row with an incremented version. Enqueues a
    /// `KeyUpdate` for the transparency log.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(skip(self, public_key), fields(%user_id), err)]
    pub async fn store_identity_key(&self, user_id: Uuid, public_key: PublicKeyBytes) -> Result<IdentityKey> {
        let identity_key = (|| async {
            let mut tx = self.pool.begin().await?;

            let identity_key = self.repo.rotate_identity_key(&mut tx, user_id, &public_key).await?;

            let latest_signed_pre_key = self.repo.fetch_latest_signed_pre_key(&mut tx, user_id).await?;
            if let Some(signed_pre_key) = latest_signed_pre_key {
                self.enqueue_update(&mut tx, &identity_key, &signed_pre_key).await?;
            }

            tx.commit().await?;
            Ok::<_, AppError>(identity_key)
        })
        .retry(store_retry_policy())
        .when(is_transient_store_error)
        .notify(|e, d| tracing::warn!(error = %e, delay = ?d, "retrying identity key store after transient error"))
        .await?;

        let was_rotation = identity_key.version > 1;
        self.metrics.uploads_total.add(
            1,
            &[KeyValue::new("kind", "identity"), KeyValue::new("rotated", was_rotation)],
        );
        tracing::info!(%user_id, version = identity_key.version, "identity key stored");
        Ok(identity_key)
    }

    /// `StoreSignedPreKey`: verifies `signature` over `public_key` under the user's
    /// active identity key, then upserts on `(user, key_id)`. Enqueues a `KeyUpdate`.
    ///
    /// # Errors
    /// Returns `AppError::KeyPrecondition` if there is no active identity key,
    /// `AppError::KeySignature` if the signature does not verify, or `AppError::Store`
    /// on database failure.
    #[tracing::instrument(skip(self, public_key, signature), fields(%user_id), err)]
    pub async fn store_signed_pre_key(
        &self,
        user_id: Uuid,
        key_id: i32,
        public_key: PublicKeyBytes,
        signature: SignatureBytes,
    ) -> Result<SignedPreKey> {
        let mut tx = self.pool.begin().await?;

        let identity_key = self
            .repo
            .fetch_active_identity_key_for_update(&mut tx, user_id)
            .await?
            .ok_or_else(|| AppError::KeyPrecondition("no active identity key to upload a signed prekey against".into()))?;

        verify_signature(&identity_key.public_key, public_key.as_bytes(), &signature).map_err(AppError::KeySignature)?;

        let signed_pre_key = self
            .repo
            .upsert_signed_pre_key(&mut tx, user_id, key_id, &public_key, &signature, self.config.signed_prekey_ttl_days)
            .await?;

        self.enqueue_update(&mut tx, &identity_key, &signed_pre_key).await?;
        tx.commit().await?;

        self.metrics.uploads_total.add(1, &[KeyValue::new("kind", "signed_prekey")]);
        Ok(signed_pre_key)
    }

    /// `StoreOneTimePreKeys`: inserts a batch (already capped to the configured max by
    /// the caller), rejecting the whole batch if it would push the user's `available`
    /// count above the per-user cap (I3). Does not touch the transparency log —
    /// one-time prekeys are not committed leaves.
    ///
    /// # Errors
    /// Returns `AppError::KeyQuota` if the batch itself exceeds the configured maximum,
    /// or if storing it would exceed the user's available-key cap, or `AppError::Store`
    /// on database failure.
    #[tracing::instrument(skip(self, keys), fields(%user_id), err)]
    pub async fn store_one_time_pre_keys(&self, user_id: Uuid, keys: Vec<(i32, PublicKeyBytes)>) -> Result<usize> {
        let batch_len = i64::try_from(keys.len()).unwrap_or(i64::MAX);
        if batch_len > self.config.max_one_time_prekeys {
            return Err(AppError::KeyQuota(format!(
                "batch of {batch_len} one-time prekeys exceeds the cap of {}",
                self.config.max_one_time_prekeys
            )));
        }
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let current = self.repo.count_available_one_time_pre_keys(&mut tx, user_id).await?;
        let projected = current + batch_len;
        if projected > self.config.max_one_time_prekeys {
            return Err(AppError::KeyQuota(format!(
                "storing {batch_len} more one-time prekeys would raise {user_id}'s available count from {current} to \
                 {projected}, above the cap of {}",
                self.config.max_one_time_prekeys
            )));
        }
        self.repo.insert_one_time_pre_keys(&mut tx, user_id, &keys).await?;

        tx.commit().await?;

        self.metrics.uploads_total.add(1, &[KeyValue::new("kind", "one_time_prekeys")]);

        let count_after = self.available_count(user_id).await?;
        if count_after < self.config.one_time_prekey_refill_threshold {
            tracing::info!(%user_id, count = count_after, "one-time prekey count below refill threshold");
        }

        Ok(keys.len())
    }

    /// Uploads a new sealed-sender key version for a user. Not a committed leaf: used
    /// only to unlink a sender's identity from the transport layer when addressing a
    /// recipient's bundle.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the database operation fails.
    #[tracing::instrument(skip(self, public_key), fields(%user_id), err)]
    pub async fn upsert_sealed_sender_key(&self, user_id: Uuid, public_key: PublicKeyBytes) -> Result<SealedSenderKey> {
        let mut conn = self.pool.acquire().await?;
        self.repo.upsert_sealed_sender_key(&mut conn, user_id, &public_key, self.config.signed_prekey_ttl_days).await
    }

    /// `GetIdentityKey`.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub async fn get_identity_key(&self, user_id: Uuid) -> Result<Option<IdentityKey>> {
        let mut conn = self.pool.acquire().await?;
        self.repo.fetch_active_identity_key(&mut conn, user_id).await
    }

    /// `CountAvailableOneTimePreKeys`.
    ///
    /// # Errors
    /// Returns `AppError::Store` if the query fails.
    pub async fn available_count(&self, user_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        self.repo.count_available_one_time_pre_keys(&mut conn, user_id).await
    }

    /// `GetKeyStatus`.
    ///
    /// # Errors
    /// Returns `AppError::Store` if a query fails.
    pub async fn key_status(&self, user_id: Uuid) -> Result<KeyStatusSummary> {
        let mut conn = self.pool.acquire().await?;
        let identity_key = self.repo.fetch_active_identity_key(&mut conn, user_id).await?;
        let signed_pre_key = self.repo.fetch_latest_signed_pre_key(&mut conn, user_id).await?;
        let one_time_prekey_count = self.repo.count_available_one_time_pre_keys(&mut conn, user_id).await?;

        let signed_prekey_expired =
            signed_pre_key.as_ref().is_some_and(|k| KeyRepository::is_expired(k.expires_at));

        Ok(KeyStatusSummary {
            has_identity_key: identity_key.is_some(),
            has_signed_prekey: signed_pre_key.is_some(),
            signed_prekey_expired,
            one_time_prekey_count,
        })
    }

    async fn enqueue_update(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        identity_key: &IdentityKey,
        signed_pre_key: &SignedPreKey,
    ) -> Result<()> {
        let update = KeyUpdate {
            id: Uuid::new_v4(),
            user_id: identity_key.user_id,
            identity_fingerprint: identity_key.fingerprint.clone(),
            signed_prekey_fingerprint: signed_pre_key.fingerprint.clone(),
            version: identity_key.version,
            kind: if identity_key.version > 1 { KeyUpdateKind::Rotated } else { KeyUpdateKind::Created },
            enqueued_at: OffsetDateTime::now_utc(),
        };
        self.transparency_repo.enqueue_key_update(tx, &update).await
    }
}
