use crate::adapters::database::DbPool;
use crate::adapters::database::key_repo::KeyRepository;
use crate::domain::keys::PreKeyBundle;
use crate::error::{AppError, Result};
use opentelemetry::{KeyValue, global, metrics::Counter};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    fetches_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("keytrans-directory");
        Self {
            fetches_total: meter
                .u64_counter("keytrans_bundle_fetches_total")
                .with_description("Bundle fetches by outcome")
                .build(),
        }
    }

    fn record(&self, outcome: &'static str) {
        self.fetches_total.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// C2: the read-through component producing a `PreKeyBundle` for a specific
/// `(target, requester)` pair. Invokes the Key Store's atomic one-time-prekey claim;
/// running out of one-time prekeys is a documented fallback, not an error.
#[derive(Clone, Debug)]
pub struct BundleAssembler {
    pool: DbPool,
    repo: KeyRepository,
    metrics: Metrics,
}

impl BundleAssembler {
    #[must_use]
    pub fn new(pool: DbPool, repo: KeyRepository) -> Self {
        Self { pool, repo, metrics: Metrics::new() }
    }

    /// Assembles a bundle for `target`, claiming a one-time prekey on `requester`'s
    /// behalf if one is available.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if `target` has no active identity key or no signed
    /// prekey.
    #[tracing::instrument(skip(self), fields(%target, %requester), err)]
    pub async fn get_bundle(&self, target: Uuid, requester: Uuid) -> Result<PreKeyBundle> {
        let mut conn = self.pool.acquire().await?;

        let identity_key = match self.repo.fetch_active_identity_key(&mut conn, target).await? {
            Some(k) => k,
            None => {
                self.metrics.record("not_found");
                return Err(AppError::NotFound);
            }
        };

        let signed_pre_key = match self.repo.fetch_latest_signed_pre_key(&mut conn, target).await? {
            Some(k) => k,
            None => {
                self.metrics.record("not_found");
                return Err(AppError::NotFound);
            }
        };

        let one_time_pre_key = self.repo.claim_one_time_pre_key(&mut conn, target, requester).await?;
        self.metrics.record(if one_time_pre_key.is_some() { "issued_with_otpk" } else { "issued_without_otpk" });

        let sealed_sender_key = self.repo.fetch_active_sealed_sender_key(&mut conn, target).await?;

        let bundle_version = PreKeyBundle::infer_version(identity_key.public_key.suite, signed_pre_key.public_key.suite);

        Ok(PreKeyBundle {
            user_id: target,
            bundle_version,
            generated_at: OffsetDateTime::now_utc(),
            identity_key,
            signed_pre_key,
            one_time_pre_key,
            sealed_sender_key,
        })
    }
}
