//! C6: loads the active tree-head signing key at startup and signs epoch payloads.
//! The key itself is a process-wide immutable value; historical public keys are
//! readable via the transparency repository so old epochs stay verifiable.

use crate::config::{SigningAlgorithmArg, SigningConfig};
use crate::domain::crypto::fingerprint;
use crate::domain::transparency::SigningAlgorithm;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ed25519_dalek::Signer as _;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, signature::Signer as _};

/// The currently active key material, tagged by algorithm.
enum ActiveKey {
    Ed25519(Box<ed25519_dalek::SigningKey>),
    P256Ecdsa(Box<P256SigningKey>),
}

/// C6: holds the process's active signing key and produces signatures over epoch
/// payloads. Never exposes the private key material; `fingerprint()` and `public_key()`
/// are the only things callers can read back out.
pub struct ProofSigner {
    key: ActiveKey,
    fingerprint: String,
    public_key: Vec<u8>,
    algorithm: SigningAlgorithm,
}

impl std::fmt::Debug for ProofSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofSigner")
            .field("fingerprint", &self.fingerprint)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ProofSigner {
    /// Loads the active signing key from configuration.
    ///
    /// # Errors
    /// Returns an error if the base64 key material is malformed or the wrong length for
    /// the configured algorithm.
    pub fn load(config: &SigningConfig) -> anyhow::Result<Self> {
        let bytes = STANDARD.decode(&config.signing_key_b64)?;

        let (key, public_key, algorithm) = match config.algorithm {
            SigningAlgorithmArg::Ed25519 => {
                let seed: [u8; 32] =
                    bytes.try_into().map_err(|_| anyhow::anyhow!("ed25519 signing key must be 32 bytes"))?;
                let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
                let public_key = signing_key.verifying_key().to_bytes().to_vec();
                (ActiveKey::Ed25519(Box::new(signing_key)), public_key, SigningAlgorithm::Ed25519)
            }
            SigningAlgorithmArg::P256Ecdsa => {
                let signing_key = P256SigningKey::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("invalid P-256 signing key: {e}"))?;
                let public_key = signing_key.verifying_key().to_sec1_bytes().to_vec();
                (ActiveKey::P256Ecdsa(Box::new(signing_key)), public_key, SigningAlgorithm::P256Ecdsa)
            }
        };

        let fingerprint = fingerprint(&public_key);
        Ok(Self { key, fingerprint, public_key, algorithm })
    }

    /// Signs `payload`, returning the raw signature bytes.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        match &self.key {
            ActiveKey::Ed25519(key) => key.sign(payload).to_bytes().to_vec(),
            ActiveKey::P256Ecdsa(key) => {
                let sig: P256Signature = key.sign(payload);
                sig.to_der().as_bytes().to_vec()
            }
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    #[must_use]
    pub const fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }
}
