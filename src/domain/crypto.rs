use ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use sha2::{Digest, Sha256};

/// Size in bytes of an uncompressed P-256 public key (SEC1, 0x04 prefix).
pub const P256_PUBLIC_KEY_LEN: usize = 65;
/// Size in bytes of a Dilithium3 public key.
pub const DILITHIUM3_PUBLIC_KEY_LEN: usize = 1952;
/// Size in bytes of a Kyber-1024 public key.
pub const KYBER1024_PUBLIC_KEY_LEN: usize = 1568;

/// Bounds of a fixed-size ECDSA-P256 (DER) signature.
pub const P256_SIGNATURE_MIN_LEN: usize = 64;
pub const P256_SIGNATURE_MAX_LEN: usize = 72;
/// Size in bytes of a Dilithium3 signature.
pub const DILITHIUM3_SIGNATURE_LEN: usize = 3293;

/// The key-suite families a bundle component may belong to, distinguished on the wire
/// purely by public-key byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySuite {
    P256,
    Dilithium3,
    Kyber1024,
}

impl KeySuite {
    /// Infers the suite of an identity or signed-prekey public key from its length.
    #[must_use]
    pub const fn from_public_key_len(len: usize) -> Option<Self> {
        match len {
            P256_PUBLIC_KEY_LEN => Some(Self::P256),
            DILITHIUM3_PUBLIC_KEY_LEN => Some(Self::Dilithium3),
            KYBER1024_PUBLIC_KEY_LEN => Some(Self::Kyber1024),
            _ => None,
        }
    }

    /// The suite a signed-prekey's signature must come from for a given identity suite.
    #[must_use]
    pub const fn signing_suite(self) -> Self {
        match self {
            Self::P256 | Self::Kyber1024 => Self::P256,
            Self::Dilithium3 => Self::Dilithium3,
        }
    }
}

/// A public key's raw bytes, tagged with the suite it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyBytes {
    pub suite: KeySuite,
    bytes: Vec<u8>,
}

impl PublicKeyBytes {
    /// Validates size against the known suite lengths and tags the result.
    ///
    /// # Errors
    /// Returns an error if the length does not match any known suite.
    pub fn try_new(bytes: Vec<u8>) -> Result<Self, String> {
        let suite = KeySuite::from_public_key_len(bytes.len())
            .ok_or_else(|| format!("unrecognized public key length: {}", bytes.len()))?;
        Ok(Self { suite, bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// `hex(SHA-256(public_key_bytes)[0:8])`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

/// Computes the canonical fingerprint used throughout the directory: the first 8 bytes
/// of the SHA-256 digest of the key material, hex-encoded.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}

/// A signature's raw bytes, tagged with the suite that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBytes {
    pub suite: KeySuite,
    bytes: Vec<u8>,
}

impl SignatureBytes {
    /// Validates size against the known signature lengths and tags the result.
    ///
    /// # Errors
    /// Returns an error if the length does not match any known suite's signature size.
    pub fn try_new(bytes: Vec<u8>) -> Result<Self, String> {
        let suite = match bytes.len() {
            DILITHIUM3_SIGNATURE_LEN => KeySuite::Dilithium3,
            n if (P256_SIGNATURE_MIN_LEN..=P256_SIGNATURE_MAX_LEN).contains(&n) => KeySuite::P256,
            n => return Err(format!("unrecognized signature length: {n}")),
        };
        Ok(Self { suite, bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Verifies `signature` over `message` under `public_key`, dispatching on the key's
/// suite. Kyber1024 keys never sign (KEM-only): calling this with a Kyber1024 public key
/// is a programmer error and returns an error rather than panicking.
///
/// # Errors
/// Returns an error if the suites don't match, the key/signature bytes are malformed, or
/// the signature fails to verify.
pub fn verify_signature(public_key: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> Result<(), String> {
    match public_key.suite {
        KeySuite::P256 => {
            if signature.suite != KeySuite::P256 {
                return Err("signature suite does not match public key suite".into());
            }
            let verifying_key = P256VerifyingKey::from_sec1_bytes(public_key.as_bytes())
                .map_err(|e| format!("invalid P-256 public key: {e}"))?;
            let sig = P256Signature::from_der(signature.as_bytes())
                .or_else(|_| P256Signature::from_slice(signature.as_bytes()))
                .map_err(|e| format!("invalid P-256 signature: {e}"))?;
            verifying_key.verify(message, &sig).map_err(|e| format!("P-256 signature verification failed: {e}"))
        }
        KeySuite::Dilithium3 => {
            if signature.suite != KeySuite::Dilithium3 {
                return Err("signature suite does not match public key suite".into());
            }
            verify_dilithium3(public_key.as_bytes(), message, signature.as_bytes())
        }
        KeySuite::Kyber1024 => Err("Kyber1024 keys are encryption-only and cannot verify signatures".into()),
    }
}

fn verify_dilithium3(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), String> {
    use pqcrypto_dilithium::dilithium3::{DetachedSignature, PublicKey, verify_detached_signature};
    use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};

    let pk = PublicKey::from_bytes(public_key).map_err(|e| format!("invalid Dilithium3 public key: {e}"))?;
    let sig = DetachedSignature::from_bytes(signature).map_err(|e| format!("invalid Dilithium3 signature: {e}"))?;
    verify_detached_signature(&sig, message, &pk).map_err(|e| format!("Dilithium3 signature verification failed: {e}"))
}
