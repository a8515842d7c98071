//! Ed25519 signing and verification of proof digests.
//!
//! Nodes sign the 32-byte payload digest, never the payload itself. The
//! private key is held by the caller in a [`NodeSigner`]; the relay side only
//! ever sees the node's registered public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use fedrelay_core::{Digest, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroize;

/// Errors that can occur during signing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("Malformed signature: {reason}")]
    MalformedSignature { reason: String },

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Holder of a node's Ed25519 signing key.
pub struct NodeSigner {
    signing_key: SigningKey,
    /// Public key identifier
    key_id: String,
}

impl NodeSigner {
    /// Creates a signer with a freshly generated key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_key_bytes);

        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();

        Self::from_signing_key(signing_key)
    }

    /// Creates a signer from an existing 32-byte secret key.
    ///
    /// # Security
    /// The intermediate copy of the key bytes is zeroized.
    pub fn from_key(key_bytes: &[u8]) -> Result<Self, SigningError> {
        if key_bytes.len() != 32 {
            return Err(SigningError::InvalidKey {
                reason: format!("Invalid key length: {} (expected 32)", key_bytes.len()),
            });
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(key_bytes);
        let signing_key = SigningKey::from_bytes(&key_array);
        key_array.zeroize();

        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let key_id = key_id(&signing_key.verifying_key().to_bytes());
        debug!(key_id = %key_id, "Signing key loaded");
        Self {
            signing_key,
            key_id,
        }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Detached signature over a digest
    pub fn sign_digest(&self, digest: &Digest) -> Vec<u8> {
        self.signing_key.sign(digest).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Stable identifier of a public key: hex of the first 16 bytes of its BLAKE3 hash.
pub fn key_id(public_key: &[u8; PUBLIC_KEY_LEN]) -> String {
    let hash = blake3::hash(public_key);
    hex::encode(&hash.as_bytes()[..16])
}

/// Parse and validate an Ed25519 public key.
pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey, SigningError> {
    let array: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| SigningError::InvalidKey {
        reason: format!(
            "Invalid key length: {} (expected {})",
            bytes.len(),
            PUBLIC_KEY_LEN
        ),
    })?;

    VerifyingKey::from_bytes(&array).map_err(|e| SigningError::InvalidKey {
        reason: e.to_string(),
    })
}

/// Verify a detached signature over `digest` with a raw public key.
pub fn verify_digest_signature(
    public_key: &[u8; PUBLIC_KEY_LEN],
    digest: &Digest,
    signature: &[u8],
) -> Result<(), SigningError> {
    let verifying_key = parse_public_key(public_key)?;

    let sig_bytes: [u8; SIGNATURE_LEN] =
        signature
            .try_into()
            .map_err(|_| SigningError::MalformedSignature {
                reason: format!(
                    "Invalid signature length: {} (expected {})",
                    signature.len(),
                    SIGNATURE_LEN
                ),
            })?;
    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(digest, &sig)
        .map_err(|_| SigningError::VerificationFailed)
}
