//! Cryptographic primitives shared by every custody ledger component:
//! SHA-256 hashing with fixed-width integer encoding, the Merkle tree over
//! transaction identifiers, and the per-node Ed25519 signing key pair.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};

pub mod hash_functions;
pub mod merkle_trees;

pub use hash_functions::{encode_i64, sha256, sha256_concat, to_hex, Hash, HASH_SIZE, ZERO_HASH};
pub use merkle_trees::{merkle_root_or_sentinel, MerkleError, MerkleTree, EMPTY_MERKLE_ROOT};

/// Raw Ed25519 verifying key bytes as exchanged during registration.
pub type PublicKey = [u8; 32];

/// Cryptographic errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Signing key pair held by a node for its whole lifetime.
#[derive(Debug, Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new key pair from the operating system RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut secret_key = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut secret_key)
            .map_err(|err| CryptoError::KeyGeneration(err.to_string()))?;
        Ok(Self::from_secret(&secret_key))
    }

    /// Deterministic key pair from a 32-byte seed.
    pub fn from_secret(secret_key: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret_key);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key as bytes
    pub fn public_key(&self) -> PublicKey {
        self.verifying_key.to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = self
            .signing_key
            .try_sign(message)
            .map_err(|err| CryptoError::Signing(err.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

/// Verify `signature` over `message` with the raw `public_key`.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    key.verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = KeyPair::generate().unwrap();
        assert_ne!(keypair.public_key(), [0u8; 32]);
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"custody::dispatch";

        let signature = keypair.sign(message).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(&keypair.public_key(), message, &signature).is_ok());
    }

    #[test]
    fn test_truncated_signature_is_rejected() {
        let keypair = KeyPair::from_secret(&[9u8; 32]);
        let signature = keypair.sign(b"payload").unwrap();
        assert_eq!(
            verify_signature(&keypair.public_key(), b"payload", &signature[..63]),
            Err(CryptoError::InvalidSignature)
        );
    }
}
