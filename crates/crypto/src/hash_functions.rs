//! Hash functions for the custody ledger
//!
//! Every digest on the chain is SHA-256 over a plain concatenation of byte
//! fields. Integers are always written as fixed-width big-endian `i64` so
//! that independently built nodes derive identical identifiers.

use sha2::{Digest, Sha256};

/// Size in bytes of every digest produced here.
pub const HASH_SIZE: usize = 32;

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; HASH_SIZE];

/// Sentinel digest used where no real parent or payload exists (genesis).
pub const ZERO_HASH: Hash = [0u8; HASH_SIZE];

/// Hash a single byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Hash the concatenation of `parts` without materialising the joined buffer.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Fixed-width big-endian encoding of an integer field.
pub fn encode_i64(num: i64) -> [u8; 8] {
    num.to_be_bytes()
}

/// Lowercase hex rendering used for map keys and log lines.
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}
