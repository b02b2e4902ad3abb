//! Merkle tree over transaction identifiers.
//!
//! The tree is rebuilt from scratch for every block and only lives long
//! enough to read its root. Levels are paired left to right; a level with an
//! odd number of nodes pairs its last node with itself.

use crate::hash_functions::{sha256_concat, Hash, ZERO_HASH};

/// Merkle tree error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a merkle tree without leaves")]
    EmptyTree,
}

/// Root substituted for an empty batch of leaves.
pub const EMPTY_MERKLE_ROOT: Hash = ZERO_HASH;

/// Merkle tree implementation
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build the tree over `leaves` in the given order.
    pub fn new(leaves: &[Hash]) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let mut levels = vec![leaves.to_vec()];
        let mut current_level = leaves.to_vec();

        while current_level.len() > 1 {
            let next_level: Vec<Hash> = current_level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    sha256_concat(&[left, right])
                })
                .collect();

            levels.push(next_level.clone());
            current_level = next_level;
        }

        Ok(Self { levels })
    }

    /// Get the Merkle root
    pub fn root(&self) -> Hash {
        // `new` guarantees a non-empty top level.
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(EMPTY_MERKLE_ROOT)
    }

    /// Get the number of leaves
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Number of levels including the leaves and the root.
    pub fn height(&self) -> usize {
        self.levels.len()
    }
}

/// Root over `leaves`, or [`EMPTY_MERKLE_ROOT`] when there are none.
pub fn merkle_root_or_sentinel(leaves: &[Hash]) -> Hash {
    MerkleTree::new(leaves)
        .map(|tree| tree.root())
        .unwrap_or(EMPTY_MERKLE_ROOT)
}
