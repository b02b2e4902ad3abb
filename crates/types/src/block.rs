use crate::transaction::Transaction;
use crate::{IntegrityError, PublicKeyDirectory};
use custody_crypto::{encode_i64, merkle_root_or_sentinel, sha256_concat, Hash, ZERO_HASH};
use serde::{Deserialize, Serialize};

/// Height of the first block of every chain.
pub const GENESIS_HEIGHT: u64 = 1;
/// Fixed genesis timestamp so every node derives the same genesis hash.
pub const GENESIS_TIMESTAMP_MS: i64 = 0;

/// An ordered batch of custody transactions linked to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    /// SHA-256 over height, timestamp, parent hash and Merkle root.
    #[serde(with = "hex::serde")]
    pub hash: Hash,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "merkleroot", with = "hex::serde")]
    pub merkle_root: Hash,
    #[serde(rename = "previousblockhash", with = "hex::serde")]
    pub previous_block_hash: Hash,
    /// Stored order is the Merkle leaf order and must never change.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a block stamped with the current wall-clock time.
    pub fn new(transactions: Vec<Transaction>, previous_block_hash: Hash, height: u64) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis();
        Self::with_timestamp(transactions, previous_block_hash, height, timestamp)
    }

    pub fn with_timestamp(
        transactions: Vec<Transaction>,
        previous_block_hash: Hash,
        height: u64,
        timestamp: i64,
    ) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        let hash = Self::compute_hash(height, timestamp, &previous_block_hash, &merkle_root);

        Self {
            height,
            hash,
            timestamp,
            merkle_root,
            previous_block_hash,
            transactions,
        }
    }

    /// The shared first block: sentinel parent and root, fixed timestamp.
    pub fn genesis() -> Self {
        Self::with_timestamp(Vec::new(), ZERO_HASH, GENESIS_HEIGHT, GENESIS_TIMESTAMP_MS)
    }

    pub fn compute_hash(
        height: u64,
        timestamp: i64,
        previous_block_hash: &Hash,
        merkle_root: &Hash,
    ) -> Hash {
        sha256_concat(&[
            &encode_i64(height as i64),
            &encode_i64(timestamp),
            previous_block_hash,
            merkle_root,
        ])
    }

    /// Merkle root over the transaction ids in stored order.
    pub fn compute_merkle_root(transactions: &[Transaction]) -> Hash {
        let ids: Vec<Hash> = transactions.iter().map(|tx| tx.id).collect();
        merkle_root_or_sentinel(&ids)
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == GENESIS_HEIGHT && self.previous_block_hash == ZERO_HASH
    }

    /// Check this block against its predecessor, reporting the first failure.
    pub fn check(
        &self,
        previous: &Block,
        keys: &dyn PublicKeyDirectory,
    ) -> Result<(), IntegrityError> {
        if self.previous_block_hash != previous.hash {
            return Err(IntegrityError::ParentMismatch {
                expected: previous.hash_hex(),
                found: hex::encode(self.previous_block_hash),
            });
        }

        let expected_height = previous.height + 1;
        if self.height != expected_height {
            return Err(IntegrityError::HeightMismatch {
                expected: expected_height,
                found: self.height,
            });
        }

        for tx in &self.transactions {
            let sender_key = keys
                .public_key(&tx.sender)
                .ok_or_else(|| IntegrityError::UnknownSender {
                    sender: tx.sender.clone(),
                })?;
            tx.check(&sender_key)?;
        }

        if Self::compute_merkle_root(&self.transactions) != self.merkle_root {
            return Err(IntegrityError::MerkleRootMismatch {
                block: self.hash_hex(),
            });
        }

        let expected_hash = Self::compute_hash(
            self.height,
            self.timestamp,
            &self.previous_block_hash,
            &self.merkle_root,
        );
        if expected_hash != self.hash {
            return Err(IntegrityError::BlockHashMismatch {
                block: self.hash_hex(),
            });
        }

        Ok(())
    }

    pub fn verify(&self, previous: &Block, keys: &dyn PublicKeyDirectory) -> bool {
        self.check(previous, keys).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionStatus;
    use custody_crypto::{KeyPair, PublicKey};
    use std::collections::HashMap;

    fn keys() -> (KeyPair, HashMap<String, PublicKey>) {
        let keypair = KeyPair::from_secret(&[7u8; 32]);
        let mut directory = HashMap::new();
        directory.insert("manufacturer".to_string(), keypair.public_key());
        (keypair, directory)
    }

    fn sample_transactions(keypair: &KeyPair) -> Vec<Transaction> {
        ["P1", "P2", "P3"]
            .into_iter()
            .map(|product| {
                let mut tx = Transaction::new(
                    "manufacturer",
                    "distributor",
                    product,
                    TransactionStatus::Manufactured,
                );
                tx.sign(keypair).expect("sign");
                tx
            })
            .collect()
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Block::genesis();
        let b = Block::genesis();

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.height, GENESIS_HEIGHT);
        assert_eq!(a.previous_block_hash, ZERO_HASH);
        assert!(a.is_genesis());
    }

    #[test]
    fn test_block_creation() {
        let (keypair, _) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), genesis.hash, 2);

        assert_eq!(block.height, 2);
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(
            block.hash,
            Block::compute_hash(block.height, block.timestamp, &genesis.hash, &block.merkle_root)
        );
    }

    #[test]
    fn test_block_validation() {
        let (keypair, directory) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), genesis.hash, 2);

        assert!(block.verify(&genesis, &directory));
    }

    #[test]
    fn block_validation_rejects_wrong_parent() {
        let (keypair, directory) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), [9u8; 32], 2);

        assert!(matches!(
            block.check(&genesis, &directory),
            Err(IntegrityError::ParentMismatch { .. })
        ));
    }

    #[test]
    fn block_validation_rejects_skipped_height() {
        let (keypair, directory) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), genesis.hash, 3);

        assert_eq!(
            block.check(&genesis, &directory),
            Err(IntegrityError::HeightMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn block_validation_rejects_unknown_sender() {
        let (keypair, _) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), genesis.hash, 2);

        assert_eq!(
            block.check(&genesis, &HashMap::new()),
            Err(IntegrityError::UnknownSender {
                sender: "manufacturer".to_string()
            })
        );
    }

    #[test]
    fn block_validation_rejects_reordered_transactions() {
        let (keypair, directory) = keys();
        let genesis = Block::genesis();
        let mut block = Block::new(sample_transactions(&keypair), genesis.hash, 2);
        block.transactions.swap(0, 2);

        assert!(matches!(
            block.check(&genesis, &directory),
            Err(IntegrityError::MerkleRootMismatch { .. })
        ));
    }

    #[test]
    fn block_validation_rejects_tampered_hash_and_root() {
        let (keypair, directory) = keys();
        let genesis = Block::genesis();
        let block = Block::new(sample_transactions(&keypair), genesis.hash, 2);

        let mut bad_hash = block.clone();
        bad_hash.hash[0] ^= 0x01;
        assert!(!bad_hash.verify(&genesis, &directory));

        let mut bad_root = block.clone();
        bad_root.merkle_root[31] ^= 0x80;
        assert!(!bad_root.verify(&genesis, &directory));

        let mut bad_tx = block;
        bad_tx.transactions[1].receiver.push('x');
        assert!(!bad_tx.verify(&genesis, &directory));
    }

    #[test]
    fn test_wire_field_names() {
        let genesis = Block::genesis();
        let value = serde_json::to_value(&genesis).unwrap();

        assert_eq!(value["height"], 1);
        assert_eq!(value["previousblockhash"], hex::encode(ZERO_HASH));
        assert!(value.get("merkleroot").is_some());
        assert_eq!(serde_json::from_value::<Block>(value).unwrap(), genesis);
    }
}
