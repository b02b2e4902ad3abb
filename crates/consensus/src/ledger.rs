use std::collections::HashSet;

use custody_types::{Block, IntegrityError, PublicKeyDirectory, Transaction, TransactionStatus};
use tracing::info;

/// A node's copy of the chain. Always starts at the shared genesis block and
/// only grows by blocks that verify against the current tip.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
    block_hashes: HashSet<String>,
    transaction_ids: HashSet<String>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        let genesis = Block::genesis();
        let mut block_hashes = HashSet::new();
        block_hashes.insert(genesis.hash_hex());

        Self {
            blocks: vec![genesis],
            block_hashes,
            transaction_ids: HashSet::new(),
        }
    }

    pub fn tip(&self) -> &Block {
        // `blocks` is seeded with genesis and never shrinks.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip().height
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn contains_block(&self, block_hash_hex: &str) -> bool {
        self.block_hashes.contains(block_hash_hex)
    }

    pub fn contains_transaction(&self, tx_id_hex: &str) -> bool {
        self.transaction_ids.contains(tx_id_hex)
    }

    /// Verify `block` against the tip and append it, returning the new tip.
    pub fn append(
        &mut self,
        block: Block,
        keys: &dyn PublicKeyDirectory,
    ) -> Result<&Block, IntegrityError> {
        block.check(self.tip(), keys)?;

        info!(
            height = block.height,
            hash = %block.hash_hex(),
            transactions = block.transactions.len(),
            "block appended"
        );
        self.block_hashes.insert(block.hash_hex());
        self.transaction_ids
            .extend(block.transactions.iter().map(Transaction::id_hex));
        self.blocks.push(block);
        Ok(self.tip())
    }

    fn transactions_for<'a, 'p>(
        &'a self,
        product_id: &'p str,
    ) -> impl Iterator<Item = &'a Transaction> + 'p
    where
        'a: 'p,
    {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(move |tx| !product_id.is_empty() && tx.product_id == product_id)
    }

    /// Furthest custody stage committed for `product_id`, `None` if the
    /// product never appears.
    pub fn status_of(&self, product_id: &str) -> Option<TransactionStatus> {
        self.transactions_for(product_id).map(|tx| tx.status).max()
    }

    /// The earliest committed transaction that recorded the product's current
    /// status.
    pub fn status_transaction(&self, product_id: &str) -> Option<&Transaction> {
        let status = self.status_of(product_id)?;
        self.transactions_for(product_id)
            .find(|tx| tx.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_crypto::{KeyPair, PublicKey};
    use std::collections::HashMap;

    fn signed(keypair: &KeyPair, sender: &str, product: &str, status: TransactionStatus) -> Transaction {
        let mut tx = Transaction::new(sender, "next", product, status);
        tx.sign(keypair).unwrap();
        tx
    }

    fn setup() -> (KeyPair, HashMap<String, PublicKey>) {
        let keypair = KeyPair::from_secret(&[3u8; 32]);
        let mut keys = HashMap::new();
        keys.insert("3000".to_string(), keypair.public_key());
        (keypair, keys)
    }

    #[test]
    fn new_ledger_holds_genesis() {
        let ledger = Ledger::new();
        assert_eq!(ledger.height(), 1);
        assert!(ledger.tip().is_genesis());
        assert!(ledger.contains_block(&Block::genesis().hash_hex()));
    }

    #[test]
    fn append_tracks_status() {
        let (keypair, keys) = setup();
        let mut ledger = Ledger::new();
        let manufactured = signed(&keypair, "3000", "P1", TransactionStatus::Manufactured);
        let dispatched = signed(&keypair, "3000", "P1", TransactionStatus::Dispatched);

        let block = Block::new(vec![manufactured.clone()], ledger.tip().hash, 2);
        ledger.append(block, &keys).unwrap();
        assert_eq!(ledger.status_of("P1"), Some(TransactionStatus::Manufactured));

        let block = Block::new(vec![dispatched.clone()], ledger.tip().hash, 3);
        ledger.append(block, &keys).unwrap();
        assert_eq!(ledger.status_of("P1"), Some(TransactionStatus::Dispatched));
        assert_eq!(ledger.status_transaction("P1"), Some(&dispatched));
        assert!(ledger.contains_transaction(&manufactured.id_hex()));
        assert_eq!(ledger.height(), 3);
    }

    #[test]
    fn status_transaction_borrows_only_the_ledger() {
        let (keypair, keys) = setup();
        let mut ledger = Ledger::new();
        let manufactured = signed(&keypair, "3000", "P7", TransactionStatus::Manufactured);
        let block = Block::new(vec![manufactured.clone()], ledger.tip().hash, 2);
        ledger.append(block, &keys).unwrap();

        let found = {
            let product = format!("P{}", 7);
            ledger.status_transaction(&product)
        };
        assert_eq!(found, Some(&manufactured));
    }

    #[test]
    fn unknown_and_empty_products_have_no_status() {
        let ledger = Ledger::new();
        assert_eq!(ledger.status_of("missing"), None);
        assert_eq!(ledger.status_of(""), None);
        assert!(ledger.status_transaction("missing").is_none());
    }

    #[test]
    fn append_rejects_wrong_parent() {
        let (keypair, keys) = setup();
        let mut ledger = Ledger::new();
        let tx = signed(&keypair, "3000", "P1", TransactionStatus::Manufactured);
        let orphan = Block::new(vec![tx], [9u8; 32], 2);

        assert!(matches!(
            ledger.append(orphan, &keys),
            Err(IntegrityError::ParentMismatch { .. })
        ));
        assert_eq!(ledger.height(), 1);
    }
}
