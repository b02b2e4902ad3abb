//! # Custody Mempool
//!
//! Transactions a node has accepted but not yet seen committed in a block.
//!
//! ## Behaviour
//! - Keyed by the hex transaction id; re-adding the same id overwrites,
//!   which is harmless because ids are content-derived.
//! - Removing an unknown id is a no-op.
//! - [`Mempool::get`] makes no ordering promise.
//!
//! The pool itself is not synchronised; the owning node keeps it behind the
//! same lock as its chain and election state.

use custody_types::Transaction;
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

/// Pending transactions keyed by hex id.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a transaction. Returns `true` when the id was new.
    pub fn add(&mut self, tx: Transaction) -> bool {
        let key = tx.id_hex();
        trace!(tx = %key, "adding transaction to mempool");
        self.transactions.insert(key, tx).is_none()
    }

    pub fn add_all<I>(&mut self, txs: I)
    where
        I: IntoIterator<Item = Transaction>,
    {
        for tx in txs {
            self.add(tx);
        }
    }

    /// Up to `count` pending transactions, in no particular order.
    pub fn get(&self, count: usize) -> Vec<Transaction> {
        self.transactions.values().take(count).cloned().collect()
    }

    pub fn remove(&mut self, tx: &Transaction) -> Option<Transaction> {
        self.transactions.remove(&tx.id_hex())
    }

    pub fn remove_all<'a, I>(&mut self, txs: I)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        for tx in txs {
            self.remove(tx);
        }
    }

    pub fn contains(&self, tx_id_hex: &str) -> bool {
        self.transactions.contains_key(tx_id_hex)
    }

    pub fn get_transaction(&self, tx_id_hex: &str) -> Option<&Transaction> {
        self.transactions.get(tx_id_hex)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Collect mempool diagnostics
    pub fn stats(&self) -> MempoolStats {
        let mut products: Vec<&str> = self
            .transactions
            .values()
            .map(|tx| tx.product_id.as_str())
            .collect();
        products.sort_unstable();
        products.dedup();

        MempoolStats {
            size: self.transactions.len(),
            distinct_products: products.len(),
        }
    }
}

/// Mempool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolStats {
    pub size: usize,
    pub distinct_products: usize,
}
