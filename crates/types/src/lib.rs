pub mod block;
pub mod registration;
pub mod transaction;


pub use block::*;
pub use registration::*;
pub use transaction::*;

/// Reasons a transaction or block is rejected. Always handled locally by
/// dropping the offending message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("transaction {id} does not hash to its identifier")]
    TransactionIdMismatch { id: String },
    #[error("transaction {id} carries an invalid signature")]
    InvalidSignature { id: String },
    #[error("no public key registered for sender {sender}")]
    UnknownSender { sender: String },
    #[error("parent hash mismatch: expected {expected}, found {found}")]
    ParentMismatch { expected: String, found: String },
    #[error("height mismatch: expected {expected}, found {found}")]
    HeightMismatch { expected: u64, found: u64 },
    #[error("merkle root mismatch in block {block}")]
    MerkleRootMismatch { block: String },
    #[error("block hash mismatch for {block}")]
    BlockHashMismatch { block: String },
}
