//! Custody consensus: delegated proof-of-stake election, the proposal,
//! attestation and commit protocol, and the supply-chain custody rules,
//! assembled into [`CustodyNode`].

pub mod config;
pub mod custody;
pub mod dpos;
pub mod engine;
pub mod ledger;
pub mod metrics;


pub use config::ConsensusConfig;
pub use custody::{dispute_target, next_status, CustodyError, Role};
pub use dpos::{AttestationOutcome, BallotOutcome, DposClient, DposSummary, ElectionError};
pub use engine::{CustodyNode, NodeSnapshot};
pub use ledger::Ledger;

use custody_crypto::CryptoError;
use custody_p2p::GossipError;
use custody_types::IntegrityError;

/// Consensus errors
#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    #[error(transparent)]
    Custody(#[from] CustodyError),
    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("gossip error: {0}")]
    Gossip(#[from] GossipError),
    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("registration for {claimed} published by {sender}")]
    SenderMismatch { claimed: String, sender: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
