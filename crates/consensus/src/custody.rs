//! Per-role custody rules: which status a node may record for a product, and
//! whom a dispute over a product blames.

use std::fmt;
use std::str::FromStr;

use custody_types::TransactionStatus;
use serde::{Deserialize, Serialize};

use crate::ledger::Ledger;

/// Position of a node in the supply chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manufacturer,
    Distributor,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Role::Manufacturer => "manufacturer",
            Role::Distributor => "distributor",
            Role::Consumer => "consumer",
        };
        f.write_str(value)
    }
}

impl FromStr for Role {
    type Err = CustodyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "manufacturer" => Ok(Role::Manufacturer),
            "distributor" => Ok(Role::Distributor),
            "consumer" => Ok(Role::Consumer),
            other => Err(CustodyError::UnknownRole(other.to_string())),
        }
    }
}

/// Custody rule violations, returned to whoever requested the transition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("product {0} has already been manufactured")]
    AlreadyManufactured(String),
    #[error("product {0} is still in transit")]
    PreviousProductInProgress(String),
    #[error("product {0} has not been manufactured")]
    ProductNotManufactured(String),
    #[error("product {0} not found")]
    ProductNotFound(String),
    #[error("product {0} has not been dispatched")]
    ProductNotDispatched(String),
    #[error("product id must not be empty")]
    EmptyProductId,
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// Status `role` records next for `product_id`, given the committed ledger
/// and, for distributors, the product currently in flight.
pub fn next_status(
    role: Role,
    ledger: &Ledger,
    product_id: &str,
    in_flight: Option<&str>,
) -> Result<TransactionStatus, CustodyError> {
    if product_id.is_empty() {
        return Err(CustodyError::EmptyProductId);
    }
    let status = ledger.status_of(product_id);

    match role {
        Role::Manufacturer => match status {
            None => Ok(TransactionStatus::Manufactured),
            Some(_) => Err(CustodyError::AlreadyManufactured(product_id.to_string())),
        },
        Role::Distributor => {
            if let Some(current) = in_flight {
                if ledger.status_of(current) != Some(TransactionStatus::Received) {
                    return Err(CustodyError::PreviousProductInProgress(
                        current.to_string(),
                    ));
                }
            }
            match status {
                Some(TransactionStatus::Manufactured) => Ok(TransactionStatus::Dispatched),
                _ => Err(CustodyError::ProductNotManufactured(product_id.to_string())),
            }
        }
        Role::Consumer => match status {
            Some(TransactionStatus::Dispatched) => Ok(TransactionStatus::Received),
            None => Err(CustodyError::ProductNotFound(product_id.to_string())),
            Some(_) => Err(CustodyError::ProductNotDispatched(product_id.to_string())),
        },
    }
}

/// Peer whose stake a dispute over `product_id` should cut. A received
/// product means the dispute itself is frivolous, so the disputer pays;
/// otherwise the peer that recorded the current status is at fault.
pub fn dispute_target(
    ledger: &Ledger,
    disputer: &str,
    product_id: &str,
) -> Result<String, CustodyError> {
    let tx = ledger
        .status_transaction(product_id)
        .ok_or_else(|| CustodyError::ProductNotFound(product_id.to_string()))?;

    match tx.status {
        TransactionStatus::Received => Ok(disputer.to_string()),
        TransactionStatus::Dispatched | TransactionStatus::Manufactured => Ok(tx.sender.clone()),
    }
}
