use custody_crypto::{encode_i64, sha256, verify_signature, CryptoError, Hash, KeyPair, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::IntegrityError;

/// Custody stage recorded by a transaction. Ordering follows the supply
/// chain, so the maximum status seen for a product is its furthest stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum TransactionStatus {
    Manufactured = 1,
    Dispatched = 2,
    Received = 3,
}

impl TransactionStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl From<TransactionStatus> for u16 {
    fn from(status: TransactionStatus) -> Self {
        status as u16
    }
}

impl TryFrom<u16> for TransactionStatus {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Manufactured),
            2 => Ok(Self::Dispatched),
            3 => Ok(Self::Received),
            other => Err(format!("unknown transaction status {other}")),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TransactionStatus::Manufactured => "manufactured",
            TransactionStatus::Dispatched => "dispatched",
            TransactionStatus::Received => "received",
        };
        f.write_str(value)
    }
}

/// A signed custody transition for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// SHA-256 of the content bytes.
    #[serde(with = "hex::serde")]
    pub id: Hash,
    /// Peer id of the node that created and signed the transaction.
    pub sender: String,
    pub receiver: String,
    #[serde(rename = "productid")]
    pub product_id: String,
    pub status: TransactionStatus,
    /// Ed25519 signature over the content bytes, empty until signed.
    #[serde(default, with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Create an unsigned transaction with its identifier already computed.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        product_id: impl Into<String>,
        status: TransactionStatus,
    ) -> Self {
        let mut tx = Self {
            id: [0u8; 32],
            sender: sender.into(),
            receiver: receiver.into(),
            product_id: product_id.into(),
            status,
            signature: Vec::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// `sender ‖ receiver ‖ product_id ‖ i64_be(status)`
    pub fn content_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(
            self.sender.len() + self.receiver.len() + self.product_id.len() + 8,
        );
        payload.extend_from_slice(self.sender.as_bytes());
        payload.extend_from_slice(self.receiver.as_bytes());
        payload.extend_from_slice(self.product_id.as_bytes());
        payload.extend_from_slice(&encode_i64(self.status.as_i64()));
        payload
    }

    pub fn compute_id(&self) -> Hash {
        sha256(&self.content_bytes())
    }

    /// Sign the content bytes with the sender's key.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), CryptoError> {
        self.signature = keypair.sign(&self.content_bytes())?;
        Ok(())
    }

    /// Check the identifier and the signature, reporting the first failure.
    pub fn check(&self, sender_key: &PublicKey) -> Result<(), IntegrityError> {
        if self.compute_id() != self.id {
            return Err(IntegrityError::TransactionIdMismatch { id: self.id_hex() });
        }

        verify_signature(sender_key, &self.content_bytes(), &self.signature)
            .map_err(|_| IntegrityError::InvalidSignature { id: self.id_hex() })
    }

    /// Both the content hash and the signature must hold.
    pub fn verify(&self, sender_key: &PublicKey) -> bool {
        self.check(sender_key).is_ok()
    }

    /// Mempool key for this transaction.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(keypair: &KeyPair) -> Transaction {
        let mut tx = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Manufactured);
        tx.sign(keypair).expect("sign");
        tx
    }

    #[test]
    fn test_transaction_creation() {
        let tx = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Dispatched);

        assert_eq!(tx.sender, "node-a");
        assert_eq!(tx.receiver, "node-b");
        assert_eq!(tx.product_id, "P1");
        assert_eq!(tx.id, tx.compute_id());
        assert!(tx.signature.is_empty());
    }

    #[test]
    fn test_identifier_is_content_derived() {
        let a = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Manufactured);
        let b = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Manufactured);
        let c = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Dispatched);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_transaction_verification() {
        let keypair = KeyPair::from_secret(&[3u8; 32]);
        let tx = signed(&keypair);

        assert!(tx.verify(&keypair.public_key()));
    }

    #[test]
    fn test_unsigned_transaction_fails() {
        let keypair = KeyPair::from_secret(&[3u8; 32]);
        let tx = Transaction::new("node-a", "node-b", "P1", TransactionStatus::Manufactured);

        assert!(matches!(
            tx.check(&keypair.public_key()),
            Err(IntegrityError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_tampered_content_reports_id_mismatch() {
        let keypair = KeyPair::from_secret(&[3u8; 32]);
        let mut tx = signed(&keypair);
        tx.status = TransactionStatus::Received;

        assert!(matches!(
            tx.check(&keypair.public_key()),
            Err(IntegrityError::TransactionIdMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_key_reports_bad_signature() {
        let tx = signed(&KeyPair::from_secret(&[3u8; 32]));
        let other = KeyPair::from_secret(&[4u8; 32]);

        assert!(!tx.verify(&other.public_key()));
    }

    #[test]
    fn test_wire_field_names() {
        let tx = signed(&KeyPair::from_secret(&[3u8; 32]));
        let value = serde_json::to_value(&tx).unwrap();

        assert_eq!(value["productid"], "P1");
        assert_eq!(value["status"], 1);
        assert_eq!(value["id"], tx.id_hex());

        let decoded: Transaction = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_unknown_status_is_rejected_on_decode() {
        let mut value =
            serde_json::to_value(Transaction::new("a", "b", "P1", TransactionStatus::Received))
                .unwrap();
        value["status"] = serde_json::json!(7);

        assert!(serde_json::from_value::<Transaction>(value).is_err());
    }
}
