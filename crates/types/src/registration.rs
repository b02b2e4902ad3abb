use custody_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stake announcement broadcast by every node during startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub amount: u64,
    #[serde(rename = "publickey", with = "hex::serde")]
    pub public_key: PublicKey,
}

/// Lookup of a peer's registered signing key.
pub trait PublicKeyDirectory {
    fn public_key(&self, peer_id: &str) -> Option<PublicKey>;
}

impl PublicKeyDirectory for HashMap<String, PublicKey> {
    fn public_key(&self, peer_id: &str) -> Option<PublicKey> {
        self.get(peer_id).copied()
    }
}
