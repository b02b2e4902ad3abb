//! Custody P2P layer: the publish/subscribe contract consensus depends on,
//! plus an in-process gossip fabric implementing it.
//!
//! - **topics**: the seven broadcast channels of the custody protocol.
//! - **gossip**: [`GossipNetwork`], Tokio broadcast channels shared by every
//!   node in a process, with optional duplicate delivery for chaos tests.
//!
//! Delivery is at-least-once and every message carries the publisher's peer
//! id, which receivers use to attribute votes and attestations.

pub mod gossip;
pub mod topics;

pub use gossip::{
    ChaosConfig, GossipConfig, GossipHandle, GossipMessage, GossipMetricsSnapshot, GossipNetwork,
};
pub use topics::{GossipTopic, ALL_TOPICS};

use tokio::sync::broadcast;
use tracing::warn;

/// Errors raised by the gossip layer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    #[error("unknown gossip topic: {0}")]
    UnknownTopic(String),
    #[error("gossip topic {0} closed")]
    Closed(GossipTopic),
}

/// Publish/subscribe contract between a node and its network.
pub trait Transport: Send + Sync {
    /// Identity this transport tags onto every published message.
    fn local_peer_id(&self) -> &str;

    /// Broadcast `payload` on `topic`. Returns the number of receivers reached.
    fn publish(&self, topic: GossipTopic, payload: Vec<u8>) -> Result<usize, GossipError>;

    fn subscribe(&self, topic: GossipTopic) -> Result<Subscription, GossipError>;
}

/// Stream of messages on one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: GossipTopic,
    receiver: broadcast::Receiver<GossipMessage>,
}

impl Subscription {
    pub fn new(topic: GossipTopic, receiver: broadcast::Receiver<GossipMessage>) -> Self {
        Self { topic, receiver }
    }

    pub fn topic(&self) -> GossipTopic {
        self.topic
    }

    /// Wait for the next message. A lagging receiver skips what it missed and
    /// keeps going; a closed channel ends the stream.
    pub async fn next(&mut self) -> Result<GossipMessage, GossipError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "gossip subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(GossipError::Closed(self.topic));
                }
            }
        }
    }
}
