use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::broadcast;
use tracing::trace;

use crate::topics::{GossipTopic, ALL_TOPICS};
use crate::{GossipError, Subscription, Transport};

/// Chaos testing controls for at-least-once delivery.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    /// Probability (0-10000 => 0-100.00%) that a published message is
    /// delivered a second time.
    pub duplicate_prob: u16,
}

/// Configuration for [`GossipNetwork`].
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Capacity of the broadcast channels backing each topic.
    pub channel_capacity: usize,
    pub chaos: ChaosConfig,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            chaos: ChaosConfig::default(),
        }
    }
}

/// Message delivered to subscribers, tagged with its publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMessage {
    pub topic: GossipTopic,
    pub payload: Vec<u8>,
    /// Peer id of the publishing node.
    pub sender: String,
    pub timestamp_ms: i64,
}

impl GossipMessage {
    pub fn new(topic: GossipTopic, payload: Vec<u8>, sender: impl Into<String>) -> Self {
        Self {
            topic,
            payload,
            sender: sender.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Default)]
struct GossipMetrics {
    published: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    subscribers: AtomicU64,
}

impl GossipMetrics {
    fn on_publish(&self, delivered: usize) {
        if delivered > 0 {
            self.published
                .fetch_add(delivered as u64, Ordering::Relaxed);
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_duplicate(&self) {
        self.duplicated.fetch_add(1, Ordering::Relaxed);
    }

    fn on_subscribe(&self) {
        self.subscribers.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GossipMetricsSnapshot {
        GossipMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Read-only metrics snapshot for external consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMetricsSnapshot {
    pub published: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub subscribers: u64,
}

/// In-process gossip fabric built atop Tokio broadcast channels, one per
/// topic. Every node in the process shares one network and publishes through
/// its own [`GossipHandle`]. Publishers receive their own messages, like a
/// pubsub router delivering to local subscriptions.
#[derive(Debug)]
pub struct GossipNetwork {
    config: GossipConfig,
    channels: RwLock<HashMap<GossipTopic, broadcast::Sender<GossipMessage>>>,
    metrics: Arc<GossipMetrics>,
}

impl GossipNetwork {
    pub fn new(config: GossipConfig) -> Arc<Self> {
        let network = Self {
            config,
            channels: RwLock::new(HashMap::new()),
            metrics: Arc::new(GossipMetrics::default()),
        };
        network.initialise_topics();
        Arc::new(network)
    }

    fn initialise_topics(&self) {
        let mut guard = self.channels.write();
        for topic in ALL_TOPICS {
            guard.entry(topic).or_insert_with(|| {
                let (sender, _receiver) = broadcast::channel(self.config.channel_capacity);
                sender
            });
        }
    }

    fn sender_for(&self, topic: GossipTopic) -> Result<broadcast::Sender<GossipMessage>, GossipError> {
        self.channels
            .read()
            .get(&topic)
            .cloned()
            .ok_or_else(|| GossipError::UnknownTopic(topic.to_string()))
    }

    pub fn subscribe(&self, topic: GossipTopic) -> Result<Subscription, GossipError> {
        let sender = self.sender_for(topic)?;
        self.metrics.on_subscribe();
        Ok(Subscription::new(topic, sender.subscribe()))
    }

    /// Deliver `message` to every current subscriber of its topic. Returns the
    /// number of receivers reached by the first delivery.
    pub fn publish(&self, message: GossipMessage) -> Result<usize, GossipError> {
        let sender = self.sender_for(message.topic)?;
        trace!(topic = %message.topic, from = %message.sender, "publishing gossip message");

        let duplicate = self.should_duplicate().then(|| message.clone());
        let delivered = sender.send(message).unwrap_or(0);
        self.metrics.on_publish(delivered);

        if let Some(copy) = duplicate {
            self.metrics.on_duplicate();
            let _ = sender.send(copy);
        }

        Ok(delivered)
    }

    fn should_duplicate(&self) -> bool {
        let prob = self.config.chaos.duplicate_prob;
        prob > 0 && rand::thread_rng().gen_range(0..10_000u16) < prob
    }

    /// Transport endpoint for the node identified by `peer_id`.
    pub fn handle(self: &Arc<Self>, peer_id: impl Into<String>) -> GossipHandle {
        GossipHandle {
            network: Arc::clone(self),
            peer_id: peer_id.into(),
        }
    }

    pub fn metrics(&self) -> GossipMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// A node's view of the shared [`GossipNetwork`].
#[derive(Debug, Clone)]
pub struct GossipHandle {
    network: Arc<GossipNetwork>,
    peer_id: String,
}

impl Transport for GossipHandle {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn publish(&self, topic: GossipTopic, payload: Vec<u8>) -> Result<usize, GossipError> {
        self.network
            .publish(GossipMessage::new(topic, payload, self.peer_id.clone()))
    }

    fn subscribe(&self, topic: GossipTopic) -> Result<Subscription, GossipError> {
        self.network.subscribe(topic)
    }
}
