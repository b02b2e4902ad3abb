use std::fmt;
use std::str::FromStr;

use crate::GossipError;

/// Every topic a custody node publishes or subscribes to.
pub const ALL_TOPICS: [GossipTopic; 7] = [
    GossipTopic::Transaction,
    GossipTopic::Register,
    GossipTopic::Vote,
    GossipTopic::BlockVerify,
    GossipTopic::BlockVerified,
    GossipTopic::BlockAdd,
    GossipTopic::Dispute,
];

/// Broadcast channels of the custody protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GossipTopic {
    /// Signed custody transactions.
    Transaction,
    /// Stake registrations carrying the sender's public key.
    Register,
    /// Ballots naming the peer the sender votes for.
    Vote,
    /// Leader proposals awaiting attestation.
    BlockVerify,
    /// Attestations: a verifier re-publishing a proposal it accepted.
    BlockVerified,
    /// Blocks that reached quorum and must be appended.
    BlockAdd,
    /// Slash requests naming the peer at fault.
    Dispute,
}

impl GossipTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            GossipTopic::Transaction => "transaction",
            GossipTopic::Register => "register",
            GossipTopic::Vote => "vote",
            GossipTopic::BlockVerify => "block.verify",
            GossipTopic::BlockVerified => "block.verified",
            GossipTopic::BlockAdd => "block.add",
            GossipTopic::Dispute => "dispute",
        }
    }
}

impl fmt::Display for GossipTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GossipTopic {
    type Err = GossipError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_TOPICS
            .into_iter()
            .find(|topic| topic.as_str() == value)
            .ok_or_else(|| GossipError::UnknownTopic(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_round_trip() {
        for topic in ALL_TOPICS {
            assert_eq!(topic.as_str().parse::<GossipTopic>().unwrap(), topic);
        }
        assert_eq!(GossipTopic::BlockVerified.to_string(), "block.verified");
    }

    #[test]
    fn unknown_topic_is_rejected() {
        assert_eq!(
            "blocks".parse::<GossipTopic>(),
            Err(GossipError::UnknownTopic("blocks".to_string()))
        );
    }
}
