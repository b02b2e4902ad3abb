use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConsensusError;

/// Timing and sizing knobs of a custody node. Durations are milliseconds so
/// the struct maps directly onto configuration files and environment
/// variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Number of verifiers elected after voting.
    pub verifier_count: usize,
    /// Maximum transactions per proposed block.
    pub batch_size: usize,
    pub proposal_interval_ms: u64,
    /// How long the leader waits on an outstanding proposal before retrying.
    pub proposal_timeout_ms: u64,
    /// Delays after start for registration, voting and election.
    pub registration_delay_ms: u64,
    pub voting_delay_ms: u64,
    pub election_delay_ms: u64,
    /// Registration stakes are drawn from `[0, max_stake)`.
    pub max_stake: u64,
    /// Stake removed from the target of a dispute.
    pub slash_penalty: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            verifier_count: 2,
            batch_size: 5,
            proposal_interval_ms: 10_000,
            proposal_timeout_ms: 30_000,
            registration_delay_ms: 10_000,
            voting_delay_ms: 15_000,
            election_delay_ms: 20_000,
            max_stake: 30,
            slash_penalty: 10,
        }
    }
}

impl ConsensusConfig {
    /// Compressed schedule for tests and local demos.
    pub fn fast() -> Self {
        Self {
            proposal_interval_ms: 100,
            proposal_timeout_ms: 500,
            registration_delay_ms: 50,
            voting_delay_ms: 150,
            election_delay_ms: 250,
            ..Self::default()
        }
    }

    pub fn proposal_interval(&self) -> Duration {
        Duration::from_millis(self.proposal_interval_ms)
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }

    pub fn voting_delay(&self) -> Duration {
        Duration::from_millis(self.voting_delay_ms)
    }

    pub fn election_delay(&self) -> Duration {
        Duration::from_millis(self.election_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.verifier_count == 0 {
            return Err(ConsensusError::InvalidConfig(
                "verifier_count must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.max_stake == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_stake must be positive".into(),
            ));
        }
        if self.proposal_interval_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "proposal_interval_ms must be positive".into(),
            ));
        }
        if !(self.registration_delay_ms <= self.voting_delay_ms
            && self.voting_delay_ms <= self.election_delay_ms)
        {
            return Err(ConsensusError::InvalidConfig(
                "startup phases must run registration, voting, election in order".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_network_schedule() {
        let config = ConsensusConfig::default();
        assert_eq!(config.verifier_count, 2);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.proposal_interval(), Duration::from_secs(10));
        assert_eq!(config.election_delay(), Duration::from_secs(20));
        assert_eq!(config.slash_penalty, 10);
        assert!(config.validate().is_ok());
        assert!(ConsensusConfig::fast().validate().is_ok());
    }

    #[test]
    fn out_of_order_phases_are_rejected() {
        let config = ConsensusConfig {
            voting_delay_ms: 30_000,
            ..ConsensusConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConsensusError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_stake_range_is_rejected() {
        let config = ConsensusConfig {
            max_stake: 0,
            ..ConsensusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ConsensusConfig =
            serde_json::from_str(r#"{"verifier_count": 4}"#).unwrap();
        assert_eq!(config.verifier_count, 4);
        assert_eq!(config.batch_size, 5);
    }
}
