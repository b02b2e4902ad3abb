//! Delegated proof-of-stake bookkeeping: stakes, stake-weighted votes,
//! verifier election and the attestation tally that decides when a proposed
//! block is committed.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Election failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ElectionError {
    #[error("need {required} candidates with votes, only {available} available")]
    InsufficientCandidates { required: usize, available: usize },
}

/// What happened to one ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallotOutcome {
    /// The target was credited with the voter's stake.
    Applied,
    /// Voter or target has not registered yet. Applied once both have.
    Deferred,
    /// The voter already cast a ballot.
    Repeated,
}

/// Result of counting one attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationOutcome {
    /// New distinct attester, quorum not yet reached.
    Counted,
    /// This attestation completed the quorum. Reported once per block.
    Quorum,
    /// The block already reached quorum, or its height is already committed.
    AlreadyCommitted,
    /// Attester is not an elected verifier or already attested.
    Ignored,
}

#[derive(Debug, Clone, Default)]
struct Tally {
    height: u64,
    attesters: HashSet<String>,
    quorum: bool,
}

/// Stake, vote and attestation state of one node's view of the network.
#[derive(Debug, Clone, Default)]
pub struct DposClient {
    stakes: HashMap<String, u64>,
    votes: HashMap<String, u64>,
    verifiers: Vec<String>,
    /// Attestation tallies per hex block hash, above `committed_height`.
    block_votes: HashMap<String, Tally>,
    committed_height: u64,
    /// Ballot already applied for each voter.
    ballots: HashMap<String, String>,
    /// Ballots waiting for their voter or target to register.
    deferred: HashMap<String, String>,
    /// First-observed position of every peer id, used to break vote ties.
    seen: HashMap<String, usize>,
}

impl DposClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, peer_id: &str) {
        if !self.seen.contains_key(peer_id) {
            let position = self.seen.len();
            self.seen.insert(peer_id.to_string(), position);
        }
    }

    /// Record (or replace) the stake announced by `peer_id`, then apply any
    /// deferred ballot that was waiting on this peer.
    pub fn register_stake(&mut self, peer_id: &str, amount: u64) {
        self.observe(peer_id);
        self.stakes.insert(peer_id.to_string(), amount);
        debug!(peer = peer_id, amount, "registered stake");

        let ready: Vec<String> = self
            .deferred
            .iter()
            .filter(|(voter, target)| {
                self.is_registered(voter.as_str()) && self.is_registered(target.as_str())
            })
            .map(|(voter, _)| voter.clone())
            .collect();
        for voter in ready {
            if let Some(target) = self.deferred.remove(&voter) {
                self.apply_ballot(voter, target);
            }
        }
    }

    fn is_registered(&self, peer_id: &str) -> bool {
        self.stakes.contains_key(peer_id)
    }

    /// Credit `target` with the voter's stake. Only each voter's first ballot
    /// counts. A ballot naming an unregistered voter or target is held back
    /// until both have registered.
    pub fn record_vote(&mut self, voter: &str, target: &str) -> BallotOutcome {
        if let Some(previous) = self.ballots.get(voter).or_else(|| self.deferred.get(voter)) {
            debug!(voter, previous = %previous, target, "ignoring repeated ballot");
            return BallotOutcome::Repeated;
        }

        if !self.is_registered(voter) || !self.is_registered(target) {
            debug!(voter, target, "ballot deferred until both peers register");
            self.deferred.insert(voter.to_string(), target.to_string());
            return BallotOutcome::Deferred;
        }

        self.apply_ballot(voter.to_string(), target.to_string());
        BallotOutcome::Applied
    }

    fn apply_ballot(&mut self, voter: String, target: String) {
        let weight = self.stake_of(&voter);
        *self.votes.entry(target.clone()).or_insert(0) += weight;
        debug!(voter = %voter, target = %target, weight, "vote recorded");
        self.ballots.insert(voter, target);
    }

    /// Peers with a positive vote total, best first. Ties keep the order in
    /// which the peers were first observed.
    pub fn ranked_candidates(&self) -> Vec<String> {
        let mut candidates: Vec<(&String, u64)> = self
            .votes
            .iter()
            .filter(|(_, votes)| **votes > 0)
            .map(|(peer, votes)| (peer, *votes))
            .collect();
        candidates.sort_by_key(|(peer, _)| self.seen.get(*peer).copied().unwrap_or(usize::MAX));
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.into_iter().map(|(peer, _)| peer.clone()).collect()
    }

    /// Elect the top `n` candidates by votes.
    pub fn compute_verifiers(&mut self, n: usize) -> Result<&[String], ElectionError> {
        let mut ranked = self.ranked_candidates();
        if ranked.len() < n {
            return Err(ElectionError::InsufficientCandidates {
                required: n,
                available: ranked.len(),
            });
        }
        ranked.truncate(n);
        self.verifiers = ranked;
        Ok(&self.verifiers)
    }

    /// Elect `n` verifiers, or every candidate with votes when fewer exist.
    /// Leaves the set empty when nobody received a weighted vote.
    pub fn elect(&mut self, n: usize) -> &[String] {
        let elected = self.compute_verifiers(n).map(<[String]>::len);
        if let Err(err) = elected {
            warn!(error = %err, "electing every voted candidate instead");
            self.verifiers = self.ranked_candidates();
        }
        if self.verifiers.is_empty() {
            warn!("no candidate holds votes; election deferred");
        } else {
            info!(verifiers = ?self.verifiers, votes = ?self.votes, "verifiers elected");
        }
        &self.verifiers
    }

    /// Count an attestation of `block_hash`, proposed at `height`, by
    /// `attester`.
    pub fn record_attestation(
        &mut self,
        block_hash: &str,
        height: u64,
        attester: &str,
    ) -> AttestationOutcome {
        if height <= self.committed_height {
            return AttestationOutcome::AlreadyCommitted;
        }
        if !self.is_verifier(attester) {
            debug!(block = block_hash, attester, "attestation from non-verifier ignored");
            return AttestationOutcome::Ignored;
        }

        let quorum = self.verifiers.len();
        let tally = self
            .block_votes
            .entry(block_hash.to_string())
            .or_insert_with(|| Tally {
                height,
                ..Tally::default()
            });
        if tally.quorum {
            return AttestationOutcome::AlreadyCommitted;
        }
        if !tally.attesters.insert(attester.to_string()) {
            return AttestationOutcome::Ignored;
        }

        if tally.attesters.len() >= quorum {
            tally.quorum = true;
            AttestationOutcome::Quorum
        } else {
            AttestationOutcome::Counted
        }
    }

    /// Record that the block at `height` is on the chain. Tallies for that
    /// height and below, including abandoned re-proposals, are dropped.
    pub fn mark_committed(&mut self, block_hash: &str, height: u64) {
        self.committed_height = self.committed_height.max(height);
        let committed_height = self.committed_height;
        self.block_votes
            .retain(|_, tally| tally.height > committed_height);
        debug!(block = block_hash, height, "attestations settled");
    }

    /// Deduct `penalty` from a peer's stake, floored at zero. Returns the
    /// remaining stake, or `None` for an unregistered peer.
    pub fn slash(&mut self, peer_id: &str, penalty: u64) -> Option<u64> {
        let stake = self.stakes.get_mut(peer_id)?;
        *stake = stake.saturating_sub(penalty);
        Some(*stake)
    }

    pub fn is_verifier(&self, peer_id: &str) -> bool {
        self.verifiers.iter().any(|verifier| verifier == peer_id)
    }

    /// The block proposer: the top elected verifier.
    pub fn leader(&self) -> Option<&str> {
        self.verifiers.first().map(String::as_str)
    }

    pub fn verifiers(&self) -> &[String] {
        &self.verifiers
    }

    pub fn stake_of(&self, peer_id: &str) -> u64 {
        self.stakes.get(peer_id).copied().unwrap_or(0)
    }

    pub fn votes_for(&self, peer_id: &str) -> u64 {
        self.votes.get(peer_id).copied().unwrap_or(0)
    }

    /// Distinct attesters counted so far for an uncommitted block.
    pub fn block_votes(&self, block_hash: &str) -> usize {
        self.block_votes
            .get(block_hash)
            .map_or(0, |tally| tally.attesters.len())
    }

    /// Number of blocks with an open attestation tally.
    pub fn open_tallies(&self) -> usize {
        self.block_votes.len()
    }

    /// Registered peers in first-observed order.
    pub fn registered_peers(&self) -> Vec<String> {
        let mut peers: Vec<&String> = self.stakes.keys().collect();
        peers.sort_by_key(|peer| self.seen.get(*peer).copied().unwrap_or(usize::MAX));
        peers.into_iter().cloned().collect()
    }

    pub fn summary(&self) -> DposSummary {
        DposSummary {
            stakes: self.stakes.clone().into_iter().collect(),
            votes: self.votes.clone().into_iter().collect(),
            verifiers: self.verifiers.clone(),
        }
    }
}

/// Serializable view of the election state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DposSummary {
    pub stakes: BTreeMap<String, u64>,
    pub votes: BTreeMap<String, u64>,
    pub verifiers: Vec<String>,
}
