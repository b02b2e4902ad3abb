//! The custody node: owns one ledger, mempool and election view, reacts to
//! every gossip topic and drives the timed startup phases.
//!
//! All mutable state sits behind a single mutex. Handlers take the lock, do
//! their bookkeeping, drop it and only then publish, so no guard is ever held
//! across a network call or an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use custody_crypto::{KeyPair, PublicKey};
use custody_mempool::{Mempool, MempoolStats};
use custody_p2p::{GossipMessage, GossipTopic, Subscription, Transport, ALL_TOPICS};
use custody_types::{Block, IntegrityError, RegistrationData, Transaction, TransactionStatus};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::custody::{self, Role};
use crate::dpos::{AttestationOutcome, DposClient, DposSummary};
use crate::ledger::Ledger;
use crate::{metrics, ConsensusError};

#[derive(Debug, Clone)]
struct PendingProposal {
    height: u64,
    hash: String,
    proposed_at: Instant,
}

#[derive(Debug)]
struct LedgerState {
    ledger: Ledger,
    mempool: Mempool,
    dpos: DposClient,
    public_keys: HashMap<String, PublicKey>,
    /// Last product this node dispatched; distributors only.
    current_product: Option<String>,
    pending_proposal: Option<PendingProposal>,
}

/// Read-only view of a node, suitable for JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub role: Role,
    pub height: u64,
    pub tip_hash: String,
    pub chain: Vec<Block>,
    pub mempool: MempoolStats,
    pub current_product: Option<String>,
    #[serde(flatten)]
    pub dpos: DposSummary,
}

/// A supply-chain participant running the custody protocol over a
/// [`Transport`].
pub struct CustodyNode {
    id: String,
    role: Role,
    config: ConsensusConfig,
    keypair: KeyPair,
    transport: Arc<dyn Transport>,
    state: Mutex<LedgerState>,
    /// `None` once the node has shut down.
    tasks: Mutex<Option<Vec<JoinHandle<()>>>>,
}

impl CustodyNode {
    pub fn new(
        role: Role,
        config: ConsensusConfig,
        keypair: KeyPair,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        let id = transport.local_peer_id().to_string();
        let mut public_keys = HashMap::new();
        public_keys.insert(id.clone(), keypair.public_key());

        Arc::new(Self {
            id,
            role,
            config,
            keypair,
            transport,
            state: Mutex::new(LedgerState {
                ledger: Ledger::new(),
                mempool: Mempool::new(),
                dpos: DposClient::new(),
                public_keys,
                current_product: None,
                pending_proposal: None,
            }),
            tasks: Mutex::new(Some(Vec::new())),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Subscribe to every topic and run the timed registration, voting and
    /// election phases.
    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        self.listen()?;
        self.spawn_startup_phases();
        info!(node = %self.id, role = %self.role, "custody node started");
        Ok(())
    }

    /// Subscribe to every topic without scheduling the startup phases.
    pub fn listen(self: &Arc<Self>) -> Result<(), ConsensusError> {
        for topic in ALL_TOPICS {
            let subscription = self.transport.subscribe(topic)?;
            let handle = self.spawn_intake(subscription);
            self.track(handle);
        }
        Ok(())
    }

    /// Abort every task owned by this node.
    pub fn shutdown(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            for task in &tasks {
                task.abort();
            }
            info!(node = %self.id, tasks = tasks.len(), "custody node stopped");
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        match self.tasks.lock().as_mut() {
            Some(tasks) => tasks.push(handle),
            None => handle.abort(),
        }
    }

    fn spawn_intake(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Ok(message) => node.dispatch(message),
                    Err(err) => {
                        warn!(node = %node.id, error = %err, "gossip intake stopped");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_startup_phases(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let started = Instant::now();

            time::sleep_until(started + node.config.registration_delay()).await;
            if let Err(err) = node.register_random_stake() {
                warn!(node = %node.id, error = %err, "registration failed");
            }

            time::sleep_until(started + node.config.voting_delay()).await;
            if let Err(err) = node.vote_random_peer() {
                warn!(node = %node.id, error = %err, "voting failed");
            }

            time::sleep_until(started + node.config.election_delay()).await;
            node.run_election();
            if node.is_leader() {
                info!(node = %node.id, "selected to create blocks");
                node.spawn_proposal_loop();
            }
        });
        self.track(handle);
    }

    /// Propose on every `proposal_interval` tick until shutdown.
    pub fn spawn_proposal_loop(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(node.config.proposal_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(err) = node.propose() {
                    warn!(node = %node.id, error = %err, "block proposal failed");
                }
            }
        });
        self.track(handle);
    }

    // ---------------------------------------------------------------------
    // Startup phases
    // ---------------------------------------------------------------------

    fn register_random_stake(&self) -> Result<(), ConsensusError> {
        let amount = rand::thread_rng().gen_range(0..self.config.max_stake);
        self.register(amount)
    }

    /// Announce this node's stake and public key.
    pub fn register(&self, amount: u64) -> Result<(), ConsensusError> {
        let registration = RegistrationData {
            peer_id: self.id.clone(),
            amount,
            public_key: self.keypair.public_key(),
        };
        self.transport
            .publish(GossipTopic::Register, serde_json::to_vec(&registration)?)?;
        info!(node = %self.id, amount, "registering self");
        Ok(())
    }

    /// Vote for a uniformly random registered peer. Returns the chosen peer.
    pub fn vote_random_peer(&self) -> Result<Option<String>, ConsensusError> {
        let peers = self.state.lock().dpos.registered_peers();
        let Some(target) = peers.choose(&mut rand::thread_rng()).cloned() else {
            warn!(node = %self.id, "no registered peers to vote for");
            return Ok(None);
        };
        self.vote_for(&target)?;
        Ok(Some(target))
    }

    pub fn vote_for(&self, target: &str) -> Result<(), ConsensusError> {
        self.transport
            .publish(GossipTopic::Vote, serde_json::to_vec(target)?)?;
        info!(node = %self.id, target, "vote cast");
        Ok(())
    }

    /// Elect verifiers from the votes seen so far.
    pub fn run_election(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.dpos.elect(self.config.verifier_count).to_vec()
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().dpos.leader() == Some(self.id.as_str())
    }

    pub fn is_verifier(&self) -> bool {
        self.state.lock().dpos.is_verifier(&self.id)
    }

    pub fn verifiers(&self) -> Vec<String> {
        self.state.lock().dpos.verifiers().to_vec()
    }

    // ---------------------------------------------------------------------
    // Proposal
    // ---------------------------------------------------------------------

    /// Build a block from pending transactions and send it for attestation.
    /// Does nothing unless this node leads, the mempool holds transactions and
    /// no unexpired proposal is outstanding for the next height.
    pub fn propose(&self) -> Result<Option<Block>, ConsensusError> {
        let block = {
            let mut state = self.state.lock();
            if state.dpos.leader() != Some(self.id.as_str()) {
                return Ok(None);
            }

            let next_height = state.ledger.height() + 1;
            if let Some(pending) = &state.pending_proposal {
                if pending.height == next_height
                    && pending.proposed_at.elapsed() < self.config.proposal_timeout()
                {
                    debug!(node = %self.id, block = %pending.hash, "proposal still outstanding");
                    return Ok(None);
                }
            }

            let transactions = state.mempool.get(self.config.batch_size);
            if transactions.is_empty() {
                return Ok(None);
            }

            let block = Block::new(transactions, state.ledger.tip().hash, next_height);
            state.pending_proposal = Some(PendingProposal {
                height: next_height,
                hash: block.hash_hex(),
                proposed_at: Instant::now(),
            });
            block
        };

        self.transport
            .publish(GossipTopic::BlockVerify, serde_json::to_vec(&block)?)?;
        info!(
            node = %self.id,
            height = block.height,
            hash = %block.hash_hex(),
            transactions = block.transactions.len(),
            "block proposed"
        );
        Ok(Some(block))
    }

    // ---------------------------------------------------------------------
    // Gossip intake
    // ---------------------------------------------------------------------

    fn dispatch(&self, message: GossipMessage) {
        let result = match message.topic {
            GossipTopic::Transaction => self.on_transaction(&message),
            GossipTopic::Register => self.on_register(&message),
            GossipTopic::Vote => self.on_vote(&message),
            GossipTopic::BlockVerify => self.on_block_verify(&message),
            GossipTopic::BlockVerified => self.on_block_verified(&message),
            GossipTopic::BlockAdd => self.on_block_add(&message),
            GossipTopic::Dispute => self.on_dispute(&message),
        };

        if let Err(err) = result {
            if matches!(err, ConsensusError::Integrity(_)) {
                metrics::record_rejection(&self.id);
            }
            warn!(
                node = %self.id,
                topic = %message.topic,
                from = %message.sender,
                error = %err,
                "dropping gossip message"
            );
        }
    }

    fn on_transaction(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let tx: Transaction = serde_json::from_slice(&message.payload)?;
        let id = tx.id_hex();

        let mut state = self.state.lock();
        if state.ledger.contains_transaction(&id) || state.mempool.contains(&id) {
            return Ok(());
        }

        let sender_key = state
            .public_keys
            .get(&tx.sender)
            .copied()
            .ok_or_else(|| IntegrityError::UnknownSender {
                sender: tx.sender.clone(),
            })?;
        tx.check(&sender_key)?;

        debug!(node = %self.id, tx = %id, product = %tx.product_id, status = %tx.status, "transaction accepted");
        state.mempool.add(tx);
        metrics::record_chain(&self.id, state.ledger.height(), state.mempool.len());
        Ok(())
    }

    fn on_register(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let registration: RegistrationData = serde_json::from_slice(&message.payload)?;
        if registration.peer_id != message.sender {
            return Err(ConsensusError::SenderMismatch {
                claimed: registration.peer_id,
                sender: message.sender.clone(),
            });
        }

        let mut state = self.state.lock();
        state
            .public_keys
            .insert(registration.peer_id.clone(), registration.public_key);
        state
            .dpos
            .register_stake(&registration.peer_id, registration.amount);
        info!(
            node = %self.id,
            peer = %registration.peer_id,
            amount = registration.amount,
            "registered node"
        );
        Ok(())
    }

    fn on_vote(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let target: String = serde_json::from_slice(&message.payload)?;
        let outcome = self.state.lock().dpos.record_vote(&message.sender, &target);
        debug!(
            node = %self.id,
            voter = %message.sender,
            target = %target,
            ?outcome,
            "received vote"
        );
        Ok(())
    }

    fn on_block_verify(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let block: Block = serde_json::from_slice(&message.payload)?;
        {
            let state = self.state.lock();
            if !state.dpos.is_verifier(&self.id) {
                return Ok(());
            }
            block.check(state.ledger.tip(), &state.public_keys)?;
        }

        self.transport
            .publish(GossipTopic::BlockVerified, message.payload.clone())?;
        debug!(node = %self.id, block = %block.hash_hex(), "block attested");
        Ok(())
    }

    fn on_block_verified(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let block: Block = serde_json::from_slice(&message.payload)?;
        let hash = block.hash_hex();
        let outcome = self
            .state
            .lock()
            .dpos
            .record_attestation(&hash, block.height, &message.sender);

        match outcome {
            AttestationOutcome::Quorum => {
                info!(node = %self.id, block = %hash, "verifier quorum reached");
                self.transport
                    .publish(GossipTopic::BlockAdd, message.payload.clone())?;
            }
            AttestationOutcome::Counted => {
                debug!(node = %self.id, block = %hash, attester = %message.sender, "attestation counted");
            }
            AttestationOutcome::AlreadyCommitted | AttestationOutcome::Ignored => {}
        }
        Ok(())
    }

    fn on_block_add(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let block: Block = serde_json::from_slice(&message.payload)?;
        let hash = block.hash_hex();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.ledger.contains_block(&hash) {
            return Ok(());
        }

        let committed = state.ledger.append(block, &state.public_keys)?;
        let height = committed.height;
        state.mempool.remove_all(&committed.transactions);
        state.dpos.mark_committed(&hash, height);
        if state
            .pending_proposal
            .as_ref()
            .is_some_and(|pending| pending.height <= height)
        {
            state.pending_proposal = None;
        }

        metrics::record_commit(&self.id);
        metrics::record_chain(&self.id, height, state.mempool.len());
        Ok(())
    }

    fn on_dispute(&self, message: &GossipMessage) -> Result<(), ConsensusError> {
        let target: String = serde_json::from_slice(&message.payload)?;
        let remaining = self
            .state
            .lock()
            .dpos
            .slash(&target, self.config.slash_penalty);

        match remaining {
            Some(stake) => warn!(
                node = %self.id,
                target = %target,
                disputer = %message.sender,
                stake,
                "stake deducted"
            ),
            None => debug!(node = %self.id, target = %target, "dispute against unregistered peer"),
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Custody operations
    // ---------------------------------------------------------------------

    /// Record the next custody step of `product_id` for this node's role,
    /// hand it to `receiver` and broadcast it.
    pub fn make_transaction(
        &self,
        receiver: &str,
        product_id: &str,
    ) -> Result<Transaction, ConsensusError> {
        let tx = {
            let mut state = self.state.lock();
            let status = custody::next_status(
                self.role,
                &state.ledger,
                product_id,
                state.current_product.as_deref(),
            )?;

            let mut tx = Transaction::new(self.id.clone(), receiver, product_id, status);
            tx.sign(&self.keypair)?;

            if self.role == Role::Distributor {
                state.current_product = Some(product_id.to_string());
            }
            state.mempool.add(tx.clone());
            tx
        };

        self.transport
            .publish(GossipTopic::Transaction, serde_json::to_vec(&tx)?)?;
        info!(
            node = %self.id,
            tx = %tx.id_hex(),
            product = %tx.product_id,
            status = %tx.status,
            receiver = %tx.receiver,
            "transaction broadcast"
        );
        Ok(tx)
    }

    /// Furthest committed custody stage of `product_id`.
    pub fn status_of(&self, product_id: &str) -> Option<TransactionStatus> {
        self.state.lock().ledger.status_of(product_id)
    }

    /// Accuse whoever is responsible for `product_id`'s current state.
    /// Returns the peer whose stake will be cut.
    pub fn dispute(&self, product_id: &str) -> Result<String, ConsensusError> {
        let target = {
            let state = self.state.lock();
            custody::dispute_target(&state.ledger, &self.id, product_id)?
        };

        self.transport
            .publish(GossipTopic::Dispute, serde_json::to_vec(&target)?)?;
        warn!(node = %self.id, product = product_id, target = %target, "dispute raised");
        Ok(target)
    }

    pub fn chain_height(&self) -> u64 {
        self.state.lock().ledger.height()
    }

    pub fn mempool_len(&self) -> usize {
        self.state.lock().mempool.len()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock();
        let tip = state.ledger.tip();
        NodeSnapshot {
            id: self.id.clone(),
            role: self.role,
            height: tip.height,
            tip_hash: tip.hash_hex(),
            chain: state.ledger.blocks().to_vec(),
            mempool: state.mempool.stats(),
            current_product: state.current_product.clone(),
            dpos: state.dpos.summary(),
        }
    }
}

impl std::fmt::Debug for CustodyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyNode")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
