//! A local network of custody nodes sharing one in-process gossip fabric.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use custody_consensus::{ConsensusConfig, CustodyNode, Role};
use custody_crypto::KeyPair;
use custody_p2p::{GossipConfig, GossipNetwork};
use custody_types::TransactionStatus;
use tracing::info;

/// Roles rotate manufacturer, distributor, consumer by node index.
pub fn role_for(index: usize) -> Role {
    match index % 3 {
        0 => Role::Manufacturer,
        1 => Role::Distributor,
        _ => Role::Consumer,
    }
}

/// Role of node `index`: cycles through `roles`, or the default rotation when
/// no layout is configured.
pub fn role_at(roles: &[Role], index: usize) -> Role {
    if roles.is_empty() {
        role_for(index)
    } else {
        roles[index % roles.len()]
    }
}

pub struct Devnet {
    network: Arc<GossipNetwork>,
    nodes: Vec<Arc<CustodyNode>>,
}

impl Devnet {
    /// Start `count` nodes named after consecutive ports from `base_port`.
    pub fn launch(
        count: usize,
        base_port: u16,
        roles: &[Role],
        consensus: &ConsensusConfig,
    ) -> Result<Self> {
        let network = GossipNetwork::new(GossipConfig::default());
        let mut nodes = Vec::with_capacity(count);

        for index in 0..count {
            let id = (u64::from(base_port) + index as u64).to_string();
            let keypair = KeyPair::generate().context("generating node key pair")?;
            let node = CustodyNode::new(
                role_at(roles, index),
                consensus.clone(),
                keypair,
                Arc::new(network.handle(id.clone())),
            );
            node.start()
                .with_context(|| format!("starting node {id}"))?;
            nodes.push(node);
        }

        info!(nodes = nodes.len(), "devnet launched");
        Ok(Self { network, nodes })
    }

    pub fn nodes(&self) -> &[Arc<CustodyNode>] {
        &self.nodes
    }

    pub fn first_with_role(&self, role: Role) -> Option<&Arc<CustodyNode>> {
        self.nodes.iter().find(|node| node.role() == role)
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
        let gossip = self.network.metrics();
        info!(
            published = gossip.published,
            dropped = gossip.dropped,
            "devnet stopped"
        );
    }
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .context("timed out")
}

async fn wait_for_status(
    devnet: &Devnet,
    product_id: &str,
    status: TransactionStatus,
    timeout: Duration,
) -> Result<()> {
    wait_until(timeout, || {
        devnet
            .nodes()
            .iter()
            .all(|node| node.status_of(product_id) == Some(status))
    })
    .await
    .with_context(|| format!("waiting for {product_id} to be {status} on every node"))?;
    info!(product = product_id, %status, "custody step committed");
    Ok(())
}

/// Walk `product_id` through manufacture, dispatch and receipt once the
/// verifiers are elected.
pub async fn run_demo(devnet: &Devnet, product_id: &str, consensus: &ConsensusConfig) -> Result<()> {
    let manufacturer = devnet
        .first_with_role(Role::Manufacturer)
        .context("devnet has no manufacturer")?;
    let distributor = devnet
        .first_with_role(Role::Distributor)
        .context("devnet has no distributor")?;
    let consumer = devnet
        .first_with_role(Role::Consumer)
        .context("devnet has no consumer")?;

    let step_timeout = consensus.proposal_interval() * 3 + consensus.proposal_timeout();
    wait_until(consensus.election_delay() + step_timeout, || {
        devnet.nodes().iter().all(|node| !node.verifiers().is_empty())
    })
    .await
    .context("waiting for verifier election")?;

    manufacturer.make_transaction(distributor.id(), product_id)?;
    wait_for_status(devnet, product_id, TransactionStatus::Manufactured, step_timeout).await?;

    distributor.make_transaction(consumer.id(), product_id)?;
    wait_for_status(devnet, product_id, TransactionStatus::Dispatched, step_timeout).await?;

    consumer.make_transaction(consumer.id(), product_id)?;
    wait_for_status(devnet, product_id, TransactionStatus::Received, step_timeout).await?;

    Ok(())
}
