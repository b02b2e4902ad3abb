//! Prometheus-facing metrics for custody nodes. Recording is a no-op until
//! the binary installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, gauge};

pub const CHAIN_HEIGHT: &str = "custody_chain_height";
pub const MEMPOOL_SIZE: &str = "custody_mempool_size";
pub const BLOCKS_COMMITTED: &str = "custody_blocks_committed_total";
pub const INTEGRITY_REJECTIONS: &str = "custody_integrity_rejections_total";

/// Register descriptions with the installed recorder.
pub fn describe() {
    describe_gauge!(CHAIN_HEIGHT, "Height of the node's chain tip");
    describe_gauge!(MEMPOOL_SIZE, "Transactions waiting in the node's mempool");
    describe_counter!(BLOCKS_COMMITTED, "Blocks appended to the node's chain");
    describe_counter!(
        INTEGRITY_REJECTIONS,
        "Transactions or blocks dropped for failing verification"
    );
}

pub(crate) fn record_chain(node: &str, height: u64, mempool_size: usize) {
    gauge!(CHAIN_HEIGHT, "node" => node.to_string()).set(height as f64);
    gauge!(MEMPOOL_SIZE, "node" => node.to_string()).set(mempool_size as f64);
}

pub(crate) fn record_commit(node: &str) {
    counter!(BLOCKS_COMMITTED, "node" => node.to_string()).increment(1);
}

pub(crate) fn record_rejection(node: &str) {
    counter!(INTEGRITY_REJECTIONS, "node" => node.to_string()).increment(1);
}
