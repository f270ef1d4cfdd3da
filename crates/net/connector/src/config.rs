//! Connector configuration.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use convoy_primitives::NetGroupKeyer;

/// Quotas and timing for automatic outbound connection management.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Target number of full-relay outbound connections.
    pub max_full_relay_outbound: usize,
    /// Target number of block-relay-only outbound connections.
    pub max_block_relay_outbound: usize,
    /// Target number of quorum outbound connections.
    pub max_quorum_outbound: usize,
    /// When set, a quorum candidate is rejected once this many quorum
    /// peers already share its network group. Unset means quorum
    /// connections ignore group caps entirely.
    pub max_quorum_per_group: Option<NonZeroUsize>,
    /// Pause between admission cycles.
    pub cycle_interval: Duration,
    /// Mean of the exponential timer between feeler probes.
    pub feeler_interval: Duration,
    /// Mean of the exponential timer between extra block-relay peers.
    pub extra_block_relay_interval: Duration,
    /// A feeler waits a random fraction of this window before dialing, so
    /// probe timing leaks nothing about the timer schedule.
    pub feeler_sleep_window: Duration,
    /// Candidate draws per admission cycle before giving up.
    pub max_tries_per_cycle: usize,
    /// Draws while hunting a quorum peer before a non-quorum candidate may
    /// fall back to full-relay admission.
    pub quorum_fallback_tries: usize,
    /// Network group derivation shared with the rest of the node.
    pub group_keyer: Arc<NetGroupKeyer>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_full_relay_outbound: 8,
            max_block_relay_outbound: 2,
            max_quorum_outbound: 16,
            max_quorum_per_group: None,
            cycle_interval: Duration::from_millis(500),
            feeler_interval: Duration::from_secs(120),
            extra_block_relay_interval: Duration::from_secs(300),
            feeler_sleep_window: Duration::from_secs(1),
            max_tries_per_cycle: 100,
            quorum_fallback_tries: 20,
            group_keyer: Arc::new(NetGroupKeyer::default()),
        }
    }
}
