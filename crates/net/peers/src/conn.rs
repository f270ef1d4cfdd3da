//! Per-connection state.
//!
//! [`PeerConnection`] owns everything the node remembers about one socket
//! session: identity, endpoint, connection type, and the mutable counters
//! fed by the transport and protocol layers. Mutable state is atomic so
//! that transport threads update counters without taking the registry
//! lock; the immutable fields are fixed at construction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use convoy_primitives::{ConnType, PeerAddr, ServiceFlags};

use crate::availability::AvailabilityStats;

/// Unique peer connection identifier, assigned monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One active or pending connection to a remote peer.
///
/// Owned by value by the registry from registration until removal. The
/// fields driving eviction decisions (`last_*_time`, `min_ping`, relay
/// flags) are maintained by the protocol layer through the setters here;
/// this type performs no I/O itself.
#[derive(Debug)]
pub struct PeerConnection {
    id: PeerId,
    addr: PeerAddr,
    services: ServiceFlags,
    conn_type: ConnType,
    addr_bind: Option<PeerAddr>,
    keyed_net_group: u64,
    connected_at_unix: u64,
    prefer_evict: bool,

    successfully_connected: AtomicBool,
    disconnecting: AtomicBool,
    quorum_enabled: AtomicBool,
    relays_txs: AtomicBool,
    bloom_filter_loaded: AtomicBool,
    last_block_time: AtomicU64,
    last_tx_time: AtomicU64,
    last_proof_time: AtomicU64,
    /// Best observed ping in microseconds, `u64::MAX` until the first sample.
    min_ping_micros: AtomicU64,

    stats: AvailabilityStats,
}

impl PeerConnection {
    pub fn new(
        id: PeerId,
        addr: PeerAddr,
        services: ServiceFlags,
        conn_type: ConnType,
        keyed_net_group: u64,
    ) -> Self {
        Self {
            id,
            addr,
            services,
            conn_type,
            addr_bind: None,
            keyed_net_group,
            connected_at_unix: current_unix_timestamp(),
            prefer_evict: false,
            successfully_connected: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            quorum_enabled: AtomicBool::new(false),
            relays_txs: AtomicBool::new(true),
            bloom_filter_loaded: AtomicBool::new(false),
            last_block_time: AtomicU64::new(0),
            last_tx_time: AtomicU64::new(0),
            last_proof_time: AtomicU64::new(0),
            min_ping_micros: AtomicU64::new(u64::MAX),
            stats: AvailabilityStats::new(),
        }
    }

    /// Sets the locally observed bind address for this connection.
    pub fn with_addr_bind(mut self, addr_bind: PeerAddr) -> Self {
        self.addr_bind = Some(addr_bind);
        self
    }

    /// Marks the peer as preferred for eviction.
    pub fn with_prefer_evict(mut self, prefer_evict: bool) -> Self {
        self.prefer_evict = prefer_evict;
        self
    }

    pub const fn id(&self) -> PeerId {
        self.id
    }

    pub const fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub const fn services(&self) -> ServiceFlags {
        self.services
    }

    pub const fn conn_type(&self) -> ConnType {
        self.conn_type
    }

    pub const fn addr_bind(&self) -> Option<&PeerAddr> {
        self.addr_bind.as_ref()
    }

    pub const fn keyed_net_group(&self) -> u64 {
        self.keyed_net_group
    }

    /// Unix timestamp of connection setup.
    pub const fn connected_at_unix(&self) -> u64 {
        self.connected_at_unix
    }

    pub const fn prefer_evict(&self) -> bool {
        self.prefer_evict
    }

    /// Marks the version/verack exchange as finished.
    pub fn mark_handshake_complete(&self) {
        self.successfully_connected.store(true, Ordering::Relaxed);
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.successfully_connected.load(Ordering::Relaxed)
    }

    /// Flags the connection for teardown. Irreversible; the peer stops
    /// counting toward quotas and eviction once set.
    pub fn mark_disconnecting(&self) {
        self.disconnecting.store(true, Ordering::Relaxed);
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Relaxed)
    }

    /// Marks the peer as a negotiated polling participant. Only then does
    /// its availability score protect it from eviction.
    pub fn enable_quorum(&self) {
        self.quorum_enabled.store(true, Ordering::Relaxed);
    }

    pub fn quorum_enabled(&self) -> bool {
        self.quorum_enabled.load(Ordering::Relaxed)
    }

    pub fn set_relays_txs(&self, relays: bool) {
        self.relays_txs.store(relays, Ordering::Relaxed);
    }

    pub fn relays_txs(&self) -> bool {
        self.relays_txs.load(Ordering::Relaxed)
    }

    pub fn set_bloom_filter_loaded(&self, loaded: bool) {
        self.bloom_filter_loaded.store(loaded, Ordering::Relaxed);
    }

    pub fn bloom_filter_loaded(&self) -> bool {
        self.bloom_filter_loaded.load(Ordering::Relaxed)
    }

    pub fn record_block(&self, unix_secs: u64) {
        self.last_block_time.store(unix_secs, Ordering::Relaxed);
    }

    pub fn last_block_time(&self) -> u64 {
        self.last_block_time.load(Ordering::Relaxed)
    }

    pub fn record_tx(&self, unix_secs: u64) {
        self.last_tx_time.store(unix_secs, Ordering::Relaxed);
    }

    pub fn last_tx_time(&self) -> u64 {
        self.last_tx_time.load(Ordering::Relaxed)
    }

    pub fn record_proof(&self, unix_secs: u64) {
        self.last_proof_time.store(unix_secs, Ordering::Relaxed);
    }

    pub fn last_proof_time(&self) -> u64 {
        self.last_proof_time.load(Ordering::Relaxed)
    }

    /// Records a ping sample, keeping the best observed round trip.
    pub fn record_ping(&self, rtt: Duration) {
        let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);
        self.min_ping_micros.fetch_min(micros, Ordering::Relaxed);
    }

    pub fn min_ping_micros(&self) -> u64 {
        self.min_ping_micros.load(Ordering::Relaxed)
    }

    /// Adds `count` polls issued to the current statistics window.
    pub fn record_polled(&self, count: u32) {
        self.stats.record_polled(count);
    }

    /// Adds `count` answered polls to the current statistics window.
    pub fn record_voted(&self, count: u32) {
        self.stats.record_voted(count);
    }

    /// Consumes the statistics window and decays the availability score.
    pub fn update_availability_score(&self, decay_factor: f64) {
        self.stats.update(decay_factor);
    }

    pub fn availability_score(&self) -> f64 {
        self.stats.score()
    }
}

pub(crate) fn current_unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use convoy_primitives::NetAddr;

    use super::*;
    use crate::availability::{STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT, decay_factor};

    fn conn(id: u64) -> PeerConnection {
        let addr = PeerAddr::new(NetAddr::from(Ipv4Addr::new(1, 2, 3, 4)), 8333);
        PeerConnection::new(
            PeerId::new(id),
            addr,
            ServiceFlags::NETWORK,
            ConnType::OutboundFullRelay,
            7,
        )
    }

    #[test]
    fn new_connection_defaults() {
        let conn = conn(1);
        assert_eq!(conn.id(), PeerId::new(1));
        assert!(!conn.is_handshake_complete());
        assert!(!conn.is_disconnecting());
        assert!(!conn.quorum_enabled());
        assert!(conn.relays_txs());
        assert_eq!(conn.min_ping_micros(), u64::MAX);
        assert!(conn.availability_score().abs() < 1e-9);
        assert_eq!(conn.keyed_net_group(), 7);
    }

    #[test]
    fn ping_keeps_the_minimum() {
        let conn = conn(1);
        conn.record_ping(Duration::from_millis(80));
        conn.record_ping(Duration::from_millis(30));
        conn.record_ping(Duration::from_millis(50));
        assert_eq!(conn.min_ping_micros(), 30_000);
    }

    #[test]
    fn poll_bookkeeping_flows_into_the_score() {
        let conn = conn(1);
        let d = decay_factor(STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT);

        conn.record_polled(1);
        conn.record_voted(1);
        conn.update_availability_score(d);
        assert!(conn.availability_score() > 0.0);
    }

    #[test]
    fn concurrent_poll_updates_do_not_lose_counts() {
        let conn = Arc::new(conn(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let conn = Arc::clone(&conn);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    conn.record_polled(1);
                    conn.record_voted(1);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("poll thread panicked");
        }

        // With a full-weight update the score equals the window's net
        // response: 8000 answered out of 8000 issued.
        conn.update_availability_score(1.0);
        assert!((conn.availability_score() - 8000.0).abs() < 1e-9);
    }
}
