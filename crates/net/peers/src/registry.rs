//! Thread-safe collection of live connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use convoy_primitives::PeerAddr;
use parking_lot::Mutex;
use tracing::debug;

use crate::conn::{PeerConnection, PeerId};
use crate::events::{EventEmitter, PeerEvent};
use crate::eviction::{EvictionCandidate, select_peer_to_evict};

/// Registration failures that reflect network state rather than bugs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// An outbound connection to this exact endpoint already exists.
    #[error("already connected to {addr}")]
    AlreadyConnected { addr: PeerAddr },
}

/// Inbound admission failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    /// At capacity and no existing peer qualified for eviction.
    #[error("inbound capacity reached and no peer could be evicted")]
    Full,
    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// Counts of automatic outbound connections by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundCounts {
    pub full_relay: usize,
    pub block_relay: usize,
    pub quorum: usize,
}

/// The set of all live [`PeerConnection`]s, behind one mutex.
///
/// Connections are owned by value; removal destroys them, and no reference
/// escapes the lock. Callers access per-connection state through short
/// closures executed under the lock, so visitors must be O(1) per
/// connection, must not block, and must not re-enter the registry.
#[derive(Debug)]
pub struct ConnectionRegistry {
    nodes: Mutex<HashMap<PeerId, PeerConnection>>,
    next_id: AtomicU64,
    events: EventEmitter,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            events: EventEmitter::default(),
        }
    }

    /// Allocates the next connection id. Monotonic within the registry.
    pub fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribes to connection lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Inserts a connection, rejecting an outbound duplicate of an exact
    /// endpoint already present.
    ///
    /// The duplicate-endpoint check and the insertion happen under one
    /// lock acquisition, so two racing admitters cannot both register the
    /// same endpoint.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate id: the caller owns id allocation, and a
    /// collision means an upstream bug that would corrupt the registry.
    pub fn try_register(&self, conn: PeerConnection) -> Result<PeerId, RegisterError> {
        let mut nodes = self.nodes.lock();
        assert!(
            !nodes.contains_key(&conn.id()),
            "duplicate connection id {}",
            conn.id()
        );
        if conn.conn_type().is_outbound() && nodes.values().any(|n| n.addr() == conn.addr()) {
            return Err(RegisterError::AlreadyConnected {
                addr: conn.addr().clone(),
            });
        }

        let id = conn.id();
        self.events
            .peer_connected(id, conn.addr().clone(), conn.conn_type());
        debug!(peer = %id, addr = %conn.addr(), r#type = %conn.conn_type(), "registered connection");
        nodes.insert(id, conn);
        Ok(id)
    }

    /// Removes a connection. Idempotent; returns whether anything was
    /// removed.
    pub fn remove(&self, id: PeerId) -> bool {
        let removed = self.nodes.lock().remove(&id);
        match removed {
            Some(conn) => {
                self.events
                    .peer_disconnected(id, conn.addr().clone(), conn.conn_type());
                debug!(peer = %id, addr = %conn.addr(), "removed connection");
                true
            }
            None => false,
        }
    }

    /// Runs `visitor` over every connection while holding the lock.
    pub fn for_each(&self, mut visitor: impl FnMut(&PeerConnection)) {
        for conn in self.nodes.lock().values() {
            visitor(conn);
        }
    }

    /// Runs `f` against one connection, if present.
    pub fn with_peer<R>(&self, id: PeerId, f: impl FnOnce(&PeerConnection) -> R) -> Option<R> {
        self.nodes.lock().get(&id).map(f)
    }

    /// Counts connections matching `predicate`.
    pub fn count_if(&self, predicate: impl Fn(&PeerConnection) -> bool) -> usize {
        self.nodes.lock().values().filter(|c| predicate(c)).count()
    }

    /// Whether any connection, in either direction, is to this exact
    /// endpoint.
    pub fn is_connected_to(&self, addr: &PeerAddr) -> bool {
        self.nodes.lock().values().any(|c| c.addr() == addr)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Automatic outbound connection counts by category, regardless of
    /// handshake state.
    pub fn outbound_counts(&self) -> OutboundCounts {
        let mut counts = OutboundCounts::default();
        for conn in self.nodes.lock().values() {
            let ty = conn.conn_type();
            if ty.is_full_relay() {
                counts.full_relay += 1;
            } else if ty.is_block_only() {
                counts.block_relay += 1;
            } else if ty.is_quorum() {
                counts.quorum += 1;
            }
        }
        counts
    }

    /// Marks a peer's handshake as finished and emits the event. Returns
    /// false if the peer is gone.
    pub fn mark_handshake_complete(&self, id: PeerId) -> bool {
        let found = self
            .with_peer(id, |conn| conn.mark_handshake_complete())
            .is_some();
        if found {
            self.events.handshake_completed(id);
        }
        found
    }

    /// Snapshots eviction inputs for every peer not already on its way
    /// out. Availability protection only applies to negotiated polling
    /// peers; everyone else scores negative infinity on that axis.
    pub fn eviction_candidates(&self) -> Vec<EvictionCandidate> {
        Self::candidates_of(&self.nodes.lock())
    }

    fn candidates_of(nodes: &HashMap<PeerId, PeerConnection>) -> Vec<EvictionCandidate> {
        nodes
            .values()
            .filter(|conn| !conn.is_disconnecting())
            .map(|conn| EvictionCandidate {
                id: conn.id(),
                connected_at_unix: conn.connected_at_unix(),
                min_ping_micros: conn.min_ping_micros(),
                last_block_time: conn.last_block_time(),
                last_proof_time: conn.last_proof_time(),
                last_tx_time: conn.last_tx_time(),
                has_desirable_services: conn.services().has_desirable(),
                relays_txs: conn.relays_txs(),
                bloom_filter_loaded: conn.bloom_filter_loaded(),
                keyed_net_group: conn.keyed_net_group(),
                prefer_evict: conn.prefer_evict(),
                is_local: conn.addr().net.is_local(),
                availability_score: if conn.quorum_enabled() {
                    conn.availability_score()
                } else {
                    -f64::INFINITY
                },
            })
            .collect()
    }

    /// Selects and flags a peer for disconnection. Returns whether a
    /// victim was found.
    pub fn attempt_to_evict(&self) -> bool {
        let nodes = self.nodes.lock();
        let Some(victim) = select_peer_to_evict(Self::candidates_of(&nodes)) else {
            return false;
        };
        match nodes.get(&victim) {
            Some(conn) => {
                conn.mark_disconnecting();
                self.events.peer_evicted(victim, conn.addr().clone());
                debug!(peer = %victim, addr = %conn.addr(), "selected connection for eviction");
                true
            }
            None => false,
        }
    }

    /// Admits an inbound connection, evicting an existing peer when at
    /// capacity. At capacity with nobody evictable, the connection is
    /// rejected.
    pub fn accept_inbound(
        &self,
        conn: PeerConnection,
        max_inbound: usize,
    ) -> Result<PeerId, InboundError> {
        debug_assert!(conn.conn_type().is_inbound());
        let inbound = self.count_if(|c| c.conn_type().is_inbound() && !c.is_disconnecting());
        if inbound >= max_inbound && !self.attempt_to_evict() {
            debug!(addr = %conn.addr(), "rejecting inbound connection, no eviction candidate");
            self.events.inbound_rejected(conn.addr().clone());
            return Err(InboundError::Full);
        }
        Ok(self.try_register(conn)?)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use convoy_primitives::{ConnType, NetAddr, ServiceFlags};

    use super::*;

    fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> PeerAddr {
        PeerAddr::new(NetAddr::from(Ipv4Addr::new(a, b, c, d)), port)
    }

    fn conn(registry: &ConnectionRegistry, addr: PeerAddr, ty: ConnType) -> PeerConnection {
        PeerConnection::new(registry.next_peer_id(), addr, ServiceFlags::NETWORK, ty, 0)
    }

    #[test]
    fn register_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let endpoint = addr(1, 2, 3, 4, 8333);
        let id = registry
            .try_register(conn(
                &registry,
                endpoint.clone(),
                ConnType::OutboundFullRelay,
            ))
            .expect("register");

        assert_eq!(registry.len(), 1);
        assert!(registry.is_connected_to(&endpoint));
        assert_eq!(
            registry.with_peer(id, |c| c.conn_type()),
            Some(ConnType::OutboundFullRelay)
        );

        assert!(registry.remove(id));
        assert!(!registry.is_connected_to(&endpoint));
        assert!(registry.is_empty());
    }

    #[test]
    fn removal_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry
            .try_register(conn(
                &registry,
                addr(1, 2, 3, 4, 8333),
                ConnType::OutboundFullRelay,
            ))
            .expect("register");
        let other = registry
            .try_register(conn(
                &registry,
                addr(5, 6, 7, 8, 8333),
                ConnType::OutboundFullRelay,
            ))
            .expect("register");

        assert!(!registry.remove(PeerId::new(999)));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.with_peer(other, |c| c.id()).is_some());
    }

    #[test]
    fn outbound_duplicate_endpoint_is_rejected() {
        let registry = ConnectionRegistry::new();
        let endpoint = addr(9, 9, 9, 9, 8333);
        registry
            .try_register(conn(
                &registry,
                endpoint.clone(),
                ConnType::OutboundFullRelay,
            ))
            .expect("first register");

        assert_matches!(
            registry.try_register(conn(&registry, endpoint.clone(), ConnType::OutboundQuorum)),
            Err(RegisterError::AlreadyConnected { addr: a }) if a == endpoint
        );
        assert_eq!(registry.len(), 1);

        // A different port is a different endpoint.
        registry
            .try_register(conn(
                &registry,
                addr(9, 9, 9, 9, 8334),
                ConnType::OutboundFullRelay,
            ))
            .expect("different port");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[should_panic(expected = "duplicate connection id")]
    fn duplicate_id_panics() {
        let registry = ConnectionRegistry::new();
        let first = PeerConnection::new(
            PeerId::new(7),
            addr(1, 1, 1, 1, 8333),
            ServiceFlags::NETWORK,
            ConnType::OutboundFullRelay,
            0,
        );
        let second = PeerConnection::new(
            PeerId::new(7),
            addr(2, 2, 2, 2, 8333),
            ServiceFlags::NETWORK,
            ConnType::OutboundFullRelay,
            0,
        );
        let _ = registry.try_register(first);
        let _ = registry.try_register(second);
    }

    #[test]
    fn counts_and_iteration() {
        let registry = ConnectionRegistry::new();
        for (last, ty) in [
            (1, ConnType::OutboundFullRelay),
            (2, ConnType::OutboundFullRelay),
            (3, ConnType::OutboundQuorum),
            (4, ConnType::BlockRelayOnly),
            (5, ConnType::Inbound),
        ] {
            registry
                .try_register(conn(&registry, addr(10, 0, 0, last, 8333), ty))
                .expect("register");
        }

        assert_eq!(
            registry.outbound_counts(),
            OutboundCounts {
                full_relay: 2,
                block_relay: 1,
                quorum: 1
            }
        );
        assert_eq!(registry.count_if(|c| c.conn_type().is_inbound()), 1);

        let mut seen = 0;
        registry.for_each(|_| seen += 1);
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let registry = ConnectionRegistry::new();
        let mut rx = registry.subscribe();

        let endpoint = addr(1, 2, 3, 4, 8333);
        let id = registry
            .try_register(conn(
                &registry,
                endpoint.clone(),
                ConnType::OutboundFullRelay,
            ))
            .expect("register");
        registry.mark_handshake_complete(id);
        registry.remove(id);

        assert_matches!(rx.recv().await, Ok(PeerEvent::Connected { id: got, .. }) if got == id);
        assert_matches!(
            rx.recv().await,
            Ok(PeerEvent::HandshakeCompleted { id: got }) if got == id
        );
        assert_matches!(
            rx.recv().await,
            Ok(PeerEvent::Disconnected { id: got, addr: a, .. }) if got == id && a == endpoint
        );
    }

    #[test]
    fn inbound_admission_evicts_at_capacity() {
        let registry = ConnectionRegistry::new();
        // Enough inbound peers that the eviction ladder cannot protect
        // them all.
        for i in 0..170u32 {
            let [_, b, c, d] = i.to_be_bytes();
            registry
                .try_register(conn(&registry, addr(100, b, c, d, 8333), ConnType::Inbound))
                .expect("seed inbound");
        }

        let accepted = registry.accept_inbound(
            conn(&registry, addr(200, 0, 0, 1, 8333), ConnType::Inbound),
            170,
        );
        assert!(accepted.is_ok());
        assert_eq!(registry.count_if(|c| c.is_disconnecting()), 1);
    }

    #[test]
    fn inbound_admission_rejects_when_nobody_is_evictable() {
        let registry = ConnectionRegistry::new();
        // Small pools are fully protected by the eviction ladder.
        for last in 1..=10u8 {
            registry
                .try_register(conn(&registry, addr(100, 0, 0, last, 8333), ConnType::Inbound))
                .expect("seed inbound");
        }

        let rejected = registry.accept_inbound(
            conn(&registry, addr(200, 0, 0, 1, 8333), ConnType::Inbound),
            10,
        );
        assert_matches!(rejected, Err(InboundError::Full));
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn concurrent_registration_keeps_endpoints_unique() {
        let registry = Arc::new(ConnectionRegistry::new());
        let endpoint = addr(8, 8, 8, 8, 8333);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let endpoint = endpoint.clone();
            handles.push(std::thread::spawn(move || {
                registry
                    .try_register(PeerConnection::new(
                        registry.next_peer_id(),
                        endpoint,
                        ServiceFlags::NETWORK,
                        ConnType::OutboundFullRelay,
                        0,
                    ))
                    .is_ok()
            }));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("registration thread"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(registry.len(), 1);
    }
}
