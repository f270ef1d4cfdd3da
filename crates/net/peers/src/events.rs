//! Connection lifecycle events and the non-blocking broadcast emitter.

use convoy_primitives::{ConnType, PeerAddr};
use tokio::sync::broadcast;

use crate::conn::PeerId;

/// Registry lifecycle events consumed by reporting collaborators.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connected {
        id: PeerId,
        addr: PeerAddr,
        conn_type: ConnType,
    },
    Disconnected {
        id: PeerId,
        addr: PeerAddr,
        conn_type: ConnType,
    },
    HandshakeCompleted {
        id: PeerId,
    },
    Evicted {
        id: PeerId,
        addr: PeerAddr,
    },
    InboundRejected {
        addr: PeerAddr,
    },
}

impl PeerEvent {
    /// The subject connection, where the event has one.
    pub fn id(&self) -> Option<PeerId> {
        match self {
            Self::Connected { id, .. }
            | Self::Disconnected { id, .. }
            | Self::HandshakeCompleted { id }
            | Self::Evicted { id, .. } => Some(*id),
            Self::InboundRejected { .. } => None,
        }
    }

    pub fn is_connection_event(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Disconnected { .. })
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Slow subscribers lag and drop events
/// independently; emitting never blocks registry operations.
#[derive(Debug)]
pub struct EventEmitter {
    tx: broadcast::Sender<PeerEvent>,
}

impl Clone for EventEmitter {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventEmitter {
    pub fn peer_connected(&self, id: PeerId, addr: PeerAddr, conn_type: ConnType) {
        self.emit(PeerEvent::Connected {
            id,
            addr,
            conn_type,
        });
    }

    pub fn peer_disconnected(&self, id: PeerId, addr: PeerAddr, conn_type: ConnType) {
        self.emit(PeerEvent::Disconnected {
            id,
            addr,
            conn_type,
        });
    }

    pub fn handshake_completed(&self, id: PeerId) {
        self.emit(PeerEvent::HandshakeCompleted { id });
    }

    pub fn peer_evicted(&self, id: PeerId, addr: PeerAddr) {
        self.emit(PeerEvent::Evicted { id, addr });
    }

    pub fn inbound_rejected(&self, addr: PeerAddr) {
        self.emit(PeerEvent::InboundRejected { addr });
    }
}
