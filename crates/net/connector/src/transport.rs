//! Dialing abstraction.
//!
//! The connector decides *whom* to connect to; [`Transport`] owns *how*.
//! Real deployments put sockets, proxies, and the version handshake behind
//! it. [`MemoryTransport`] dials nobody and exists for tests and demos.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use convoy_primitives::{ConnType, PeerAddr};
use convoy_net_peers::PeerId;
use parking_lot::Mutex;

/// Outcome of a successful dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialed {
    /// Connection id assigned by the transport.
    pub id: PeerId,
    /// Local address the connection was bound to, when known.
    pub local_addr: Option<PeerAddr>,
}

/// Why a dial failed. All variants are transient from the connector's
/// point of view; it marks the attempt and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialError {
    #[error("connection timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("peer unreachable")]
    Unreachable,
    #[error("already connected to this peer")]
    AlreadyConnected,
    #[error("handshake failed")]
    Handshake,
}

/// Opens connections to remote peers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, addr: &PeerAddr, conn_type: ConnType) -> Result<Dialed, DialError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self, addr: &PeerAddr, conn_type: ConnType) -> Result<Dialed, DialError> {
        (**self).connect(addr, conn_type).await
    }
}

/// In-process [`Transport`]: every dial succeeds instantly unless a
/// failure was scripted for the endpoint. Ids come from a shared counter.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    next_id: AtomicU64,
    failures: Mutex<HashMap<PeerAddr, DialError>>,
    dials: Mutex<Vec<(PeerAddr, ConnType)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts every future dial to `addr` to fail with `error`.
    pub fn fail_with(&self, addr: PeerAddr, error: DialError) {
        self.failures.lock().insert(addr, error);
    }

    /// Every dial issued so far, in order.
    pub fn dials(&self) -> Vec<(PeerAddr, ConnType)> {
        self.dials.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, addr: &PeerAddr, conn_type: ConnType) -> Result<Dialed, DialError> {
        self.dials.lock().push((addr.clone(), conn_type));
        if let Some(error) = self.failures.lock().get(addr) {
            return Err(error.clone());
        }
        Ok(Dialed {
            id: PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
            local_addr: None,
        })
    }
}
