//! Advertised peer candidates.

use crate::{netaddr::PeerAddr, services::ServiceFlags};

/// A candidate peer as advertised: where to reach it and what it claims to
/// serve. This is the currency of address selection; claims are only
/// verified once a connection completes its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub addr: PeerAddr,
    pub services: ServiceFlags,
}

impl AddrInfo {
    pub const fn new(addr: PeerAddr, services: ServiceFlags) -> Self {
        Self { addr, services }
    }
}
