//! Core primitives for peer connection management.
//!
//! Shared vocabulary used across the convoy crates: network addresses and
//! endpoints, advertised service flags, connection type classification, and
//! the network-group derivation used for outbound diversity.

pub mod addrinfo;
pub mod conntype;
pub mod group;
pub mod netaddr;
pub mod services;

pub use addrinfo::AddrInfo;
pub use conntype::ConnType;
pub use group::{NetGroup, NetGroupKeyer, NetGroupScheme, PrefixGroupScheme};
pub use netaddr::{AddrError, NetAddr, Network, PeerAddr};
pub use services::ServiceFlags;
