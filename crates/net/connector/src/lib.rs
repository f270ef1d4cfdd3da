//! Automatic outbound connection management for convoy.
//!
//! The [`OutboundConnector`] fills the node's outbound slots from an
//! address book, enforcing service requirements and network-group
//! diversity, and hands successful dials to the connection registry.
//! Dialing itself lives behind the [`Transport`] trait.

pub mod config;
pub mod connector;
pub mod interrupt;
pub mod transport;

pub use config::ConnectorConfig;
pub use connector::OutboundConnector;
pub use interrupt::Interrupt;
pub use transport::{DialError, Dialed, MemoryTransport, Transport};
