//! Connection tracking for the convoy peer connection manager.
//!
//! The [`ConnectionRegistry`] owns every live [`PeerConnection`] behind a
//! single mutex and publishes lifecycle [`PeerEvent`]s. Per-peer
//! responsiveness is tracked by [`AvailabilityStats`], an exponentially
//! decaying score over poll/vote windows, and feeds the inbound
//! [`eviction`] policy.

pub mod availability;
pub mod conn;
pub mod events;
pub mod eviction;
pub mod registry;

pub use availability::{
    AvailabilityStats, STATISTICS_REFRESH_PERIOD, STATISTICS_TIME_CONSTANT, decay_factor,
};
pub use conn::{PeerConnection, PeerId};
pub use events::{EventEmitter, PeerEvent};
pub use eviction::{EvictionCandidate, select_peer_to_evict};
pub use registry::{ConnectionRegistry, InboundError, OutboundCounts, RegisterError};
