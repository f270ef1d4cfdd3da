//! Connection type classification.

/// Why a connection exists and what role it plays.
///
/// The type is fixed at connection setup and drives admission policy:
/// quotas, service requirements, and whether the peer's network group
/// occupies an outbound diversity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ConnType {
    /// The peer dialed us; we had no say in selecting it.
    Inbound,
    /// Default automatic outbound: relays blocks, transactions, addresses.
    OutboundFullRelay,
    /// Operator-requested connection, exempt from automatic policy.
    Manual,
    /// Short-lived probe validating an address book entry.
    Feeler,
    /// Automatic outbound that relays blocks only.
    BlockRelayOnly,
    /// One-shot connection opened to harvest addresses, then dropped.
    AddrFetch,
    /// Automatic outbound to a consensus-polling peer.
    OutboundQuorum,
}

impl ConnType {
    pub const fn is_inbound(self) -> bool {
        matches!(self, Self::Inbound)
    }

    pub const fn is_outbound(self) -> bool {
        !self.is_inbound()
    }

    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }

    pub const fn is_feeler(self) -> bool {
        matches!(self, Self::Feeler)
    }

    pub const fn is_block_only(self) -> bool {
        matches!(self, Self::BlockRelayOnly)
    }

    pub const fn is_addr_fetch(self) -> bool {
        matches!(self, Self::AddrFetch)
    }

    pub const fn is_quorum(self) -> bool {
        matches!(self, Self::OutboundQuorum)
    }

    pub const fn is_full_relay(self) -> bool {
        matches!(self, Self::OutboundFullRelay)
    }

    /// Whether admission requires the peer to advertise the full set of
    /// desirable services.
    ///
    /// Probes and one-shots take what they can get; inbound and manual
    /// connections are not subject to admission filtering at all.
    pub const fn expects_desirable_services(self) -> bool {
        !matches!(
            self,
            Self::Inbound | Self::Manual | Self::Feeler | Self::AddrFetch
        )
    }

    /// Whether this connection's network group occupies a diversity slot
    /// while it is registered.
    ///
    /// Inbound peers chose us, and manual peers were chosen by the
    /// operator; neither says anything about our own selection spread, so
    /// neither restricts it.
    pub const fn uses_group_slot(self) -> bool {
        !matches!(self, Self::Inbound | Self::Manual)
    }
}
