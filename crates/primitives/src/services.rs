//! Service capability flags advertised by peers.

use std::fmt;

use derive_more::{BitAnd, BitOr, BitOrAssign};

/// Bitmask of services a peer claims to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BitAnd, BitOr, BitOrAssign)]
pub struct ServiceFlags(u64);

impl ServiceFlags {
    pub const NONE: Self = Self(0);
    /// Serves the full historical chain.
    pub const NETWORK: Self = Self(1 << 0);
    /// Supports connection bloom filtering.
    pub const BLOOM: Self = Self(1 << 2);
    /// Serves only recent chain history.
    pub const NETWORK_LIMITED: Self = Self(1 << 10);
    /// Participates in consensus polling.
    pub const QUORUM: Self = Self(1 << 24);

    const KNOWN: [(Self, &'static str); 4] = [
        (Self::NETWORK, "NETWORK"),
        (Self::BLOOM, "BLOOM"),
        (Self::NETWORK_LIMITED, "NETWORK_LIMITED"),
        (Self::QUORUM, "QUORUM"),
    ];

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Whether all flags in `other` are set.
    pub const fn has(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the peer offers everything an automatic outbound connection
    /// wants from a steady-state peer.
    pub const fn has_desirable(self) -> bool {
        self.has(Self::NETWORK)
    }

    /// Whether the peer is likely to be known to address databases, which
    /// is all a probe connection needs.
    pub const fn may_have_useful_addrs(self) -> bool {
        self.0 & (Self::NETWORK.0 | Self::NETWORK_LIMITED.0) != 0
    }
}

impl fmt::Display for ServiceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NONE");
        }
        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::KNOWN {
            if self.has(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}
