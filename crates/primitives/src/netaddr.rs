//! Network addresses and peer endpoints.
//!
//! [`NetAddr`] is a sum type over the supported address families. Payload
//! lengths are fixed per family, so a constructed address is structurally
//! well formed; the only fallible path is [`NetAddr::from_bytes`], which
//! validates raw payload bytes against the claimed family.

use std::{
    fmt,
    hash::{DefaultHasher, Hasher},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

/// Address families a peer endpoint can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Network {
    Ipv4,
    Ipv6,
    /// Tor v3 onion service.
    Tor,
    /// I2P garlic destination.
    I2p,
    Cjdns,
    /// Name-derived placeholder address, never routable.
    Internal,
}

impl Network {
    /// Payload length in bytes for addresses of this family.
    pub const fn addr_len(self) -> usize {
        match self {
            Self::Ipv4 => 4,
            Self::Ipv6 => 16,
            Self::Tor | Self::I2p => 32,
            Self::Cjdns => 16,
            Self::Internal => 10,
        }
    }
}

/// Errors constructing a [`NetAddr`] from raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
    /// Payload length does not match the claimed address family.
    #[error("invalid {network} address length: expected {expected} bytes, got {got}")]
    InvalidLength {
        network: Network,
        expected: usize,
        got: usize,
    },
}

/// A network address in one of the supported families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetAddr {
    V4([u8; 4]),
    V6([u8; 16]),
    Tor([u8; 32]),
    I2p([u8; 32]),
    Cjdns([u8; 16]),
    Internal([u8; 10]),
}

impl NetAddr {
    /// Validates `bytes` against `network` and constructs the address.
    pub fn from_bytes(network: Network, bytes: &[u8]) -> Result<Self, AddrError> {
        let invalid = |got| AddrError::InvalidLength {
            network,
            expected: network.addr_len(),
            got,
        };
        let addr = match network {
            Network::Ipv4 => Self::V4(bytes.try_into().map_err(|_| invalid(bytes.len()))?),
            Network::Ipv6 => Self::V6(bytes.try_into().map_err(|_| invalid(bytes.len()))?),
            Network::Tor => Self::Tor(bytes.try_into().map_err(|_| invalid(bytes.len()))?),
            Network::I2p => Self::I2p(bytes.try_into().map_err(|_| invalid(bytes.len()))?),
            Network::Cjdns => Self::Cjdns(bytes.try_into().map_err(|_| invalid(bytes.len()))?),
            Network::Internal => {
                Self::Internal(bytes.try_into().map_err(|_| invalid(bytes.len()))?)
            }
        };
        Ok(addr)
    }

    /// Derives a stable internal address from a name.
    ///
    /// Internal addresses stand in for peers known only by a name that did
    /// not resolve. They are valid but never routable, and two calls with
    /// the same name yield the same address within a process.
    pub fn internal(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        hasher.write(b"convoy/internal");
        hasher.write(name.as_bytes());
        let lo = hasher.finish().to_le_bytes();
        hasher.write(&lo);
        let hi = hasher.finish().to_le_bytes();
        let mut payload = [0u8; 10];
        for (dst, src) in payload.iter_mut().zip(lo.into_iter().chain(hi)) {
            *dst = src;
        }
        Self::Internal(payload)
    }

    pub const fn network(&self) -> Network {
        match self {
            Self::V4(_) => Network::Ipv4,
            Self::V6(_) => Network::Ipv6,
            Self::Tor(_) => Network::Tor,
            Self::I2p(_) => Network::I2p,
            Self::Cjdns(_) => Network::Cjdns,
            Self::Internal(_) => Network::Internal,
        }
    }

    /// Raw payload bytes, length fixed by the family.
    pub const fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V4(b) => b,
            Self::V6(b) => b,
            Self::Tor(b) => b,
            Self::I2p(b) => b,
            Self::Cjdns(b) => b,
            Self::Internal(b) => b,
        }
    }

    /// Whether the address could identify a peer at all.
    ///
    /// Rejects the unspecified and broadcast forms that show up as
    /// placeholder garbage in gossiped address messages.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::V4(b) => {
                let ip = Ipv4Addr::from(*b);
                !ip.is_unspecified() && !ip.is_broadcast()
            }
            Self::V6(b) => !Ipv6Addr::from(*b).is_unspecified(),
            Self::Tor(_) | Self::I2p(_) | Self::Cjdns(_) | Self::Internal(_) => true,
        }
    }

    /// Loopback addresses, reachable only from the local host.
    pub fn is_local(&self) -> bool {
        match self {
            Self::V4(b) => Ipv4Addr::from(*b).is_loopback(),
            Self::V6(b) => Ipv6Addr::from(*b).is_loopback(),
            _ => false,
        }
    }

    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Whether an automatic connection to this address makes sense.
    pub fn is_routable(&self) -> bool {
        if !self.is_valid() || self.is_local() {
            return false;
        }
        match self {
            Self::V4(b) => {
                let ip = Ipv4Addr::from(*b);
                !ip.is_private() && !ip.is_link_local()
            }
            Self::V6(b) => {
                let ip = Ipv6Addr::from(*b);
                !ip.is_unique_local() && !ip.is_unicast_link_local()
            }
            Self::Tor(_) | Self::I2p(_) | Self::Cjdns(_) => true,
            Self::Internal(_) => false,
        }
    }
}

impl From<Ipv4Addr> for NetAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self::V4(ip.octets())
    }
}

impl From<Ipv6Addr> for NetAddr {
    /// IPv4-mapped IPv6 addresses fold into their IPv4 form so that the two
    /// representations of one host dedup and group identically.
    fn from(ip: Ipv6Addr) -> Self {
        match ip.to_ipv4_mapped() {
            Some(v4) => Self::V4(v4.octets()),
            None => Self::V6(ip.octets()),
        }
    }
}

impl From<IpAddr> for NetAddr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(b) => Ipv4Addr::from(*b).fmt(f),
            Self::V6(b) | Self::Cjdns(b) => Ipv6Addr::from(*b).fmt(f),
            Self::Tor(b) => write_tagged(f, "tor", b),
            Self::I2p(b) => write_tagged(f, "i2p", b),
            Self::Internal(b) => write_tagged(f, "internal", b),
        }
    }
}

/// Short display form for non-IP families: a tag plus leading payload hex.
fn write_tagged(f: &mut fmt::Formatter<'_>, tag: &str, payload: &[u8]) -> fmt::Result {
    write!(f, "{tag}:")?;
    for byte in payload.iter().take(4) {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

/// A peer endpoint: address plus transport port.
///
/// `Eq`/`Hash` follow the exact endpoint, which is the key connection dedup
/// operates on. Non-IP families carry the port for uniformity even where
/// the underlying transport ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub net: NetAddr,
    pub port: u16,
}

impl PeerAddr {
    pub const fn new(net: NetAddr, port: u16) -> Self {
        Self { net, port }
    }

    pub fn is_valid(&self) -> bool {
        self.net.is_valid() && self.port != 0
    }

    pub fn is_routable(&self) -> bool {
        self.net.is_routable()
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(sa: SocketAddr) -> Self {
        Self::new(sa.ip().into(), sa.port())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.net {
            NetAddr::V4(_) => write!(f, "{}:{}", self.net, self.port),
            NetAddr::V6(_) | NetAddr::Cjdns(_) => write!(f, "[{}]:{}", self.net, self.port),
            _ => write!(f, "{}:{}", self.net, self.port),
        }
    }
}
