//! Network group derivation for outbound diversity.
//!
//! Addresses map to an opaque [`NetGroup`]; automatic outbound admission
//! keeps at most one ordinary connection per group. The mapping is a
//! pluggable [`NetGroupScheme`] so that deployments can group by ASN or
//! any other topology notion; [`PrefixGroupScheme`] is the default
//! prefix-bucket scheme. Groups are always recomputed from the address,
//! never cached on a connection, so a scheme change takes effect at the
//! next admission decision.

use std::{
    fmt,
    hash::{BuildHasher, RandomState},
};

use crate::netaddr::{NetAddr, Network};

/// Opaque key identifying the network neighborhood an address belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetGroup(Vec<u8>);

impl NetGroup {
    pub fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Maps an address to its diversity group.
pub trait NetGroupScheme: Send + Sync {
    fn group(&self, addr: &NetAddr) -> NetGroup;
}

impl<F> NetGroupScheme for F
where
    F: Fn(&NetAddr) -> NetGroup + Send + Sync,
{
    fn group(&self, addr: &NetAddr) -> NetGroup {
        self(addr)
    }
}

/// Default scheme: a family class byte followed by the leading prefix bits
/// of the address payload.
///
/// IPv4 buckets by /16 and IPv6 by /32. Onion and garlic addresses are
/// effectively random, so only their first four bits are kept, spreading
/// them over sixteen groups. CJDNS allocations share the `fc00::/8` block,
/// so twelve bits capture the meaningful spread. Internal addresses keep
/// the whole payload: each name is its own group.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixGroupScheme;

impl PrefixGroupScheme {
    const fn prefix_bits(network: Network) -> usize {
        match network {
            Network::Ipv4 => 16,
            Network::Ipv6 => 32,
            Network::Tor | Network::I2p => 4,
            Network::Cjdns => 12,
            Network::Internal => 80,
        }
    }
}

impl NetGroupScheme for PrefixGroupScheme {
    fn group(&self, addr: &NetAddr) -> NetGroup {
        let network = addr.network();
        let mut bits = Self::prefix_bits(network);
        let mut key = Vec::with_capacity(1 + bits.div_ceil(8));
        key.push(network as u8);
        for &byte in addr.as_bytes() {
            if bits == 0 {
                break;
            }
            if bits >= 8 {
                key.push(byte);
                bits -= 8;
            } else {
                key.push(byte & (0xffu8 << (8 - bits)));
                bits = 0;
            }
        }
        NetGroup(key)
    }
}

/// Derives groups and a per-process salted 64-bit group digest.
///
/// The digest keys eviction's group comparisons: it is stable within a
/// process but unpredictable across processes, so a remote party cannot
/// position addresses relative to other peers' groups.
pub struct NetGroupKeyer {
    scheme: Box<dyn NetGroupScheme>,
    state: RandomState,
}

impl NetGroupKeyer {
    pub fn new(scheme: impl NetGroupScheme + 'static) -> Self {
        Self {
            scheme: Box::new(scheme),
            state: RandomState::new(),
        }
    }

    pub fn group(&self, addr: &NetAddr) -> NetGroup {
        self.scheme.group(addr)
    }

    pub fn keyed_group(&self, addr: &NetAddr) -> u64 {
        self.state.hash_one(self.scheme.group(addr).as_bytes())
    }
}

impl Default for NetGroupKeyer {
    fn default() -> Self {
        Self::new(PrefixGroupScheme)
    }
}

impl fmt::Debug for NetGroupKeyer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetGroupKeyer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(a: u8, b: u8, c: u8, d: u8) -> NetAddr {
        Ipv4Addr::new(a, b, c, d).into()
    }

    #[test]
    fn ipv4_groups_by_slash_16() {
        let scheme = PrefixGroupScheme;
        assert_eq!(scheme.group(&v4(1, 2, 3, 4)), scheme.group(&v4(1, 2, 200, 1)));
        assert_ne!(scheme.group(&v4(1, 2, 3, 4)), scheme.group(&v4(1, 3, 3, 4)));
    }

    #[test]
    fn families_never_share_groups() {
        let scheme = PrefixGroupScheme;
        let four = scheme.group(&v4(0, 0, 0, 1));
        let six = scheme.group(&"::2".parse::<Ipv6Addr>().unwrap().into());
        assert_ne!(four, six);
    }

    #[test]
    fn mapped_ipv4_lands_in_the_v4_group() {
        let scheme = PrefixGroupScheme;
        let plain = scheme.group(&v4(5, 6, 7, 8));
        let mapped = scheme.group(&"::ffff:5.6.7.8".parse::<Ipv6Addr>().unwrap().into());
        assert_eq!(plain, mapped);
    }

    #[test]
    fn onion_groups_on_the_first_nibble() {
        let scheme = PrefixGroupScheme;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 0x1a;
        b[0] = 0x1b;
        assert_eq!(scheme.group(&NetAddr::Tor(a)), scheme.group(&NetAddr::Tor(b)));
        b[0] = 0x2a;
        assert_ne!(scheme.group(&NetAddr::Tor(a)), scheme.group(&NetAddr::Tor(b)));
    }

    #[test]
    fn keyed_group_is_stable_per_keyer() {
        let keyer = NetGroupKeyer::default();
        let addr = v4(9, 9, 1, 1);
        assert_eq!(keyer.keyed_group(&addr), keyer.keyed_group(&addr));
        assert_eq!(keyer.keyed_group(&addr), keyer.keyed_group(&v4(9, 9, 200, 200)));
        assert_ne!(keyer.keyed_group(&addr), keyer.keyed_group(&v4(9, 10, 1, 1)));
    }

    #[test]
    fn closure_schemes_plug_in() {
        let single_group = |_: &NetAddr| NetGroup::new(vec![0]);
        let keyer = NetGroupKeyer::new(single_group);
        assert_eq!(
            keyer.keyed_group(&v4(1, 1, 1, 1)),
            keyer.keyed_group(&NetAddr::Tor([3u8; 32]))
        );
    }

    proptest! {
        #[test]
        fn ipv4_group_equality_matches_first_two_octets(
            a in any::<[u8; 4]>(),
            b in any::<[u8; 4]>(),
        ) {
            let scheme = PrefixGroupScheme;
            let same = scheme.group(&NetAddr::V4(a)) == scheme.group(&NetAddr::V4(b));
            prop_assert_eq!(same, a[0] == b[0] && a[1] == b[1]);
        }
    }
}
