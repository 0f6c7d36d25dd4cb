use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidrError {
    #[error("prefix /{prefix} out of range 1-{max} for {addr}")]
    PrefixOutOfRange { addr: IpAddr, prefix: u8, max: u8 },
}

/// One address range of a network set.
///
/// The network address is stored masked, so `10.5.5.5/24` is kept as
/// `10.5.5.0/24`. An IPv4-mapped IPv6 address with a prefix above 96 is
/// kept as the IPv4 range it covers (`::ffff:10.0.0.0/104` is `10.0.0.0/8`);
/// with a shorter prefix it stays an IPv6 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cidr {
    V4 { network: Ipv4Addr, prefix: u8 },
    V6 { network: Ipv6Addr, prefix: u8 },
}

impl Cidr {
    /// `prefix` is checked against the family `addr` is written in.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, CidrError> {
        match addr {
            IpAddr::V4(v4) => {
                if !(1..=32).contains(&prefix) {
                    return Err(CidrError::PrefixOutOfRange { addr, prefix, max: 32 });
                }
                Ok(Self::v4(v4, prefix))
            }
            IpAddr::V6(v6) => {
                if !(1..=128).contains(&prefix) {
                    return Err(CidrError::PrefixOutOfRange { addr, prefix, max: 128 });
                }
                match v6.to_ipv4_mapped() {
                    Some(v4) if prefix > 96 => Ok(Self::v4(v4, prefix - 96)),
                    _ => Ok(Cidr::V6 {
                        network: Ipv6Addr::from(u128::from(v6) & ip6_mask(prefix)),
                        prefix,
                    }),
                }
            }
        }
    }

    fn v4(addr: Ipv4Addr, prefix: u8) -> Self {
        Cidr::V4 {
            network: Ipv4Addr::from(u32::from(addr) & ip4_mask(prefix)),
            prefix,
        }
    }

    /// Family-correct containment: an IPv4 range never contains an IPv6
    /// address and vice versa. Mapped candidates count as IPv4.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self, ip.to_canonical()) {
            (Cidr::V4 { network, prefix }, IpAddr::V4(ip)) => ip4_in_network(ip, *network, *prefix),
            (Cidr::V6 { network, prefix }, IpAddr::V6(ip)) => ip6_in_network(ip, *network, *prefix),
            _ => false,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cidr::V4 { network, prefix } => write!(f, "{network}/{prefix}"),
            Cidr::V6 { network, prefix } => write!(f, "{network}/{prefix}"),
        }
    }
}

// Prefixes are 1..=32 and 1..=128 here, so the shifts never overflow.
fn ip4_mask(prefix: u8) -> u32 {
    !0u32 << (32 - prefix)
}

fn ip6_mask(prefix: u8) -> u128 {
    !0u128 << (128 - prefix)
}

/// Check if an IPv4 address falls within a network/prefix.
fn ip4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    let mask = ip4_mask(prefix);
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

/// Check if an IPv6 address falls within a network/prefix.
fn ip6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix: u8) -> bool {
    let mask = ip6_mask(prefix);
    (u128::from(ip) & mask) == (u128::from(network) & mask)
}
