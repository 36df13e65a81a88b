//! IPv4 address-space math: CIDR parsing, containment/overlap checks and
//! lazy pool enumeration. Everything here is pure; callers own the I/O.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),
}

/// An IPv4 network in prefix form. Host bits are always masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: u32,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, AddressError> {
        if prefix_len > 32 {
            return Err(AddressError::InvalidCidr(format!("{}/{}", addr, prefix_len)));
        }
        let mask = prefix_mask(prefix_len);
        Ok(Self {
            network: ipv4_to_u32(addr) & mask,
            prefix_len,
        })
    }

    pub fn network(&self) -> u32 {
        self.network
    }

    pub fn broadcast(&self) -> u32 {
        self.network | !self.mask()
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> u32 {
        prefix_mask(self.prefix_len)
    }

    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        ipv4_to_u32(addr) & self.mask() == self.network
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_cidr(self.network, self.prefix_len))
    }
}

impl FromStr for Cidr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cidr(s)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// Parse `a.b.c.d/len` (non-strict: host bits are dropped). A bare address is a /32.
pub fn parse_cidr(text: &str) -> Result<Cidr, AddressError> {
    let text = text.trim();
    let invalid = || AddressError::InvalidCidr(text.to_string());

    let (addr, prefix_len) = match text.split_once('/') {
        Some((addr, len)) => {
            let len: u8 = len.parse().map_err(|_| invalid())?;
            (addr, len)
        }
        None => (text, 32),
    };
    let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
    Cidr::new(addr, prefix_len).map_err(|_| invalid())
}

pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr, AddressError> {
    Ipv4Addr::from_str(text.trim()).map_err(|_| AddressError::InvalidAddress(text.to_string()))
}

pub fn ipv4_to_u32(addr: Ipv4Addr) -> u32 {
    u32::from(addr)
}

pub fn u32_to_ipv4(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

pub fn format_cidr(network: u32, prefix_len: u8) -> String {
    format!("{}/{}", u32_to_ipv4(network), prefix_len)
}

/// True when the two ranges share at least one address (nesting included).
pub fn overlaps(a: &Cidr, b: &Cidr) -> bool {
    a.network() <= b.broadcast() && b.network() <= a.broadcast()
}

/// True when every address of `inner` lies in `outer`.
pub fn contains(outer: &Cidr, inner: &Cidr) -> bool {
    outer.prefix_len <= inner.prefix_len && inner.network & outer.mask() == outer.network
}

/// Usable host addresses of `pool`, ascending, minus `excluded`.
///
/// Network and broadcast addresses are dropped for /30 and wider, and any
/// address whose last octet is 0 or 255 is never handed out. The iterator is
/// `Clone`, so a caller can restart enumeration from the same point.
pub fn iterate_pool<'a>(pool: &Cidr, excluded: &'a HashSet<Ipv4Addr>) -> PoolIter<'a> {
    let (first, last) = if pool.prefix_len <= 30 {
        (u64::from(pool.network()) + 1, u64::from(pool.broadcast()) - 1)
    } else {
        (u64::from(pool.network()), u64::from(pool.broadcast()))
    };
    PoolIter {
        next: first,
        last,
        excluded,
    }
}

#[derive(Debug, Clone)]
pub struct PoolIter<'a> {
    next: u64,
    last: u64,
    excluded: &'a HashSet<Ipv4Addr>,
}

impl Iterator for PoolIter<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next <= self.last {
            let candidate = Ipv4Addr::from(self.next as u32);
            self.next += 1;

            let last_octet = candidate.octets()[3];
            if last_octet == 0 || last_octet == 255 {
                continue;
            }
            if self.excluded.contains(&candidate) {
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        parse_cidr(s).unwrap()
    }

    #[test]
    fn test_parse_cidr() {
        let c = cidr("10.0.0.0/24");
        assert_eq!(c.to_string(), "10.0.0.0/24");
        assert_eq!(u32_to_ipv4(c.broadcast()), "10.0.0.255");

        // host bits are masked off
        assert_eq!(cidr("10.0.0.77/25").to_string(), "10.0.0.0/25");
        assert_eq!(cidr("192.168.1.9").to_string(), "192.168.1.9/32");
        assert_eq!(cidr("0.0.0.0/0").mask(), 0);
    }

    #[test]
    fn test_parse_cidr_invalid() {
        for bad in ["", "10.0.0.0/33", "10.0.0/24", "not-a-net", "10.0.0.0/x", "300.1.1.1/8"] {
            assert!(matches!(parse_cidr(bad), Err(AddressError::InvalidCidr(_))), "{}", bad);
        }
        assert!(parse_ipv4("10.0.0.256").is_err());
    }

    #[test]
    fn test_overlaps_and_contains() {
        let a = cidr("10.0.0.0/24");
        let b = cidr("10.0.1.0/24");
        let nested = cidr("10.0.0.128/25");
        let super_net = cidr("10.0.0.0/16");

        assert!(!overlaps(&a, &b));
        assert!(overlaps(&a, &nested));
        assert!(overlaps(&nested, &a));
        assert!(overlaps(&super_net, &b));

        assert!(contains(&a, &nested));
        assert!(!contains(&nested, &a));
        assert!(contains(&a, &a));
        assert!(!contains(&a, &b));
        assert!(a.contains_addr(parse_ipv4("10.0.0.200").unwrap()));
    }

    #[test]
    fn test_iterate_pool_skips_edges() {
        let excluded = HashSet::new();
        let hosts: Vec<_> = iterate_pool(&cidr("10.0.0.128/25"), &excluded).collect();
        assert_eq!(hosts.first().unwrap().to_string(), "10.0.0.129");
        assert_eq!(hosts.last().unwrap().to_string(), "10.0.0.254");
        assert_eq!(hosts.len(), 126);
    }

    #[test]
    fn test_iterate_pool_skips_zero_and_255_octets() {
        let excluded = HashSet::new();
        let hosts: Vec<_> = iterate_pool(&cidr("10.1.0.0/23"), &excluded).collect();
        assert!(hosts.iter().all(|h| h.octets()[3] != 0 && h.octets()[3] != 255));
        // 510 hosts minus 10.1.0.255 and 10.1.1.0
        assert_eq!(hosts.len(), 508);
    }

    #[test]
    fn test_iterate_pool_excludes_and_restarts() {
        let excluded: HashSet<_> = ["10.0.0.1", "10.0.0.3"]
            .iter()
            .map(|s| parse_ipv4(s).unwrap())
            .collect();
        let iter = iterate_pool(&cidr("10.0.0.0/29"), &excluded);
        let first: Vec<_> = iter.clone().take(2).map(|a| a.to_string()).collect();
        assert_eq!(first, vec!["10.0.0.2", "10.0.0.4"]);

        let all: Vec<_> = iter.map(|a| a.to_string()).collect();
        assert_eq!(all, vec!["10.0.0.2", "10.0.0.4", "10.0.0.5", "10.0.0.6"]);
    }

    #[test]
    fn test_iterate_small_prefixes() {
        let excluded = HashSet::new();
        assert_eq!(iterate_pool(&cidr("10.0.0.4/31"), &excluded).count(), 2);
        assert_eq!(iterate_pool(&cidr("10.0.0.9/32"), &excluded).count(), 1);
        assert_eq!(iterate_pool(&cidr("10.0.0.255/32"), &excluded).count(), 0);
        assert_eq!(iterate_pool(&cidr("255.255.255.252/30"), &excluded).count(), 2);
    }
}
