// ABOUTME: IPv4 subnet parsing and containment checks
// ABOUTME: Used by config validation and when rendering container network attachments

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid subnet '{input}': {reason}")]
pub struct SubnetParseError {
    pub input: String,
    pub reason: String,
}

/// An IPv4 network in CIDR notation, stored with host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Option<Self> {
        if prefix > 32 {
            return None;
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        Some(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Dotted-quad form of the prefix, e.g. `255.255.255.0`
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask(self.prefix))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask(self.prefix) == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &Ipv4Subnet) -> bool {
        let shorter = self.prefix.min(other.prefix);
        let m = mask(shorter);
        u32::from(self.network) & m == u32::from(other.network) & m
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Ipv4Subnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| SubnetParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| err("missing /prefix"))?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| err("bad address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| err("bad prefix length"))?;
        Ipv4Subnet::new(addr, prefix).ok_or_else(|| err("prefix length must be 0-32"))
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Parse a bare address, tolerating a trailing `/prefix`
pub fn parse_host_addr(s: &str) -> Option<Ipv4Addr> {
    s.trim().split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_clears_host_bits() {
        let subnet: Ipv4Subnet = "10.0.0.17/24".parse().unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(subnet.prefix(), 24);
        assert_eq!(subnet.to_string(), "10.0.0.0/24");
        assert_eq!(subnet.netmask(), Ipv4Addr::new(255, 255, 255, 0));
    }

    #[rstest]
    #[case("10.0.0.0")]
    #[case("10.0.0.0/33")]
    #[case("10.0.0/24")]
    #[case("10.0.0.0/abc")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<Ipv4Subnet>().is_err());
    }

    #[test]
    fn test_contains() {
        let subnet: Ipv4Subnet = "192.168.1.0/24".parse().unwrap();
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[rstest]
    #[case("10.0.0.0/24", "10.0.0.128/25", true)]
    #[case("10.0.0.0/24", "10.0.1.0/24", false)]
    #[case("10.0.0.0/8", "10.200.0.0/16", true)]
    #[case("192.168.1.0/24", "10.0.0.0/24", false)]
    fn test_overlaps(#[case] a: &str, #[case] b: &str, #[case] expected: bool) {
        let a: Ipv4Subnet = a.parse().unwrap();
        let b: Ipv4Subnet = b.parse().unwrap();
        assert_eq!(a.overlaps(&b), expected);
        assert_eq!(b.overlaps(&a), expected);
    }

    #[test]
    fn test_parse_host_addr() {
        assert_eq!(parse_host_addr("10.0.0.5/24"), Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(parse_host_addr("pve.local"), None);
    }
}
