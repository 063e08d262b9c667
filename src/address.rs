//! IPv4 address encodings accepted in network sources.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::{Error, Result};

/// One past the last IPv4 address.
pub const ADDRESS_SPACE_END: u64 = 1 << 32;

/// How address cells of a network source are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    /// Dotted quad, e.g. `192.168.0.1`.
    #[serde(alias = "ip", alias = "address")]
    Dotted,
    /// Raw 32-bit integer, e.g. `3232235521`.
    #[serde(alias = "long")]
    Integer,
    /// Prefix or explicit range: `10.0.0.0/8` or `10.0.0.0 - 10.255.255.255`.
    #[serde(alias = "inetnum", alias = "cidr")]
    Prefix,
}

impl AddressKind {
    /// Parse a cell into the inclusive `(first, last)` range it denotes.
    ///
    /// Single addresses denote a one-address range.
    pub fn parse_bounds(self, cell: &str) -> Option<(u32, u32)> {
        let cell = cell.trim();
        match self {
            AddressKind::Dotted => parse_dotted(cell).map(|a| (a, a)),
            AddressKind::Integer => {
                let value: u64 = cell.parse().ok()?;
                let value = u32::try_from(value).ok()?;
                Some((value, value))
            }
            AddressKind::Prefix => parse_prefix(cell),
        }
    }
}

impl FromStr for AddressKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dotted" | "ip" | "address" => Ok(AddressKind::Dotted),
            "integer" | "long" => Ok(AddressKind::Integer),
            "prefix" | "inetnum" | "cidr" => Ok(AddressKind::Prefix),
            other => Err(Error::config(
                "address_kind",
                format!("unknown address kind: {}", other),
            )),
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressKind::Dotted => "dotted",
            AddressKind::Integer => "integer",
            AddressKind::Prefix => "prefix",
        };
        f.write_str(name)
    }
}

fn parse_dotted(cell: &str) -> Option<u32> {
    cell.parse::<Ipv4Addr>().ok().map(u32::from)
}

fn parse_prefix(cell: &str) -> Option<(u32, u32)> {
    // Host bits are dropped: the block is the whole aligned network.
    if cell.contains('/') {
        let net: Ipv4Net = cell.parse().ok()?;
        return Some((u32::from(net.network()), u32::from(net.broadcast())));
    }
    if let Some((first, last)) = cell.split_once('-') {
        let first = parse_dotted(first.trim())?;
        let last = parse_dotted(last.trim())?;
        return Some((first, last));
    }
    parse_dotted(cell).map(|a| (a, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted() {
        assert_eq!(
            AddressKind::Dotted.parse_bounds("192.168.0.1"),
            Some((0xC0A80001, 0xC0A80001))
        );
        assert_eq!(AddressKind::Dotted.parse_bounds("192.168.0"), None);
        assert_eq!(AddressKind::Dotted.parse_bounds("256.0.0.1"), None);
    }

    #[test]
    fn test_integer() {
        assert_eq!(AddressKind::Integer.parse_bounds("4294967295"), Some((u32::MAX, u32::MAX)));
        assert_eq!(AddressKind::Integer.parse_bounds(" 16 "), Some((16, 16)));
        assert_eq!(AddressKind::Integer.parse_bounds("4294967296"), None);
        assert_eq!(AddressKind::Integer.parse_bounds("-1"), None);
    }

    #[test]
    fn test_prefix_cidr() {
        assert_eq!(
            AddressKind::Prefix.parse_bounds("64.0.0.0/2"),
            Some((0x40000000, 0x7FFFFFFF))
        );
        assert_eq!(AddressKind::Prefix.parse_bounds("0.0.0.0/0"), Some((0, u32::MAX)));
        assert_eq!(AddressKind::Prefix.parse_bounds("10.1.2.3/32"), Some((0x0A010203, 0x0A010203)));
        assert_eq!(AddressKind::Prefix.parse_bounds("10.0.0.0/33"), None);
    }

    #[test]
    fn test_prefix_host_bits_are_masked() {
        assert_eq!(
            AddressKind::Prefix.parse_bounds("10.0.0.5/24"),
            Some((0x0A000000, 0x0A0000FF))
        );
        assert_eq!(
            AddressKind::Prefix.parse_bounds("255.255.255.200/24"),
            Some((0xFFFFFF00, u32::MAX))
        );
    }

    #[test]
    fn test_prefix_range() {
        assert_eq!(
            AddressKind::Prefix.parse_bounds("10.0.0.0 - 10.0.0.255"),
            Some((0x0A000000, 0x0A0000FF))
        );
        assert_eq!(AddressKind::Prefix.parse_bounds("10.0.0.0-bogus"), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("long".parse::<AddressKind>().unwrap(), AddressKind::Integer);
        assert_eq!("INETNUM".parse::<AddressKind>().unwrap(), AddressKind::Prefix);
        assert!("ipv6".parse::<AddressKind>().is_err());
    }
}
