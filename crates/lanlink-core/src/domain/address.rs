//! Typed IPv4 peer address.
//!
//! Bookmarks, blacklist entries, and discovery traffic all identify a peer by
//! its IPv4 address alone; ports are fixed per channel.  `PeerAddress` wraps
//! [`Ipv4Addr`] and adds the packed `u32` key the bookmark store is indexed by
//! and the dotted-quad text form used in the bookmark file.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when text is not a dotted-quad IPv4 address.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a dotted-quad IPv4 address: {0:?}")]
pub struct AddressParseError(pub String);

/// IPv4 address of a peer or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(pub Ipv4Addr);

impl PeerAddress {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(Ipv4Addr::new(a, b, c, d))
    }

    /// The address packed into a `u32` in network order; used as the
    /// bookmark key.
    pub fn packed(&self) -> u32 {
        u32::from(self.0)
    }

    /// Pairs the address with a port.
    pub fn with_port(&self, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.0, port))
    }

    /// Extracts the IPv4 part of a socket address.  IPv6 addresses that
    /// embed an IPv4 address are unwrapped; other IPv6 addresses yield
    /// `None`.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self(*v4.ip())),
            SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().map(Self),
        }
    }
}

impl From<Ipv4Addr> for PeerAddress {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}
