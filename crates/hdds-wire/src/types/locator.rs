// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators: `{ kind: i32, port: u32, address: [u8; 16] }`.
//!
//! The kind selects a transport family. IPv4 addresses occupy the last four
//! bytes of the 16-byte address field with the leading twelve bytes zero
//! (DDS-RTPS v2.5 Sec.9.3.2).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Locator address field length.
pub const LOCATOR_ADDRESS_LEN: usize = 16;
/// Port value meaning "no port".
pub const LOCATOR_PORT_INVALID: u32 = 0;

/// Transport family discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    Invalid,
    Reserved,
    Udpv4,
    Udpv6,
    Tcpv4,
    Tcpv6,
    /// Shared-memory pseudo-locator (intra-host).
    Shm,
    /// UDPv4 multicast address generator `{ base, count, idx }`.
    Udpv4McGen,
    /// Raw Ethernet (no IP).
    RawEthernet,
    /// Anything else: carried opaquely, never resolved.
    Other(i32),
}

impl LocatorKind {
    /// Wire encoding of the kind.
    #[must_use]
    pub fn to_wire(self) -> i32 {
        match self {
            LocatorKind::Invalid => -1,
            LocatorKind::Reserved => 0,
            LocatorKind::Udpv4 => 1,
            LocatorKind::Udpv6 => 2,
            LocatorKind::Tcpv4 => 4,
            LocatorKind::Tcpv6 => 8,
            LocatorKind::Shm => 16,
            LocatorKind::Udpv4McGen => 32,
            LocatorKind::RawEthernet => 64,
            LocatorKind::Other(v) => v,
        }
    }

    #[must_use]
    pub fn from_wire(v: i32) -> Self {
        match v {
            -1 => LocatorKind::Invalid,
            0 => LocatorKind::Reserved,
            1 => LocatorKind::Udpv4,
            2 => LocatorKind::Udpv6,
            4 => LocatorKind::Tcpv4,
            8 => LocatorKind::Tcpv6,
            16 => LocatorKind::Shm,
            32 => LocatorKind::Udpv4McGen,
            64 => LocatorKind::RawEthernet,
            other => LocatorKind::Other(other),
        }
    }

    /// Kinds this engine can hand to a transport.
    #[must_use]
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            LocatorKind::Udpv4 | LocatorKind::Udpv6 | LocatorKind::Tcpv4 | LocatorKind::Tcpv6 | LocatorKind::Shm
        )
    }

    /// Stream-oriented kinds requiring MSG_LEN framing.
    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(self, LocatorKind::Tcpv4 | LocatorKind::Tcpv6)
    }

    fn scheme(self) -> &'static str {
        match self {
            LocatorKind::Udpv4 => "udp",
            LocatorKind::Udpv6 => "udp6",
            LocatorKind::Tcpv4 => "tcp",
            LocatorKind::Tcpv6 => "tcp6",
            LocatorKind::Shm => "shm",
            _ => "raw",
        }
    }
}

/// Errors produced by [`Locator::from_string`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorParseError {
    MissingScheme,
    UnknownScheme(String),
    BadAddress,
    BadPort,
}

impl fmt::Display for LocatorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScheme => write!(f, "locator string has no scheme prefix"),
            Self::UnknownScheme(s) => write!(f, "unknown locator scheme '{}'", s),
            Self::BadAddress => write!(f, "malformed locator address"),
            Self::BadPort => write!(f, "malformed locator port"),
        }
    }
}

impl std::error::Error for LocatorParseError {}

/// A transport address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: LocatorKind,
    pub port: u32,
    pub address: [u8; LOCATOR_ADDRESS_LEN],
}

impl Locator {
    /// The invalid locator.
    pub const INVALID: Locator = Locator {
        kind: LocatorKind::Invalid,
        port: LOCATOR_PORT_INVALID,
        address: [0; LOCATOR_ADDRESS_LEN],
    };

    #[must_use]
    pub fn udpv4(ip: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; LOCATOR_ADDRESS_LEN];
        address[12..].copy_from_slice(&ip.octets());
        Locator {
            kind: LocatorKind::Udpv4,
            port: u32::from(port),
            address,
        }
    }

    #[must_use]
    pub fn udpv6(ip: Ipv6Addr, port: u16) -> Self {
        Locator {
            kind: LocatorKind::Udpv6,
            port: u32::from(port),
            address: ip.octets(),
        }
    }

    /// Decode the 24-byte wire form: kind(i32) + port(u32) + address(16).
    pub fn from_wire(buf: &[u8], swap: bool) -> Option<Self> {
        if buf.len() < 24 {
            return None;
        }
        let rd32 = |b: &[u8]| -> u32 {
            let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if swap {
                v.swap_bytes()
            } else {
                v
            }
        };
        let kind = LocatorKind::from_wire(rd32(&buf[0..4]) as i32);
        let port = rd32(&buf[4..8]);
        let mut address = [0u8; LOCATOR_ADDRESS_LEN];
        address.copy_from_slice(&buf[8..24]);
        Some(Locator { kind, port, address })
    }

    /// Encode the 24-byte wire form in the native submessage byte order.
    #[must_use]
    pub fn to_wire(&self) -> [u8; 24] {
        let mut b = [0u8; 24];
        b[0..4].copy_from_slice(&self.kind.to_wire().to_le_bytes());
        b[4..8].copy_from_slice(&self.port.to_le_bytes());
        b[8..24].copy_from_slice(&self.address);
        b
    }

    /// IPv4 payload of the address field, when the kind carries one.
    #[must_use]
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                if self.address[..12].iter().any(|&b| b != 0) {
                    return None;
                }
                Some(Ipv4Addr::new(
                    self.address[12],
                    self.address[13],
                    self.address[14],
                    self.address[15],
                ))
            }
            _ => None,
        }
    }

    /// Convert to a socket address for the UDP/TCP kinds.
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                Some(SocketAddr::V4(SocketAddrV4::new(self.ipv4()?, port)))
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(self.address),
                port,
                0,
                0,
            ))),
            _ => None,
        }
    }

    /// Whether the address is a multicast group for its family.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        match self.kind {
            LocatorKind::Udpv4 => self.ipv4().is_some_and(|ip| ip.is_multicast()),
            LocatorKind::Udpv6 => Ipv6Addr::from(self.address).is_multicast(),
            LocatorKind::Udpv4McGen => true,
            _ => false,
        }
    }

    /// Structural validity for a locator received in a parameter list.
    ///
    /// Port zero is invalid for the IP kinds; UDPv4 kinds require the twelve
    /// leading address bytes to be zero.
    #[must_use]
    pub fn is_wellformed(&self) -> bool {
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                self.port != LOCATOR_PORT_INVALID
                    && self.port <= u32::from(u16::MAX)
                    && self.address[..12].iter().all(|&b| b == 0)
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => {
                self.port != LOCATOR_PORT_INVALID && self.port <= u32::from(u16::MAX)
            }
            // The mcgen sub-fields get their own checks at parse time.
            LocatorKind::Udpv4McGen => self.port != LOCATOR_PORT_INVALID,
            LocatorKind::Shm => true,
            _ => true,
        }
    }

    /// Parse the diagnostic string form produced by `Display`.
    pub fn from_string(s: &str) -> Result<Self, LocatorParseError> {
        let (scheme, rest) = s.split_once('/').ok_or(LocatorParseError::MissingScheme)?;
        let kind = match scheme {
            "udp" => LocatorKind::Udpv4,
            "udp6" => LocatorKind::Udpv6,
            "tcp" => LocatorKind::Tcpv4,
            "tcp6" => LocatorKind::Tcpv6,
            "shm" => LocatorKind::Shm,
            other => return Err(LocatorParseError::UnknownScheme(other.to_string())),
        };
        match kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                let (addr, port) = rest.rsplit_once(':').ok_or(LocatorParseError::BadPort)?;
                let ip: Ipv4Addr = addr.parse().map_err(|_| LocatorParseError::BadAddress)?;
                let port: u16 = port.parse().map_err(|_| LocatorParseError::BadPort)?;
                let mut loc = Locator::udpv4(ip, port);
                loc.kind = kind;
                Ok(loc)
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => {
                let inner = rest
                    .strip_prefix('[')
                    .and_then(|r| r.split_once(']'))
                    .ok_or(LocatorParseError::BadAddress)?;
                let ip: Ipv6Addr = inner.0.parse().map_err(|_| LocatorParseError::BadAddress)?;
                let port: u16 = inner
                    .1
                    .strip_prefix(':')
                    .ok_or(LocatorParseError::BadPort)?
                    .parse()
                    .map_err(|_| LocatorParseError::BadPort)?;
                let mut loc = Locator::udpv6(ip, port);
                loc.kind = kind;
                Ok(loc)
            }
            LocatorKind::Shm => {
                let port: u32 = rest.parse().map_err(|_| LocatorParseError::BadPort)?;
                Ok(Locator {
                    kind,
                    port,
                    address: [0; LOCATOR_ADDRESS_LEN],
                })
            }
            _ => Err(LocatorParseError::UnknownScheme(scheme.to_string())),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                let ip = self.ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED);
                write!(f, "{}/{}:{}", self.kind.scheme(), ip, self.port)
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => {
                write!(
                    f,
                    "{}/[{}]:{}",
                    self.kind.scheme(),
                    Ipv6Addr::from(self.address),
                    self.port
                )
            }
            LocatorKind::Shm => write!(f, "shm/{}", self.port),
            _ => write!(f, "raw/kind={}:{}", self.kind.to_wire(), self.port),
        }
    }
}
