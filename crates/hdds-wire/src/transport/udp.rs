// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport: socket construction, multicast membership, send/receive.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use local_ip_address::local_ip;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::types::{Locator, LocatorKind};
use crate::xmsg::PacketSink;

use super::Transport;

/// One UDP socket, usable as a wait-set member and as a packet sink.
pub struct UdpTransport {
    socket: Mutex<mio::net::UdpSocket>,
    local: Locator,
}

impl UdpTransport {
    /// Bind to `0.0.0.0:port` (0 = ephemeral). The advertised locator uses
    /// the primary interface address, not the wildcard.
    pub fn new(port: u16) -> io::Result<Self> {
        let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        sock.set_reuse_address(true)?;
        sock.set_nonblocking(true)?;
        let bind: SocketAddr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        sock.bind(&bind.into())?;
        let std_sock: std::net::UdpSocket = sock.into();
        let actual_port = std_sock.local_addr()?.port();
        let iface = primary_ipv4();
        log::debug!("[udp] bound 0.0.0.0:{} (advertised {})", actual_port, iface);
        Ok(Self {
            socket: Mutex::new(mio::net::UdpSocket::from_std(std_sock)),
            local: Locator::udpv4(iface, actual_port),
        })
    }
}

/// Primary IPv4 interface address, loopback when none is up.
fn primary_ipv4() -> Ipv4Addr {
    match local_ip() {
        Ok(std::net::IpAddr::V4(ip)) => ip,
        _ => Ipv4Addr::LOCALHOST,
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> LocatorKind {
        LocatorKind::Udpv4
    }

    fn local_locator(&self) -> Locator {
        self.local
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<(usize, Locator)> {
        let (n, from) = self.socket.lock().recv_from(buf)?;
        let loc = match from {
            SocketAddr::V4(a) => Locator::udpv4(*a.ip(), a.port()),
            SocketAddr::V6(a) => Locator::udpv6(*a.ip(), a.port()),
        };
        Ok((n, loc))
    }

    fn write(&self, dest: &Locator, bufs: &[&[u8]]) -> io::Result<usize> {
        let Some(addr) = dest.to_socket_addr() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unroutable locator",
            ));
        };
        // One datagram: gather into a single buffer (the packer already
        // bounded the size).
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let mut out = Vec::with_capacity(total);
        for b in bufs {
            out.extend_from_slice(b);
        }
        self.socket.lock().send_to(&out, addr)
    }

    fn join_multicast(&self, group: &Locator) -> io::Result<()> {
        let Some(ip) = group.ipv4().filter(|i| i.is_multicast()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not an IPv4 multicast locator",
            ));
        };
        self.socket
            .lock()
            .join_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)?;
        log::debug!("[udp] joined multicast {}", ip);
        Ok(())
    }

    fn leave_multicast(&self, group: &Locator) -> io::Result<()> {
        let Some(ip) = group.ipv4().filter(|i| i.is_multicast()) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not an IPv4 multicast locator",
            ));
        };
        self.socket
            .lock()
            .leave_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)
    }

    fn register(&self, registry: &mio::Registry, token: mio::Token) -> io::Result<()> {
        registry.register(&mut *self.socket.lock(), token, mio::Interest::READABLE)
    }
}

impl PacketSink for UdpTransport {
    fn send(&self, dests: &[Locator], packet: &[u8]) {
        for d in dests {
            if let Err(e) = self.write(d, &[packet]) {
                log::debug!("[udp] send to {} failed: {}", d, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_roundtrip() {
        let a = UdpTransport::new(0).unwrap();
        let b = UdpTransport::new(0).unwrap();
        let mut dst = b.local_locator();
        // Loop back over localhost regardless of the advertised interface.
        dst.address[12..].copy_from_slice(&Ipv4Addr::LOCALHOST.octets());

        a.write(&dst, &[b"RTPS", b"rest"]).unwrap();
        let mut buf = [0u8; 64];
        // Non-blocking socket: poll briefly.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match b.read(&mut buf) {
                Ok((n, from)) => {
                    assert_eq!(&buf[..n], b"RTPSrest");
                    assert_eq!(from.kind, LocatorKind::Udpv4);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(std::time::Instant::now() < deadline, "timed out");
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
    }

    #[test]
    fn test_local_locator_is_wellformed() {
        let t = UdpTransport::new(0).unwrap();
        let loc = t.local_locator();
        assert_eq!(loc.kind, LocatorKind::Udpv4);
        assert!(loc.is_wellformed());
    }
}
