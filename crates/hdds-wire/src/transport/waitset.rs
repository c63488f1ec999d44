// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The receive wait set: one poll instance over every transport a receive
//! thread serves.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll, Token};

use super::Transport;

/// Poll membership for one receive thread.
pub struct WaitSet {
    poll: Poll,
    events: Events,
    transports: Vec<Arc<dyn Transport>>,
}

impl WaitSet {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            transports: Vec::new(),
        })
    }

    /// Add a transport; its index is its identity in `wait` results.
    pub fn add(&mut self, transport: Arc<dyn Transport>) -> io::Result<usize> {
        let idx = self.transports.len();
        transport.register(self.poll.registry(), Token(idx))?;
        self.transports.push(transport);
        Ok(idx)
    }

    #[must_use]
    pub fn transport(&self, idx: usize) -> Option<&Arc<dyn Transport>> {
        self.transports.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Wait for readability; returns the ready transport indices. A timeout
    /// bounds the sleep so the caller can poll its keep-going flag.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<usize>> {
        self.events.clear();
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        Ok(self.events.iter().map(|ev| ev.token().0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::UdpTransport;
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_wait_reports_ready_transport() {
        let a = Arc::new(UdpTransport::new(0).unwrap());
        let b = Arc::new(UdpTransport::new(0).unwrap());
        let mut ws = WaitSet::new().unwrap();
        let ia = ws.add(Arc::clone(&a) as Arc<dyn Transport>).unwrap();
        let _ib = ws.add(Arc::clone(&b) as Arc<dyn Transport>).unwrap();

        // Nothing ready yet.
        assert!(ws.wait(Duration::from_millis(10)).unwrap().is_empty());

        let mut dst = a.local_locator();
        dst.address[12..].copy_from_slice(&Ipv4Addr::LOCALHOST.octets());
        b.write(&dst, &[b"ping"]).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let ready = ws.wait(Duration::from_millis(20)).unwrap();
            if ready.contains(&ia) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "timed out");
        }
    }
}
