// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded background send queue with retransmit merging.
//!
//! Producers enqueue finished xmsgs; one worker drains them through an
//! [`Xpack`](super::Xpack). While a retransmit sits queued (within the merge
//! window), an equal retransmit for another reader is folded into it instead
//! of hitting the wire twice: same reader and address collapse outright,
//! same destination prefix erases the reader-id slot, and anything wider
//! promotes the queued message to the writer's full address set.

use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::types::ENTITYID_UNKNOWN;

use super::msg::{Xmsg, XmsgDest, XmsgKind};
use super::pack::Xpack;

struct SqState {
    queue: VecDeque<(Xmsg, Instant)>,
    terminate: bool,
}

struct Shared {
    state: Mutex<SqState>,
    nonempty: Condvar,
    space: Condvar,
    high: usize,
    low: usize,
    merge_window: Duration,
}

/// The background sender.
pub struct SendQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SendQueue {
    /// Spawn the worker; it owns the packer.
    pub fn new(
        name: &str,
        high_watermark: u32,
        low_watermark: u32,
        merge_window: Duration,
        xpack: Xpack,
    ) -> std::io::Result<Self> {
        debug_assert!(low_watermark <= high_watermark);
        let shared = Arc::new(Shared {
            state: Mutex::new(SqState {
                queue: VecDeque::new(),
                terminate: false,
            }),
            nonempty: Condvar::new(),
            space: Condvar::new(),
            high: high_watermark as usize,
            low: low_watermark as usize,
            merge_window,
        });
        let ws = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("sendq.{}", name))
            .spawn(move || worker_loop(&ws, xpack))?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue, merging into a queued equal retransmit when allowed; blocks
    /// on the high watermark until the worker drains below the low one.
    pub fn enqueue(&self, msg: Xmsg) {
        let now = Instant::now();
        let mut st = self.shared.state.lock();
        if st.terminate {
            return;
        }
        if try_merge(&mut st.queue, &msg, now, self.shared.merge_window) {
            log::trace!("[sendq] rexmit merged into queued message");
            return;
        }
        while st.queue.len() >= self.shared.high && !st.terminate {
            self.shared.space.wait(&mut st);
        }
        if st.terminate {
            return;
        }
        st.queue.push_back((msg, now));
        drop(st);
        self.shared.nonempty.notify_one();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain and stop the worker.
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.terminate {
                return;
            }
            st.terminate = true;
        }
        self.shared.nonempty.notify_all();
        self.shared.space.notify_all();
        if let Some(h) = self.worker.lock().take() {
            let _ = h.join();
        }
    }
}

impl Drop for SendQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Merge `incoming` into an already queued retransmit when both name the
/// same (writer, seq, fragment). Returns true when `incoming` is consumed.
fn try_merge(
    queue: &mut VecDeque<(Xmsg, Instant)>,
    incoming: &Xmsg,
    now: Instant,
    window: Duration,
) -> bool {
    let XmsgKind::DataRexmit {
        writer: iw,
        seq: iseq,
        frag: ifrag,
        readerid_off: ioff,
        nomerge: inomerge,
        ..
    } = incoming.kind()
    else {
        return false;
    };
    if *inomerge {
        return false;
    }

    for (queued, enqueued_at) in queue.iter_mut() {
        if now.duration_since(*enqueued_at) > window {
            continue;
        }
        let XmsgKind::DataRexmit {
            writer: qw,
            seq: qseq,
            frag: qfrag,
            readerid_off: qoff,
            writer_addrset,
            nomerge: qnomerge,
        } = queued.kind().clone()
        else {
            continue;
        };
        if qnomerge || qw != *iw || qseq != *iseq || qfrag != *ifrag {
            continue;
        }

        match (queued.dest().clone(), incoming.dest()) {
            (XmsgDest::One(ql), XmsgDest::One(il)) => {
                let same_prefix = queued.dst_prefix() == incoming.dst_prefix();
                let q_reader: [u8; 4] = queued.bytes()[qoff..qoff + 4].try_into().expect("slot");
                let i_reader: [u8; 4] =
                    incoming.bytes()[*ioff..*ioff + 4].try_into().expect("slot");
                if same_prefix && ql == *il {
                    if q_reader != i_reader {
                        // Same host, two readers: address all of them.
                        queued.set_data_reader_id(ENTITYID_UNKNOWN);
                    }
                } else {
                    // Different hosts: promote to the writer's full set.
                    queued.set_data_reader_id(ENTITYID_UNKNOWN);
                    queued.promote_dst_all(writer_addrset);
                }
                return true;
            }
            (XmsgDest::All(_) | XmsgDest::AllUc(_), _) => {
                // Already covering everyone.
                return true;
            }
            _ => {}
        }
    }
    false
}

fn worker_loop(shared: &Shared, mut xpack: Xpack) {
    loop {
        let msg = {
            let mut st = shared.state.lock();
            loop {
                if let Some((m, _)) = st.queue.pop_front() {
                    if st.queue.len() < shared.low {
                        shared.space.notify_all();
                    }
                    break Some(m);
                }
                if st.terminate {
                    break None;
                }
                shared.nonempty.wait(&mut st);
            }
        };
        match msg {
            Some(m) => {
                xpack.addmsg(&m);
                // Flush when nothing is immediately next: latency beats
                // marginal batching once the queue runs dry.
                if shared.state.lock().queue.is_empty() {
                    xpack.flush();
                }
            }
            None => {
                xpack.flush();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrset::AddrSet;
    use crate::types::{EntityId, Guid, GuidPrefix, Locator, SeqNr};
    use crate::xmsg::PacketSink;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sends: AtomicUsize,
    }

    impl PacketSink for CountingSink {
        fn send(&self, _dests: &[Locator], _packet: &[u8]) {
            self.sends.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wguid() -> Guid {
        Guid::new(GuidPrefix([1; 12]), EntityId([0, 0, 1, 0x02]))
    }

    fn rexmit(reader_last: u8, prefix: u8, addr_last: u8, nomerge: bool) -> Xmsg {
        let mut aset = AddrSet::new();
        aset.add(Locator::udpv4(Ipv4Addr::new(10, 0, 0, 100), 7400));
        let mut m = Xmsg::new_rexmit(wguid(), SeqNr(7), None, aset, nomerge);
        m.set_dst_one(
            Locator::udpv4(Ipv4Addr::new(10, 0, 0, addr_last), 7410),
            GuidPrefix([prefix; 12]),
        );
        m.add_data(
            EntityId([0, 0, 0, reader_last]),
            wguid().entity_id,
            SeqNr(7),
            None,
            b"data",
        );
        m
    }

    fn queue_only() -> (VecDeque<(Xmsg, Instant)>, Instant) {
        (VecDeque::new(), Instant::now())
    }

    #[test]
    fn test_merge_same_reader_same_address() {
        let (mut q, now) = queue_only();
        q.push_back((rexmit(4, 9, 1, false), now));
        assert!(try_merge(&mut q, &rexmit(4, 9, 1, false), now, Duration::from_millis(5)));
        assert_eq!(q.len(), 1);
        // Reader id untouched.
        let (m, _) = &q[0];
        let XmsgKind::DataRexmit { readerid_off, .. } = *m.kind() else {
            panic!()
        };
        assert_eq!(m.bytes()[readerid_off + 3], 4);
    }

    #[test]
    fn test_merge_two_readers_same_host_erases_reader_id() {
        let (mut q, now) = queue_only();
        q.push_back((rexmit(4, 9, 1, false), now));
        assert!(try_merge(&mut q, &rexmit(7, 9, 1, false), now, Duration::from_millis(5)));
        let (m, _) = &q[0];
        let XmsgKind::DataRexmit { readerid_off, .. } = *m.kind() else {
            panic!()
        };
        assert_eq!(&m.bytes()[readerid_off..readerid_off + 4], &[0u8; 4]);
        assert!(matches!(m.dest(), XmsgDest::One(_)));
    }

    #[test]
    fn test_merge_different_hosts_promotes_to_all() {
        let (mut q, now) = queue_only();
        q.push_back((rexmit(4, 9, 1, false), now));
        assert!(try_merge(&mut q, &rexmit(7, 8, 2, false), now, Duration::from_millis(5)));
        let (m, _) = &q[0];
        assert!(matches!(m.dest(), XmsgDest::All(_)));
        assert!(m.dst_prefix().is_none());
    }

    #[test]
    fn test_nomerge_never_merges() {
        let (mut q, now) = queue_only();
        q.push_back((rexmit(4, 9, 1, true), now));
        assert!(!try_merge(&mut q, &rexmit(4, 9, 1, false), now, Duration::from_millis(5)));
        q.clear();
        q.push_back((rexmit(4, 9, 1, false), now));
        assert!(!try_merge(&mut q, &rexmit(4, 9, 1, true), now, Duration::from_millis(5)));
    }

    #[test]
    fn test_merge_window_expires() {
        let (mut q, now) = queue_only();
        q.push_back((rexmit(4, 9, 1, false), now));
        let later = now + Duration::from_millis(50);
        assert!(!try_merge(&mut q, &rexmit(4, 9, 1, false), later, Duration::from_millis(5)));
    }

    #[test]
    fn test_worker_drains_and_sends() {
        let sink = Arc::new(CountingSink::default());
        let xp = Xpack::new(GuidPrefix([1; 12]), 4096, sink.clone(), None);
        let sq = SendQueue::new("t", 64, 48, Duration::from_millis(5), xp).unwrap();
        sq.enqueue(rexmit(4, 9, 1, false));
        sq.enqueue(rexmit(4, 8, 3, false));
        sq.stop();
        assert!(sink.sends.load(Ordering::SeqCst) >= 1);
    }
}
