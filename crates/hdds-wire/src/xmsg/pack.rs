// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet aggregation: compatible xmsgs share one RTPS packet.

use std::collections::HashMap;
use std::sync::Arc;

use crate::proxy::EntityIndex;
use crate::rtps::{RTPS_HEADER_LEN, RTPS_MAGIC, RTPS_VERSION, SMFLAG_ENDIANNESS, SMID_INFO_DST};
use crate::types::{Guid, GuidPrefix, Locator, SeqNr};

use super::msg::{Xmsg, XmsgKind};

/// Where finished packets go (one call per address set, the transport fans
/// out to the individual addresses).
pub trait PacketSink: Send + Sync {
    fn send(&self, dests: &[Locator], packet: &[u8]);
}

/// Packs xmsgs into RTPS packets under a size cap, flushing whenever the
/// next message cannot share the current packet (size, destination set, or
/// addressing prefix conflicts).
pub struct Xpack {
    src_prefix: GuidPrefix,
    max_packet_size: usize,
    sink: Arc<dyn PacketSink>,
    /// Resolves writer GUIDs for the transmit watermark on flush.
    index: Option<Arc<EntityIndex>>,
    buf: Vec<u8>,
    dests: Vec<Locator>,
    /// Prefix of the last INFO_DST emitted into this packet.
    cur_dst_prefix: Option<GuidPrefix>,
    /// Highest DATA sequence per local writer in this packet.
    xmit_high: HashMap<Guid, SeqNr>,
}

impl Xpack {
    #[must_use]
    pub fn new(
        src_prefix: GuidPrefix,
        max_packet_size: u32,
        sink: Arc<dyn PacketSink>,
        index: Option<Arc<EntityIndex>>,
    ) -> Self {
        let mut xp = Self {
            src_prefix,
            max_packet_size: max_packet_size as usize,
            sink,
            index,
            buf: Vec::with_capacity(max_packet_size as usize),
            dests: Vec::new(),
            cur_dst_prefix: None,
            xmit_high: HashMap::new(),
        };
        xp.reset_buf();
        xp
    }

    fn reset_buf(&mut self) {
        self.buf.clear();
        self.buf.extend_from_slice(&RTPS_MAGIC);
        self.buf.push(RTPS_VERSION.0);
        self.buf.push(RTPS_VERSION.1);
        self.buf.extend_from_slice(&crate::rtps::MY_VENDOR.0);
        self.buf.extend_from_slice(&self.src_prefix.0);
        debug_assert_eq!(self.buf.len(), RTPS_HEADER_LEN);
        self.cur_dst_prefix = None;
    }

    /// Append one message, flushing first when it cannot share the packet.
    pub fn addmsg(&mut self, msg: &Xmsg) {
        let locs = msg.dest_locators();
        if locs.is_empty() {
            log::debug!("[xpack] dropping xmsg without destination");
            return;
        }

        let needs_info_dst = match (msg.dst_prefix(), &self.cur_dst_prefix) {
            (Some(p), Some(c)) => p != c,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let extra = msg.len() + if needs_info_dst { 16 } else { 0 };

        let incompatible_dest = !self.dests.is_empty() && self.dests != locs;
        let overflow =
            self.buf.len() > RTPS_HEADER_LEN && self.buf.len() + extra > self.max_packet_size;
        if incompatible_dest || overflow {
            self.flush();
        }
        self.dests = locs;

        if let Some(p) = msg.dst_prefix() {
            if self.cur_dst_prefix.as_ref() != Some(p) {
                self.append_info_dst(*p);
            }
        }
        self.buf.extend_from_slice(msg.bytes());

        match msg.kind() {
            XmsgKind::Data { writer, seq }
            | XmsgKind::DataRexmit { writer, seq, .. } => {
                let e = self.xmit_high.entry(*writer).or_insert(*seq);
                if *seq > *e {
                    *e = *seq;
                }
            }
            XmsgKind::Control => {}
        }
    }

    fn append_info_dst(&mut self, prefix: GuidPrefix) {
        self.buf.push(SMID_INFO_DST);
        self.buf.push(SMFLAG_ENDIANNESS);
        self.buf.extend_from_slice(&12u16.to_le_bytes());
        self.buf.extend_from_slice(&prefix.0);
        self.cur_dst_prefix = Some(prefix);
    }

    /// Emit the current packet, if any, and reconcile per-writer transmit
    /// watermarks exactly once per packed writer.
    pub fn flush(&mut self) {
        if self.buf.len() > RTPS_HEADER_LEN && !self.dests.is_empty() {
            self.sink.send(&self.dests, &self.buf);
        }
        if let Some(index) = &self.index {
            for (wguid, seq) in self.xmit_high.drain() {
                if let Some(w) = index.local_writer(&wguid) {
                    w.update_seq_xmit(seq);
                }
            }
        } else {
            self.xmit_high.clear();
        }
        self.dests.clear();
        self.reset_buf();
    }
}

impl Drop for Xpack {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrset::AddrSet;
    use crate::types::{EntityId, SeqNr};
    use crate::whc::InMemoryWhc;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<(Vec<Locator>, Vec<u8>)>>,
    }

    impl PacketSink for RecordingSink {
        fn send(&self, dests: &[Locator], packet: &[u8]) {
            self.packets.lock().push((dests.to_vec(), packet.to_vec()));
        }
    }

    fn loc(last: u8) -> Locator {
        Locator::udpv4(Ipv4Addr::new(10, 0, 0, last), 7410)
    }

    fn control_to(l: Locator, prefix: GuidPrefix) -> Xmsg {
        let mut m = Xmsg::new_control();
        m.set_dst_one(l, prefix);
        m.add_heartbeat(
            EntityId([0, 0, 0, 4]),
            EntityId([0, 0, 0, 2]),
            SeqNr(1),
            SeqNr(1),
            1,
            false,
        );
        m
    }

    #[test]
    fn test_same_dest_shares_packet() {
        let sink = Arc::new(RecordingSink::default());
        let mut xp = Xpack::new(GuidPrefix([1; 12]), 1024, sink.clone(), None);
        let p = GuidPrefix([9; 12]);
        xp.addmsg(&control_to(loc(1), p));
        xp.addmsg(&control_to(loc(1), p));
        xp.flush();
        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 1);
        let (dests, pkt) = &packets[0];
        assert_eq!(dests, &vec![loc(1)]);
        assert_eq!(&pkt[..4], b"RTPS");
        // One INFO_DST, two heartbeats.
        assert_eq!(pkt.len(), 20 + 16 + 32 + 32);
    }

    #[test]
    fn test_dest_change_splits_packet() {
        let sink = Arc::new(RecordingSink::default());
        let mut xp = Xpack::new(GuidPrefix([1; 12]), 1024, sink.clone(), None);
        xp.addmsg(&control_to(loc(1), GuidPrefix([9; 12])));
        xp.addmsg(&control_to(loc(2), GuidPrefix([8; 12])));
        xp.flush();
        assert_eq!(sink.packets.lock().len(), 2);
    }

    #[test]
    fn test_size_cap_splits_packet() {
        let sink = Arc::new(RecordingSink::default());
        let mut xp = Xpack::new(GuidPrefix([1; 12]), 96, sink.clone(), None);
        let p = GuidPrefix([9; 12]);
        // Header 20 + info_dst 16 + heartbeat 32 = 68; the second heartbeat
        // would reach 100 > 96.
        xp.addmsg(&control_to(loc(1), p));
        xp.addmsg(&control_to(loc(1), p));
        xp.flush();
        assert_eq!(sink.packets.lock().len(), 2);
    }

    #[test]
    fn test_commit_updates_writer_watermark() {
        let sink = Arc::new(RecordingSink::default());
        let index = Arc::new(EntityIndex::new());
        let wguid = Guid::new(GuidPrefix([3; 12]), EntityId([0, 0, 1, 0x02]));
        let writer = crate::proxy::LocalWriter::new(wguid, Arc::new(InMemoryWhc::new()));
        index.insert_local_writer(Arc::clone(&writer));

        let mut xp = Xpack::new(GuidPrefix([3; 12]), 4096, sink, Some(index));
        for seq in [2, 5, 3] {
            let mut m = Xmsg::new_data(wguid, SeqNr(seq));
            let mut a = AddrSet::new();
            a.add(loc(7));
            m.set_dst_addrset(a);
            m.add_data(
                EntityId([0, 0, 0, 4]),
                wguid.entity_id,
                SeqNr(seq),
                None,
                b"pay",
            );
            xp.addmsg(&m);
        }
        xp.flush();
        assert_eq!(writer.state.lock().seq_xmit, SeqNr(5));
    }
}
