// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The receive path: datagram validation, submessage dispatch, and the
//! reliability protocol's receiving side.
//!
//! ## Flow
//!
//! ```text
//! datagram -> header check -> per-submessage validate
//!   DATA/DATA_FRAG  -> defrag -> reorder -> delivery queue (or sync)
//!   HEARTBEAT       -> gap below firstSN, schedule ACKNACK
//!   GAP             -> reorder gap runs, release samples
//!   ACKNACK         -> ack WHC, retransmit / GAP, schedule HEARTBEAT
//!   NACK_FRAG       -> retransmit fragments or GAP
//!   HEARTBEAT_FRAG  -> schedule ACKNACK(+NACK_FRAG) when fragments missing
//!   INFO_*          -> receiver-state updates (copy-on-write)
//! ```
//!
//! An error in one submessage drops that datagram with a rate-limited
//! diagnostic and never poisons any other datagram.

mod state;
mod submsg;

pub use state::ReceiverState;
pub use submsg::{
    AckNack, Data, DataFrag, Gap, Heartbeat, HeartbeatFrag, InfoDst, InfoSrc, InfoTs, Invalid,
    NackFrag,
};

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::bitset::{bitset_set, BITSET_MAX_WORDS};
use crate::config::{Config, DefragDropMode, DeliveryMode, LocalParticipants};
use crate::defrag::{Defrag, NackMap};
use crate::dqueue::{DeliveryHandler, DeliveryQueue};
use crate::gc::ThreadState;
use crate::plist::quickscan;
use crate::proxy::{EntityIndex, LocalWriter};
use crate::rbuf::{fragchain_adjust, fragchain_unref, RbufPool, Rdata, Rmsg};
use crate::reorder::{Reorder, ReorderMode, ReorderResult};
use crate::rtps::{
    FnSetWire, SnSetWire, SubmsgHeader, RTPS_HEADER_LEN, RTPS_MAGIC, SMHDR_LEN, SMID_ACKNACK,
    SMID_ADLINK_ENTITY_ID, SMID_ADLINK_MSG_LEN, SMID_DATA, SMID_DATA_FRAG, SMID_GAP,
    SMID_HEARTBEAT, SMID_HEARTBEAT_FRAG, SMID_INFO_DST, SMID_INFO_REPLY, SMID_INFO_REPLY_IP4,
    SMID_INFO_SRC, SMID_INFO_TS, SMID_NACK_FRAG, SMID_PAD, SMID_SEC_BODY, SMID_SEC_POSTFIX,
    SMID_SEC_PREFIX, SMID_SRTPS_POSTFIX, SMID_SRTPS_PREFIX,
};
use crate::sample::{Rsample, SampleInfo};
use crate::stats::Stats;
use crate::transport::WaitSet;
use crate::types::{
    EntityId, FragNr, Guid, GuidPrefix, Locator, SeqNr, VendorId, WireTime, TIME_INVALID,
    ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER, ENTITYID_SPDP_BUILTIN_PARTICIPANT_WRITER,
};
use crate::whc::WhcSample;
use crate::xevent::EventQueue;
use crate::xmsg::{PacketSink, SendQueue, Xmsg, Xpack};

/// Proxy-less admin for SPDP traffic (participant discovery bootstraps
/// before any proxy exists).
struct SpdpAdmin {
    defrag: Defrag,
    reorder: Reorder,
}

/// The receive-side engine of one domain participant.
pub struct Receiver {
    cfg: Arc<Config>,
    stats: Arc<Stats>,
    index: Arc<EntityIndex>,
    local: Arc<LocalParticipants>,
    events: Arc<EventQueue>,
    sink: Arc<dyn PacketSink>,
    /// Background queue for retransmits (merge window applies); control
    /// responses go out synchronously through `sink`.
    sendq: Option<Arc<SendQueue>>,
    user_dqueue: Arc<DeliveryQueue>,
    spdp_dqueue: Arc<DeliveryQueue>,
    sync_handler: Option<Box<DeliveryHandler>>,
    spdp: Mutex<SpdpAdmin>,
    /// Our participant prefix (source of outgoing responses; ACKNACK
    /// destination fallback when the peer sent no INFO_DST).
    src_prefix: GuidPrefix,
    /// Rate limit for malformed-datagram diagnostics, per (peer, kind).
    malformed_log: Mutex<LruCache<(GuidPrefix, u8), ()>>,
}

impl Receiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        stats: Arc<Stats>,
        index: Arc<EntityIndex>,
        local: Arc<LocalParticipants>,
        events: Arc<EventQueue>,
        sink: Arc<dyn PacketSink>,
        sendq: Option<Arc<SendQueue>>,
        user_dqueue: Arc<DeliveryQueue>,
        spdp_dqueue: Arc<DeliveryQueue>,
        sync_handler: Option<Box<DeliveryHandler>>,
        src_prefix: GuidPrefix,
    ) -> Arc<Self> {
        let spdp = SpdpAdmin {
            defrag: Defrag::new(DefragDropMode::DropOldest, cfg.defrag_unreliable_max_samples),
            reorder: Reorder::new(ReorderMode::AlwaysDeliver, cfg.primary_reorder_max_samples, false),
        };
        Arc::new(Self {
            cfg,
            stats,
            index,
            local,
            events,
            sink,
            sendq,
            user_dqueue,
            spdp_dqueue,
            sync_handler,
            spdp: Mutex::new(spdp),
            src_prefix,
            malformed_log: Mutex::new(LruCache::new(NonZeroUsize::new(64).expect("nonzero"))),
        })
    }

    // ---- datagram entry ---------------------------------------------------

    /// Process one received datagram. The caller holds the uncommitted
    /// reference and commits after this returns.
    pub fn process_datagram(self: &Arc<Self>, rmsg: &Arc<Rmsg>, source: Locator) {
        let buf = rmsg.payload();
        if buf.len() < RTPS_HEADER_LEN
            || buf[0..4] != RTPS_MAGIC
            || buf[4] != 2
            || buf[5] < 1
        {
            log::trace!("[recv] non-RTPS datagram from {} dropped", source);
            Stats::add(&self.stats.discarded_bytes, buf.len() as u64);
            return;
        }
        let vendor = VendorId([buf[6], buf[7]]);
        let src_prefix = GuidPrefix::from_bytes(&buf[8..20]).expect("len checked");
        let mut rst = ReceiverState::new(src_prefix, vendor, (buf[4], buf[5]), source);
        let mut timestamp = TIME_INVALID;

        let mut offset = RTPS_HEADER_LEN;
        while offset < buf.len() {
            if offset + SMHDR_LEN > buf.len() {
                self.note_malformed(&rst, 0, buf, offset);
                return;
            }
            let hdr = SubmsgHeader::decode(&buf[offset..]).expect("len checked");
            let body_end = if hdr.octets_to_next == 0 {
                // "Rest of the datagram": legal exactly because it makes
                // this the final submessage.
                buf.len()
            } else {
                let end = offset + SMHDR_LEN + hdr.octets_to_next as usize;
                if end > buf.len() || (end < buf.len() && hdr.octets_to_next % 4 != 0) {
                    self.note_malformed(&rst, hdr.id, buf, offset);
                    return;
                }
                end
            };
            let body = &buf[offset + SMHDR_LEN..body_end];
            let swap = hdr.swap();

            let res: Result<(), Invalid> = match hdr.id {
                SMID_PAD | SMID_ADLINK_MSG_LEN | SMID_ADLINK_ENTITY_ID | SMID_INFO_REPLY
                | SMID_INFO_REPLY_IP4 => Ok(()),
                SMID_INFO_TS => InfoTs::validate(body, hdr.flags, swap).map(|ts| {
                    timestamp = ts.timestamp.unwrap_or(TIME_INVALID);
                }),
                SMID_INFO_SRC => InfoSrc::validate(body).map(|src| {
                    rst = rst.with_src(src.prefix, src.vendor, src.protocol_version);
                }),
                SMID_INFO_DST => InfoDst::validate(body).map(|dst| {
                    rst = rst.with_dst(dst.prefix, &self.local);
                }),
                SMID_DATA => Data::validate(body, hdr.flags, swap, offset as u32)
                    .map(|d| self.handle_data(rmsg, &rst, &d, timestamp, swap)),
                SMID_DATA_FRAG => DataFrag::validate(body, hdr.flags, swap, offset as u32)
                    .map(|d| self.handle_datafrag(rmsg, &rst, &d, timestamp, swap)),
                SMID_HEARTBEAT => Heartbeat::validate(body, hdr.flags, swap)
                    .map(|h| self.handle_heartbeat(&rst, &h)),
                SMID_ACKNACK => {
                    let permissive = !self.cfg.strict_acknack
                        || rst.vendor.sends_zero_base_preemptive_ack();
                    AckNack::validate(body, hdr.flags, swap, permissive)
                        .map(|a| self.handle_acknack(&rst, &a))
                }
                SMID_GAP => Gap::validate(body, swap).map(|g| self.handle_gap(&rst, &g)),
                SMID_NACK_FRAG => {
                    NackFrag::validate(body, swap).map(|n| self.handle_nackfrag(&rst, &n))
                }
                SMID_HEARTBEAT_FRAG => HeartbeatFrag::validate(body, swap)
                    .map(|h| self.handle_heartbeatfrag(&rst, &h)),
                SMID_SEC_PREFIX | SMID_SEC_BODY | SMID_SEC_POSTFIX | SMID_SRTPS_PREFIX
                | SMID_SRTPS_POSTFIX => {
                    // No security codec configured: the protected span is
                    // opaque and skipped.
                    log::trace!("[recv] security submessage 0x{:02x} without codec", hdr.id);
                    Ok(())
                }
                id if id & 0x80 != 0 => {
                    // Vendor-specific space: not understood, not an error.
                    Ok(())
                }
                _ => Err(Invalid::Malformed("unknown standard submessage")),
            };
            if res.is_err() {
                self.note_malformed(&rst, hdr.id, buf, offset);
                return;
            }
            offset = body_end;
        }
    }

    fn note_malformed(&self, rst: &Arc<ReceiverState>, smid: u8, buf: &[u8], offset: usize) {
        Stats::bump(&self.stats.num_malformed_datagrams);
        Stats::add(&self.stats.discarded_bytes, buf.len() as u64);
        let key = (rst.src_prefix, smid);
        let mut lru = self.malformed_log.lock();
        if lru.put(key, ()).is_none() {
            let end = (offset + 32).min(buf.len());
            log::warn!(
                "[recv] malformed submessage 0x{:02x} from {} via {}: header {} submsg {}",
                smid,
                rst.src_prefix,
                rst.source_locator,
                hex(&buf[..RTPS_HEADER_LEN.min(buf.len())]),
                hex(&buf[offset..end]),
            );
        }
    }

    // ---- DATA / DATA_FRAG -------------------------------------------------

    fn handle_data(
        self: &Arc<Self>,
        rmsg: &Arc<Rmsg>,
        rst: &Arc<ReceiverState>,
        d: &Data,
        timestamp: WireTime,
        swap: bool,
    ) {
        if !rst.for_me {
            return;
        }
        let Some((info, rdata)) = self.make_sample(
            rmsg,
            d.seq,
            0,
            d.payload,
            d.payload.1,
            d.inline_qos,
            timestamp,
            swap,
            d.submsg_off,
            0,
        ) else {
            return;
        };

        if d.writer_id == ENTITYID_SPDP_BUILTIN_PARTICIPANT_WRITER {
            self.admit_spdp(rst, rdata, &info);
            return;
        }
        self.admit_user(rst, d.writer_id, rdata, &info);
    }

    fn handle_datafrag(
        self: &Arc<Self>,
        rmsg: &Arc<Rmsg>,
        rst: &Arc<ReceiverState>,
        d: &DataFrag,
        timestamp: WireTime,
        swap: bool,
    ) {
        if !rst.for_me {
            return;
        }
        let Some((info, rdata)) = self.make_sample(
            rmsg,
            d.seq,
            u32::from(d.fragsize),
            d.payload,
            d.sample_size,
            d.inline_qos,
            timestamp,
            swap,
            d.submsg_off,
            d.frag_start.0 * u32::from(d.fragsize),
        ) else {
            return;
        };

        if d.writer_id == ENTITYID_SPDP_BUILTIN_PARTICIPANT_WRITER {
            self.admit_spdp(rst, rdata, &info);
        } else {
            self.admit_user(rst, d.writer_id, rdata, &info);
        }

        // Track fragment progress for HEARTBEAT_FRAG / nack decisions.
        if let Some(pw) = self.index.proxy_writer(&Guid::new(rst.src_prefix, d.writer_id)) {
            let mut st = pw.state.lock();
            if d.seq >= st.last_seq {
                let high = FragNr(d.frag_start.0 + u32::from(d.frags_in_submsg) - 1);
                if d.seq > st.last_seq {
                    st.last_seq = d.seq;
                    st.last_fragnum = Some(high);
                } else {
                    st.last_fragnum = Some(st.last_fragnum.map_or(high, |f| f.max(high)));
                }
            }
        }
    }

    /// Build the sample info and descriptor for one DATA/DATAFRAG.
    #[allow(clippy::too_many_arguments)]
    fn make_sample(
        &self,
        rmsg: &Arc<Rmsg>,
        seq: SeqNr,
        fragsize: u32,
        payload: (u32, u32),
        sample_size: u32,
        inline_qos: Option<(u32, u32)>,
        timestamp: WireTime,
        swap: bool,
        submsg_off: u32,
        min_byte: u32,
    ) -> Option<(SampleInfo, Rdata)> {
        let buf = rmsg.payload();
        let mut statusinfo = 0;
        let mut complex_qos = false;
        let mut keyhash_off = None;
        if let Some((qoff, qlen)) = inline_qos {
            let region = &buf[qoff as usize..(qoff + qlen) as usize];
            match quickscan(region, swap) {
                Ok(qs) => {
                    statusinfo = qs.statusinfo;
                    complex_qos = qs.complex_qos;
                    keyhash_off = qs.keyhash_off.map(|o| qoff + o);
                }
                Err(e) => {
                    log::trace!("[recv] inline qos quickscan failed: {}", e);
                    return None;
                }
            }
        }
        let mut info = SampleInfo::new(seq, sample_size);
        info.fragsize = fragsize;
        info.timestamp = timestamp;
        info.statusinfo = statusinfo;
        info.complex_qos = complex_qos;
        info.byteswap = swap;

        let (min, maxp1) = if fragsize == 0 {
            (0, payload.1)
        } else {
            (min_byte, min_byte + payload.1)
        };
        let rdata = Rdata::new(rmsg, min, maxp1, submsg_off, payload.0, keyhash_off);
        Some((info, rdata))
    }

    /// SPDP bootstrap: no proxy writer required.
    fn admit_spdp(&self, rst: &Arc<ReceiverState>, rdata: Rdata, info: &SampleInfo) {
        let writer = Guid::new(rst.src_prefix, ENTITYID_SPDP_BUILTIN_PARTICIPANT_WRITER);
        let mut adjust = 0u32;
        let mut admin = self.spdp.lock();
        if let Some(rsample) = admin.defrag.take_fragment(rdata, info) {
            let chain_handle = rsample.fragchain.clone();
            match admin
                .reorder
                .accept_sample(rsample, &mut adjust, self.spdp_dqueue.is_full())
            {
                ReorderResult::Deliver(chain) => {
                    drop(admin);
                    self.spdp_dqueue.enqueue_chain(writer, chain);
                }
                _ => drop(admin),
            }
            fragchain_adjust(&chain_handle, adjust);
        }
    }

    /// Application / builtin-endpoint DATA through a proxy writer.
    fn admit_user(&self, rst: &Arc<ReceiverState>, writer_id: EntityId, rdata: Rdata, info: &SampleInfo) {
        let wguid = Guid::new(rst.src_prefix, writer_id);
        let Some(pw) = self.index.proxy_writer(&wguid) else {
            log::trace!("[recv] data from unknown writer {}", wguid);
            Stats::add(&self.stats.discarded_bytes, u64::from(rdata.len()));
            return;
        };
        // Receiving data is proof of life. The participant-message writer
        // additionally skips manual-by-participant lease renewal, which is
        // the lease tracker's concern, not ours.
        pw.alive.store(true, Ordering::Release);
        let _is_pmsg = writer_id == ENTITYID_P2P_BUILTIN_PARTICIPANT_MESSAGE_WRITER;

        if pw.reliable && !pw.have_seen_heartbeat.load(Ordering::Acquire) {
            log::trace!("[recv] {} reliable data before first heartbeat", wguid);
            Stats::add(&self.stats.discarded_bytes, u64::from(rdata.len()));
            return;
        }

        let mut st = pw.state.lock();
        if info.seq > st.last_seq {
            st.last_seq = info.seq;
            if !info.is_fragmented() {
                st.last_fragnum = None;
            }
        }
        let Some(rsample) = st.defrag.take_fragment(rdata, info) else {
            return;
        };
        let chain_handle = rsample.fragchain.clone();
        let mut adjust = 0u32;
        let mut queued: Vec<(Option<Guid>, Vec<Rsample>)> = Vec::new();

        // Out-of-sync readers first: they run their own admission over a
        // cheap duplicate.
        for m in &mut st.matches {
            if m.in_sync {
                continue;
            }
            let Some(sec) = m.secondary_reorder.as_mut() else {
                continue;
            };
            if !sec.wants_sample(info.seq) {
                continue;
            }
            match sec.accept_sample(rsample.dup_first(), &mut adjust, self.user_dqueue.is_full()) {
                ReorderResult::Deliver(chain) => queued.push((Some(m.reader_guid), chain)),
                _ => {}
            }
        }

        match st
            .reorder
            .accept_sample(rsample, &mut adjust, self.user_dqueue.is_full())
        {
            ReorderResult::Deliver(chain) => queued.push((None, chain)),
            ReorderResult::Reject | ReorderResult::Accept | ReorderResult::TooOld => {}
        }

        if self.cfg.delivery_mode == DeliveryMode::Synchronous && self.sync_handler.is_some() {
            // Ordering guarantee: the handler runs with the proxy-writer
            // mutex held.
            let handler = self.sync_handler.as_ref().expect("checked");
            for (rdguid, chain) in &queued {
                for rsample in chain {
                    handler(&wguid, rsample, rdguid.as_ref());
                    Stats::bump(&self.stats.num_samples_delivered);
                }
                for rsample in chain {
                    fragchain_unref(&rsample.fragchain);
                }
            }
            drop(st);
        } else {
            drop(st);
            let mut wake = false;
            for (rdguid, chain) in queued {
                if let Some(rd) = rdguid {
                    self.user_dqueue.enqueue_reader_guid(Some(rd));
                    self.user_dqueue.enqueue_chain_deferred_wakeup(wguid, chain);
                    self.user_dqueue.enqueue_reader_guid(None);
                } else {
                    self.user_dqueue.enqueue_chain_deferred_wakeup(wguid, chain);
                }
                wake = true;
            }
            if wake {
                self.user_dqueue.wakeup();
            }
        }
        fragchain_adjust(&chain_handle, adjust);
    }

    // ---- HEARTBEAT --------------------------------------------------------

    fn handle_heartbeat(self: &Arc<Self>, rst: &Arc<ReceiverState>, hb: &Heartbeat) {
        if !rst.for_me {
            return;
        }
        let wguid = Guid::new(rst.src_prefix, hb.writer_id);
        let Some(pw) = self.index.proxy_writer(&wguid) else {
            log::trace!("[recv] heartbeat from unknown writer {}", wguid);
            return;
        };
        pw.alive.store(true, Ordering::Release);
        let first_hb = !pw.have_seen_heartbeat.swap(true, Ordering::AcqRel);

        let now = Instant::now();
        let mut queued: Vec<Vec<Rsample>> = Vec::new();
        let mut schedule: Vec<Guid> = Vec::new();
        {
            let mut st = pw.state.lock();
            if hb.last > st.last_seq {
                st.last_seq = hb.last;
            }
            // Nothing below firstSN will ever arrive.
            st.defrag.note_gap(SeqNr(1), hb.first);
            let gap_to = if first_hb && !pw.request_historical_data.load(Ordering::Acquire) {
                // Volatile late joiner: start at the writer's current tail.
                hb.last.succ()
            } else {
                hb.first
            };
            if let ReorderResult::Deliver(chain) = st.reorder.accept_gap(SeqNr(1), gap_to, self.user_dqueue.is_full()) {
                if !chain.is_empty() {
                    queued.push(chain);
                }
            }
            let has_missing = st
                .reorder
                .nackmap(hb.first, hb.last, crate::bitset::BITSET_MAX_BITS, false)
                .is_some();
            for m in &mut st.matches {
                if !m
                    .heartbeat
                    .accept(hb.count, now, self.cfg.ack_silence_threshold, false)
                {
                    continue;
                }
                if !hb.final_flag {
                    m.ack_requested = true;
                }
                if !hb.final_flag || has_missing {
                    schedule.push(m.reader_guid);
                }
            }
        }
        self.deliver_chains(wguid, queued);
        let reply_to = rst.source_locator;
        for reader in schedule {
            let me = Arc::clone(self);
            self.events.post_after(
                self.cfg.nack_delay,
                Box::new(move || me.send_acknack_now(wguid, reader, reply_to)),
            );
        }
    }

    /// Hand gap-released chains onward, honoring the delivery mode. These
    /// run on the receive thread, so synchronous ordering per writer holds.
    fn deliver_chains(&self, wguid: Guid, chains: Vec<Vec<Rsample>>) {
        if self.cfg.delivery_mode == DeliveryMode::Synchronous {
            if let Some(handler) = self.sync_handler.as_ref() {
                for chain in chains {
                    for rsample in &chain {
                        handler(&wguid, rsample, None);
                        Stats::bump(&self.stats.num_samples_delivered);
                    }
                    for rsample in &chain {
                        fragchain_unref(&rsample.fragchain);
                    }
                }
                return;
            }
        }
        for chain in chains {
            self.user_dqueue.enqueue_chain(wguid, chain);
        }
    }

    /// Build and send the ACKNACK (plus NACK_FRAG when the newest sample is
    /// still partial) for one (writer, reader) pairing.
    fn send_acknack_now(self: &Arc<Self>, wguid: Guid, reader: Guid, reply_to: Locator) {
        let Some(pw) = self.index.proxy_writer(&wguid) else {
            return;
        };
        let mut msg = Xmsg::new_control();
        {
            let mut guard = pw.state.lock();
            let st = &mut *guard;
            let last_seq = st.last_seq;
            let last_fragnum = st.last_fragnum;
            let next_seq = st.reorder.next_seq();
            let map = st
                .reorder
                .nackmap(SeqNr(1), last_seq, crate::bitset::BITSET_MAX_BITS, false);
            let frag_map = last_fragnum
                .map(|maxfrag| st.defrag.nackmap(last_seq, maxfrag, crate::bitset::BITSET_MAX_BITS));
            let Some(m) = st.matches.iter_mut().find(|m| m.reader_guid == reader) else {
                return;
            };
            if map.is_none() && !m.ack_requested {
                return;
            }
            m.ack_requested = false;
            let count = m.next_acknack_count;
            m.next_acknack_count += 1;
            let (set, final_flag) = match &map {
                Some(nm) => (
                    SnSetWire {
                        base: nm.base,
                        numbits: nm.numbits,
                        bits: nm.bits,
                    },
                    false,
                ),
                None => (
                    // Pure ACK: everything below next_seq received.
                    SnSetWire {
                        base: next_seq,
                        numbits: 0,
                        bits: [0; BITSET_MAX_WORDS],
                    },
                    true,
                ),
            };
            msg.add_acknack(reader.entity_id, wguid.entity_id, &set, count, final_flag);

            // The newest sample may still be reassembling: nack its holes.
            if let Some(NackMap::FragmentsMissing { base, numbits, bits }) = frag_map {
                let count = m.next_acknack_count;
                m.next_acknack_count += 1;
                msg.add_nackfrag(
                    reader.entity_id,
                    wguid.entity_id,
                    last_seq,
                    &FnSetWire { base, numbits, bits },
                    count,
                );
            }
        }
        let dest = {
            let aset = pw.addrset.lock();
            aset.unicast().first().copied().unwrap_or(reply_to)
        };
        msg.set_dst_one(dest, wguid.prefix);
        self.send_control(&msg);
    }

    // ---- GAP --------------------------------------------------------------

    fn handle_gap(&self, rst: &Arc<ReceiverState>, gap: &Gap) {
        if !rst.for_me {
            return;
        }
        let wguid = Guid::new(rst.src_prefix, gap.writer_id);
        let Some(pw) = self.index.proxy_writer(&wguid) else {
            return;
        };
        let mut queued: Vec<Vec<Rsample>> = Vec::new();
        let full = self.user_dqueue.is_full();
        {
            let mut st = pw.state.lock();
            let mut apply = |st: &mut crate::proxy::ProxyWriterState, from: SeqNr, to: SeqNr| {
                if from >= to {
                    return;
                }
                st.defrag.note_gap(from, to);
                if let ReorderResult::Deliver(chain) = st.reorder.accept_gap(from, to, full) {
                    if !chain.is_empty() {
                        queued.push(chain);
                    }
                }
            };
            // Unconditional range, then each run of ones in the bitmap.
            apply(&mut st, gap.gap_start, gap.list.base);
            let mut run_start: Option<u32> = None;
            for i in 0..=gap.list.numbits {
                let set = i < gap.list.numbits && gap.list.is_set(i);
                match (set, run_start) {
                    (true, None) => run_start = Some(i),
                    (false, Some(s)) => {
                        apply(
                            &mut st,
                            SeqNr(gap.list.base.0 + i64::from(s)),
                            SeqNr(gap.list.base.0 + i64::from(i)),
                        );
                        run_start = None;
                    }
                    _ => {}
                }
            }
            drop(apply);
            // A gap extending past everything seen updates the known tail.
            let known_end = SeqNr(gap.list.base.0 + i64::from(gap.list.numbits) - 1);
            if known_end > st.last_seq {
                st.last_seq = known_end;
            }
        }
        self.deliver_chains(wguid, queued);
    }

    // ---- ACKNACK ----------------------------------------------------------

    fn writer_for(&self, rst: &Arc<ReceiverState>, writer_id: EntityId) -> Option<Arc<LocalWriter>> {
        let prefix = if rst.dst_prefix.is_unknown() {
            self.src_prefix
        } else {
            rst.dst_prefix
        };
        self.index.local_writer(&Guid::new(prefix, writer_id))
    }

    fn handle_acknack(self: &Arc<Self>, rst: &Arc<ReceiverState>, an: &AckNack) {
        if !rst.for_me {
            return;
        }
        let Some(writer) = self.writer_for(rst, an.writer_id) else {
            log::trace!("[recv] acknack for unknown writer entity {}", an.writer_id);
            return;
        };
        let reader = Guid::new(rst.src_prefix, an.reader_id);
        let now = Instant::now();

        let requested: Vec<SeqNr>;
        {
            let mut st = writer.state.lock();
            let Some(m) = st.matches.iter_mut().find(|m| m.reader_guid == reader) else {
                log::trace!("[recv] acknack from unmatched reader {}", reader);
                return;
            };
            if !m
                .acknack
                .accept(an.count, now, self.cfg.ack_silence_threshold, an.is_preemptive)
            {
                // Stale count inside the silence window: a duplicate.
                return;
            }
            m.max_acked = m.max_acked.max(an.set.base.pred());
            requested = an.set.iter().collect();
            if !requested.is_empty() {
                Stats::bump(&self.stats.num_nacks_received);
                m.rexmit_requests += requested.len() as u64;
            }
            // Everything acked by every matched reader can leave the cache.
            let all_acked = st
                .matches
                .iter()
                .map(|m| m.max_acked)
                .min()
                .unwrap_or(SeqNr(0));
            drop(st);
            writer.whc.remove_acked_messages(all_acked.succ());
        }

        // Retransmit what is still cached; GAP what is gone.
        let prd = self.index.proxy_reader(&reader);
        let mut gone: Vec<SeqNr> = Vec::new();
        let mut burst = 0u64;
        for seq in requested {
            if burst >= u64::from(self.cfg.rexmit_burst_size_limit) {
                // Truncated burst; the reader will nack again.
                break;
            }
            match writer.whc.borrow_sample(seq) {
                Some(sample) => {
                    burst += sample.serdata.len() as u64;
                    Stats::bump(&self.stats.rexmit_count);
                    self.queue_rexmit(&writer, prd.as_deref(), reader, seq, &sample, rst);
                }
                None => {
                    Stats::bump(&self.stats.rexmit_lost_count);
                    gone.push(seq);
                }
            }
        }
        if !gone.is_empty() {
            self.send_gap(&writer, reader, &gone, rst);
        }

        if !an.final_flag || an.is_preemptive {
            let me = Arc::clone(self);
            let wguid = writer.guid;
            let reply_to = rst.source_locator;
            let dst_prefix = reader.prefix;
            self.events.post_after(
                self.cfg.nack_response_delay,
                Box::new(move || me.send_heartbeat_now(wguid, reply_to, dst_prefix)),
            );
        }
    }

    fn queue_rexmit(
        &self,
        writer: &Arc<LocalWriter>,
        prd: Option<&crate::proxy::ProxyReader>,
        reader: Guid,
        seq: SeqNr,
        sample: &WhcSample,
        rst: &Arc<ReceiverState>,
    ) {
        let nomerge = prd.is_some_and(|p| p.no_merge_rexmit);
        let waddrs = writer.addrset.lock().clone();
        let mut msg = Xmsg::new_rexmit(writer.guid, seq, None, waddrs, nomerge);
        let dest = prd
            .and_then(|p| p.addrset.unicast().first().copied())
            .unwrap_or(rst.source_locator);
        msg.set_dst_one(dest, reader.prefix);
        msg.add_timestamp(sample.timestamp);
        msg.add_data(
            reader.entity_id,
            writer.guid.entity_id,
            seq,
            None,
            &sample.serdata,
        );
        match &self.sendq {
            Some(sq) => sq.enqueue(msg),
            None => self.send_control(&msg),
        }
    }

    /// One GAP covering every no-longer-cached sequence in `gone`.
    fn send_gap(&self, writer: &Arc<LocalWriter>, reader: Guid, gone: &[SeqNr], rst: &Arc<ReceiverState>) {
        let start = gone[0];
        let mut set = SnSetWire {
            base: start.succ(),
            numbits: 0,
            bits: [0; BITSET_MAX_WORDS],
        };
        for seq in &gone[1..] {
            let off = (seq.0 - set.base.0) as u32;
            if off < crate::bitset::BITSET_MAX_BITS {
                bitset_set(crate::bitset::BITSET_MAX_BITS, &mut set.bits, off);
                set.numbits = set.numbits.max(off + 1);
            }
        }
        let mut msg = Xmsg::new_control();
        msg.set_dst_one(rst.source_locator, reader.prefix);
        msg.add_gap(reader.entity_id, writer.guid.entity_id, start, &set);
        self.send_control(&msg);
    }

    fn send_heartbeat_now(self: &Arc<Self>, wguid: Guid, dest: Locator, dst_prefix: GuidPrefix) {
        let Some(writer) = self.index.local_writer(&wguid) else {
            return;
        };
        let whc_state = writer.whc.get_state();
        let (first, last) = match (whc_state.min_seq, whc_state.max_seq) {
            (Some(min), Some(max)) => (min, max),
            // Empty history: firstSN = next, lastSN = next - 1.
            _ => (SeqNr(1), SeqNr(0)),
        };
        let count = writer.next_heartbeat_count();
        let mut msg = Xmsg::new_control();
        msg.set_dst_one(dest, dst_prefix);
        msg.add_heartbeat(
            crate::types::ENTITYID_UNKNOWN,
            wguid.entity_id,
            first,
            last,
            count,
            false,
        );
        self.send_control(&msg);
    }

    // ---- NACK_FRAG --------------------------------------------------------

    fn handle_nackfrag(self: &Arc<Self>, rst: &Arc<ReceiverState>, nf: &NackFrag) {
        if !rst.for_me {
            return;
        }
        let Some(writer) = self.writer_for(rst, nf.writer_id) else {
            return;
        };
        let reader = Guid::new(rst.src_prefix, nf.reader_id);
        let now = Instant::now();
        {
            let mut st = writer.state.lock();
            let Some(m) = st.matches.iter_mut().find(|m| m.reader_guid == reader) else {
                return;
            };
            // The acknack and nackfrag paths share one count window.
            if !m
                .acknack
                .accept(nf.count, now, self.cfg.ack_silence_threshold, false)
            {
                return;
            }
            m.rexmit_requests += 1;
        }
        Stats::bump(&self.stats.num_fragnacks_received);

        let Some(sample) = writer.whc.borrow_sample(nf.seq) else {
            // Sample gone entirely: a zero-length GAP covering it.
            Stats::bump(&self.stats.rexmit_lost_count);
            self.send_gap(&writer, reader, &[nf.seq], rst);
            return;
        };

        let fragsize = self.cfg.fragment_size;
        let total = sample.serdata.len() as u32;
        let nfrags_total = total.div_ceil(fragsize);
        let prd = self.index.proxy_reader(&reader);
        let mut burst = 0u64;
        let mut truncated = false;
        for frag in nf.set.iter() {
            if frag.0 >= nfrags_total {
                continue;
            }
            if burst >= u64::from(self.cfg.rexmit_burst_size_limit) {
                truncated = true;
                break;
            }
            let start = frag.0 * fragsize;
            let end = (start + fragsize).min(total);
            burst += u64::from(end - start);
            Stats::bump(&self.stats.rexmit_count);

            let nomerge = prd.as_deref().is_some_and(|p| p.no_merge_rexmit);
            let waddrs = writer.addrset.lock().clone();
            let mut msg = Xmsg::new_rexmit(writer.guid, nf.seq, Some(frag), waddrs, nomerge);
            let dest = prd
                .as_deref()
                .and_then(|p| p.addrset.unicast().first().copied())
                .unwrap_or(rst.source_locator);
            msg.set_dst_one(dest, reader.prefix);
            msg.add_data_frag(
                reader.entity_id,
                writer.guid.entity_id,
                nf.seq,
                frag,
                1,
                fragsize as u16,
                total,
                None,
                &sample.serdata[start as usize..end as usize],
            );
            match &self.sendq {
                Some(sq) => sq.enqueue(msg),
                None => self.send_control(&msg),
            }
        }
        if truncated {
            let me = Arc::clone(self);
            let wguid = writer.guid;
            let reply_to = rst.source_locator;
            let dst_prefix = reader.prefix;
            self.events.post_after(
                self.cfg.nack_response_delay,
                Box::new(move || me.send_heartbeat_now(wguid, reply_to, dst_prefix)),
            );
        }
    }

    // ---- HEARTBEAT_FRAG ---------------------------------------------------

    fn handle_heartbeatfrag(self: &Arc<Self>, rst: &Arc<ReceiverState>, hbf: &HeartbeatFrag) {
        if !rst.for_me {
            return;
        }
        let wguid = Guid::new(rst.src_prefix, hbf.writer_id);
        let Some(pw) = self.index.proxy_writer(&wguid) else {
            return;
        };
        let mut schedule: Vec<Guid> = Vec::new();
        {
            let mut st = pw.state.lock();
            if hbf.seq > st.last_seq {
                st.last_seq = hbf.seq;
                st.last_fragnum = Some(hbf.last_frag);
            } else if hbf.seq == st.last_seq {
                st.last_fragnum = Some(st.last_fragnum.map_or(hbf.last_frag, |f| f.max(hbf.last_frag)));
                if matches!(
                    st.defrag
                        .nackmap(hbf.seq, hbf.last_frag, crate::bitset::BITSET_MAX_BITS),
                    NackMap::FragmentsMissing { .. }
                ) {
                    for m in &mut st.matches {
                        m.ack_requested = true;
                        schedule.push(m.reader_guid);
                    }
                }
            }
        }
        let reply_to = rst.source_locator;
        for reader in schedule {
            let me = Arc::clone(self);
            self.events.post_after(
                self.cfg.nack_delay,
                Box::new(move || me.send_acknack_now(wguid, reader, reply_to)),
            );
        }
    }

    // ---- helpers ----------------------------------------------------------

    fn send_control(&self, msg: &Xmsg) {
        let mut xp = Xpack::new(
            self.src_prefix,
            self.cfg.max_packet_size,
            Arc::clone(&self.sink),
            None,
        );
        xp.addmsg(msg);
        xp.flush();
    }
}

fn hex(buf: &[u8]) -> String {
    let mut s = String::with_capacity(buf.len() * 2);
    for b in buf {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// One receive thread: wait on the set, drain every ready transport, feed
/// the dispatcher. `keepgoing` bounds the loop; the periodic wakeup keeps
/// lease and shutdown checks timely even on an idle network.
pub fn recv_thread_loop(
    receiver: &Arc<Receiver>,
    waitset: &mut WaitSet,
    pool: &RbufPool,
    keepgoing: &AtomicBool,
    thread_state: &ThreadState,
) {
    let wakeup = Duration::from_millis(100);
    while keepgoing.load(Ordering::Acquire) {
        let ready = match waitset.wait(wakeup) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[recv] wait set failure: {}", e);
                break;
            }
        };
        for idx in ready {
            let Some(transport) = waitset.transport(idx).cloned() else {
                continue;
            };
            loop {
                let mut rmsg = pool.new_rmsg();
                let r = transport.read(rmsg.payload_mut());
                match r {
                    Ok((n, src)) => {
                        rmsg.set_size(n);
                        let rmsg = Arc::new(rmsg);
                        let _awake = thread_state.awake_scope();
                        receiver.process_datagram(&rmsg, src);
                        rmsg.commit();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::debug!("[recv] read failure: {}", e);
                        break;
                    }
                }
            }
        }
    }
    log::debug!("[recv] thread exiting");
}
