// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One outbound RTPS submessage group.
//!
//! Everything is emitted little-endian with the endianness flag set; peers
//! byteswap on their side when they must.

use crate::addrset::AddrSet;
use crate::plist::{emit_sentinel, Plist, PlistContext, PP_ALL, QP_ALL};
use crate::rtps::{
    FnSetWire, SnSetWire, ACKNACK_FLAG_FINAL, DATAFRAG_FLAG_INLINE_QOS, DATA_FLAG_DATAFLAG,
    DATA_FLAG_INLINE_QOS, HEARTBEAT_FLAG_FINAL, SMFLAG_ENDIANNESS, SMID_ACKNACK, SMID_DATA,
    SMID_DATA_FRAG, SMID_GAP, SMID_HEARTBEAT, SMID_HEARTBEAT_FRAG, SMID_INFO_TS, SMID_NACK_FRAG,
    SMID_PAD,
};
use crate::types::{EntityId, FragNr, Guid, GuidPrefix, Locator, SeqNr, WireTime};

/// Destination mode; exactly one per xmsg, fixed before packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmsgDest {
    Unset,
    /// A single locator.
    One(Locator),
    /// Everything in an address set.
    All(AddrSet),
    /// The unicast-only view of an address set.
    AllUc(AddrSet),
}

/// Message kind; retransmits carry the bookkeeping the packer needs for
/// merge decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmsgKind {
    Control,
    Data {
        writer: Guid,
        seq: SeqNr,
    },
    DataRexmit {
        writer: Guid,
        seq: SeqNr,
        frag: Option<FragNr>,
        /// Byte offset of the reader-id slot within the submessage buffer,
        /// erasable while merging.
        readerid_off: usize,
        /// The writer's full address set, for merge promotion to `All`.
        writer_addrset: AddrSet,
        /// Never merge (security transforms / redundant networking).
        nomerge: bool,
    },
}

/// An outbound submessage group.
#[derive(Debug, Clone)]
pub struct Xmsg {
    kind: XmsgKind,
    dest: XmsgDest,
    dst_prefix: Option<GuidPrefix>,
    buf: Vec<u8>,
}

impl Xmsg {
    #[must_use]
    pub fn new_control() -> Self {
        Self {
            kind: XmsgKind::Control,
            dest: XmsgDest::Unset,
            dst_prefix: None,
            buf: Vec::with_capacity(64),
        }
    }

    #[must_use]
    pub fn new_data(writer: Guid, seq: SeqNr) -> Self {
        Self {
            kind: XmsgKind::Data { writer, seq },
            dest: XmsgDest::Unset,
            dst_prefix: None,
            buf: Vec::with_capacity(256),
        }
    }

    /// A retransmit; `readerid_off` is fixed up by the first `add_data*`.
    #[must_use]
    pub fn new_rexmit(
        writer: Guid,
        seq: SeqNr,
        frag: Option<FragNr>,
        writer_addrset: AddrSet,
        nomerge: bool,
    ) -> Self {
        Self {
            kind: XmsgKind::DataRexmit {
                writer,
                seq,
                frag,
                readerid_off: 0,
                writer_addrset,
                nomerge,
            },
            dest: XmsgDest::Unset,
            dst_prefix: None,
            buf: Vec::with_capacity(256),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &XmsgKind {
        &self.kind
    }

    #[must_use]
    pub fn dest(&self) -> &XmsgDest {
        &self.dest
    }

    #[must_use]
    pub fn dst_prefix(&self) -> Option<&GuidPrefix> {
        self.dst_prefix.as_ref()
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // ---- destination -----------------------------------------------------

    pub fn set_dst_one(&mut self, loc: Locator, prefix: GuidPrefix) {
        debug_assert_eq!(self.dest, XmsgDest::Unset);
        self.dest = XmsgDest::One(loc);
        self.dst_prefix = Some(prefix);
    }

    pub fn set_dst_addrset(&mut self, addrs: AddrSet) {
        debug_assert_eq!(self.dest, XmsgDest::Unset);
        self.dest = XmsgDest::All(addrs);
        self.dst_prefix = None;
    }

    pub fn set_dst_addrset_uc(&mut self, addrs: AddrSet) {
        debug_assert_eq!(self.dest, XmsgDest::Unset);
        self.dest = XmsgDest::AllUc(addrs);
        self.dst_prefix = None;
    }

    pub(crate) fn promote_dst_all(&mut self, addrs: AddrSet) {
        self.dest = XmsgDest::All(addrs);
        self.dst_prefix = None;
    }

    /// Rewrite the reader-id slot of a retransmit (merge targeting).
    pub fn set_data_reader_id(&mut self, reader_id: EntityId) {
        if let XmsgKind::DataRexmit { readerid_off, .. } = self.kind {
            self.buf[readerid_off..readerid_off + 4].copy_from_slice(&reader_id.0);
        } else {
            debug_assert!(false, "reader-id rewrite on a non-rexmit xmsg");
        }
    }

    /// Resolve the concrete address list for sending.
    #[must_use]
    pub fn dest_locators(&self) -> Vec<Locator> {
        match &self.dest {
            XmsgDest::Unset => Vec::new(),
            XmsgDest::One(l) => vec![*l],
            XmsgDest::All(a) => a.iter().copied().collect(),
            XmsgDest::AllUc(a) => a.unicast_view().iter().copied().collect(),
        }
    }

    // ---- submessage framing ----------------------------------------------

    fn begin(&mut self, id: u8, flags: u8) -> usize {
        debug_assert_eq!(self.buf.len() % 4, 0);
        self.buf.push(id);
        self.buf.push(flags | SMFLAG_ENDIANNESS);
        let patch = self.buf.len();
        self.buf.extend_from_slice(&[0, 0]);
        patch
    }

    fn end(&mut self, patch: usize) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
        let body = self.buf.len() - (patch + 2);
        debug_assert!(body <= usize::from(u16::MAX));
        self.buf[patch..patch + 2].copy_from_slice(&(body as u16).to_le_bytes());
    }

    fn put32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_seq(&mut self, seq: SeqNr) {
        let (h, l) = seq.to_wire();
        self.buf.extend_from_slice(&h.to_le_bytes());
        self.put32(l);
    }

    // ---- submessages -----------------------------------------------------

    pub fn add_pad(&mut self) {
        let p = self.begin(SMID_PAD, 0);
        self.end(p);
    }

    /// INFO_TS for the submessages that follow in this xmsg.
    pub fn add_timestamp(&mut self, t: WireTime) {
        let p = self.begin(SMID_INFO_TS, 0);
        self.buf.extend_from_slice(&t.to_wire());
        self.end(p);
    }

    pub fn add_acknack(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        set: &SnSetWire,
        count: i32,
        final_flag: bool,
    ) {
        let flags = if final_flag { ACKNACK_FLAG_FINAL } else { 0 };
        let p = self.begin(SMID_ACKNACK, flags);
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        let mut tail = Vec::new();
        set.encode(&mut tail);
        self.buf.extend_from_slice(&tail);
        self.put32(count as u32);
        self.end(p);
    }

    pub fn add_heartbeat(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        first: SeqNr,
        last: SeqNr,
        count: i32,
        final_flag: bool,
    ) {
        let flags = if final_flag { HEARTBEAT_FLAG_FINAL } else { 0 };
        let p = self.begin(SMID_HEARTBEAT, flags);
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(first);
        self.put_seq(last);
        self.put32(count as u32);
        self.end(p);
    }

    pub fn add_gap(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        gap_start: SeqNr,
        gap_list: &SnSetWire,
    ) {
        let p = self.begin(SMID_GAP, 0);
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(gap_start);
        let mut tail = Vec::new();
        gap_list.encode(&mut tail);
        self.buf.extend_from_slice(&tail);
        self.end(p);
    }

    pub fn add_nackfrag(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        seq: SeqNr,
        set: &FnSetWire,
        count: i32,
    ) {
        let p = self.begin(SMID_NACK_FRAG, 0);
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(seq);
        let mut tail = Vec::new();
        set.encode(&mut tail);
        self.buf.extend_from_slice(&tail);
        self.put32(count as u32);
        self.end(p);
    }

    pub fn add_heartbeat_frag(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        seq: SeqNr,
        last_frag: FragNr,
        count: i32,
    ) {
        let p = self.begin(SMID_HEARTBEAT_FRAG, 0);
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(seq);
        self.put32(last_frag.to_wire());
        self.put32(count as u32);
        self.end(p);
    }

    /// DATA with optional inline QoS and serialized payload.
    pub fn add_data(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        seq: SeqNr,
        inline_qos: Option<&Plist<'_>>,
        payload: &[u8],
    ) {
        let mut flags = DATA_FLAG_DATAFLAG;
        if inline_qos.is_some() {
            flags |= DATA_FLAG_INLINE_QOS;
        }
        let p = self.begin(SMID_DATA, flags);
        self.buf.extend_from_slice(&0u16.to_le_bytes()); // extraFlags
        self.buf.extend_from_slice(&16u16.to_le_bytes()); // octetsToInlineQos
        let readerid_off = self.buf.len();
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(seq);
        if let Some(q) = inline_qos {
            let mut tmp = Vec::new();
            q.add_to_msg(&mut tmp, PP_ALL, QP_ALL, false, PlistContext::InlineQos);
            emit_sentinel(&mut tmp, false);
            self.buf.extend_from_slice(&tmp);
        }
        self.buf.extend_from_slice(payload);
        self.end(p);
        self.note_readerid_off(readerid_off);
    }

    /// DATA_FRAG carrying fragments `[frag, frag + nfrags)`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_data_frag(
        &mut self,
        reader_id: EntityId,
        writer_id: EntityId,
        seq: SeqNr,
        frag: FragNr,
        nfrags: u16,
        fragsize: u16,
        sample_size: u32,
        inline_qos: Option<&Plist<'_>>,
        payload: &[u8],
    ) {
        let mut flags = 0;
        if inline_qos.is_some() {
            flags |= DATAFRAG_FLAG_INLINE_QOS;
        }
        let p = self.begin(SMID_DATA_FRAG, flags);
        self.buf.extend_from_slice(&0u16.to_le_bytes()); // extraFlags
        self.buf.extend_from_slice(&28u16.to_le_bytes()); // octetsToInlineQos
        let readerid_off = self.buf.len();
        self.buf.extend_from_slice(&reader_id.0);
        self.buf.extend_from_slice(&writer_id.0);
        self.put_seq(seq);
        self.put32(frag.to_wire());
        self.buf.extend_from_slice(&nfrags.to_le_bytes());
        self.buf.extend_from_slice(&fragsize.to_le_bytes());
        self.put32(sample_size);
        if let Some(q) = inline_qos {
            let mut tmp = Vec::new();
            q.add_to_msg(&mut tmp, PP_ALL, QP_ALL, false, PlistContext::InlineQos);
            emit_sentinel(&mut tmp, false);
            self.buf.extend_from_slice(&tmp);
        }
        self.buf.extend_from_slice(payload);
        self.end(p);
        self.note_readerid_off(readerid_off);
    }

    fn note_readerid_off(&mut self, off: usize) {
        if let XmsgKind::DataRexmit { readerid_off, .. } = &mut self.kind {
            if *readerid_off == 0 {
                *readerid_off = off;
            }
        }
    }
}
