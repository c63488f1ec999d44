// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message framing shared by the receive and transmit paths: magic,
//! submessage ids and flags, and the SequenceNumberSet / FragmentNumberSet
//! wire forms (DDS-RTPS v2.5 Sec.8.3, Sec.9.4).

use crate::bitset::{bitset_words, BITSET_MAX_BITS, BITSET_MAX_WORDS};
use crate::types::{FragNr, SeqNr, VendorId, VENDOR_HDDS};

/// "RTPS".
pub const RTPS_MAGIC: [u8; 4] = *b"RTPS";
/// Protocol version announced in outgoing headers.
pub const RTPS_VERSION: (u8, u8) = (2, 1);
/// RTPS header length (magic + version + vendor + guid prefix).
pub const RTPS_HEADER_LEN: usize = 20;
/// Submessage header length.
pub const SMHDR_LEN: usize = 4;
/// Vendor id announced in outgoing headers.
pub const MY_VENDOR: VendorId = VENDOR_HDDS;

// Submessage ids.
pub const SMID_PAD: u8 = 0x01;
pub const SMID_ACKNACK: u8 = 0x06;
pub const SMID_HEARTBEAT: u8 = 0x07;
pub const SMID_GAP: u8 = 0x08;
pub const SMID_INFO_TS: u8 = 0x09;
pub const SMID_INFO_SRC: u8 = 0x0c;
pub const SMID_INFO_REPLY_IP4: u8 = 0x0d;
pub const SMID_INFO_DST: u8 = 0x0e;
pub const SMID_INFO_REPLY: u8 = 0x0f;
pub const SMID_NACK_FRAG: u8 = 0x12;
pub const SMID_HEARTBEAT_FRAG: u8 = 0x13;
pub const SMID_DATA: u8 = 0x15;
pub const SMID_DATA_FRAG: u8 = 0x16;
// Security wrappers.
pub const SMID_SEC_BODY: u8 = 0x30;
pub const SMID_SEC_PREFIX: u8 = 0x31;
pub const SMID_SEC_POSTFIX: u8 = 0x32;
pub const SMID_SRTPS_PREFIX: u8 = 0x33;
pub const SMID_SRTPS_POSTFIX: u8 = 0x34;
// Vendor-specific (Adlink): length prefix for stream transports, entity id.
pub const SMID_ADLINK_MSG_LEN: u8 = 0x81;
pub const SMID_ADLINK_ENTITY_ID: u8 = 0x82;

// Flag bits (second octet of every submessage header).
/// Endianness: set = little-endian submessage.
pub const SMFLAG_ENDIANNESS: u8 = 0x01;
// DATA.
pub const DATA_FLAG_INLINE_QOS: u8 = 0x02;
pub const DATA_FLAG_DATAFLAG: u8 = 0x04;
pub const DATA_FLAG_KEYFLAG: u8 = 0x08;
// DATA_FRAG.
pub const DATAFRAG_FLAG_INLINE_QOS: u8 = 0x02;
pub const DATAFRAG_FLAG_KEYFLAG: u8 = 0x04;
// HEARTBEAT.
pub const HEARTBEAT_FLAG_FINAL: u8 = 0x02;
pub const HEARTBEAT_FLAG_LIVELINESS: u8 = 0x04;
// ACKNACK.
pub const ACKNACK_FLAG_FINAL: u8 = 0x02;

/// Decoded submessage header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmsgHeader {
    pub id: u8,
    pub flags: u8,
    /// `octetsToNextHeader` as carried; 0 means "extends to the end of the
    /// datagram" and is legal only for the final submessage.
    pub octets_to_next: u16,
}

impl SubmsgHeader {
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < SMHDR_LEN {
            return None;
        }
        let id = buf[0];
        let flags = buf[1];
        let raw = u16::from_le_bytes([buf[2], buf[3]]);
        let octets_to_next = if flags & SMFLAG_ENDIANNESS != 0 {
            raw
        } else {
            raw.swap_bytes()
        };
        Some(Self {
            id,
            flags,
            octets_to_next,
        })
    }

    /// The submessage body must be byteswapped on decode.
    #[must_use]
    pub fn swap(&self) -> bool {
        self.flags & SMFLAG_ENDIANNESS == 0
    }
}

/// Wire-facing SequenceNumberSet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnSetWire {
    pub base: SeqNr,
    pub numbits: u32,
    pub bits: [u32; BITSET_MAX_WORDS],
}

impl SnSetWire {
    /// Decode at `buf[0]`; returns the set and its wire length.
    ///
    /// `permissive` admits the zero-base/zero-numbits form some vendors use
    /// for pre-emptive ACKNACKs (the base is rewritten to 1).
    pub fn decode(buf: &[u8], swap: bool, permissive: bool) -> Option<(Self, usize)> {
        if buf.len() < 12 {
            return None;
        }
        let rd32 = |b: &[u8]| {
            let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if swap {
                v.swap_bytes()
            } else {
                v
            }
        };
        let high = rd32(&buf[0..4]) as i32;
        let low = rd32(&buf[4..8]);
        let numbits = rd32(&buf[8..12]);
        if numbits > BITSET_MAX_BITS {
            return None;
        }
        let base = match SeqNr::from_wire(high, low) {
            Some(sn) if sn.0 >= 1 => sn,
            Some(sn) if sn.0 == 0 && numbits == 0 && permissive => SeqNr(1),
            _ => return None,
        };
        let nwords = bitset_words(numbits);
        let need = 12 + nwords * 4;
        if buf.len() < need {
            return None;
        }
        let mut bits = [0u32; BITSET_MAX_WORDS];
        for (i, b) in bits.iter_mut().take(nwords).enumerate() {
            *b = rd32(&buf[12 + i * 4..16 + i * 4]);
        }
        Some((
            Self {
                base,
                numbits,
                bits,
            },
            need,
        ))
    }

    /// Append the little-endian wire form.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let (h, l) = self.base.to_wire();
        out.extend_from_slice(&h.to_le_bytes());
        out.extend_from_slice(&l.to_le_bytes());
        out.extend_from_slice(&self.numbits.to_le_bytes());
        for w in self.bits.iter().take(bitset_words(self.numbits)) {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }

    #[must_use]
    pub fn is_set(&self, idx: u32) -> bool {
        crate::bitset::bitset_isset(self.numbits, &self.bits, idx)
    }

    /// Sequences whose bit is set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = SeqNr> + '_ {
        (0..self.numbits)
            .filter(|&i| self.is_set(i))
            .map(|i| SeqNr(self.base.0 + i64::from(i)))
    }
}

/// Wire-facing FragmentNumberSet (1-based on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnSetWire {
    pub base: FragNr,
    pub numbits: u32,
    pub bits: [u32; BITSET_MAX_WORDS],
}

impl FnSetWire {
    pub fn decode(buf: &[u8], swap: bool) -> Option<(Self, usize)> {
        if buf.len() < 8 {
            return None;
        }
        let rd32 = |b: &[u8]| {
            let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            if swap {
                v.swap_bytes()
            } else {
                v
            }
        };
        let base = FragNr::from_wire(rd32(&buf[0..4]))?;
        let numbits = rd32(&buf[4..8]);
        if numbits > BITSET_MAX_BITS {
            return None;
        }
        let nwords = bitset_words(numbits);
        let need = 8 + nwords * 4;
        if buf.len() < need {
            return None;
        }
        let mut bits = [0u32; BITSET_MAX_WORDS];
        for (i, b) in bits.iter_mut().take(nwords).enumerate() {
            *b = rd32(&buf[8 + i * 4..12 + i * 4]);
        }
        Some((
            Self {
                base,
                numbits,
                bits,
            },
            need,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.base.to_wire().to_le_bytes());
        out.extend_from_slice(&self.numbits.to_le_bytes());
        for w in self.bits.iter().take(bitset_words(self.numbits)) {
            out.extend_from_slice(&w.to_le_bytes());
        }
    }

    #[must_use]
    pub fn is_set(&self, idx: u32) -> bool {
        crate::bitset::bitset_isset(self.numbits, &self.bits, idx)
    }

    /// Fragment numbers whose bit is set, ascending, 0-based.
    pub fn iter(&self) -> impl Iterator<Item = FragNr> + '_ {
        (0..self.numbits)
            .filter(|&i| self.is_set(i))
            .map(|i| FragNr(self.base.0 + i))
    }
}
