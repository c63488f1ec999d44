// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-submessage validators.
//!
//! Each validator byteswaps to native as needed, performs the structural
//! checks for its kind, and produces a typed view. Offsets in the DATA and
//! DATAFRAG views are relative to the whole datagram so descriptors can be
//! built directly from them.

use crate::rtps::{
    FnSetWire, SnSetWire, DATAFRAG_FLAG_INLINE_QOS, DATA_FLAG_DATAFLAG, DATA_FLAG_INLINE_QOS,
    DATA_FLAG_KEYFLAG, HEARTBEAT_FLAG_FINAL, HEARTBEAT_FLAG_LIVELINESS, ACKNACK_FLAG_FINAL,
    SMHDR_LEN,
};
use crate::types::{EntityId, FragNr, GuidPrefix, SeqNr, VendorId, WireTime};

/// Validation verdict for one submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalid {
    /// Structurally broken: the whole datagram is dropped.
    Malformed(&'static str),
}

type V<T> = Result<T, Invalid>;

fn rd32(b: &[u8], swap: bool) -> u32 {
    let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

fn rd16(b: &[u8], swap: bool) -> u16 {
    let v = u16::from_le_bytes([b[0], b[1]]);
    if swap {
        v.swap_bytes()
    } else {
        v
    }
}

fn rd_seq(b: &[u8], swap: bool) -> Option<SeqNr> {
    SeqNr::from_wire(rd32(&b[0..4], swap) as i32, rd32(&b[4..8], swap))
}

#[derive(Debug, Clone)]
pub struct AckNack {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub set: SnSetWire,
    pub count: i32,
    pub final_flag: bool,
    /// base <= 1 with an empty set: reader state announcement, not a nack.
    pub is_preemptive: bool,
}

impl AckNack {
    /// `permissive` admits the zero-base form some vendors send.
    pub fn validate(body: &[u8], flags: u8, swap: bool, permissive: bool) -> V<Self> {
        if body.len() < 8 + 12 + 4 {
            return Err(Invalid::Malformed("acknack too short"));
        }
        let reader_id = EntityId::from_bytes(&body[0..4]).expect("len checked");
        let writer_id = EntityId::from_bytes(&body[4..8]).expect("len checked");
        let (set, used) = SnSetWire::decode(&body[8..], swap, permissive)
            .ok_or(Invalid::Malformed("acknack sn set"))?;
        if body.len() < 8 + used + 4 {
            return Err(Invalid::Malformed("acknack count missing"));
        }
        let count = rd32(&body[8 + used..], swap) as i32;
        let is_preemptive = set.base <= SeqNr(1) && set.numbits == 0;
        Ok(Self {
            reader_id,
            writer_id,
            set,
            count,
            final_flag: flags & ACKNACK_FLAG_FINAL != 0,
            is_preemptive,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first: SeqNr,
    pub last: SeqNr,
    pub count: i32,
    pub final_flag: bool,
    pub liveliness_flag: bool,
}

impl Heartbeat {
    pub fn validate(body: &[u8], flags: u8, swap: bool) -> V<Self> {
        if body.len() < 28 {
            return Err(Invalid::Malformed("heartbeat too short"));
        }
        let first = rd_seq(&body[8..16], swap).ok_or(Invalid::Malformed("heartbeat firstSN"))?;
        let last = rd_seq(&body[16..24], swap).ok_or(Invalid::Malformed("heartbeat lastSN"))?;
        if first.0 < 1 || last.0 < first.0 - 1 {
            // last = first-1 announces an empty history; anything lower is
            // nonsense.
            return Err(Invalid::Malformed("heartbeat sn range"));
        }
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[0..4]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            first,
            last,
            count: rd32(&body[24..28], swap) as i32,
            final_flag: flags & HEARTBEAT_FLAG_FINAL != 0,
            liveliness_flag: flags & HEARTBEAT_FLAG_LIVELINESS != 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Gap {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SeqNr,
    pub list: SnSetWire,
}

impl Gap {
    pub fn validate(body: &[u8], swap: bool) -> V<Self> {
        if body.len() < 8 + 8 + 12 {
            return Err(Invalid::Malformed("gap too short"));
        }
        let gap_start = rd_seq(&body[8..16], swap).ok_or(Invalid::Malformed("gap start"))?;
        if gap_start.0 < 1 {
            return Err(Invalid::Malformed("gap start"));
        }
        let (list, _) =
            SnSetWire::decode(&body[16..], swap, false).ok_or(Invalid::Malformed("gap sn set"))?;
        if list.base < gap_start {
            return Err(Invalid::Malformed("gap list base below start"));
        }
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[0..4]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            gap_start,
            list,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NackFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: SeqNr,
    pub set: FnSetWire,
    pub count: i32,
}

impl NackFrag {
    pub fn validate(body: &[u8], swap: bool) -> V<Self> {
        if body.len() < 8 + 8 + 8 + 4 {
            return Err(Invalid::Malformed("nackfrag too short"));
        }
        let seq = rd_seq(&body[8..16], swap).ok_or(Invalid::Malformed("nackfrag sn"))?;
        if seq.0 < 1 {
            return Err(Invalid::Malformed("nackfrag sn"));
        }
        let (set, used) =
            FnSetWire::decode(&body[16..], swap).ok_or(Invalid::Malformed("nackfrag fn set"))?;
        if body.len() < 16 + used + 4 {
            return Err(Invalid::Malformed("nackfrag count missing"));
        }
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[0..4]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            seq,
            set,
            count: rd32(&body[16 + used..], swap) as i32,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: SeqNr,
    pub last_frag: FragNr,
    pub count: i32,
}

impl HeartbeatFrag {
    pub fn validate(body: &[u8], swap: bool) -> V<Self> {
        if body.len() < 8 + 8 + 4 + 4 {
            return Err(Invalid::Malformed("heartbeatfrag too short"));
        }
        let seq = rd_seq(&body[8..16], swap).ok_or(Invalid::Malformed("heartbeatfrag sn"))?;
        if seq.0 < 1 {
            return Err(Invalid::Malformed("heartbeatfrag sn"));
        }
        let last_frag = FragNr::from_wire(rd32(&body[16..20], swap))
            .ok_or(Invalid::Malformed("heartbeatfrag fragnum"))?;
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[0..4]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            seq,
            last_frag,
            count: rd32(&body[20..24], swap) as i32,
        })
    }
}

/// DATA view; offsets are datagram-relative.
#[derive(Debug, Clone, Copy)]
pub struct Data {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: SeqNr,
    pub keyflag: bool,
    /// Datagram offset of the submessage header.
    pub submsg_off: u32,
    /// Inline-QoS region (datagram offset, length), when the Q flag is set.
    pub inline_qos: Option<(u32, u32)>,
    /// Serialized payload (datagram offset, length); zero length for
    /// key-only DATA.
    pub payload: (u32, u32),
}

impl Data {
    /// `submsg_off` is the datagram offset of the submessage header and
    /// `body` the submessage body (after the 4-byte header).
    pub fn validate(body: &[u8], flags: u8, swap: bool, submsg_off: u32) -> V<Self> {
        if body.len() < 20 {
            return Err(Invalid::Malformed("data too short"));
        }
        let octets_to_inline_qos = rd16(&body[2..4], swap) as usize;
        if octets_to_inline_qos < 16 {
            return Err(Invalid::Malformed("data octetsToInlineQos"));
        }
        let seq = rd_seq(&body[12..20], swap).ok_or(Invalid::Malformed("data sn"))?;
        if seq.0 < 1 {
            return Err(Invalid::Malformed("data sn"));
        }
        // Sections after the fixed part: octetsToInlineQos counts from just
        // past itself (body offset 4).
        let mut cursor = 4 + octets_to_inline_qos;
        if cursor > body.len() {
            return Err(Invalid::Malformed("data inline qos offset"));
        }
        let inline_qos = if flags & DATA_FLAG_INLINE_QOS != 0 {
            let start = cursor;
            let consumed = crate::plist::quickscan(&body[start..], swap)
                .map_err(|_| Invalid::Malformed("data inline qos"))?
                .consumed;
            cursor = start + consumed;
            Some((submsg_off + SMHDR_LEN as u32 + start as u32, consumed as u32))
        } else {
            None
        };
        let has_payload = flags & (DATA_FLAG_DATAFLAG | DATA_FLAG_KEYFLAG) != 0;
        let payload_len = if has_payload { body.len() - cursor } else { 0 };
        if has_payload && payload_len < 4 {
            // At least the serialized-payload encapsulation header.
            return Err(Invalid::Malformed("data payload too short"));
        }
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[8..12]).expect("len checked"),
            seq,
            keyflag: flags & DATA_FLAG_KEYFLAG != 0,
            submsg_off,
            inline_qos,
            payload: (
                submsg_off + SMHDR_LEN as u32 + cursor as u32,
                payload_len as u32,
            ),
        })
    }
}

/// DATAFRAG view; offsets are datagram-relative.
#[derive(Debug, Clone, Copy)]
pub struct DataFrag {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub seq: SeqNr,
    pub frag_start: FragNr,
    pub frags_in_submsg: u16,
    pub fragsize: u16,
    pub sample_size: u32,
    pub keyflag: bool,
    /// Datagram offset of the submessage header.
    pub submsg_off: u32,
    pub inline_qos: Option<(u32, u32)>,
    pub payload: (u32, u32),
}

impl DataFrag {
    pub fn validate(body: &[u8], flags: u8, swap: bool, submsg_off: u32) -> V<Self> {
        if body.len() < 32 {
            return Err(Invalid::Malformed("datafrag too short"));
        }
        let octets_to_inline_qos = rd16(&body[2..4], swap) as usize;
        if octets_to_inline_qos < 28 {
            return Err(Invalid::Malformed("datafrag octetsToInlineQos"));
        }
        let seq = rd_seq(&body[12..20], swap).ok_or(Invalid::Malformed("datafrag sn"))?;
        if seq.0 < 1 {
            return Err(Invalid::Malformed("datafrag sn"));
        }
        let frag_start = FragNr::from_wire(rd32(&body[20..24], swap))
            .ok_or(Invalid::Malformed("datafrag fragment number"))?;
        let frags_in_submsg = rd16(&body[24..26], swap);
        let fragsize = rd16(&body[26..28], swap);
        let sample_size = rd32(&body[28..32], swap);
        if fragsize == 0 || frags_in_submsg == 0 {
            return Err(Invalid::Malformed("datafrag sizes"));
        }
        if u64::from(frag_start.0) * u64::from(fragsize) >= u64::from(sample_size) {
            return Err(Invalid::Malformed("datafrag fragment past sample"));
        }

        let mut cursor = 4 + octets_to_inline_qos;
        if cursor > body.len() {
            return Err(Invalid::Malformed("datafrag inline qos offset"));
        }
        let inline_qos = if flags & DATAFRAG_FLAG_INLINE_QOS != 0 {
            let start = cursor;
            let consumed = crate::plist::quickscan(&body[start..], swap)
                .map_err(|_| Invalid::Malformed("datafrag inline qos"))?
                .consumed;
            cursor = start + consumed;
            Some((submsg_off + SMHDR_LEN as u32 + start as u32, consumed as u32))
        } else {
            None
        };
        let payload_len = body.len() - cursor;
        // The payload must cover the advertised fragments, except that the
        // final fragment of the sample may run short.
        let start_byte = u64::from(frag_start.0) * u64::from(fragsize);
        let full = u64::from(frags_in_submsg) * u64::from(fragsize);
        let expected = full.min(u64::from(sample_size).saturating_sub(start_byte));
        if (payload_len as u64) < expected {
            return Err(Invalid::Malformed("datafrag payload short"));
        }
        Ok(Self {
            reader_id: EntityId::from_bytes(&body[4..8]).expect("len checked"),
            writer_id: EntityId::from_bytes(&body[8..12]).expect("len checked"),
            seq,
            frag_start,
            frags_in_submsg,
            fragsize,
            sample_size,
            keyflag: flags & crate::rtps::DATAFRAG_FLAG_KEYFLAG != 0,
            submsg_off,
            inline_qos,
            payload: (
                submsg_off + SMHDR_LEN as u32 + cursor as u32,
                expected as u32,
            ),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InfoTs {
    pub timestamp: Option<WireTime>,
}

impl InfoTs {
    pub fn validate(body: &[u8], flags: u8, swap: bool) -> V<Self> {
        // Invalidate flag: no timestamp follows.
        if flags & 0x02 != 0 {
            return Ok(Self { timestamp: None });
        }
        let t = WireTime::from_wire(body, swap).ok_or(Invalid::Malformed("info_ts"))?;
        Ok(Self { timestamp: Some(t) })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InfoSrc {
    pub protocol_version: (u8, u8),
    pub vendor: VendorId,
    pub prefix: GuidPrefix,
}

impl InfoSrc {
    pub fn validate(body: &[u8]) -> V<Self> {
        if body.len() < 20 {
            return Err(Invalid::Malformed("info_src too short"));
        }
        // unused(4) version(2) vendor(2) prefix(12)
        Ok(Self {
            protocol_version: (body[4], body[5]),
            vendor: VendorId([body[6], body[7]]),
            prefix: GuidPrefix::from_bytes(&body[8..20]).expect("len checked"),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InfoDst {
    pub prefix: GuidPrefix,
}

impl InfoDst {
    pub fn validate(body: &[u8]) -> V<Self> {
        let prefix =
            GuidPrefix::from_bytes(body).ok_or(Invalid::Malformed("info_dst too short"))?;
        Ok(Self { prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::BITSET_MAX_WORDS;

    fn seq_bytes(seq: i64) -> [u8; 8] {
        let (h, l) = SeqNr(seq).to_wire();
        let mut b = [0u8; 8];
        b[..4].copy_from_slice(&h.to_le_bytes());
        b[4..].copy_from_slice(&l.to_le_bytes());
        b
    }

    fn acknack_body(base: i64, numbits: u32, count: i32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&[0, 0, 0, 4]); // reader
        v.extend_from_slice(&[0, 0, 0, 2]); // writer
        let set = SnSetWire {
            base: SeqNr(base),
            numbits,
            bits: [0; BITSET_MAX_WORDS],
        };
        set.encode(&mut v);
        v.extend_from_slice(&(count as u32).to_le_bytes());
        v
    }

    #[test]
    fn test_acknack_preemptive_detection() {
        let a = AckNack::validate(&acknack_body(1, 0, 0), 0, false, false).unwrap();
        assert!(a.is_preemptive);
        let a = AckNack::validate(&acknack_body(5, 0, 1), 0, false, false).unwrap();
        assert!(!a.is_preemptive);
    }

    #[test]
    fn test_acknack_zero_base_needs_permissive() {
        let mut body = acknack_body(1, 0, 0);
        body[8..16].fill(0); // base = 0
        assert!(AckNack::validate(&body, 0, false, false).is_err());
        let a = AckNack::validate(&body, 0, false, true).unwrap();
        assert_eq!(a.set.base, SeqNr(1));
        assert!(a.is_preemptive);
    }

    #[test]
    fn test_heartbeat_range_rules() {
        let mk = |first: i64, last: i64| {
            let mut v = Vec::new();
            v.extend_from_slice(&[0; 8]);
            v.extend_from_slice(&seq_bytes(first));
            v.extend_from_slice(&seq_bytes(last));
            v.extend_from_slice(&1u32.to_le_bytes());
            v
        };
        assert!(Heartbeat::validate(&mk(1, 5), 0, false).is_ok());
        // Empty history: last = first - 1.
        assert!(Heartbeat::validate(&mk(3, 2), 0, false).is_ok());
        assert!(Heartbeat::validate(&mk(3, 1), 0, false).is_err());
        assert!(Heartbeat::validate(&mk(0, 5), 0, false).is_err());
    }

    #[test]
    fn test_gap_validation() {
        let mk = |start: i64, base: i64| {
            let mut v = Vec::new();
            v.extend_from_slice(&[0; 8]);
            v.extend_from_slice(&seq_bytes(start));
            let set = SnSetWire {
                base: SeqNr(base),
                numbits: 0,
                bits: [0; BITSET_MAX_WORDS],
            };
            set.encode(&mut v);
            v
        };
        assert!(Gap::validate(&mk(2, 5), false).is_ok());
        assert!(Gap::validate(&mk(5, 2), false).is_err());
    }

    #[test]
    fn test_data_offsets() {
        // Build a DATA submessage body by hand: extraFlags, o2iq=16, ids,
        // seq, payload.
        let mut v = Vec::new();
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&16u16.to_le_bytes());
        v.extend_from_slice(&[0, 0, 0, 4]);
        v.extend_from_slice(&[0, 0, 0, 2]);
        v.extend_from_slice(&seq_bytes(9));
        v.extend_from_slice(&[0, 1, 0, 0]); // encapsulation
        v.extend_from_slice(b"payload!");
        let d = Data::validate(&v, DATA_FLAG_DATAFLAG, false, 100).unwrap();
        assert_eq!(d.seq, SeqNr(9));
        // Payload starts after header(4) + 20 fixed bytes at datagram
        // offset 100.
        assert_eq!(d.payload, (100 + 4 + 20, 12));
    }

    #[test]
    fn test_data_without_payload_flag() {
        let mut v = Vec::new();
        v.extend_from_slice(&0u16.to_le_bytes());
        v.extend_from_slice(&16u16.to_le_bytes());
        v.extend_from_slice(&[0; 8]);
        v.extend_from_slice(&seq_bytes(1));
        let d = Data::validate(&v, 0, false, 0).unwrap();
        assert_eq!(d.payload.1, 0);
    }

    #[test]
    fn test_datafrag_validation() {
        let mk = |frag_wire: u32, fragsize: u16, sample: u32, paylen: usize| {
            let mut v = Vec::new();
            v.extend_from_slice(&0u16.to_le_bytes());
            v.extend_from_slice(&28u16.to_le_bytes());
            v.extend_from_slice(&[0; 8]);
            v.extend_from_slice(&seq_bytes(7));
            v.extend_from_slice(&frag_wire.to_le_bytes());
            v.extend_from_slice(&1u16.to_le_bytes());
            v.extend_from_slice(&fragsize.to_le_bytes());
            v.extend_from_slice(&sample.to_le_bytes());
            v.extend(std::iter::repeat(0u8).take(paylen));
            v
        };
        let d = DataFrag::validate(&mk(2, 1024, 3000, 1024), 0, false, 0).unwrap();
        assert_eq!(d.frag_start, FragNr(1));
        assert_eq!(d.payload.1, 1024);
        // Final fragment may run short.
        let d = DataFrag::validate(&mk(3, 1024, 3000, 952), 0, false, 0).unwrap();
        assert_eq!(d.payload.1, 952);
        // Fragment number 0 on the wire is invalid.
        assert!(DataFrag::validate(&mk(0, 1024, 3000, 1024), 0, false, 0).is_err());
        // Fragment wholly past the sample.
        assert!(DataFrag::validate(&mk(4, 1024, 3000, 1024), 0, false, 0).is_err());
        // Zero fragment size.
        assert!(DataFrag::validate(&mk(1, 0, 3000, 1024), 0, false, 0).is_err());
        // Payload shorter than advertised.
        assert!(DataFrag::validate(&mk(1, 1024, 3000, 100), 0, false, 0).is_err());
    }

    #[test]
    fn test_info_ts_invalidate() {
        let t = InfoTs::validate(&[], 0x02, false).unwrap();
        assert!(t.timestamp.is_none());
        let wt = WireTime { seconds: 4, fraction: 5 };
        let t = InfoTs::validate(&wt.to_wire(), 0, false).unwrap();
        assert_eq!(t.timestamp, Some(wt));
    }
}
