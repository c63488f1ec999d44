// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deserialization of a `PL_CDR` stream into a [`Plist`].

use std::borrow::Cow;

use crate::types::{Guid, Locator, LocatorKind, SeqNr, VendorId, WireDuration};

use super::pid::{self, Field, PEF_ALLOW_MULTI, PEF_QOS};
use super::qos::{
    DestinationOrderKind, DurabilityKind, DurabilityService, History, HistoryKind, Liveliness,
    LivelinessKind, OwnershipKind, Presentation, PresentationAccessScope, Reliability,
    ReliabilityKind, ResourceLimits,
};
use super::{fieldops, Plist, PlistContext, PlistError};

/// Everything `init_from_msg` needs to know about the sender and the caller.
#[derive(Debug, Clone, Copy)]
pub struct ParseParams {
    /// The list is big-endian (submessage endianness flag clear).
    pub swap: bool,
    /// Peer's announced protocol version.
    pub protocol_version: (u8, u8),
    /// Peer's announced vendor; selects the vendor-specific pid index.
    pub vendorid: VendorId,
    /// Plist-level fields of interest.
    pub pmask: u64,
    /// QoS-level fields of interest.
    pub qmask: u64,
    pub context: PlistContext,
}

impl Default for ParseParams {
    fn default() -> Self {
        Self {
            swap: false,
            protocol_version: (2, 1),
            vendorid: crate::types::VENDOR_UNKNOWN,
            pmask: super::PP_ALL,
            qmask: super::QP_ALL,
            context: PlistContext::Endpoint,
        }
    }
}

struct Reader<'a> {
    body: &'a [u8],
    swap: bool,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(body: &'a [u8], swap: bool) -> Self {
        Self { body, swap, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], PlistError> {
        if self.remaining() < n {
            return Err(PlistError::BadParameter("parameter body truncated"));
        }
        let s = &self.body[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u16(&mut self) -> Result<u16, PlistError> {
        let b = self.bytes(2)?;
        let v = u16::from_le_bytes([b[0], b[1]]);
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    fn u32(&mut self) -> Result<u32, PlistError> {
        let b = self.bytes(4)?;
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Ok(if self.swap { v.swap_bytes() } else { v })
    }

    fn i32(&mut self) -> Result<i32, PlistError> {
        Ok(self.u32()? as i32)
    }

    fn duration(&mut self) -> Result<WireDuration, PlistError> {
        let b = self.bytes(8)?;
        WireDuration::from_wire(b, self.swap).ok_or(PlistError::BadParameter("duration"))
    }

    /// CDR string: u32 length including the terminating NUL.
    fn string(&mut self) -> Result<Cow<'a, str>, PlistError> {
        let len = self.u32()? as usize;
        if len == 0 {
            return Err(PlistError::BadParameter("string without terminator"));
        }
        let raw = self.bytes(len)?;
        if raw[len - 1] != 0 {
            return Err(PlistError::BadParameter("string not NUL-terminated"));
        }
        let s = std::str::from_utf8(&raw[..len - 1])
            .map_err(|_| PlistError::BadParameter("string not utf-8"))?;
        // Strings inside sequences are 4-aligned relative to the body.
        let pad = (4 - (self.pos % 4)) % 4;
        let _ = self.bytes(pad.min(self.remaining()));
        Ok(Cow::Borrowed(s))
    }

    fn octet_seq(&mut self) -> Result<Cow<'a, [u8]>, PlistError> {
        let len = self.u32()? as usize;
        Ok(Cow::Borrowed(self.bytes(len)?))
    }

    fn guid(&mut self) -> Result<Guid, PlistError> {
        let b = self.bytes(16)?;
        Guid::from_bytes(b).ok_or(PlistError::BadParameter("guid"))
    }

    fn boolean(&mut self) -> Result<bool, PlistError> {
        Ok(self.bytes(1)?[0] != 0)
    }
}

fn deser_locator(r: &mut Reader<'_>) -> Result<Option<Locator>, PlistError> {
    let raw = r.bytes(24)?;
    let loc = Locator::from_wire(raw, r.swap).ok_or(PlistError::BadParameter("locator"))?;
    match loc.kind {
        k if k.is_supported() => {
            if !loc.is_wellformed() {
                return Err(PlistError::BadParameter("malformed locator"));
            }
            Ok(Some(loc))
        }
        LocatorKind::Udpv4McGen => {
            // address = base ip (4) | base bit (1) | count (1) | idx (1)
            let base = loc.address[4];
            let count = loc.address[5];
            let idx = loc.address[6];
            if loc.port == 0 || count == 0 || idx >= count || u32::from(base) + u32::from(count) > 32 {
                return Err(PlistError::BadParameter("udpv4mcgen parameters"));
            }
            Ok(Some(loc))
        }
        // Unknown or disabled kinds: accepted but not stored.
        _ => Ok(None),
    }
}

fn push_locator(list: &mut Vec<Locator>, loc: Option<Locator>) {
    if let Some(l) = loc {
        list.push(l);
    }
}

/// Parse one parameter list starting at `buf[0]` (which must be the first
/// pid header, 4-aligned within the submessage).
///
/// On success returns the list and the number of bytes consumed including
/// the sentinel, so a caller holding concatenated lists can continue after
/// it (`nextafter`).
pub fn init_from_msg<'a>(
    buf: &'a [u8],
    params: &ParseParams,
) -> Result<(Plist<'a>, usize), PlistError> {
    let mut plist = Plist::new();
    let mut off = 0usize;

    loop {
        if off + 4 > buf.len() {
            return Err(PlistError::BadParameter("no sentinel before end of list"));
        }
        let mut hdr = Reader::new(&buf[off..off + 4], params.swap);
        let pid = hdr.u16()?;
        let length = hdr.u16()? as usize;
        off += 4;

        if pid == pid::PID_SENTINEL {
            break;
        }
        if length % 4 != 0 || off + length > buf.len() {
            return Err(PlistError::BadParameter("parameter length"));
        }
        let body = &buf[off..off + length];
        off += length;

        if pid == pid::PID_PAD {
            continue;
        }

        let Some(entry) = pid::lookup(pid, params.vendorid) else {
            if pid < pid::PID_VENDOR_SPECIFIC_BASE && pid & pid::PID_FLAG_MUST_UNDERSTAND != 0 {
                log::debug!("[plist] must-understand pid 0x{:04x} not known", pid);
                return Err(PlistError::Unsupported(pid));
            }
            continue;
        };

        // Context gates.
        if params.context == PlistContext::QosDisallowed
            && (entry.flags & PEF_QOS != 0 || entry.field == Field::ParticipantLeaseDuration)
        {
            return Err(PlistError::BadParameter("qos pid in qos-disallowed context"));
        }
        match entry.field {
            Field::Liveliness if params.context == PlistContext::Participant => {
                return Err(PlistError::BadParameter("liveliness in participant context"));
            }
            Field::ParticipantLeaseDuration if params.context != PlistContext::Participant => {
                return Err(PlistError::BadParameter(
                    "participant lease duration outside participant context",
                ));
            }
            _ => {}
        }

        // Mask filter: uninteresting parameters are skipped unparsed.
        let (is_qos, bit) = fieldops::field_bit(entry.field);
        let wanted = if is_qos { params.qmask & bit != 0 } else { params.pmask & bit != 0 };
        if !wanted {
            continue;
        }

        // Duplicate detection for single-occurrence pids.
        let already = if is_qos { plist.qp & bit != 0 } else { plist.pp & bit != 0 };
        if already && entry.flags & PEF_ALLOW_MULTI == 0 {
            return Err(PlistError::BadParameter("duplicate pid"));
        }

        let mut r = Reader::new(body, params.swap);
        deser_field(&mut plist, entry.field, &mut r)?;
        if is_qos {
            plist.qp |= bit;
        } else {
            plist.pp |= bit;
        }
    }

    // Compatibility normalization: older OpenSplice peers send an all-zero
    // durability service, which means "defaults" there.
    if plist.qp & super::QP_DURABILITY_SERVICE != 0 && plist.durability_service.is_all_zero() {
        if params.vendorid.accepts_zero_durability_service() {
            plist.durability_service = DurabilityService::default();
        } else {
            return Err(PlistError::InconsistentPolicy("all-zero durability service"));
        }
    }

    plist.valid()?;
    Ok((plist, off))
}

fn deser_field<'a>(
    plist: &mut Plist<'a>,
    field: Field,
    r: &mut Reader<'a>,
) -> Result<(), PlistError> {
    match field {
        Field::ProtocolVersion => {
            let b = r.bytes(2)?;
            plist.protocol_version = (b[0], b[1]);
        }
        Field::VendorId => {
            let b = r.bytes(2)?;
            plist.vendorid = VendorId([b[0], b[1]]);
        }
        Field::ParticipantGuid => plist.participant_guid = r.guid()?,
        Field::EndpointGuid => plist.endpoint_guid = r.guid()?,
        Field::GroupGuid => plist.group_guid = r.guid()?,
        Field::BuiltinEndpointSet => plist.builtin_endpoint_set = r.u32()?,
        Field::DomainId => plist.domain_id = r.u32()?,
        Field::DomainTag => plist.domain_tag = r.string()?,
        Field::EntityName => plist.entity_name = r.string()?,
        Field::ExpectsInlineQos => plist.expects_inline_qos = r.boolean()?,
        Field::Keyhash => {
            let b = r.bytes(16)?;
            plist.keyhash.copy_from_slice(b);
        }
        Field::StatusInfo => {
            // Statusinfo is a big-endian flag word regardless of the
            // submessage byte order (the flags sit in the last octet).
            let b = r.bytes(4)?;
            plist.statusinfo = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        }
        Field::CoherentSet => {
            let high = r.i32()?;
            let low = r.u32()?;
            plist.coherent_set =
                SeqNr::from_wire(high, low).ok_or(PlistError::BadParameter("coherent set"))?;
        }
        Field::TypeInformation => plist.type_information = r.octet_seq()?,
        Field::MetatrafficUnicastLocator => {
            push_locator(&mut plist.metatraffic_unicast_locators, deser_locator(r)?);
        }
        Field::MetatrafficMulticastLocator => {
            push_locator(&mut plist.metatraffic_multicast_locators, deser_locator(r)?);
        }
        Field::DefaultUnicastLocator => {
            push_locator(&mut plist.default_unicast_locators, deser_locator(r)?);
        }
        Field::DefaultMulticastLocator => {
            push_locator(&mut plist.default_multicast_locators, deser_locator(r)?);
        }
        Field::UnicastLocator => push_locator(&mut plist.unicast_locators, deser_locator(r)?),
        Field::MulticastLocator => push_locator(&mut plist.multicast_locators, deser_locator(r)?),
        Field::AdlinkEntityFactory => plist.adlink_entity_factory = r.u32()?,
        Field::CycloneReceiveBufferSize => plist.cyclone_receive_buffer_size = r.u32()?,
        Field::ParticipantLeaseDuration => {
            plist.liveliness = Liveliness {
                kind: LivelinessKind::Automatic,
                lease_duration: r.duration()?,
            };
        }
        Field::UserData => plist.user_data = r.octet_seq()?,
        Field::TopicName => plist.topic_name = r.string()?,
        Field::TypeName => plist.type_name = r.string()?,
        Field::Durability => {
            plist.durability =
                DurabilityKind::from_wire(r.u32()?).ok_or(PlistError::BadParameter("durability kind"))?;
        }
        Field::DurabilityService => {
            plist.durability_service = DurabilityService {
                service_cleanup_delay: r.duration()?,
                history: read_history(r)?,
                resource_limits: read_resource_limits(r)?,
            };
        }
        Field::Deadline => plist.deadline = r.duration()?,
        Field::LatencyBudget => plist.latency_budget = r.duration()?,
        Field::Liveliness => {
            let kind = match r.u32()? {
                0 => LivelinessKind::Automatic,
                1 => LivelinessKind::ManualByParticipant,
                2 => LivelinessKind::ManualByTopic,
                _ => return Err(PlistError::BadParameter("liveliness kind")),
            };
            plist.liveliness = Liveliness {
                kind,
                lease_duration: r.duration()?,
            };
        }
        Field::Reliability => {
            let kind = match r.u32()? {
                1 => ReliabilityKind::BestEffort,
                2 => ReliabilityKind::Reliable,
                _ => return Err(PlistError::BadParameter("reliability kind")),
            };
            plist.reliability = Reliability {
                kind,
                max_blocking_time: r.duration()?,
            };
        }
        Field::Lifespan => plist.lifespan = r.duration()?,
        Field::DestinationOrder => {
            plist.destination_order = match r.u32()? {
                0 => DestinationOrderKind::ByReceptionTimestamp,
                1 => DestinationOrderKind::BySourceTimestamp,
                _ => return Err(PlistError::BadParameter("destination order kind")),
            };
        }
        Field::History => plist.history = read_history(r)?,
        Field::ResourceLimits => plist.resource_limits = read_resource_limits(r)?,
        Field::Ownership => {
            plist.ownership = match r.u32()? {
                0 => OwnershipKind::Shared,
                1 => OwnershipKind::Exclusive,
                _ => return Err(PlistError::BadParameter("ownership kind")),
            };
        }
        Field::OwnershipStrength => plist.ownership_strength = r.i32()?,
        Field::Presentation => {
            let access_scope = match r.u32()? {
                0 => PresentationAccessScope::Instance,
                1 => PresentationAccessScope::Topic,
                2 => PresentationAccessScope::Group,
                _ => return Err(PlistError::BadParameter("presentation scope")),
            };
            let coherent_access = r.boolean()?;
            let ordered_access = r.boolean()?;
            plist.presentation = Presentation {
                access_scope,
                coherent_access,
                ordered_access,
            };
        }
        Field::Partition => {
            let count = r.u32()? as usize;
            // Bound by remaining bytes: each name needs at least its length
            // word, so a hostile count cannot force allocation.
            if count > r.remaining() / 4 {
                return Err(PlistError::BadParameter("partition count"));
            }
            let mut names = Vec::with_capacity(count);
            for _ in 0..count {
                names.push(r.string()?);
            }
            plist.partition = names;
        }
        Field::TimeBasedFilter => plist.time_based_filter = r.duration()?,
        Field::TransportPriority => plist.transport_priority = r.i32()?,
    }
    Ok(())
}

fn read_history(r: &mut Reader<'_>) -> Result<History, PlistError> {
    let kind = match r.u32()? {
        0 => HistoryKind::KeepLast,
        1 => HistoryKind::KeepAll,
        _ => return Err(PlistError::BadParameter("history kind")),
    };
    Ok(History {
        kind,
        depth: r.i32()?,
    })
}

fn read_resource_limits(r: &mut Reader<'_>) -> Result<ResourceLimits, PlistError> {
    Ok(ResourceLimits {
        max_samples: r.i32()?,
        max_instances: r.i32()?,
        max_samples_per_instance: r.i32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plist::{PP_ALL, QP_ALL, QP_LIVELINESS, QP_TOPIC_NAME};
    use crate::types::VENDOR_ADLINK_OSPL;

    fn hdr(pid: u16, len: u16) -> [u8; 4] {
        let mut b = [0u8; 4];
        b[..2].copy_from_slice(&pid.to_le_bytes());
        b[2..].copy_from_slice(&len.to_le_bytes());
        b
    }

    fn cdr_string(s: &str) -> Vec<u8> {
        let mut v = Vec::new();
        let n = s.len() as u32 + 1;
        v.extend_from_slice(&n.to_le_bytes());
        v.extend_from_slice(s.as_bytes());
        v.push(0);
        while v.len() % 4 != 0 {
            v.push(0);
        }
        v
    }

    fn sentinel() -> [u8; 4] {
        hdr(pid::PID_SENTINEL, 0)
    }

    #[test]
    fn test_parse_topic_name_aliases_buffer() {
        let mut buf = Vec::new();
        let body = cdr_string("chatter");
        buf.extend_from_slice(&hdr(pid::PID_TOPIC_NAME, body.len() as u16));
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&sentinel());

        let (p, consumed) = init_from_msg(&buf, &ParseParams::default()).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(p.qp & QP_TOPIC_NAME, QP_TOPIC_NAME);
        assert_eq!(p.topic_name, "chatter");
        assert!(matches!(p.topic_name, std::borrow::Cow::Borrowed(_)));
    }

    #[test]
    fn test_parse_big_endian() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&pid::PID_OWNERSHIP_STRENGTH.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&7i32.to_be_bytes());
        buf.extend_from_slice(&pid::PID_SENTINEL.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes());

        let params = ParseParams {
            swap: true,
            ..ParseParams::default()
        };
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        assert_eq!(p.ownership_strength, 7);
    }

    #[test]
    fn test_missing_sentinel_is_malformed() {
        let mut buf = Vec::new();
        let body = cdr_string("x");
        buf.extend_from_slice(&hdr(pid::PID_TOPIC_NAME, body.len() as u16));
        buf.extend_from_slice(&body);
        assert!(matches!(
            init_from_msg(&buf, &ParseParams::default()),
            Err(PlistError::BadParameter(_))
        ));
    }

    #[test]
    fn test_unknown_must_understand_pid() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(0x4321, 0));
        buf.extend_from_slice(&sentinel());
        assert_eq!(
            init_from_msg(&buf, &ParseParams::default()),
            Err(PlistError::Unsupported(0x4321))
        );
    }

    #[test]
    fn test_unknown_plain_pid_skipped() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(0x3fff, 4));
        buf.extend_from_slice(&[0; 4]);
        buf.extend_from_slice(&sentinel());
        let (p, _) = init_from_msg(&buf, &ParseParams::default()).unwrap();
        assert_eq!((p.pp, p.qp), (0, 0));
    }

    #[test]
    fn test_duplicate_single_occurrence_pid() {
        let mut buf = Vec::new();
        for _ in 0..2 {
            buf.extend_from_slice(&hdr(pid::PID_OWNERSHIP_STRENGTH, 4));
            buf.extend_from_slice(&1i32.to_le_bytes());
        }
        buf.extend_from_slice(&sentinel());
        assert!(matches!(
            init_from_msg(&buf, &ParseParams::default()),
            Err(PlistError::BadParameter("duplicate pid"))
        ));
    }

    #[test]
    fn test_locator_list_appends() {
        let la = crate::types::Locator::udpv4("10.0.0.1".parse().unwrap(), 7410);
        let lb = crate::types::Locator::udpv4("10.0.0.2".parse().unwrap(), 7410);
        let mut buf = Vec::new();
        for l in [la, lb] {
            buf.extend_from_slice(&hdr(pid::PID_DEFAULT_UNICAST_LOCATOR, 24));
            buf.extend_from_slice(&l.to_wire());
        }
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            context: PlistContext::Participant,
            ..ParseParams::default()
        };
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        assert_eq!(p.default_unicast_locators, vec![la, lb]);
    }

    #[test]
    fn test_unknown_locator_kind_ignored() {
        let mut raw = [0u8; 24];
        raw[0..4].copy_from_slice(&1234i32.to_le_bytes());
        raw[4..8].copy_from_slice(&7400u32.to_le_bytes());
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(pid::PID_DEFAULT_UNICAST_LOCATOR, 24));
        buf.extend_from_slice(&raw);
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            context: PlistContext::Participant,
            ..ParseParams::default()
        };
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        // Accepted (presence set) but not stored.
        assert!(p.default_unicast_locators.is_empty());
    }

    #[test]
    fn test_port_zero_locator_fails_plist() {
        let mut l = crate::types::Locator::udpv4("10.0.0.1".parse().unwrap(), 1);
        l.port = 0;
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(pid::PID_DEFAULT_UNICAST_LOCATOR, 24));
        buf.extend_from_slice(&l.to_wire());
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            context: PlistContext::Participant,
            ..ParseParams::default()
        };
        assert!(init_from_msg(&buf, &params).is_err());
    }

    #[test]
    fn test_lease_duration_maps_to_liveliness_in_participant_context() {
        let d = WireDuration { seconds: 30, fraction: 0 };
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(pid::PID_PARTICIPANT_LEASE_DURATION, 8));
        buf.extend_from_slice(&d.to_wire());
        buf.extend_from_slice(&sentinel());

        let params = ParseParams {
            context: PlistContext::Participant,
            ..ParseParams::default()
        };
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        assert_ne!(p.qp & QP_LIVELINESS, 0);
        assert_eq!(p.liveliness.kind, LivelinessKind::Automatic);
        assert_eq!(p.liveliness.lease_duration, d);

        // The same pid outside participant context is an error.
        let params = ParseParams {
            context: PlistContext::Endpoint,
            ..ParseParams::default()
        };
        assert!(init_from_msg(&buf, &params).is_err());
    }

    #[test]
    fn test_liveliness_rejected_in_participant_context() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(pid::PID_LIVELINESS, 12));
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&WireDuration { seconds: 1, fraction: 0 }.to_wire());
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            context: PlistContext::Participant,
            ..ParseParams::default()
        };
        assert!(init_from_msg(&buf, &params).is_err());
        let params = ParseParams {
            context: PlistContext::Endpoint,
            ..ParseParams::default()
        };
        assert!(init_from_msg(&buf, &params).is_ok());
    }

    #[test]
    fn test_qos_disallowed_context() {
        let mut buf = Vec::new();
        let body = cdr_string("t");
        buf.extend_from_slice(&hdr(pid::PID_TOPIC_NAME, body.len() as u16));
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            context: PlistContext::QosDisallowed,
            ..ParseParams::default()
        };
        assert!(matches!(
            init_from_msg(&buf, &params),
            Err(PlistError::BadParameter(_))
        ));
    }

    #[test]
    fn test_all_zero_durability_service_vendor_gate() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hdr(pid::PID_DURABILITY_SERVICE, 28));
        buf.extend_from_slice(&[0u8; 28]);
        buf.extend_from_slice(&sentinel());

        let mut params = ParseParams::default();
        assert!(init_from_msg(&buf, &params).is_err());

        params.vendorid = VENDOR_ADLINK_OSPL;
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        // Normalized to defaults.
        assert_eq!(p.durability_service, DurabilityService::default());
    }

    #[test]
    fn test_mask_skips_uninteresting() {
        let mut buf = Vec::new();
        let body = cdr_string("skipped");
        buf.extend_from_slice(&hdr(pid::PID_TOPIC_NAME, body.len() as u16));
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&sentinel());
        let params = ParseParams {
            pmask: PP_ALL,
            qmask: QP_ALL & !QP_TOPIC_NAME,
            ..ParseParams::default()
        };
        let (p, _) = init_from_msg(&buf, &params).unwrap();
        assert_eq!(p.qp & QP_TOPIC_NAME, 0);
        assert_eq!(p.topic_name, "");
    }
}
