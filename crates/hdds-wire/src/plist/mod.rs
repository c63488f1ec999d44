// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter-list codec: the typed PID/length/value sublanguage carrying
//! QoS, GUIDs and locators in discovery payloads and inline QoS.
//!
//! A `PL_CDR` stream is a run of `{pid: u16, length: u16}` headers aligned
//! to 4, terminated by `PID_SENTINEL`. Presence is tracked in two bit masks
//! (plist-level and QoS-level); string/blob fields borrow from the receive
//! buffer on the fast path ([`std::borrow::Cow`]) and [`Plist::unalias`]
//! copies them to owned storage before the buffer can be recycled.
//!
//! ## Context sensitivity
//!
//! The wire's `PID_PARTICIPANT_LEASE_DURATION` and `PID_LIVELINESS` are two
//! spellings of one field: participant announcements carry the former and
//! store `liveliness = {Automatic, lease}`; endpoint/topic/inline contexts
//! carry the latter. Each spelling is rejected in the other context, and a
//! [`PlistContext::QosDisallowed`] list rejects every QoS pid outright.

mod fieldops;
mod parse;
pub mod pid;
pub mod qos;
mod quickscan;
mod ser;

pub use parse::{init_from_msg, ParseParams};
pub use quickscan::{find_param, quickscan, QuickScan};
pub use ser::emit_sentinel;

use std::borrow::Cow;
use std::fmt;

use crate::types::{Guid, Locator, SeqNr, VendorId, WireDuration, VENDOR_UNKNOWN};
use qos::{
    DestinationOrderKind, DurabilityKind, DurabilityService, History, Liveliness, OwnershipKind,
    Presentation, Reliability, ResourceLimits,
};

// Plist-level presence bits.
pub const PP_PROTOCOL_VERSION: u64 = 1 << 0;
pub const PP_VENDORID: u64 = 1 << 1;
pub const PP_PARTICIPANT_GUID: u64 = 1 << 2;
pub const PP_ENDPOINT_GUID: u64 = 1 << 3;
pub const PP_GROUP_GUID: u64 = 1 << 4;
pub const PP_BUILTIN_ENDPOINT_SET: u64 = 1 << 5;
pub const PP_DOMAIN_ID: u64 = 1 << 6;
pub const PP_DOMAIN_TAG: u64 = 1 << 7;
pub const PP_ENTITY_NAME: u64 = 1 << 8;
pub const PP_EXPECTS_INLINE_QOS: u64 = 1 << 9;
pub const PP_KEYHASH: u64 = 1 << 10;
pub const PP_STATUSINFO: u64 = 1 << 11;
pub const PP_COHERENT_SET: u64 = 1 << 12;
pub const PP_TYPE_INFORMATION: u64 = 1 << 13;
pub const PP_METATRAFFIC_UNICAST_LOCATOR: u64 = 1 << 14;
pub const PP_METATRAFFIC_MULTICAST_LOCATOR: u64 = 1 << 15;
pub const PP_DEFAULT_UNICAST_LOCATOR: u64 = 1 << 16;
pub const PP_DEFAULT_MULTICAST_LOCATOR: u64 = 1 << 17;
pub const PP_UNICAST_LOCATOR: u64 = 1 << 18;
pub const PP_MULTICAST_LOCATOR: u64 = 1 << 19;
pub const PP_ADLINK_ENTITY_FACTORY: u64 = 1 << 20;
pub const PP_CYCLONE_RECEIVE_BUFFER_SIZE: u64 = 1 << 21;
pub const PP_ALL: u64 = (1 << 22) - 1;

// QoS-level presence bits.
pub const QP_USER_DATA: u64 = 1 << 0;
pub const QP_TOPIC_NAME: u64 = 1 << 1;
pub const QP_TYPE_NAME: u64 = 1 << 2;
pub const QP_DURABILITY: u64 = 1 << 3;
pub const QP_DURABILITY_SERVICE: u64 = 1 << 4;
pub const QP_DEADLINE: u64 = 1 << 5;
pub const QP_LATENCY_BUDGET: u64 = 1 << 6;
pub const QP_LIVELINESS: u64 = 1 << 7;
pub const QP_RELIABILITY: u64 = 1 << 8;
pub const QP_LIFESPAN: u64 = 1 << 9;
pub const QP_DESTINATION_ORDER: u64 = 1 << 10;
pub const QP_HISTORY: u64 = 1 << 11;
pub const QP_RESOURCE_LIMITS: u64 = 1 << 12;
pub const QP_OWNERSHIP: u64 = 1 << 13;
pub const QP_OWNERSHIP_STRENGTH: u64 = 1 << 14;
pub const QP_PRESENTATION: u64 = 1 << 15;
pub const QP_PARTITION: u64 = 1 << 16;
pub const QP_TIME_BASED_FILTER: u64 = 1 << 17;
pub const QP_TRANSPORT_PRIORITY: u64 = 1 << 18;
pub const QP_ALL: u64 = (1 << 19) - 1;

/// Where a parameter list appears; drives which pids are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlistContext {
    Participant,
    Endpoint,
    Topic,
    InlineQos,
    /// Parameter lists that must not carry any QoS at all.
    QosDisallowed,
}

/// Parameter-list level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlistError {
    /// Structurally broken input or an illegal pid for the context.
    BadParameter(&'static str),
    /// Parsed fine, inter-field validation failed.
    InconsistentPolicy(&'static str),
    /// Unknown pid flagged must-understand: the whole list is unusable.
    Unsupported(u16),
}

impl fmt::Display for PlistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadParameter(msg) => write!(f, "bad parameter: {}", msg),
            Self::InconsistentPolicy(msg) => write!(f, "inconsistent policy: {}", msg),
            Self::Unsupported(pid) => write!(f, "unsupported must-understand pid 0x{:04x}", pid),
        }
    }
}

impl std::error::Error for PlistError {}

/// A parsed (or in-construction) parameter list.
///
/// Fields are always materialized; `pp`/`qp` presence masks say which ones
/// are carried. `Cow` fields may borrow from the buffer the list was parsed
/// out of; the `'a` lifetime is that buffer's.
#[derive(Debug, Clone, PartialEq)]
pub struct Plist<'a> {
    pub pp: u64,
    pub qp: u64,

    pub protocol_version: (u8, u8),
    pub vendorid: VendorId,
    pub participant_guid: Guid,
    pub endpoint_guid: Guid,
    pub group_guid: Guid,
    pub builtin_endpoint_set: u32,
    pub domain_id: u32,
    pub domain_tag: Cow<'a, str>,
    pub entity_name: Cow<'a, str>,
    pub expects_inline_qos: bool,
    pub keyhash: [u8; 16],
    pub statusinfo: u32,
    pub coherent_set: SeqNr,
    pub type_information: Cow<'a, [u8]>,
    pub metatraffic_unicast_locators: Vec<Locator>,
    pub metatraffic_multicast_locators: Vec<Locator>,
    pub default_unicast_locators: Vec<Locator>,
    pub default_multicast_locators: Vec<Locator>,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub adlink_entity_factory: u32,
    pub cyclone_receive_buffer_size: u32,

    pub user_data: Cow<'a, [u8]>,
    pub topic_name: Cow<'a, str>,
    pub type_name: Cow<'a, str>,
    pub durability: DurabilityKind,
    pub durability_service: DurabilityService,
    pub deadline: WireDuration,
    pub latency_budget: WireDuration,
    pub liveliness: Liveliness,
    pub reliability: Reliability,
    pub lifespan: WireDuration,
    pub destination_order: DestinationOrderKind,
    pub history: History,
    pub resource_limits: ResourceLimits,
    pub ownership: OwnershipKind,
    pub ownership_strength: i32,
    pub presentation: Presentation,
    pub partition: Vec<Cow<'a, str>>,
    pub time_based_filter: WireDuration,
    pub transport_priority: i32,
}

impl Default for Plist<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Plist<'a> {
    /// An empty list: nothing present, every field at its default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pp: 0,
            qp: 0,
            protocol_version: (2, 1),
            vendorid: VENDOR_UNKNOWN,
            participant_guid: Guid::default(),
            endpoint_guid: Guid::default(),
            group_guid: Guid::default(),
            builtin_endpoint_set: 0,
            domain_id: 0,
            domain_tag: Cow::Borrowed(""),
            entity_name: Cow::Borrowed(""),
            expects_inline_qos: false,
            keyhash: [0; 16],
            statusinfo: 0,
            coherent_set: SeqNr(0),
            type_information: Cow::Borrowed(&[]),
            metatraffic_unicast_locators: Vec::new(),
            metatraffic_multicast_locators: Vec::new(),
            default_unicast_locators: Vec::new(),
            default_multicast_locators: Vec::new(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            adlink_entity_factory: 0,
            cyclone_receive_buffer_size: 0,
            user_data: Cow::Borrowed(&[]),
            topic_name: Cow::Borrowed(""),
            type_name: Cow::Borrowed(""),
            durability: DurabilityKind::default(),
            durability_service: DurabilityService::default(),
            deadline: crate::types::DURATION_INFINITE,
            latency_budget: WireDuration::ZERO,
            liveliness: Liveliness::default(),
            reliability: Reliability::default(),
            lifespan: crate::types::DURATION_INFINITE,
            destination_order: DestinationOrderKind::default(),
            history: History::default(),
            resource_limits: ResourceLimits::default(),
            ownership: OwnershipKind::default(),
            ownership_strength: 0,
            presentation: Presentation::default(),
            partition: Vec::new(),
            time_based_filter: WireDuration::ZERO,
            transport_priority: 0,
        }
    }

    /// Bits of `aliased` state: which presence bits refer to borrowed memory.
    ///
    /// Only the `Cow`/string-sequence fields can alias; everything else is
    /// plain data. Returned as (pp-aliased, qp-aliased) masks.
    #[must_use]
    pub fn aliased(&self) -> (u64, u64) {
        let mut app = 0;
        let mut aqp = 0;
        let borrowed_str = |c: &Cow<'a, str>| matches!(c, Cow::Borrowed(s) if !s.is_empty());
        let borrowed_bytes = |c: &Cow<'a, [u8]>| matches!(c, Cow::Borrowed(b) if !b.is_empty());
        if self.pp & PP_DOMAIN_TAG != 0 && borrowed_str(&self.domain_tag) {
            app |= PP_DOMAIN_TAG;
        }
        if self.pp & PP_ENTITY_NAME != 0 && borrowed_str(&self.entity_name) {
            app |= PP_ENTITY_NAME;
        }
        if self.pp & PP_TYPE_INFORMATION != 0 && borrowed_bytes(&self.type_information) {
            app |= PP_TYPE_INFORMATION;
        }
        if self.qp & QP_USER_DATA != 0 && borrowed_bytes(&self.user_data) {
            aqp |= QP_USER_DATA;
        }
        if self.qp & QP_TOPIC_NAME != 0 && borrowed_str(&self.topic_name) {
            aqp |= QP_TOPIC_NAME;
        }
        if self.qp & QP_TYPE_NAME != 0 && borrowed_str(&self.type_name) {
            aqp |= QP_TYPE_NAME;
        }
        if self.qp & QP_PARTITION != 0 && self.partition.iter().any(|p| matches!(p, Cow::Borrowed(s) if !s.is_empty())) {
            aqp |= QP_PARTITION;
        }
        (app, aqp)
    }

    /// Copy every borrowed field to owned storage, severing all references
    /// into the receive buffer.
    #[must_use]
    pub fn unalias(self) -> Plist<'static> {
        Plist {
            pp: self.pp,
            qp: self.qp,
            protocol_version: self.protocol_version,
            vendorid: self.vendorid,
            participant_guid: self.participant_guid,
            endpoint_guid: self.endpoint_guid,
            group_guid: self.group_guid,
            builtin_endpoint_set: self.builtin_endpoint_set,
            domain_id: self.domain_id,
            domain_tag: Cow::Owned(self.domain_tag.into_owned()),
            entity_name: Cow::Owned(self.entity_name.into_owned()),
            expects_inline_qos: self.expects_inline_qos,
            keyhash: self.keyhash,
            statusinfo: self.statusinfo,
            coherent_set: self.coherent_set,
            type_information: Cow::Owned(self.type_information.into_owned()),
            metatraffic_unicast_locators: self.metatraffic_unicast_locators,
            metatraffic_multicast_locators: self.metatraffic_multicast_locators,
            default_unicast_locators: self.default_unicast_locators,
            default_multicast_locators: self.default_multicast_locators,
            unicast_locators: self.unicast_locators,
            multicast_locators: self.multicast_locators,
            adlink_entity_factory: self.adlink_entity_factory,
            cyclone_receive_buffer_size: self.cyclone_receive_buffer_size,
            user_data: Cow::Owned(self.user_data.into_owned()),
            topic_name: Cow::Owned(self.topic_name.into_owned()),
            type_name: Cow::Owned(self.type_name.into_owned()),
            durability: self.durability,
            durability_service: self.durability_service,
            deadline: self.deadline,
            latency_budget: self.latency_budget,
            liveliness: self.liveliness,
            reliability: self.reliability,
            lifespan: self.lifespan,
            destination_order: self.destination_order,
            history: self.history,
            resource_limits: self.resource_limits,
            ownership: self.ownership,
            ownership_strength: self.ownership_strength,
            presentation: self.presentation,
            partition: self
                .partition
                .into_iter()
                .map(|p| Cow::Owned(p.into_owned()))
                .collect(),
            time_based_filter: self.time_based_filter,
            transport_priority: self.transport_priority,
        }
    }

    /// Copy `src`'s fields selected by the masks into `self` where `self`
    /// does not carry them yet. Never reduces `self`'s presence; copied heap
    /// fields come out owned.
    pub fn merge_in_missing(&mut self, src: &Plist<'_>, pmask: u64, qmask: u64) {
        let take_pp = src.pp & pmask & !self.pp;
        let take_qp = src.qp & qmask & !self.qp;
        for field in fieldops::ALL_FIELDS {
            let (is_qos, bit) = fieldops::field_bit(*field);
            let take = if is_qos { take_qp } else { take_pp };
            if take & bit != 0 {
                fieldops::copy_field(self, src, *field);
            }
        }
        self.pp |= take_pp;
        self.qp |= take_qp;
    }

    /// Masks of fields that differ between `self` and `other`, limited to
    /// the given masks. A field differs when its presence differs or both
    /// are present with unequal values.
    #[must_use]
    pub fn delta(&self, other: &Plist<'_>, pmask: u64, qmask: u64) -> (u64, u64) {
        let mut dpp = (self.pp ^ other.pp) & pmask;
        let mut dqp = (self.qp ^ other.qp) & qmask;
        for field in fieldops::ALL_FIELDS {
            let (is_qos, bit) = fieldops::field_bit(*field);
            if is_qos {
                if qmask & bit != 0 && self.qp & other.qp & bit != 0 && !fieldops::eq_field(self, other, *field) {
                    dqp |= bit;
                }
            } else if pmask & bit != 0 && self.pp & other.pp & bit != 0 && !fieldops::eq_field(self, other, *field) {
                dpp |= bit;
            }
        }
        (dpp, dqp)
    }

    /// Equality under `delta` over the full masks.
    #[must_use]
    pub fn equal(&self, other: &Plist<'_>) -> bool {
        self.delta(other, PP_ALL, QP_ALL) == (0, 0)
    }

    /// Drop the fields selected by the masks: presence cleared, values back
    /// to defaults (releasing any owned heap).
    pub fn fini_mask(&mut self, pmask: u64, qmask: u64) {
        let drop_pp = self.pp & pmask;
        let drop_qp = self.qp & qmask;
        for field in fieldops::ALL_FIELDS {
            let (is_qos, bit) = fieldops::field_bit(*field);
            let hit = if is_qos { drop_qp } else { drop_pp };
            if hit & bit != 0 {
                fieldops::reset_field(self, *field);
            }
        }
        self.pp &= !pmask;
        self.qp &= !qmask;
    }

    /// Inter-field validation; runs after a successful parse and applies
    /// equally to locally built lists.
    pub fn valid(&self) -> Result<(), PlistError> {
        if self.qp & QP_HISTORY != 0 && !self.history.is_valid() {
            return Err(PlistError::InconsistentPolicy("history depth"));
        }
        if self.qp & QP_RESOURCE_LIMITS != 0 && !self.resource_limits.is_valid() {
            return Err(PlistError::InconsistentPolicy("resource limits"));
        }
        if self.qp & QP_HISTORY != 0
            && self.qp & QP_RESOURCE_LIMITS != 0
            && !qos::consistent_history_limits(&self.history, &self.resource_limits)
        {
            return Err(PlistError::InconsistentPolicy("history vs resource limits"));
        }
        if self.qp & QP_DEADLINE != 0
            && self.qp & QP_TIME_BASED_FILTER != 0
            && self.deadline < self.time_based_filter
        {
            return Err(PlistError::InconsistentPolicy(
                "deadline below minimum separation",
            ));
        }
        if self.qp & QP_DURABILITY_SERVICE != 0 && !self.durability_service.is_valid() {
            return Err(PlistError::InconsistentPolicy("durability service"));
        }
        for (bit, d) in [
            (QP_DEADLINE, &self.deadline),
            (QP_LATENCY_BUDGET, &self.latency_budget),
            (QP_LIFESPAN, &self.lifespan),
            (QP_TIME_BASED_FILTER, &self.time_based_filter),
        ] {
            if self.qp & bit != 0 && !d.is_valid() {
                return Err(PlistError::InconsistentPolicy("negative duration"));
            }
        }
        if self.qp & QP_LIVELINESS != 0 && !self.liveliness.lease_duration.is_valid() {
            return Err(PlistError::InconsistentPolicy("liveliness lease"));
        }
        Ok(())
    }
}

impl fmt::Display for Plist<'_> {
    /// Compact `{field,field=value,...}` rendering of the present fields.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for field in fieldops::ALL_FIELDS {
            let (is_qos, bit) = fieldops::field_bit(*field);
            let present = if is_qos { self.qp & bit != 0 } else { self.pp & bit != 0 };
            if present {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                fieldops::print_field(self, *field, f)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_in_missing_neutrality() {
        let mut a = Plist::new();
        a.qp |= QP_TOPIC_NAME;
        a.topic_name = Cow::Borrowed("kept");
        let mut b = Plist::new();
        b.qp |= QP_TOPIC_NAME | QP_TYPE_NAME;
        b.topic_name = Cow::Borrowed("ignored");
        b.type_name = Cow::Borrowed("added");
        let pp_before = a.pp;
        a.merge_in_missing(&b, PP_ALL, QP_ALL);
        assert_eq!(a.topic_name, "kept");
        assert_eq!(a.type_name, "added");
        assert!(a.pp >= pp_before);
        assert!(matches!(a.type_name, Cow::Owned(_)));
    }

    #[test]
    fn test_delta_detects_value_difference() {
        let mut a = Plist::new();
        let mut b = Plist::new();
        a.qp |= QP_OWNERSHIP_STRENGTH;
        b.qp |= QP_OWNERSHIP_STRENGTH;
        a.ownership_strength = 1;
        b.ownership_strength = 2;
        let (dpp, dqp) = a.delta(&b, PP_ALL, QP_ALL);
        assert_eq!(dpp, 0);
        assert_eq!(dqp, QP_OWNERSHIP_STRENGTH);
        b.ownership_strength = 1;
        assert!(a.equal(&b));
    }

    #[test]
    fn test_unalias_clears_aliased_bits() {
        let buf = b"borrowed".to_vec();
        let mut p = Plist::new();
        p.qp |= QP_USER_DATA;
        p.user_data = Cow::Borrowed(&buf[..]);
        assert_ne!(p.aliased().1 & QP_USER_DATA, 0);
        let owned = p.unalias();
        assert_eq!(owned.aliased(), (0, 0));
        assert_eq!(&owned.user_data[..], b"borrowed");
    }

    #[test]
    fn test_fini_mask_resets_values() {
        let mut p = Plist::new();
        p.qp |= QP_OWNERSHIP_STRENGTH | QP_TOPIC_NAME;
        p.ownership_strength = 9;
        p.topic_name = Cow::Borrowed("t");
        p.fini_mask(0, QP_OWNERSHIP_STRENGTH);
        assert_eq!(p.qp, QP_TOPIC_NAME);
        assert_eq!(p.ownership_strength, 0);
        assert_eq!(p.topic_name, "t");
    }

    #[test]
    fn test_valid_deadline_vs_min_separation() {
        let mut p = Plist::new();
        p.qp |= QP_DEADLINE | QP_TIME_BASED_FILTER;
        p.deadline = WireDuration { seconds: 1, fraction: 0 };
        p.time_based_filter = WireDuration { seconds: 2, fraction: 0 };
        assert!(matches!(p.valid(), Err(PlistError::InconsistentPolicy(_))));
        p.time_based_filter = WireDuration { seconds: 1, fraction: 0 };
        assert!(p.valid().is_ok());
    }
}
