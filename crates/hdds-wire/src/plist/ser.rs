// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serialization of a [`Plist`] into a `PL_CDR` stream.

use crate::types::Locator;

use super::pid::{self, Field};
use super::{fieldops, Plist, PlistContext};

struct Writer<'o> {
    out: &'o mut Vec<u8>,
    be: bool,
}

impl Writer<'_> {
    fn u16(&mut self, v: u16) {
        if self.be {
            self.out.extend_from_slice(&v.to_be_bytes());
        } else {
            self.out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn u32(&mut self, v: u32) {
        if self.be {
            self.out.extend_from_slice(&v.to_be_bytes());
        } else {
            self.out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }

    fn raw(&mut self, b: &[u8]) {
        self.out.extend_from_slice(b);
    }

    fn duration(&mut self, d: &crate::types::WireDuration) {
        self.i32(d.seconds);
        self.u32(d.fraction);
    }

    fn string(&mut self, s: &str) {
        self.u32(s.len() as u32 + 1);
        self.raw(s.as_bytes());
        self.out.push(0);
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    fn octet_seq(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.raw(b);
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    fn locator(&mut self, l: &Locator) {
        self.i32(l.kind.to_wire());
        self.u32(l.port);
        self.raw(&l.address);
    }
}

/// Append a parameter `{pid, body}` with the body produced by `emit`,
/// padding to 4 and patching the length afterwards.
fn param(w: &mut Writer<'_>, pid: u16, emit: impl FnOnce(&mut Writer<'_>)) {
    w.u16(pid);
    let len_at = w.out.len();
    w.u16(0);
    let body_at = w.out.len();
    emit(w);
    while (w.out.len() - body_at) % 4 != 0 {
        w.out.push(0);
    }
    let len = (w.out.len() - body_at) as u16;
    let bytes = if w.be { len.to_be_bytes() } else { len.to_le_bytes() };
    w.out[len_at..len_at + 2].copy_from_slice(&bytes);
}

/// Terminate a parameter list.
pub fn emit_sentinel(out: &mut Vec<u8>, be: bool) {
    let mut w = Writer { out, be };
    w.u16(pid::PID_SENTINEL);
    w.u16(0);
}

impl Plist<'_> {
    /// Serialize the fields selected by the masks, in table order, without
    /// the trailing sentinel (the message builder appends it so several
    /// fragments can share one list).
    pub fn add_to_msg(&self, out: &mut Vec<u8>, pmask: u64, qmask: u64, be: bool, context: PlistContext) {
        let mut w = Writer { out, be };
        for field in fieldops::ALL_FIELDS {
            let (is_qos, bit) = fieldops::field_bit(*field);
            let carried = if is_qos {
                self.qp & qmask & bit != 0
            } else {
                self.pp & pmask & bit != 0
            };
            if carried {
                self.ser_field(&mut w, *field, context);
            }
        }
    }

    fn ser_field(&self, w: &mut Writer<'_>, field: Field, context: PlistContext) {
        match field {
            Field::ProtocolVersion => param(w, pid::pid_for(field), |w| {
                w.raw(&[self.protocol_version.0, self.protocol_version.1]);
            }),
            Field::VendorId => param(w, pid::pid_for(field), |w| w.raw(&self.vendorid.0)),
            Field::ParticipantGuid => {
                param(w, pid::pid_for(field), |w| w.raw(&self.participant_guid.to_bytes()));
            }
            Field::EndpointGuid => {
                param(w, pid::pid_for(field), |w| w.raw(&self.endpoint_guid.to_bytes()));
            }
            Field::GroupGuid => param(w, pid::pid_for(field), |w| w.raw(&self.group_guid.to_bytes())),
            Field::BuiltinEndpointSet => {
                param(w, pid::pid_for(field), |w| w.u32(self.builtin_endpoint_set));
            }
            Field::DomainId => param(w, pid::pid_for(field), |w| w.u32(self.domain_id)),
            Field::DomainTag => param(w, pid::pid_for(field), |w| w.string(&self.domain_tag)),
            Field::EntityName => param(w, pid::pid_for(field), |w| w.string(&self.entity_name)),
            Field::ExpectsInlineQos => param(w, pid::pid_for(field), |w| {
                w.raw(&[u8::from(self.expects_inline_qos)]);
            }),
            Field::Keyhash => param(w, pid::pid_for(field), |w| w.raw(&self.keyhash)),
            Field::StatusInfo => param(w, pid::pid_for(field), |w| {
                // Big-endian flag word, independent of the list byte order.
                w.raw(&self.statusinfo.to_be_bytes());
            }),
            Field::CoherentSet => param(w, pid::pid_for(field), |w| {
                let (h, l) = self.coherent_set.to_wire();
                w.i32(h);
                w.u32(l);
            }),
            Field::TypeInformation => {
                param(w, pid::pid_for(field), |w| w.octet_seq(&self.type_information));
            }
            Field::MetatrafficUnicastLocator => {
                locator_params(w, pid::pid_for(field), &self.metatraffic_unicast_locators);
            }
            Field::MetatrafficMulticastLocator => {
                locator_params(w, pid::pid_for(field), &self.metatraffic_multicast_locators);
            }
            Field::DefaultUnicastLocator => {
                locator_params(w, pid::pid_for(field), &self.default_unicast_locators);
            }
            Field::DefaultMulticastLocator => {
                locator_params(w, pid::pid_for(field), &self.default_multicast_locators);
            }
            Field::UnicastLocator => locator_params(w, pid::pid_for(field), &self.unicast_locators),
            Field::MulticastLocator => {
                locator_params(w, pid::pid_for(field), &self.multicast_locators);
            }
            Field::AdlinkEntityFactory => {
                param(w, pid::pid_for(field), |w| w.u32(self.adlink_entity_factory));
            }
            Field::CycloneReceiveBufferSize => {
                param(w, pid::pid_for(field), |w| w.u32(self.cyclone_receive_buffer_size));
            }
            Field::ParticipantLeaseDuration | Field::Liveliness => {
                // Context picks the wire spelling of the one liveliness field.
                if context == PlistContext::Participant {
                    param(w, pid::PID_PARTICIPANT_LEASE_DURATION, |w| {
                        w.duration(&self.liveliness.lease_duration);
                    });
                } else {
                    param(w, pid::PID_LIVELINESS, |w| {
                        w.u32(self.liveliness.kind as u32);
                        w.duration(&self.liveliness.lease_duration);
                    });
                }
            }
            Field::UserData => param(w, pid::pid_for(field), |w| w.octet_seq(&self.user_data)),
            Field::TopicName => param(w, pid::pid_for(field), |w| w.string(&self.topic_name)),
            Field::TypeName => param(w, pid::pid_for(field), |w| w.string(&self.type_name)),
            Field::Durability => param(w, pid::pid_for(field), |w| w.u32(self.durability as u32)),
            Field::DurabilityService => param(w, pid::pid_for(field), |w| {
                let ds = &self.durability_service;
                w.duration(&ds.service_cleanup_delay);
                w.u32(ds.history.kind as u32);
                w.i32(ds.history.depth);
                w.i32(ds.resource_limits.max_samples);
                w.i32(ds.resource_limits.max_instances);
                w.i32(ds.resource_limits.max_samples_per_instance);
            }),
            Field::Deadline => param(w, pid::pid_for(field), |w| w.duration(&self.deadline)),
            Field::LatencyBudget => param(w, pid::pid_for(field), |w| w.duration(&self.latency_budget)),
            Field::Reliability => param(w, pid::pid_for(field), |w| {
                w.u32(self.reliability.kind as u32);
                w.duration(&self.reliability.max_blocking_time);
            }),
            Field::Lifespan => param(w, pid::pid_for(field), |w| w.duration(&self.lifespan)),
            Field::DestinationOrder => {
                param(w, pid::pid_for(field), |w| w.u32(self.destination_order as u32));
            }
            Field::History => param(w, pid::pid_for(field), |w| {
                w.u32(self.history.kind as u32);
                w.i32(self.history.depth);
            }),
            Field::ResourceLimits => param(w, pid::pid_for(field), |w| {
                w.i32(self.resource_limits.max_samples);
                w.i32(self.resource_limits.max_instances);
                w.i32(self.resource_limits.max_samples_per_instance);
            }),
            Field::Ownership => param(w, pid::pid_for(field), |w| w.u32(self.ownership as u32)),
            Field::OwnershipStrength => {
                param(w, pid::pid_for(field), |w| w.i32(self.ownership_strength));
            }
            Field::Presentation => param(w, pid::pid_for(field), |w| {
                w.u32(self.presentation.access_scope as u32);
                w.raw(&[
                    u8::from(self.presentation.coherent_access),
                    u8::from(self.presentation.ordered_access),
                ]);
            }),
            Field::Partition => param(w, pid::pid_for(field), |w| {
                w.u32(self.partition.len() as u32);
                for p in &self.partition {
                    w.string(p);
                }
            }),
            Field::TimeBasedFilter => {
                param(w, pid::pid_for(field), |w| w.duration(&self.time_based_filter));
            }
            Field::TransportPriority => {
                param(w, pid::pid_for(field), |w| w.i32(self.transport_priority));
            }
        }
    }
}

fn locator_params(w: &mut Writer<'_>, pid: u16, locs: &[Locator]) {
    for l in locs {
        param(w, pid, |w| w.locator(l));
    }
}

#[cfg(test)]
mod tests {
    use super::super::{init_from_msg, ParseParams, PlistContext, PP_ALL, QP_ALL};
    use super::*;
    use crate::plist::qos::{Liveliness, LivelinessKind, Reliability, ReliabilityKind};
    use crate::plist::{
        PP_DEFAULT_UNICAST_LOCATOR, PP_ENTITY_NAME, PP_PARTICIPANT_GUID, QP_LIVELINESS,
        QP_PARTITION, QP_RELIABILITY, QP_TOPIC_NAME, QP_USER_DATA,
    };
    use crate::types::{EntityId, Guid, GuidPrefix, WireDuration};
    use std::borrow::Cow;

    fn sample_plist() -> Plist<'static> {
        let mut p = Plist::new();
        p.pp = PP_PARTICIPANT_GUID | PP_ENTITY_NAME | PP_DEFAULT_UNICAST_LOCATOR;
        p.participant_guid = Guid::new(GuidPrefix([9; 12]), EntityId([0, 0, 1, 0xc1]));
        p.entity_name = Cow::Borrowed("node_a");
        p.default_unicast_locators = vec![
            crate::types::Locator::udpv4("192.168.0.9".parse().unwrap(), 7411),
            crate::types::Locator::udpv4("10.9.0.9".parse().unwrap(), 7411),
        ];
        p.qp = QP_TOPIC_NAME | QP_RELIABILITY | QP_USER_DATA | QP_PARTITION | QP_LIVELINESS;
        p.topic_name = Cow::Borrowed("sensors/imu");
        p.reliability = Reliability {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: WireDuration { seconds: 0, fraction: 1234 },
        };
        p.user_data = Cow::Borrowed(b"tag:42");
        p.partition = vec![Cow::Borrowed("left"), Cow::Borrowed("right")];
        p.liveliness = Liveliness {
            kind: LivelinessKind::ManualByTopic,
            lease_duration: WireDuration { seconds: 7, fraction: 0 },
        };
        p
    }

    fn roundtrip(p: &Plist<'_>, be: bool, ctx: PlistContext) {
        let mut out = Vec::new();
        p.add_to_msg(&mut out, PP_ALL, QP_ALL, be, ctx);
        emit_sentinel(&mut out, be);
        let params = ParseParams {
            swap: be,
            context: ctx,
            ..ParseParams::default()
        };
        let (q, consumed) = init_from_msg(&out, &params).expect("reparse");
        assert_eq!(consumed, out.len());
        assert!(p.equal(&q), "roundtrip mismatch:\n  {}\n  {}", p, q);
    }

    #[test]
    fn test_roundtrip_little_endian() {
        roundtrip(&sample_plist(), false, PlistContext::Endpoint);
    }

    #[test]
    fn test_roundtrip_big_endian() {
        roundtrip(&sample_plist(), true, PlistContext::Endpoint);
    }

    #[test]
    fn test_roundtrip_participant_lease_spelling() {
        let mut p = Plist::new();
        p.qp = QP_LIVELINESS;
        p.liveliness = Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: WireDuration { seconds: 100, fraction: 0 },
        };
        // Participant context flattens liveliness into the lease-duration
        // pid; reparse restores the same field.
        let mut out = Vec::new();
        p.add_to_msg(&mut out, PP_ALL, QP_ALL, false, PlistContext::Participant);
        emit_sentinel(&mut out, false);
        assert_eq!(
            u16::from_le_bytes([out[0], out[1]]),
            pid::PID_PARTICIPANT_LEASE_DURATION
        );
        roundtrip(&p, false, PlistContext::Participant);
    }

    #[test]
    fn test_masked_serialization_subsets() {
        let p = sample_plist();
        let mut out = Vec::new();
        p.add_to_msg(&mut out, 0, QP_TOPIC_NAME, false, PlistContext::Endpoint);
        emit_sentinel(&mut out, false);
        let (q, _) = init_from_msg(&out, &ParseParams::default()).unwrap();
        assert_eq!(q.qp, QP_TOPIC_NAME);
        assert_eq!(q.pp, 0);
        assert_eq!(q.topic_name, p.topic_name);
    }
}
