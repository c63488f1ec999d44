// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-field operations behind `merge_in_missing`, `delta`, `fini_mask` and
//! `Display`. One exhaustive match per operation keeps the table honest:
//! a new field that is not wired through every operation fails to compile.

use std::borrow::Cow;
use std::fmt;

use super::pid::Field;
use super::*;

/// Every field, in canonical (table) order.
pub(super) static ALL_FIELDS: &[Field] = &[
    Field::ProtocolVersion,
    Field::VendorId,
    Field::ParticipantGuid,
    Field::EndpointGuid,
    Field::GroupGuid,
    Field::BuiltinEndpointSet,
    Field::DomainId,
    Field::DomainTag,
    Field::EntityName,
    Field::ExpectsInlineQos,
    Field::Keyhash,
    Field::StatusInfo,
    Field::CoherentSet,
    Field::TypeInformation,
    Field::MetatrafficUnicastLocator,
    Field::MetatrafficMulticastLocator,
    Field::DefaultUnicastLocator,
    Field::DefaultMulticastLocator,
    Field::UnicastLocator,
    Field::MulticastLocator,
    Field::AdlinkEntityFactory,
    Field::CycloneReceiveBufferSize,
    Field::UserData,
    Field::TopicName,
    Field::TypeName,
    Field::Durability,
    Field::DurabilityService,
    Field::Deadline,
    Field::LatencyBudget,
    Field::Liveliness,
    Field::Reliability,
    Field::Lifespan,
    Field::DestinationOrder,
    Field::History,
    Field::ResourceLimits,
    Field::Ownership,
    Field::OwnershipStrength,
    Field::Presentation,
    Field::Partition,
    Field::TimeBasedFilter,
    Field::TransportPriority,
];

/// Map a field to (is-qos, presence bit). `ParticipantLeaseDuration` maps to
/// the liveliness bit: it is the participant-context spelling of that field.
pub(super) fn field_bit(field: Field) -> (bool, u64) {
    match field {
        Field::ProtocolVersion => (false, PP_PROTOCOL_VERSION),
        Field::VendorId => (false, PP_VENDORID),
        Field::ParticipantGuid => (false, PP_PARTICIPANT_GUID),
        Field::EndpointGuid => (false, PP_ENDPOINT_GUID),
        Field::GroupGuid => (false, PP_GROUP_GUID),
        Field::BuiltinEndpointSet => (false, PP_BUILTIN_ENDPOINT_SET),
        Field::DomainId => (false, PP_DOMAIN_ID),
        Field::DomainTag => (false, PP_DOMAIN_TAG),
        Field::EntityName => (false, PP_ENTITY_NAME),
        Field::ExpectsInlineQos => (false, PP_EXPECTS_INLINE_QOS),
        Field::Keyhash => (false, PP_KEYHASH),
        Field::StatusInfo => (false, PP_STATUSINFO),
        Field::CoherentSet => (false, PP_COHERENT_SET),
        Field::TypeInformation => (false, PP_TYPE_INFORMATION),
        Field::MetatrafficUnicastLocator => (false, PP_METATRAFFIC_UNICAST_LOCATOR),
        Field::MetatrafficMulticastLocator => (false, PP_METATRAFFIC_MULTICAST_LOCATOR),
        Field::DefaultUnicastLocator => (false, PP_DEFAULT_UNICAST_LOCATOR),
        Field::DefaultMulticastLocator => (false, PP_DEFAULT_MULTICAST_LOCATOR),
        Field::UnicastLocator => (false, PP_UNICAST_LOCATOR),
        Field::MulticastLocator => (false, PP_MULTICAST_LOCATOR),
        Field::AdlinkEntityFactory => (false, PP_ADLINK_ENTITY_FACTORY),
        Field::CycloneReceiveBufferSize => (false, PP_CYCLONE_RECEIVE_BUFFER_SIZE),
        Field::ParticipantLeaseDuration | Field::Liveliness => (true, QP_LIVELINESS),
        Field::UserData => (true, QP_USER_DATA),
        Field::TopicName => (true, QP_TOPIC_NAME),
        Field::TypeName => (true, QP_TYPE_NAME),
        Field::Durability => (true, QP_DURABILITY),
        Field::DurabilityService => (true, QP_DURABILITY_SERVICE),
        Field::Deadline => (true, QP_DEADLINE),
        Field::LatencyBudget => (true, QP_LATENCY_BUDGET),
        Field::Reliability => (true, QP_RELIABILITY),
        Field::Lifespan => (true, QP_LIFESPAN),
        Field::DestinationOrder => (true, QP_DESTINATION_ORDER),
        Field::History => (true, QP_HISTORY),
        Field::ResourceLimits => (true, QP_RESOURCE_LIMITS),
        Field::Ownership => (true, QP_OWNERSHIP),
        Field::OwnershipStrength => (true, QP_OWNERSHIP_STRENGTH),
        Field::Presentation => (true, QP_PRESENTATION),
        Field::Partition => (true, QP_PARTITION),
        Field::TimeBasedFilter => (true, QP_TIME_BASED_FILTER),
        Field::TransportPriority => (true, QP_TRANSPORT_PRIORITY),
    }
}

fn owned_str(src: &Cow<'_, str>) -> Cow<'static, str> {
    Cow::Owned(src.clone().into_owned())
}

fn owned_bytes(src: &Cow<'_, [u8]>) -> Cow<'static, [u8]> {
    Cow::Owned(src.clone().into_owned())
}

/// Copy one field value from `src` into `dst` (owned; never borrows from
/// `src`'s buffer).
pub(super) fn copy_field(dst: &mut Plist<'_>, src: &Plist<'_>, field: Field) {
    match field {
        Field::ProtocolVersion => dst.protocol_version = src.protocol_version,
        Field::VendorId => dst.vendorid = src.vendorid,
        Field::ParticipantGuid => dst.participant_guid = src.participant_guid,
        Field::EndpointGuid => dst.endpoint_guid = src.endpoint_guid,
        Field::GroupGuid => dst.group_guid = src.group_guid,
        Field::BuiltinEndpointSet => dst.builtin_endpoint_set = src.builtin_endpoint_set,
        Field::DomainId => dst.domain_id = src.domain_id,
        Field::DomainTag => dst.domain_tag = owned_str(&src.domain_tag),
        Field::EntityName => dst.entity_name = owned_str(&src.entity_name),
        Field::ExpectsInlineQos => dst.expects_inline_qos = src.expects_inline_qos,
        Field::Keyhash => dst.keyhash = src.keyhash,
        Field::StatusInfo => dst.statusinfo = src.statusinfo,
        Field::CoherentSet => dst.coherent_set = src.coherent_set,
        Field::TypeInformation => dst.type_information = owned_bytes(&src.type_information),
        Field::MetatrafficUnicastLocator => {
            dst.metatraffic_unicast_locators = src.metatraffic_unicast_locators.clone();
        }
        Field::MetatrafficMulticastLocator => {
            dst.metatraffic_multicast_locators = src.metatraffic_multicast_locators.clone();
        }
        Field::DefaultUnicastLocator => {
            dst.default_unicast_locators = src.default_unicast_locators.clone();
        }
        Field::DefaultMulticastLocator => {
            dst.default_multicast_locators = src.default_multicast_locators.clone();
        }
        Field::UnicastLocator => dst.unicast_locators = src.unicast_locators.clone(),
        Field::MulticastLocator => dst.multicast_locators = src.multicast_locators.clone(),
        Field::AdlinkEntityFactory => dst.adlink_entity_factory = src.adlink_entity_factory,
        Field::CycloneReceiveBufferSize => {
            dst.cyclone_receive_buffer_size = src.cyclone_receive_buffer_size;
        }
        Field::ParticipantLeaseDuration | Field::Liveliness => dst.liveliness = src.liveliness,
        Field::UserData => dst.user_data = owned_bytes(&src.user_data),
        Field::TopicName => dst.topic_name = owned_str(&src.topic_name),
        Field::TypeName => dst.type_name = owned_str(&src.type_name),
        Field::Durability => dst.durability = src.durability,
        Field::DurabilityService => dst.durability_service = src.durability_service,
        Field::Deadline => dst.deadline = src.deadline,
        Field::LatencyBudget => dst.latency_budget = src.latency_budget,
        Field::Reliability => dst.reliability = src.reliability,
        Field::Lifespan => dst.lifespan = src.lifespan,
        Field::DestinationOrder => dst.destination_order = src.destination_order,
        Field::History => dst.history = src.history,
        Field::ResourceLimits => dst.resource_limits = src.resource_limits,
        Field::Ownership => dst.ownership = src.ownership,
        Field::OwnershipStrength => dst.ownership_strength = src.ownership_strength,
        Field::Presentation => dst.presentation = src.presentation,
        Field::Partition => {
            dst.partition = src
                .partition
                .iter()
                .map(|p| Cow::Owned(p.clone().into_owned()))
                .collect();
        }
        Field::TimeBasedFilter => dst.time_based_filter = src.time_based_filter,
        Field::TransportPriority => dst.transport_priority = src.transport_priority,
    }
}

/// Value equality for one field (presence handled by the caller).
pub(super) fn eq_field(a: &Plist<'_>, b: &Plist<'_>, field: Field) -> bool {
    match field {
        Field::ProtocolVersion => a.protocol_version == b.protocol_version,
        Field::VendorId => a.vendorid == b.vendorid,
        Field::ParticipantGuid => a.participant_guid == b.participant_guid,
        Field::EndpointGuid => a.endpoint_guid == b.endpoint_guid,
        Field::GroupGuid => a.group_guid == b.group_guid,
        Field::BuiltinEndpointSet => a.builtin_endpoint_set == b.builtin_endpoint_set,
        Field::DomainId => a.domain_id == b.domain_id,
        Field::DomainTag => a.domain_tag == b.domain_tag,
        Field::EntityName => a.entity_name == b.entity_name,
        Field::ExpectsInlineQos => a.expects_inline_qos == b.expects_inline_qos,
        Field::Keyhash => a.keyhash == b.keyhash,
        Field::StatusInfo => a.statusinfo == b.statusinfo,
        Field::CoherentSet => a.coherent_set == b.coherent_set,
        Field::TypeInformation => a.type_information == b.type_information,
        Field::MetatrafficUnicastLocator => {
            a.metatraffic_unicast_locators == b.metatraffic_unicast_locators
        }
        Field::MetatrafficMulticastLocator => {
            a.metatraffic_multicast_locators == b.metatraffic_multicast_locators
        }
        Field::DefaultUnicastLocator => a.default_unicast_locators == b.default_unicast_locators,
        Field::DefaultMulticastLocator => {
            a.default_multicast_locators == b.default_multicast_locators
        }
        Field::UnicastLocator => a.unicast_locators == b.unicast_locators,
        Field::MulticastLocator => a.multicast_locators == b.multicast_locators,
        Field::AdlinkEntityFactory => a.adlink_entity_factory == b.adlink_entity_factory,
        Field::CycloneReceiveBufferSize => {
            a.cyclone_receive_buffer_size == b.cyclone_receive_buffer_size
        }
        Field::ParticipantLeaseDuration | Field::Liveliness => a.liveliness == b.liveliness,
        Field::UserData => a.user_data == b.user_data,
        Field::TopicName => a.topic_name == b.topic_name,
        Field::TypeName => a.type_name == b.type_name,
        Field::Durability => a.durability == b.durability,
        Field::DurabilityService => a.durability_service == b.durability_service,
        Field::Deadline => a.deadline == b.deadline,
        Field::LatencyBudget => a.latency_budget == b.latency_budget,
        Field::Reliability => a.reliability == b.reliability,
        Field::Lifespan => a.lifespan == b.lifespan,
        Field::DestinationOrder => a.destination_order == b.destination_order,
        Field::History => a.history == b.history,
        Field::ResourceLimits => a.resource_limits == b.resource_limits,
        Field::Ownership => a.ownership == b.ownership,
        Field::OwnershipStrength => a.ownership_strength == b.ownership_strength,
        Field::Presentation => a.presentation == b.presentation,
        Field::Partition => a.partition == b.partition,
        Field::TimeBasedFilter => a.time_based_filter == b.time_based_filter,
        Field::TransportPriority => a.transport_priority == b.transport_priority,
    }
}

/// Reset one field to its default value (presence handled by the caller).
pub(super) fn reset_field(p: &mut Plist<'_>, field: Field) {
    let d = Plist::new();
    copy_field(p, &d, field);
    // Locator lists and partitions shrink to empty via the copy; Cow fields
    // become owned-empty, which is indistinguishable from default.
}

/// Render one present field for `Display`.
pub(super) fn print_field(p: &Plist<'_>, field: Field, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match field {
        Field::ProtocolVersion => write!(
            f,
            "protocol_version={}.{}",
            p.protocol_version.0, p.protocol_version.1
        ),
        Field::VendorId => write!(f, "vendorid={}", p.vendorid),
        Field::ParticipantGuid => write!(f, "participant_guid={}", p.participant_guid),
        Field::EndpointGuid => write!(f, "endpoint_guid={}", p.endpoint_guid),
        Field::GroupGuid => write!(f, "group_guid={}", p.group_guid),
        Field::BuiltinEndpointSet => write!(f, "builtin_endpoints=0x{:x}", p.builtin_endpoint_set),
        Field::DomainId => write!(f, "domain_id={}", p.domain_id),
        Field::DomainTag => write!(f, "domain_tag={:?}", p.domain_tag),
        Field::EntityName => write!(f, "entity_name={:?}", p.entity_name),
        Field::ExpectsInlineQos => write!(f, "expects_inline_qos={}", p.expects_inline_qos),
        Field::Keyhash => {
            write!(f, "keyhash=")?;
            for b in &p.keyhash {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
        Field::StatusInfo => write!(f, "statusinfo=0x{:x}", p.statusinfo),
        Field::CoherentSet => write!(f, "coherent_set={}", p.coherent_set),
        Field::TypeInformation => write!(f, "type_information=<{} bytes>", p.type_information.len()),
        Field::MetatrafficUnicastLocator => {
            write!(f, "metatraffic_unicast={:?}", lstr(&p.metatraffic_unicast_locators))
        }
        Field::MetatrafficMulticastLocator => {
            write!(f, "metatraffic_multicast={:?}", lstr(&p.metatraffic_multicast_locators))
        }
        Field::DefaultUnicastLocator => {
            write!(f, "default_unicast={:?}", lstr(&p.default_unicast_locators))
        }
        Field::DefaultMulticastLocator => {
            write!(f, "default_multicast={:?}", lstr(&p.default_multicast_locators))
        }
        Field::UnicastLocator => write!(f, "unicast={:?}", lstr(&p.unicast_locators)),
        Field::MulticastLocator => write!(f, "multicast={:?}", lstr(&p.multicast_locators)),
        Field::AdlinkEntityFactory => write!(f, "adlink_entity_factory={}", p.adlink_entity_factory),
        Field::CycloneReceiveBufferSize => {
            write!(f, "cyclone_receive_buffer_size={}", p.cyclone_receive_buffer_size)
        }
        Field::ParticipantLeaseDuration | Field::Liveliness => write!(
            f,
            "liveliness={:?}/{:?}",
            p.liveliness.kind, p.liveliness.lease_duration
        ),
        Field::UserData => write!(f, "user_data=<{} bytes>", p.user_data.len()),
        Field::TopicName => write!(f, "topic={:?}", p.topic_name),
        Field::TypeName => write!(f, "type={:?}", p.type_name),
        Field::Durability => write!(f, "durability={:?}", p.durability),
        Field::DurabilityService => write!(f, "durability_service={:?}", p.durability_service),
        Field::Deadline => write!(f, "deadline={:?}", p.deadline),
        Field::LatencyBudget => write!(f, "latency_budget={:?}", p.latency_budget),
        Field::Reliability => write!(f, "reliability={:?}", p.reliability.kind),
        Field::Lifespan => write!(f, "lifespan={:?}", p.lifespan),
        Field::DestinationOrder => write!(f, "destination_order={:?}", p.destination_order),
        Field::History => write!(f, "history={:?}/{}", p.history.kind, p.history.depth),
        Field::ResourceLimits => write!(f, "resource_limits={:?}", p.resource_limits),
        Field::Ownership => write!(f, "ownership={:?}", p.ownership),
        Field::OwnershipStrength => write!(f, "ownership_strength={}", p.ownership_strength),
        Field::Presentation => write!(f, "presentation={:?}", p.presentation),
        Field::Partition => write!(f, "partition={:?}", p.partition),
        Field::TimeBasedFilter => write!(f, "time_based_filter={:?}", p.time_based_filter),
        Field::TransportPriority => write!(f, "transport_priority={}", p.transport_priority),
    }
}

fn lstr(locs: &[crate::types::Locator]) -> Vec<String> {
    locs.iter().map(ToString::to_string).collect()
}
