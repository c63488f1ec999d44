// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed QoS payloads carried in parameter lists.
//!
//! Only the wire representation and validity rules live here; policy
//! enforcement is the embedder's business.

use crate::types::{WireDuration, DURATION_INFINITE};

/// `LENGTH_UNLIMITED` for history depth / resource limits.
pub const LENGTH_UNLIMITED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityKind {
    #[default]
    Volatile = 0,
    TransientLocal = 1,
    Transient = 2,
    Persistent = 3,
}

impl DurabilityKind {
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Volatile),
            1 => Some(Self::TransientLocal),
            2 => Some(Self::Transient),
            3 => Some(Self::Persistent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityKind {
    #[default]
    BestEffort = 1,
    Reliable = 2,
}

/// Reliability QoS; the wire enum is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    pub max_blocking_time: WireDuration,
}

impl Default for Reliability {
    fn default() -> Self {
        Self {
            kind: ReliabilityKind::BestEffort,
            max_blocking_time: WireDuration { seconds: 0, fraction: 429496730 }, // 100 ms
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivelinessKind {
    #[default]
    Automatic = 0,
    ManualByParticipant = 1,
    ManualByTopic = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: WireDuration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryKind {
    #[default]
    KeepLast = 0,
    KeepAll = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct History {
    pub kind: HistoryKind,
    pub depth: i32,
}

impl Default for History {
    fn default() -> Self {
        Self {
            kind: HistoryKind::KeepLast,
            depth: 1,
        }
    }
}

impl History {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.kind {
            HistoryKind::KeepLast => self.depth > 0,
            HistoryKind::KeepAll => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_samples: i32,
    pub max_instances: i32,
    pub max_samples_per_instance: i32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let ok = |v: i32| v > 0 || v == LENGTH_UNLIMITED;
        ok(self.max_samples) && ok(self.max_instances) && ok(self.max_samples_per_instance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipKind {
    #[default]
    Shared = 0,
    Exclusive = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationOrderKind {
    #[default]
    ByReceptionTimestamp = 0,
    BySourceTimestamp = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationAccessScope {
    #[default]
    Instance = 0,
    Topic = 1,
    Group = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
}

/// Durability-service QoS (transient/persistent writer settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityService {
    pub service_cleanup_delay: WireDuration,
    pub history: History,
    pub resource_limits: ResourceLimits,
}

impl Default for DurabilityService {
    fn default() -> Self {
        Self {
            service_cleanup_delay: WireDuration::ZERO,
            history: History::default(),
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl DurabilityService {
    /// Older OpenSplice peers transmit an all-zero payload.
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.service_cleanup_delay == WireDuration::ZERO
            && self.history.kind == HistoryKind::KeepLast
            && self.history.depth == 0
            && self.resource_limits.max_samples == 0
            && self.resource_limits.max_instances == 0
            && self.resource_limits.max_samples_per_instance == 0
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.service_cleanup_delay.is_valid()
            && self.history.is_valid()
            && self.resource_limits.is_valid()
            && consistent_history_limits(&self.history, &self.resource_limits)
    }
}

/// History depth must fit within `max_samples_per_instance`.
#[must_use]
pub fn consistent_history_limits(history: &History, limits: &ResourceLimits) -> bool {
    if history.kind == HistoryKind::KeepLast && limits.max_samples_per_instance != LENGTH_UNLIMITED {
        history.depth <= limits.max_samples_per_instance
    } else {
        true
    }
}
