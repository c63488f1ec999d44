// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine tuning knobs.
//!
//! One flat struct with conservative defaults; embedders construct it once
//! per domain and hand `Arc<Config>` to every subsystem. The few pieces of
//! runtime-mutable state (the local participant set consulted by the
//! receiver) are published separately through [`LocalParticipants`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::types::GuidPrefix;

/// Defragmenter capacity policy (spec: drop-newest / drop-oldest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefragDropMode {
    /// Reject the incoming sample when it would grow past the cap.
    DropNewest,
    /// Evict the smallest-sequence sample to make room.
    DropOldest,
}

/// Delivery coupling between the receive thread and readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Hand ordered chains to the per-writer delivery queue (default).
    Queued,
    /// Invoke the delivery handler on the receive thread, proxy-writer
    /// mutex held (strict ordering across readers of one writer).
    Synchronous,
}

/// Engine configuration; plain data, fixed after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest datagram the receive path accepts, header included.
    pub max_msg_size: u32,
    /// Slots in one receive-buffer pool (one pool per receive thread).
    pub rbuf_slots: u32,
    /// Per-proxy-writer defragmenter sample cap for reliable writers.
    pub defrag_reliable_max_samples: u32,
    /// Per-proxy-writer defragmenter sample cap for best-effort writers.
    pub defrag_unreliable_max_samples: u32,
    /// Primary reorderer cap (per proxy writer).
    pub primary_reorder_max_samples: u32,
    /// Secondary reorderer cap (per out-of-sync reader).
    pub secondary_reorder_max_samples: u32,
    /// Delivery queue advisory capacity.
    pub delivery_queue_max_samples: u32,
    pub delivery_mode: DeliveryMode,
    /// Delay before a scheduled ACKNACK responding to a HEARTBEAT fires.
    pub nack_delay: Duration,
    /// Delay before a HEARTBEAT answering an ACKNACK with missing data fires.
    pub nack_response_delay: Duration,
    /// Window within which retransmits for the same sample are merged.
    pub rexmit_merge_window: Duration,
    /// Upper bound on bytes retransmitted per NACKFRAG burst.
    pub rexmit_burst_size_limit: u32,
    /// Fragment size used when (re)transmitting DATA_FRAG.
    pub fragment_size: u32,
    /// Accept out-of-window ACK/HB counts after this much peer silence.
    pub ack_silence_threshold: Duration,
    /// Only the vendors known to do so may send pre-emptive zero-base ACKs.
    pub strict_acknack: bool,
    /// Packet size cap for the transmit packer.
    pub max_packet_size: u32,
    /// Background send queue watermarks (entries).
    pub sendq_high_watermark: u32,
    pub sendq_low_watermark: u32,
    /// GC lease-expiry check period.
    pub lease_check_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_msg_size: 14720,
            rbuf_slots: 32,
            defrag_reliable_max_samples: 16,
            defrag_unreliable_max_samples: 4,
            primary_reorder_max_samples: 128,
            secondary_reorder_max_samples: 16,
            delivery_queue_max_samples: 256,
            delivery_mode: DeliveryMode::Queued,
            nack_delay: Duration::from_millis(10),
            nack_response_delay: Duration::from_millis(200),
            rexmit_merge_window: Duration::from_millis(5),
            rexmit_burst_size_limit: 1024 * 1024,
            fragment_size: 1024,
            ack_silence_threshold: Duration::from_millis(500),
            strict_acknack: true,
            max_packet_size: 14720,
            sendq_high_watermark: 512,
            sendq_low_watermark: 384,
            lease_check_interval: Duration::from_millis(100),
        }
    }
}

/// The set of local participant prefixes, consulted on every datagram to
/// decide whether an INFO_DST-addressed message is "for me".
///
/// Readers grab a snapshot per datagram; participant churn publishes a new
/// `Arc` without blocking receive threads.
#[derive(Debug, Default)]
pub struct LocalParticipants {
    prefixes: ArcSwap<Vec<GuidPrefix>>,
}

impl LocalParticipants {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefixes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add(&self, prefix: GuidPrefix) {
        let mut v = (**self.prefixes.load()).clone();
        if !v.contains(&prefix) {
            v.push(prefix);
            self.prefixes.store(Arc::new(v));
        }
    }

    pub fn remove(&self, prefix: &GuidPrefix) {
        let mut v = (**self.prefixes.load()).clone();
        v.retain(|p| p != prefix);
        self.prefixes.store(Arc::new(v));
    }

    /// A zero destination prefix addresses every participant.
    #[must_use]
    pub fn is_for_me(&self, dst: &GuidPrefix) -> bool {
        dst.is_unknown() || self.prefixes.load().contains(dst)
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<GuidPrefix>> {
        self.prefixes.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_coherent() {
        let c = Config::default();
        assert!(c.sendq_low_watermark < c.sendq_high_watermark);
        assert!(c.max_packet_size <= c.max_msg_size);
        assert_eq!(c.ack_silence_threshold, Duration::from_millis(500));
    }

    #[test]
    fn test_local_participants_for_me() {
        let lp = LocalParticipants::new();
        let p = GuidPrefix([1; 12]);
        assert!(lp.is_for_me(&GuidPrefix::UNKNOWN));
        assert!(!lp.is_for_me(&p));
        lp.add(p);
        assert!(lp.is_for_me(&p));
        lp.remove(&p);
        assert!(!lp.is_for_me(&p));
    }
}
