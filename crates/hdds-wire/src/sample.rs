// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample descriptors flowing from defragmentation to delivery.

use crate::rbuf::FragChain;
use crate::types::{SeqNr, WireTime, TIME_INVALID};

/// Everything the receive path learned about one sample before payload
/// deserialization: identity, size, and the quickscanned inline-QoS facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub seq: SeqNr,
    /// Serialized payload size; for fragmented samples the advertised total.
    pub size: u32,
    /// Fragment size, 0 for unfragmented DATA.
    pub fragsize: u32,
    /// Source timestamp from the preceding INFO_TS, or invalid.
    pub timestamp: WireTime,
    /// Statusinfo flag word (dispose/unregister bits).
    pub statusinfo: u32,
    /// Inline QoS carried more than statusinfo/keyhash.
    pub complex_qos: bool,
    /// Payload was serialized in the non-native byte order.
    pub byteswap: bool,
}

impl SampleInfo {
    #[must_use]
    pub fn new(seq: SeqNr, size: u32) -> Self {
        Self {
            seq,
            size,
            fragsize: 0,
            timestamp: TIME_INVALID,
            statusinfo: 0,
            complex_qos: false,
            byteswap: false,
        }
    }

    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.fragsize != 0
    }
}

/// A complete sample: its info plus the descriptor chain covering
/// `[0, info.size)` in order.
#[derive(Debug, Clone)]
pub struct Rsample {
    pub info: SampleInfo,
    pub fragchain: FragChain,
}

impl Rsample {
    #[must_use]
    pub fn new(info: SampleInfo, fragchain: FragChain) -> Self {
        Self { info, fragchain }
    }

    /// Cheap duplicate for admission into a secondary reorderer: clones the
    /// descriptor handles, sharing the underlying fragments and their
    /// reference accounting.
    #[must_use]
    pub fn dup_first(&self) -> Rsample {
        self.clone()
    }

    /// Assemble the serialized payload by walking the chain.
    ///
    /// Test and diagnostic helper; delivery handlers normally iterate the
    /// chain to avoid the copy.
    #[must_use]
    pub fn copy_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.info.size as usize);
        for rdata in &self.fragchain {
            let b = rdata.payload_bytes();
            // Overlapping fragments contribute only their fresh suffix.
            let skip = (out.len() as u32).saturating_sub(rdata.min()) as usize;
            if skip < b.len() {
                out.extend_from_slice(&b[skip..]);
            }
        }
        out.truncate(self.info.size as usize);
        out
    }
}
