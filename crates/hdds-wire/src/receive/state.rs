// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-datagram receiver state.

use std::sync::Arc;

use crate::config::LocalParticipants;
use crate::types::{GuidPrefix, Locator, VendorId};

/// Snapshot of the addressing state the INFO submessages manipulate.
///
/// Shared copy-on-write: handlers that stash a reference (deferred
/// processing, tracing) keep the snapshot that was current for *their*
/// submessage even after a later INFO_SRC/INFO_DST replaces it.
#[derive(Debug, Clone)]
pub struct ReceiverState {
    pub src_prefix: GuidPrefix,
    pub dst_prefix: GuidPrefix,
    pub vendor: VendorId,
    pub protocol_version: (u8, u8),
    pub source_locator: Locator,
    /// The datagram addresses this participant (or everyone).
    pub for_me: bool,
}

impl ReceiverState {
    #[must_use]
    pub fn new(
        src_prefix: GuidPrefix,
        vendor: VendorId,
        protocol_version: (u8, u8),
        source_locator: Locator,
    ) -> Arc<Self> {
        Arc::new(Self {
            src_prefix,
            dst_prefix: GuidPrefix::UNKNOWN,
            vendor,
            protocol_version,
            source_locator,
            for_me: true,
        })
    }

    /// INFO_SRC: a fresh snapshot with the source rewritten.
    #[must_use]
    pub fn with_src(
        self: &Arc<Self>,
        prefix: GuidPrefix,
        vendor: VendorId,
        protocol_version: (u8, u8),
    ) -> Arc<Self> {
        let mut next = (**self).clone();
        next.src_prefix = prefix;
        next.vendor = vendor;
        next.protocol_version = protocol_version;
        Arc::new(next)
    }

    /// INFO_DST: a fresh snapshot with the destination rewritten and the
    /// "for me" verdict recomputed.
    #[must_use]
    pub fn with_dst(self: &Arc<Self>, prefix: GuidPrefix, local: &LocalParticipants) -> Arc<Self> {
        let mut next = (**self).clone();
        next.dst_prefix = prefix;
        next.for_me = local.is_for_me(&prefix);
        Arc::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Locator, VENDOR_ECLIPSE, VENDOR_HDDS};

    #[test]
    fn test_copy_on_write_preserves_old_snapshot() {
        let local = LocalParticipants::new();
        let me = GuidPrefix([5; 12]);
        local.add(me);

        let rst0 = ReceiverState::new(
            GuidPrefix([1; 12]),
            VENDOR_ECLIPSE,
            (2, 1),
            Locator::INVALID,
        );
        let stashed = Arc::clone(&rst0);

        let rst1 = rst0.with_dst(GuidPrefix([9; 12]), &local);
        assert!(!rst1.for_me);
        let rst2 = rst1.with_src(GuidPrefix([2; 12]), VENDOR_HDDS, (2, 5));
        assert_eq!(rst2.src_prefix, GuidPrefix([2; 12]));

        // The stashed snapshot kept its own view.
        assert_eq!(stashed.src_prefix, GuidPrefix([1; 12]));
        assert!(stashed.for_me);

        let rst3 = rst2.with_dst(me, &local);
        assert!(rst3.for_me);
    }
}
