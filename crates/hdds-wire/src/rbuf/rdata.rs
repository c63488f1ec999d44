// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Received-data descriptors: lightweight handles onto one DATA/DATAFRAG
//! submessage inside an [`Rmsg`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::rbuf::rmsg::Rmsg;

struct RdataInner {
    rmsg: Arc<Rmsg>,
    /// Byte interval of the sample covered by this descriptor.
    min: u32,
    maxp1: u32,
    /// Offset of the submessage header within the datagram.
    submsg_off: u32,
    /// Offset of the serialized payload bytes within the datagram.
    payload_off: u32,
    /// Offset of the inline-QoS keyhash, when one was present.
    keyhash_off: Option<u32>,
    /// Provisional reference booked at most once per descriptor.
    bias_added: AtomicBool,
}

/// Handle to a received DATA/DATAFRAG submessage.
///
/// Clones share the descriptor; the shared descriptor holds the owning
/// [`Rmsg`] alive through the bias protocol, not through this `Arc` alone.
#[derive(Clone)]
pub struct Rdata {
    inner: Arc<RdataInner>,
}

/// A forward chain of descriptors covering one complete sample in order.
pub type FragChain = Vec<Rdata>;

impl Rdata {
    #[must_use]
    pub fn new(
        rmsg: &Arc<Rmsg>,
        min: u32,
        maxp1: u32,
        submsg_off: u32,
        payload_off: u32,
        keyhash_off: Option<u32>,
    ) -> Self {
        debug_assert!(min <= maxp1);
        debug_assert!(payload_off as usize + (maxp1 - min) as usize <= rmsg.size());
        Self {
            inner: Arc::new(RdataInner {
                rmsg: Arc::clone(rmsg),
                min,
                maxp1,
                submsg_off,
                payload_off,
                keyhash_off,
                bias_added: AtomicBool::new(false),
            }),
        }
    }

    /// Descriptor for a zero-length marker (gap placeholders); carries the
    /// message so tracing can still reach the datagram.
    #[must_use]
    pub fn new_gap(rmsg: &Arc<Rmsg>) -> Self {
        Self::new(rmsg, 0, 0, 0, 0, None)
    }

    #[must_use]
    pub fn min(&self) -> u32 {
        self.inner.min
    }

    #[must_use]
    pub fn maxp1(&self) -> u32 {
        self.inner.maxp1
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.inner.maxp1 - self.inner.min
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.maxp1 == self.inner.min
    }

    #[must_use]
    pub fn submsg_offset(&self) -> u32 {
        self.inner.submsg_off
    }

    /// The fragment's payload bytes.
    #[must_use]
    pub fn payload_bytes(&self) -> &[u8] {
        let off = self.inner.payload_off as usize;
        &self.inner.rmsg.payload()[off..off + self.len() as usize]
    }

    /// The 16-byte keyhash from the inline QoS, when present.
    #[must_use]
    pub fn keyhash(&self) -> Option<&[u8]> {
        let off = self.inner.keyhash_off? as usize;
        let pl = self.inner.rmsg.payload();
        (off + 16 <= pl.len()).then(|| &pl[off..off + 16])
    }

    #[must_use]
    pub fn rmsg(&self) -> &Arc<Rmsg> {
        &self.inner.rmsg
    }

    /// Book the provisional stored reference. Called exactly once, when the
    /// descriptor first enters a defragmenter or reorderer.
    pub fn add_bias(&self) {
        let was = self.inner.bias_added.swap(true, Ordering::AcqRel);
        debug_assert!(!was, "rdata stored twice without reconciliation");
        self.inner.rmsg.add_bias();
    }

    #[must_use]
    pub fn bias_added(&self) -> bool {
        self.inner.bias_added.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Rdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rdata[{},{}) submsg@{}",
            self.inner.min, self.inner.maxp1, self.inner.submsg_off
        )
    }
}

/// Reconcile the provisional bias of every descriptor in `chain` against the
/// actual number of storing places `adjust`. Runs once per chain, outside
/// any admin lock.
pub fn fragchain_adjust(chain: &[Rdata], adjust: u32) {
    for rdata in chain {
        debug_assert!(rdata.bias_added());
        rdata.inner.rmsg.rmbias_and_adjust(adjust);
    }
}

/// Drop one real reference per descriptor, after delivery (or eviction).
pub fn fragchain_unref(chain: &[Rdata]) {
    for rdata in chain {
        rdata.inner.rmsg.unref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbuf::{RbufPool, RMSG_RDATA_BIAS, RMSG_UNCOMMITTED_BIAS};

    fn make_rmsg(pool: &RbufPool, content: &[u8]) -> Arc<Rmsg> {
        let mut m = pool.new_rmsg();
        m.payload_mut()[..content.len()].copy_from_slice(content);
        m.set_size(content.len());
        Arc::new(m)
    }

    #[test]
    fn test_payload_slicing() {
        let pool = RbufPool::new(256, 1);
        let rmsg = make_rmsg(&pool, b"hdr|PAYLOAD");
        let rd = Rdata::new(&rmsg, 0, 7, 0, 4, None);
        assert_eq!(rd.payload_bytes(), b"PAYLOAD");
        assert_eq!(rd.len(), 7);
    }

    #[test]
    fn test_chain_lifecycle_frees_at_zero() {
        let pool = RbufPool::new(256, 1);
        let rmsg = make_rmsg(&pool, &[0u8; 32]);
        let a = Rdata::new(&rmsg, 0, 16, 0, 0, None);
        let b = Rdata::new(&rmsg, 16, 32, 0, 16, None);
        a.add_bias();
        b.add_bias();
        rmsg.commit();
        assert_eq!(rmsg.refcount(), 2 * RMSG_RDATA_BIAS);

        let chain: FragChain = vec![a, b];
        // Stored in one place (the primary reorderer).
        fragchain_adjust(&chain, 1);
        assert_eq!(rmsg.refcount(), 2);
        fragchain_unref(&chain);
        assert_eq!(rmsg.refcount(), 0);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_uncommitted_bias_present_until_commit() {
        let pool = RbufPool::new(256, 1);
        let rmsg = make_rmsg(&pool, &[0u8; 8]);
        let rd = Rdata::new(&rmsg, 0, 8, 0, 0, None);
        rd.add_bias();
        assert_eq!(rmsg.refcount(), RMSG_UNCOMMITTED_BIAS + RMSG_RDATA_BIAS);
        fragchain_adjust(&[rd], 1);
        rmsg.commit();
        assert_eq!(rmsg.refcount(), 1);
    }
}
