// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One received datagram plus the biased reference count governing its life.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::rbuf::pool::ReleaseFn;

/// Held while the owning receive thread is still processing the datagram.
pub const RMSG_UNCOMMITTED_BIAS: u32 = 1 << 31;
/// Provisional reference for one stored [`Rdata`](crate::rbuf::Rdata),
/// reconciled in bulk by `fragchain_adjust`.
pub const RMSG_RDATA_BIAS: u32 = 1 << 20;

/// A received message.
///
/// Created by [`RbufPool::new_rmsg`](crate::rbuf::RbufPool::new_rmsg) with
/// the uncommitted bias set; the receive thread fills the payload, derives
/// descriptors, and finally [`commit`](Rmsg::commit)s. The backing buffer
/// returns to the pool at reference count zero, which the protocol
/// guarantees happens after every stored descriptor is gone.
pub struct Rmsg {
    refcount: AtomicU32,
    len: AtomicU32,
    /// Present until the count reaches zero; then returned to the pool.
    storage: Mutex<Option<Box<[u8]>>>,
    data: *mut u8,
    cap: usize,
    release: ReleaseFn,
}

// SAFETY: `data` points into the heap allocation owned by `storage` and is
// only dereferenced while the protocol refcount is non-zero, i.e. before the
// exactly-once release in `free()`. Mutable access happens solely through
// `&mut self` on the owning receive thread prior to sharing.
unsafe impl Send for Rmsg {}
unsafe impl Sync for Rmsg {}

impl Rmsg {
    pub(crate) fn new(buf: Box<[u8]>, release: ReleaseFn) -> Self {
        let mut buf = buf;
        let data = buf.as_mut_ptr();
        let cap = buf.len();
        Self {
            refcount: AtomicU32::new(RMSG_UNCOMMITTED_BIAS),
            len: AtomicU32::new(0),
            storage: Mutex::new(Some(buf)),
            data,
            cap,
            release,
        }
    }

    /// Writable view of the whole buffer, for the socket read.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.storage.lock().is_some());
        // SAFETY: exclusive borrow of self; storage not yet released.
        unsafe { std::slice::from_raw_parts_mut(self.data, self.cap) }
    }

    /// Record the datagram length after the socket read.
    pub fn set_size(&mut self, n: usize) {
        debug_assert!(n <= self.cap);
        debug_assert_eq!(self.refcount.load(Ordering::Relaxed), RMSG_UNCOMMITTED_BIAS);
        self.len.store(n as u32, Ordering::Release);
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire) as usize
    }

    /// Read view of the received bytes.
    ///
    /// Callers must hold a protocol reference (uncommitted bias on the
    /// receive thread, or a stored-descriptor reference elsewhere).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        debug_assert!(self.refcount.load(Ordering::Relaxed) > 0);
        // SAFETY: refcount > 0 implies `free()` has not run, so `data` is
        // still backed by `storage`.
        unsafe { std::slice::from_raw_parts(self.data, self.size()) }
    }

    /// Current protocol reference count (bias-inclusive). Observability only.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// Book one provisional stored-descriptor reference.
    pub(crate) fn add_bias(&self) {
        let old = self.refcount.fetch_add(RMSG_RDATA_BIAS, Ordering::AcqRel);
        debug_assert!(old >= RMSG_UNCOMMITTED_BIAS, "bias added after commit");
    }

    /// Convert one provisional bias into `adjust` real references.
    pub(crate) fn rmbias_and_adjust(&self, adjust: u32) {
        debug_assert!(adjust < RMSG_RDATA_BIAS);
        let sub = RMSG_RDATA_BIAS - adjust;
        let old = self.refcount.fetch_sub(sub, Ordering::AcqRel);
        debug_assert!(old >= sub);
        if old == sub {
            self.free();
        }
    }

    /// Drop one real reference.
    pub(crate) fn unref(&self) {
        let old = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old >= 1);
        if old == 1 {
            self.free();
        }
    }

    /// The receive thread is done with the datagram.
    pub fn commit(&self) {
        let old = self.refcount.fetch_sub(RMSG_UNCOMMITTED_BIAS, Ordering::AcqRel);
        debug_assert!(old >= RMSG_UNCOMMITTED_BIAS);
        if old == RMSG_UNCOMMITTED_BIAS {
            self.free();
        }
    }

    fn free(&self) {
        debug_assert_eq!(self.refcount.load(Ordering::Acquire), 0);
        if let Some(buf) = self.storage.lock().take() {
            self.release.release(buf);
        }
    }
}

impl Drop for Rmsg {
    fn drop(&mut self) {
        // Reached with a non-zero count only when the message was never
        // committed (socket read failed validation before any descriptor
        // existed); return the buffer regardless.
        if let Some(buf) = self.storage.get_mut().take() {
            self.release.release(buf);
        }
    }
}

impl std::fmt::Debug for Rmsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rmsg")
            .field("refcount", &self.refcount())
            .field("size", &self.size())
            .finish()
    }
}
