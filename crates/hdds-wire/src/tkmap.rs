// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Content-addressed map from serialized keys to 64-bit instance handles.
//!
//! Entries are reference counted; the high bit of the counter marks
//! "deletion in progress". A lookup that witnesses the mark treats the
//! entry as absent and waits until the removal is visible before retrying,
//! so no thread can ever re-acquire a deleted entry. Retired entries are
//! freed through the GC, after every pointer-chasing thread has slept.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use md5::{Digest, Md5};
use parking_lot::{Condvar, Mutex};

use crate::gc::Gc;

/// High bit of the refcount: deletion in progress.
const TK_MARKED: u32 = 1 << 31;

/// Process-wide strictly monotonic instance-id source.
static NEXT_IID: AtomicU64 = AtomicU64::new(1);

/// RTPS keyhash of a serialized key: raw zero-padded when it fits the 16
/// bytes, an MD5 digest otherwise (DDS-RTPS v2.5 Sec.9.6.3.8).
#[must_use]
pub fn keyhash_of(serkey: &[u8]) -> [u8; 16] {
    let mut kh = [0u8; 16];
    if serkey.len() <= 16 {
        kh[..serkey.len()].copy_from_slice(serkey);
    } else {
        let digest = Md5::digest(serkey);
        kh.copy_from_slice(&digest);
    }
    kh
}

/// One instance.
#[derive(Debug)]
pub struct TkEntry {
    pub iid: u64,
    /// The owning serialized key sample.
    pub serkey: Vec<u8>,
    refc: AtomicU32,
}

impl TkEntry {
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refc.load(Ordering::Acquire) & !TK_MARKED
    }

    #[must_use]
    pub fn is_marked(&self) -> bool {
        self.refc.load(Ordering::Acquire) & TK_MARKED != 0
    }
}

/// The instance map.
pub struct TkMap {
    map: DashMap<Vec<u8>, Arc<TkEntry>>,
    /// Serializes removal visibility with waiting lookups.
    removal: Mutex<()>,
    removal_cv: Condvar,
    gc: Arc<Gc>,
}

impl TkMap {
    #[must_use]
    pub fn new(gc: Arc<Gc>) -> Self {
        Self {
            map: DashMap::new(),
            removal: Mutex::new(()),
            removal_cv: Condvar::new(),
            gc,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up (optionally creating) the instance for `serkey`; the returned
    /// entry has its refcount incremented for the caller.
    pub fn find(&self, serkey: &[u8], create_if_missing: bool) -> Option<Arc<TkEntry>> {
        loop {
            let existing = self.map.get(serkey).map(|e| Arc::clone(e.value()));
            match existing {
                Some(entry) => {
                    if self.try_ref(&entry) {
                        return Some(entry);
                    }
                    // Marked: wait until the removal is visible, then retry
                    // (possibly creating a fresh instance).
                    let mut g = self.removal.lock();
                    while self
                        .map
                        .get(serkey)
                        .is_some_and(|e| Arc::ptr_eq(e.value(), &entry))
                    {
                        self.removal_cv.wait(&mut g);
                    }
                }
                None => {
                    if !create_if_missing {
                        return None;
                    }
                    let fresh = Arc::new(TkEntry {
                        iid: NEXT_IID.fetch_add(1, Ordering::Relaxed),
                        serkey: serkey.to_vec(),
                        refc: AtomicU32::new(1),
                    });
                    match self.map.entry(serkey.to_vec()) {
                        dashmap::mapref::entry::Entry::Vacant(v) => {
                            v.insert(Arc::clone(&fresh));
                            return Some(fresh);
                        }
                        dashmap::mapref::entry::Entry::Occupied(_) => {
                            // Lost the insert race; retry against the winner.
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Acquire one reference unless the entry is marked.
    fn try_ref(&self, entry: &Arc<TkEntry>) -> bool {
        let mut c = entry.refc.load(Ordering::Acquire);
        loop {
            if c & TK_MARKED != 0 {
                return false;
            }
            match entry
                .refc
                .compare_exchange_weak(c, c + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => c = actual,
            }
        }
    }

    /// Drop one reference. The 1 -> 0 transition marks the entry, removes it
    /// from the map, wakes waiting lookups, and defers the free to the GC.
    pub fn unref(&self, entry: &Arc<TkEntry>) {
        let prev = entry.refc.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & !TK_MARKED >= 1);
        if prev != 1 {
            return;
        }
        // Counter hit zero unmarked; claim deletion. A concurrent find may
        // have resurrected it (0 -> 1), in which case the claim fails and
        // the entry lives on.
        if entry
            .refc
            .compare_exchange(0, TK_MARKED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        {
            let _g = self.removal.lock();
            self.map
                .remove_if(&entry.serkey, |_, v| Arc::ptr_eq(v, entry));
            self.removal_cv.notify_all();
        }
        let retired = Arc::clone(entry);
        self.gc.enqueue(Box::new(move || drop(retired)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::ThreadStates;
    use std::time::Duration;

    fn gc() -> Arc<Gc> {
        Gc::new(
            Arc::new(ThreadStates::new()),
            Duration::from_secs(10),
            Box::new(|| {}),
        )
        .unwrap()
    }

    #[test]
    fn test_keyhash_padding_and_digest() {
        let short = keyhash_of(b"abc");
        assert_eq!(&short[..3], b"abc");
        assert_eq!(&short[3..], &[0u8; 13]);
        let long = keyhash_of(&[7u8; 64]);
        assert_ne!(long, [0u8; 16]);
        assert_eq!(long, keyhash_of(&[7u8; 64]));
    }

    #[test]
    fn test_same_key_same_instance() {
        let tk = TkMap::new(gc());
        let a = tk.find(b"k1", true).unwrap();
        let b = tk.find(b"k1", true).unwrap();
        assert_eq!(a.iid, b.iid);
        assert_eq!(a.refcount(), 2);
        let c = tk.find(b"k2", true).unwrap();
        assert!(c.iid > a.iid);
        tk.unref(&a);
        tk.unref(&b);
        tk.unref(&c);
    }

    #[test]
    fn test_lookup_without_create() {
        let tk = TkMap::new(gc());
        assert!(tk.find(b"nope", false).is_none());
        let e = tk.find(b"yes", true).unwrap();
        assert!(tk.find(b"yes", false).is_some());
        tk.unref(&e);
        let e2 = tk.find(b"yes", false).unwrap();
        tk.unref(&e2);
    }

    #[test]
    fn test_unref_to_zero_removes() {
        let g = gc();
        let tk = TkMap::new(Arc::clone(&g));
        let e = tk.find(b"k", true).unwrap();
        let iid = e.iid;
        tk.unref(&e);
        g.drain();
        assert!(tk.is_empty());
        // A re-created instance gets a fresh id: ids are never reused.
        let e2 = tk.find(b"k", true).unwrap();
        assert!(e2.iid > iid);
        tk.unref(&e2);
    }

    #[test]
    fn test_marked_entry_invisible() {
        let tk = TkMap::new(gc());
        let e = tk.find(b"k", true).unwrap();
        tk.unref(&e);
        // The map no longer exposes the retired entry even though our Arc
        // still exists.
        assert!(e.is_marked());
        let fresh = tk.find(b"k", true).unwrap();
        assert!(!Arc::ptr_eq(&e, &fresh));
        tk.unref(&fresh);
    }
}
