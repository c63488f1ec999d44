// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-proxy-writer defragmenter.
//!
//! One sorted map from sequence number to a per-sample byte-interval tree.
//! Fragments may arrive duplicated, overlapping and in any order; intervals
//! are kept maximal and non-overlapping, and a sample is complete exactly
//! when a single interval `[0, size)` remains.
//!
//! A sentinel empty interval `[0, 0)` is planted in every fresh sample so
//! the predecessor lookup (`last interval with min <= fragment.min`) always
//! succeeds; the first real fragment starting at byte 0 simply grows the
//! sentinel.

use std::collections::BTreeMap;

use crate::bitset::{bitset_set, BITSET_MAX_BITS, BITSET_MAX_WORDS};
use crate::config::DefragDropMode;
use crate::rbuf::{fragchain_adjust, Rdata};
use crate::sample::{Rsample, SampleInfo};
use crate::types::{FragNr, SeqNr};

/// Outcome of [`Defrag::nackmap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackMap {
    /// No record of the sample at all.
    UnknownSample,
    /// Holes remain; the set enumerates them (wire-ready, 0-based).
    FragmentsMissing {
        base: FragNr,
        numbits: u32,
        bits: [u32; BITSET_MAX_WORDS],
    },
    /// Everything the peer advertised is already here.
    AllAdvertisedFragmentsKnown,
}

#[derive(Debug)]
struct ByteInterval {
    maxp1: u32,
    chain: Vec<Rdata>,
}

#[derive(Debug)]
struct DefragSample {
    info: SampleInfo,
    /// min -> interval; always contains the sentinel key 0.
    intervals: BTreeMap<u32, ByteInterval>,
}

impl DefragSample {
    fn new(info: SampleInfo) -> Self {
        let mut intervals = BTreeMap::new();
        intervals.insert(0, ByteInterval { maxp1: 0, chain: Vec::new() });
        Self { info, intervals }
    }

    fn is_complete(&self) -> bool {
        self.intervals.len() == 1
            && self
                .intervals
                .get(&0)
                .is_some_and(|iv| iv.maxp1 == self.info.size)
    }

    /// Insert one fragment interval; returns false for duplicates (caller
    /// must not book a reference then).
    fn insert(&mut self, rdata: Rdata) -> bool {
        let (min, maxp1) = (rdata.min(), rdata.maxp1());
        let (&pmin, pred) = self
            .intervals
            .range_mut(..=min)
            .next_back()
            .expect("sentinel guarantees a predecessor");

        if pred.maxp1 >= maxp1 {
            // Entirely inside the predecessor (sentinel never covers
            // anything, so this is a genuine duplicate).
            return false;
        }

        if min <= pred.maxp1 {
            // Extends the predecessor at its high end (possibly with
            // overlap); append and then swallow any successors reached.
            pred.chain.push(rdata);
            pred.maxp1 = maxp1;
            self.merge_forward(pmin);
            return true;
        }

        // Detached from the predecessor; may still touch the successor.
        let succ_key = self
            .intervals
            .range(min..)
            .next()
            .map(|(k, _)| *k);
        if let Some(sk) = succ_key {
            if sk <= maxp1 {
                // Prepend: the new fragment becomes the interval's head.
                // Lowering the key preserves ordering because no interval
                // lives in [min, sk).
                let succ = self.intervals.remove(&sk).expect("present");
                let mut chain = Vec::with_capacity(succ.chain.len() + 1);
                chain.push(rdata);
                chain.extend(succ.chain);
                self.intervals.insert(
                    min,
                    ByteInterval {
                        maxp1: succ.maxp1.max(maxp1),
                        chain,
                    },
                );
                self.merge_forward(min);
                return true;
            }
        }

        self.intervals.insert(min, ByteInterval { maxp1, chain: vec![rdata] });
        true
    }

    /// Swallow successors of the interval at `key` while they touch it.
    fn merge_forward(&mut self, key: u32) {
        loop {
            let maxp1 = self.intervals[&key].maxp1;
            let Some((&sk, _)) = self.intervals.range(key + 1..).next() else {
                return;
            };
            if sk > maxp1 {
                return;
            }
            let succ = self.intervals.remove(&sk).expect("present");
            let iv = self.intervals.get_mut(&key).expect("present");
            iv.maxp1 = iv.maxp1.max(succ.maxp1);
            iv.chain.extend(succ.chain);
        }
    }

    /// Release every stored fragment reference (eviction / gap).
    fn drop_refs(&self) {
        for iv in self.intervals.values() {
            if !iv.chain.is_empty() {
                fragchain_adjust(&iv.chain, 0);
            }
        }
    }
}

/// The defragmenter.
#[derive(Debug)]
pub struct Defrag {
    drop_mode: DefragDropMode,
    max_samples: u32,
    samples: BTreeMap<i64, DefragSample>,
}

impl Defrag {
    #[must_use]
    pub fn new(drop_mode: DefragDropMode, max_samples: u32) -> Self {
        Self {
            drop_mode,
            max_samples,
            samples: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn n_samples(&self) -> u32 {
        self.samples.len() as u32
    }

    #[must_use]
    pub fn max_samples(&self) -> u32 {
        self.max_samples
    }

    /// Feed one DATA/DATAFRAG descriptor.
    ///
    /// Unfragmented samples bypass the admin entirely and come back as a
    /// singleton chain. Fragmented samples return `Some` exactly when this
    /// fragment completed the sample. Every descriptor this function accepts
    /// (stored or passed through) gets its provisional reference booked;
    /// duplicates and capacity rejections book nothing.
    pub fn take_fragment(&mut self, rdata: Rdata, info: &SampleInfo) -> Option<Rsample> {
        if !info.is_fragmented() {
            rdata.add_bias();
            return Some(Rsample::new(*info, vec![rdata]));
        }

        let seq = info.seq.0;
        if !self.samples.contains_key(&seq) && !self.admit_new(seq) {
            log::trace!("[defrag] seq {} rejected at capacity ({:?})", seq, self.drop_mode);
            return None;
        }

        let sample = self
            .samples
            .entry(seq)
            .or_insert_with(|| DefragSample::new(*info));

        if !sample.insert(rdata.clone()) {
            log::trace!(
                "[defrag] seq {} duplicate fragment [{},{})",
                seq,
                rdata.min(),
                rdata.maxp1()
            );
            return None;
        }
        rdata.add_bias();

        if sample.is_complete() {
            let mut done = self.samples.remove(&seq).expect("present");
            let iv = done.intervals.remove(&0).expect("single interval");
            return Some(Rsample::new(done.info, iv.chain));
        }
        None
    }

    /// Capacity admission for a sample not yet tracked. May evict.
    fn admit_new(&mut self, seq: i64) -> bool {
        if self.max_samples == 0 {
            return false;
        }
        if (self.samples.len() as u32) < self.max_samples {
            return true;
        }
        match self.drop_mode {
            DefragDropMode::DropNewest => {
                let max_seq = *self.samples.keys().next_back().expect("non-empty");
                if seq > max_seq {
                    false
                } else {
                    self.drop_sample(max_seq);
                    true
                }
            }
            DefragDropMode::DropOldest => {
                let min_seq = *self.samples.keys().next().expect("non-empty");
                if seq < min_seq {
                    false
                } else {
                    self.drop_sample(min_seq);
                    true
                }
            }
        }
    }

    fn drop_sample(&mut self, seq: i64) {
        if let Some(s) = self.samples.remove(&seq) {
            s.drop_refs();
        }
    }

    /// Drop every partial sample with `from <= seq < to` (writer GAP).
    pub fn note_gap(&mut self, from: SeqNr, to: SeqNr) {
        let doomed: Vec<i64> = self
            .samples
            .range(from.0..to.0)
            .map(|(k, _)| *k)
            .collect();
        for seq in doomed {
            self.drop_sample(seq);
        }
    }

    /// Drop every partial sample below `min_seq` (acked / no longer wanted).
    pub fn prune(&mut self, min_seq: SeqNr) {
        self.note_gap(SeqNr(i64::MIN + 1), min_seq);
    }

    /// Build the fragment-number hole map for `seq`, bounded by the peer's
    /// advertised last fragment and the caller's bitmap budget.
    #[must_use]
    pub fn nackmap(&self, seq: SeqNr, maxfragnum: FragNr, maxsz: u32) -> NackMap {
        let Some(sample) = self.samples.get(&seq.0) else {
            return NackMap::UnknownSample;
        };
        let maxsz = maxsz.min(BITSET_MAX_BITS);
        let fragsize = sample.info.fragsize.max(1);
        // Highest fragment this sample can have at all.
        let last_in_sample = if sample.info.size == 0 {
            maxfragnum.0
        } else {
            (sample.info.size - 1) / fragsize
        };
        let limit = maxfragnum.0.min(last_in_sample);

        // Walk the byte coverage, emitting every fragment that overlaps a
        // hole. `cursor` is the next uncovered byte.
        let mut bits = [0u32; BITSET_MAX_WORDS];
        let mut base: Option<u32> = None;
        let mut numbits = 0u32;
        let mut cursor = 0u32;
        let mut mark = |frag: u32, base: &mut Option<u32>, numbits: &mut u32| {
            let b = *base.get_or_insert(frag);
            if frag >= b && frag - b < maxsz {
                bitset_set(maxsz, &mut bits, frag - b);
                *numbits = (*numbits).max(frag - b + 1);
            }
        };
        for (min, iv) in &sample.intervals {
            if *min > cursor {
                let first = cursor / fragsize;
                let last = ((*min - 1) / fragsize).min(limit);
                for frag in first..=last {
                    mark(frag, &mut base, &mut numbits);
                }
            }
            cursor = cursor.max(iv.maxp1);
        }
        // Tail hole past the last interval.
        let first_tail = cursor / fragsize;
        if first_tail <= limit {
            for frag in first_tail..=limit {
                mark(frag, &mut base, &mut numbits);
            }
        }

        match base {
            None => NackMap::AllAdvertisedFragmentsKnown,
            Some(b) => NackMap::FragmentsMissing {
                base: FragNr(b),
                numbits,
                bits,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbuf::{RbufPool, Rmsg};
    use std::sync::Arc;

    fn rmsg(pool: &RbufPool, n: usize) -> Arc<Rmsg> {
        let mut m = pool.new_rmsg();
        for (i, b) in m.payload_mut()[..n].iter_mut().enumerate() {
            *b = i as u8;
        }
        m.set_size(n);
        Arc::new(m)
    }

    fn frag_info(seq: i64, size: u32, fragsize: u32) -> SampleInfo {
        let mut info = SampleInfo::new(SeqNr(seq), size);
        info.fragsize = fragsize;
        info
    }

    /// One rdata covering bytes [min, maxp1) of the sample.
    fn frag(m: &Arc<Rmsg>, min: u32, maxp1: u32) -> Rdata {
        Rdata::new(m, min, maxp1, 0, 0, None)
    }

    #[test]
    fn test_unfragmented_bypasses_admin() {
        let pool = RbufPool::new(4096, 4);
        let m = rmsg(&pool, 100);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 4);
        let info = SampleInfo::new(SeqNr(1), 100);
        let s = d.take_fragment(frag(&m, 0, 100), &info).unwrap();
        assert_eq!(s.fragchain.len(), 1);
        assert_eq!(d.n_samples(), 0);
        assert!(s.fragchain[0].bias_added());
    }

    #[test]
    fn test_out_of_order_fragments_complete() {
        let pool = RbufPool::new(4096, 4);
        let m = rmsg(&pool, 3000);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 4);
        let info = frag_info(7, 3000, 1024);
        // Fragments 1 and 3 (bytes [0,1024) and [2048,3000)), then 2.
        assert!(d.take_fragment(frag(&m, 0, 1024), &info).is_none());
        assert!(d.take_fragment(frag(&m, 2048, 3000), &info).is_none());
        assert_eq!(d.n_samples(), 1);
        let s = d.take_fragment(frag(&m, 1024, 2048), &info).unwrap();
        assert_eq!(s.info.seq, SeqNr(7));
        assert_eq!(s.fragchain.len(), 3);
        assert_eq!(d.n_samples(), 0);
        // Chain is in byte order regardless of arrival order.
        assert_eq!(s.fragchain[0].min(), 0);
        assert_eq!(s.fragchain[1].min(), 1024);
        assert_eq!(s.fragchain[2].min(), 2048);
    }

    #[test]
    fn test_duplicate_and_overlap() {
        let pool = RbufPool::new(8192, 4);
        let m = rmsg(&pool, 4096);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 4);
        let info = frag_info(1, 4096, 1024);
        assert!(d.take_fragment(frag(&m, 0, 2048), &info).is_none());
        // Exact duplicate of a covered range: dropped, no reference booked.
        assert!(d.take_fragment(frag(&m, 1024, 2048), &info).is_none());
        // Overlapping extension is accepted.
        assert!(d.take_fragment(frag(&m, 1024, 3072), &info).is_none());
        let s = d.take_fragment(frag(&m, 3072, 4096), &info).unwrap();
        assert_eq!(s.fragchain.len(), 3);
    }

    #[test]
    fn test_drop_newest_policy() {
        let pool = RbufPool::new(4096, 8);
        let m = rmsg(&pool, 512);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 2);
        let mk = |seq| frag_info(seq, 2048, 1024);
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(1)).is_none());
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(5)).is_none());
        // A newer sample is refused outright.
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(6)).is_none());
        assert_eq!(d.n_samples(), 2);
        assert!(d.samples.contains_key(&1) && d.samples.contains_key(&5));
        // An in-between sample evicts the current max.
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(3)).is_none());
        assert_eq!(d.n_samples(), 2);
        assert!(d.samples.contains_key(&1) && d.samples.contains_key(&3));
        // Tracked samples still progress to completion.
        assert!(d.take_fragment(frag(&m, 1024, 2048), &mk(1)).is_some());
    }

    #[test]
    fn test_drop_oldest_policy() {
        let pool = RbufPool::new(4096, 8);
        let m = rmsg(&pool, 512);
        let mut d = Defrag::new(DefragDropMode::DropOldest, 2);
        let mk = |seq| frag_info(seq, 2048, 1024);
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(1)).is_none());
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(2)).is_none());
        // A newer sample evicts the oldest.
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(3)).is_none());
        assert_eq!(d.n_samples(), 2);
        assert!(!d.samples.contains_key(&1));
        // An older-than-all sample is refused.
        assert!(d.take_fragment(frag(&m, 0, 1024), &mk(1)).is_none());
        assert!(!d.samples.contains_key(&1));
    }

    #[test]
    fn test_zero_capacity_still_passes_unfragmented() {
        let pool = RbufPool::new(4096, 4);
        let m = rmsg(&pool, 64);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 0);
        let info = SampleInfo::new(SeqNr(5), 64);
        assert!(d.take_fragment(frag(&m, 0, 64), &info).is_some());
        assert!(d
            .take_fragment(frag(&m, 0, 32), &frag_info(6, 64, 32))
            .is_none());
        assert_eq!(d.n_samples(), 0);
    }

    #[test]
    fn test_note_gap_drops_range() {
        let pool = RbufPool::new(4096, 8);
        let m = rmsg(&pool, 512);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 8);
        for seq in 1..=4 {
            assert!(d
                .take_fragment(frag(&m, 0, 1024), &frag_info(seq, 4096, 1024))
                .is_none());
        }
        d.note_gap(SeqNr(2), SeqNr(4));
        assert_eq!(d.n_samples(), 2);
        assert!(d.samples.contains_key(&1) && d.samples.contains_key(&4));
    }

    #[test]
    fn test_nackmap() {
        let pool = RbufPool::new(8192, 4);
        let m = rmsg(&pool, 4096);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 4);
        let info = frag_info(9, 4096, 1024); // fragments 0..=3
        assert!(d.take_fragment(frag(&m, 1024, 2048), &info).is_none()); // have frag 1

        match d.nackmap(SeqNr(9), FragNr(3), 256) {
            NackMap::FragmentsMissing { base, numbits, bits } => {
                assert_eq!(base, FragNr(0));
                // Missing 0, 2, 3 relative to base 0.
                assert_eq!(numbits, 4);
                assert!(crate::bitset::bitset_isset(numbits, &bits, 0));
                assert!(!crate::bitset::bitset_isset(numbits, &bits, 1));
                assert!(crate::bitset::bitset_isset(numbits, &bits, 2));
                assert!(crate::bitset::bitset_isset(numbits, &bits, 3));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(d.nackmap(SeqNr(10), FragNr(3), 256), NackMap::UnknownSample);

        // Peer only advertised up to fragment 1; the hole before it is
        // still reported.
        match d.nackmap(SeqNr(9), FragNr(1), 256) {
            NackMap::FragmentsMissing { base, .. } => assert_eq!(base, FragNr(0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nackmap_all_known() {
        let pool = RbufPool::new(8192, 4);
        let m = rmsg(&pool, 4096);
        let mut d = Defrag::new(DefragDropMode::DropNewest, 4);
        let info = frag_info(3, 4096, 1024);
        assert!(d.take_fragment(frag(&m, 0, 2048), &info).is_none());
        assert_eq!(
            d.nackmap(SeqNr(3), FragNr(1), 256),
            NackMap::AllAdvertisedFragmentsKnown
        );
    }
}
