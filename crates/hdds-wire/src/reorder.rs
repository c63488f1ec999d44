// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence-number reordering over complete samples.
//!
//! One sorted set of non-overlapping, non-adjacent intervals; each interval
//! records the sequence range it accounts for and the samples actually held
//! within it (gap-covered sequences are accounted for but sample-less).
//! `next_seq` is the first undelivered sequence; anything below it is dead.
//!
//! The same admin serves two roles: the primary reorderer of a proxy writer
//! and the secondary reorderer of an out-of-sync reader catching up on
//! historical data.

use std::collections::BTreeMap;

use crate::bitset::{bitset_set, BITSET_MAX_BITS, BITSET_MAX_WORDS};
use crate::rbuf::fragchain_unref;
use crate::sample::Rsample;
use crate::types::SeqNr;

/// Delivery discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderMode {
    /// Strict in-order delivery.
    Normal,
    /// Deliver any sequence at or above `next_seq`, advancing past it
    /// (best-effort readers).
    MonotonicallyIncreasing,
    /// Pass-through; every sample is deliverable on arrival.
    AlwaysDeliver,
}

/// Outcome of feeding one sample or gap.
#[derive(Debug)]
pub enum ReorderResult {
    /// Samples are ready: hand this chain to delivery in order.
    Deliver(Vec<Rsample>),
    /// Stored for later delivery.
    Accept,
    /// Not admitted; the caller's pending reference reconciles to zero.
    Reject,
    /// Below `next_seq`; a duplicate or already-delivered sample.
    TooOld,
}

/// Sequence-number hole map for an ACKNACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqNackMap {
    pub base: SeqNr,
    pub numbits: u32,
    pub bits: [u32; BITSET_MAX_WORDS],
}

#[derive(Debug)]
struct RInterval {
    /// One past the last accounted-for sequence.
    maxp1: i64,
    /// Samples held, ascending by sequence; may be sparse under gaps.
    samples: Vec<Rsample>,
}

/// The reorder admin.
#[derive(Debug)]
pub struct Reorder {
    mode: ReorderMode,
    max_samples: u32,
    /// Readers that only ack delivered data restrict their nackmaps.
    late_ack_mode: bool,
    next_seq: SeqNr,
    /// min -> interval; non-overlapping, never adjacent (always coalesced).
    intervals: BTreeMap<i64, RInterval>,
    n_samples: u32,
}

impl Reorder {
    #[must_use]
    pub fn new(mode: ReorderMode, max_samples: u32, late_ack_mode: bool) -> Self {
        Self {
            mode,
            max_samples,
            late_ack_mode,
            next_seq: SeqNr(1),
            intervals: BTreeMap::new(),
            n_samples: 0,
        }
    }

    #[must_use]
    pub fn next_seq(&self) -> SeqNr {
        self.next_seq
    }

    /// Rebase a fresh admin (volatile reader joining at the writer's tail).
    pub fn set_next_seq(&mut self, seq: SeqNr) {
        debug_assert!(self.intervals.is_empty());
        self.next_seq = seq;
    }

    #[must_use]
    pub fn n_samples(&self) -> u32 {
        self.n_samples
    }

    #[must_use]
    pub fn mode(&self) -> ReorderMode {
        self.mode
    }

    /// Would this admin do anything with `seq`?
    #[must_use]
    pub fn wants_sample(&self, seq: SeqNr) -> bool {
        if seq < self.next_seq {
            return false;
        }
        match self.intervals.range(..=seq.0).next_back() {
            Some((_, iv)) => seq.0 >= iv.maxp1,
            None => true,
        }
    }

    /// Feed one complete sample.
    ///
    /// `refcount_adjust` is incremented once when the sample ends up
    /// referenced (stored here or handed out for delivery); the caller
    /// applies the total to the fragment chain after the whole admission
    /// batch, outside locks.
    pub fn accept_sample(
        &mut self,
        rsample: Rsample,
        refcount_adjust: &mut u32,
        delivery_queue_full: bool,
    ) -> ReorderResult {
        let s = rsample.info.seq;

        if s < self.next_seq {
            return ReorderResult::TooOld;
        }

        let immediate = s == self.next_seq
            || (self.mode == ReorderMode::MonotonicallyIncreasing && s > self.next_seq)
            || self.mode == ReorderMode::AlwaysDeliver;
        if immediate {
            if delivery_queue_full {
                // Backpressure: force the peer to retransmit rather than
                // grow without bound.
                return ReorderResult::Reject;
            }
            let mut chain = vec![rsample];
            if self.mode != ReorderMode::AlwaysDeliver {
                self.next_seq = s.succ();
                self.pull_head_into(&mut chain);
            }
            *refcount_adjust += 1;
            return ReorderResult::Deliver(chain);
        }

        // Out of order, Normal mode: place into the interval set.
        debug_assert_eq!(self.mode, ReorderMode::Normal);
        let pred = self
            .intervals
            .range(..=s.0)
            .next_back()
            .map(|(k, iv)| (*k, iv.maxp1));
        if let Some((_, pmaxp1)) = pred {
            if s.0 < pmaxp1 {
                // Covered already: duplicate or gap-accounted.
                return ReorderResult::Reject;
            }
        }

        // Capacity gate before any mutation. When full, the highest stored
        // sample loses: an incoming sample above it is refused, otherwise
        // the stored one is evicted to make room.
        if self.max_samples == 0 {
            return ReorderResult::Reject;
        }
        if self.n_samples >= self.max_samples {
            match self.highest_stored_seq() {
                Some(h) if s < h => self.evict_highest(),
                _ => return ReorderResult::Reject,
            }
        }

        match pred {
            Some((pmin, pmaxp1)) if s.0 == pmaxp1 => {
                // Grows the predecessor's tail.
                let iv = self.intervals.get_mut(&pmin).expect("present");
                iv.samples.push(rsample);
                iv.maxp1 = s.0 + 1;
                self.coalesce_forward(pmin);
            }
            _ => {
                // Detached from the predecessor; may prepend to a successor
                // starting exactly one past us. Lowering the key preserves
                // ordering: nothing sits in [s, s+1).
                let succ_at = self
                    .intervals
                    .range(s.0 + 1..)
                    .next()
                    .map(|(k, _)| *k)
                    .filter(|&sk| sk == s.0 + 1);
                if let Some(sk) = succ_at {
                    let succ = self.intervals.remove(&sk).expect("present");
                    let mut samples = Vec::with_capacity(succ.samples.len() + 1);
                    samples.push(rsample);
                    samples.extend(succ.samples);
                    self.intervals.insert(
                        s.0,
                        RInterval {
                            maxp1: succ.maxp1,
                            samples,
                        },
                    );
                } else {
                    self.intervals.insert(
                        s.0,
                        RInterval {
                            maxp1: s.0 + 1,
                            samples: vec![rsample],
                        },
                    );
                }
            }
        }
        self.n_samples += 1;
        *refcount_adjust += 1;
        ReorderResult::Accept
    }

    /// Sequence of the highest sample actually held.
    fn highest_stored_seq(&self) -> Option<SeqNr> {
        self.intervals
            .values()
            .rev()
            .find(|iv| !iv.samples.is_empty())
            .and_then(|iv| iv.samples.last())
            .map(|r| r.info.seq)
    }

    /// Evict the highest stored sample (which holds real references from a
    /// previous, already-reconciled admission).
    fn evict_highest(&mut self) {
        let key = self
            .intervals
            .iter()
            .rev()
            .find(|(_, iv)| !iv.samples.is_empty())
            .map(|(k, _)| *k);
        let Some(k) = key else { return };
        let iv = self.intervals.get_mut(&k).expect("present");
        let evicted = iv.samples.pop().expect("non-empty");
        log::trace!("[reorder] capacity evict seq {}", evicted.info.seq);
        fragchain_unref(&evicted.fragchain);
        self.n_samples -= 1;
        // Trim the interval at the evicted sequence; gap coverage past it
        // is dropped too, which is harmless (gaps re-apply idempotently).
        if iv.samples.is_empty() {
            self.intervals.remove(&k);
        } else {
            iv.maxp1 = evicted.info.seq.0;
        }
    }

    /// Account for a writer-declared gap `[from, to)`.
    ///
    /// Coalesces every touching interval; when the result reaches
    /// `next_seq`, its samples are extracted for delivery and `next_seq`
    /// jumps past the whole range. A deliverable gap is refused under
    /// delivery backpressure, exactly like a deliverable sample (heartbeat
    /// processing re-derives it later).
    pub fn accept_gap(&mut self, from: SeqNr, to: SeqNr, delivery_queue_full: bool) -> ReorderResult {
        if to <= self.next_seq || from >= to {
            return ReorderResult::TooOld;
        }
        if self.mode != ReorderMode::Normal {
            // Nothing is ever held back in the other modes.
            return ReorderResult::Reject;
        }
        let from = from.max(self.next_seq);
        if from <= self.next_seq && delivery_queue_full {
            return ReorderResult::Reject;
        }

        // Locate every interval touching or inside [from, to] (an interval
        // ending exactly at `from` is adjacent and coalesces too).
        let mut min = from.0;
        let mut maxp1 = to.0;
        let mut samples: Vec<Rsample> = Vec::new();
        let keys: Vec<i64> = self
            .intervals
            .range(..=to.0)
            .filter(|(_, iv)| iv.maxp1 >= from.0)
            .map(|(k, _)| *k)
            .collect();
        for k in keys {
            let iv = self.intervals.remove(&k).expect("present");
            min = min.min(k);
            maxp1 = maxp1.max(iv.maxp1);
            samples.extend(iv.samples);
        }
        samples.sort_by_key(|r| r.info.seq);

        if min <= self.next_seq.0 {
            self.n_samples -= samples.len() as u32;
            self.next_seq = SeqNr(maxp1);
            // Pull in anything that became contiguous behind the gap.
            let mut chain = samples;
            self.pull_head_into(&mut chain);
            return ReorderResult::Deliver(chain);
        }

        // Coalescing stores no new samples, so no capacity step here.
        self.intervals.insert(min, RInterval { maxp1, samples });
        ReorderResult::Accept
    }

    /// Everything below `seq` is no longer wanted (historical catch-up
    /// done). Stored samples below the cut are released; returns how many.
    pub fn drop_up_to(&mut self, seq: SeqNr) -> u32 {
        if seq <= self.next_seq {
            return 0;
        }
        let mut ndropped = 0u32;
        let keys: Vec<i64> = self.intervals.range(..seq.0).map(|(k, _)| *k).collect();
        for k in keys {
            let mut iv = self.intervals.remove(&k).expect("present");
            if iv.maxp1 > seq.0 {
                // Straddles the cut: keep the tail.
                let (drop, keep): (Vec<Rsample>, Vec<Rsample>) =
                    iv.samples.drain(..).partition(|r| r.info.seq < seq);
                for r in &drop {
                    fragchain_unref(&r.fragchain);
                }
                ndropped += drop.len() as u32;
                self.intervals.insert(
                    seq.0,
                    RInterval {
                        maxp1: iv.maxp1,
                        samples: keep,
                    },
                );
            } else {
                for r in &iv.samples {
                    fragchain_unref(&r.fragchain);
                }
                ndropped += iv.samples.len() as u32;
            }
        }
        self.n_samples -= ndropped;
        self.next_seq = self.next_seq.max(seq);
        ndropped
    }

    /// Build the missing-sequence map for an ACKNACK answering a HEARTBEAT
    /// advertising `[base, maxseq]`.
    ///
    /// With `late_ack_mode` and `notail` clear, holes past the highest
    /// stored interval are reported; `notail` suppresses that tail (only
    /// nack what is provably missing in the middle).
    #[must_use]
    pub fn nackmap(&self, base: SeqNr, maxseq: SeqNr, maxsz: u32, notail: bool) -> Option<SeqNackMap> {
        let maxsz = maxsz.min(BITSET_MAX_BITS);
        let start = self.next_seq.max(base);
        let mut end = maxseq; // inclusive
        if notail || self.late_ack_mode {
            let highest = self
                .intervals
                .values()
                .next_back()
                .map_or(self.next_seq.0 - 1, |iv| iv.maxp1 - 1);
            end = end.min(SeqNr(highest));
        }
        if start > end {
            return None;
        }

        let mut bits = [0u32; BITSET_MAX_WORDS];
        let mut numbits = 0u32;
        let mut any = false;
        let mut seq = start;
        while seq <= end && seq.0 - start.0 < i64::from(maxsz) {
            if self.wants_sample(seq) {
                let idx = (seq.0 - start.0) as u32;
                bitset_set(maxsz, &mut bits, idx);
                numbits = numbits.max(idx + 1);
                any = true;
            }
            seq = seq.succ();
        }
        any.then_some(SeqNackMap {
            base: start,
            numbits,
            bits,
        })
    }

    /// Merge the head interval into `chain` when it begins at `next_seq`,
    /// advancing `next_seq` past it.
    fn pull_head_into(&mut self, chain: &mut Vec<Rsample>) {
        if let Some((&hmin, _)) = self.intervals.iter().next() {
            if hmin == self.next_seq.0 {
                let iv = self.intervals.remove(&hmin).expect("present");
                self.n_samples -= iv.samples.len() as u32;
                chain.extend(iv.samples);
                self.next_seq = SeqNr(iv.maxp1);
            }
        }
    }

    /// Coalesce the interval at `key` with its successor when adjacent.
    fn coalesce_forward(&mut self, key: i64) {
        let maxp1 = self.intervals[&key].maxp1;
        if let Some((&sk, _)) = self.intervals.range(key + 1..).next() {
            if sk == maxp1 {
                let succ = self.intervals.remove(&sk).expect("present");
                let iv = self.intervals.get_mut(&key).expect("present");
                iv.maxp1 = succ.maxp1;
                iv.samples.extend(succ.samples);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbuf::{RbufPool, Rdata, Rmsg};
    use crate::sample::SampleInfo;
    use std::sync::Arc;

    struct Fixture {
        _pool: RbufPool,
        rmsg: Arc<Rmsg>,
    }

    impl Fixture {
        fn new() -> Self {
            let pool = RbufPool::new(4096, 4);
            let mut m = pool.new_rmsg();
            m.set_size(64);
            Self {
                _pool: pool,
                rmsg: Arc::new(m),
            }
        }

        fn sample(&self, seq: i64) -> Rsample {
            let rd = Rdata::new(&self.rmsg, 0, 16, 0, 0, None);
            rd.add_bias();
            Rsample::new(SampleInfo::new(SeqNr(seq), 16), vec![rd])
        }
    }

    fn deliver_seqs(res: &ReorderResult) -> Vec<i64> {
        match res {
            ReorderResult::Deliver(chain) => chain.iter().map(|r| r.info.seq.0).collect(),
            _ => panic!("expected Deliver, got {:?}", res),
        }
    }

    #[test]
    fn test_in_order_delivery() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        for seq in 1..=5 {
            let res = r.accept_sample(fx.sample(seq), &mut adj, false);
            assert_eq!(deliver_seqs(&res), vec![seq]);
        }
        assert_eq!(r.next_seq(), SeqNr(6));
        assert_eq!(adj, 5);
    }

    #[test]
    fn test_out_of_order_holds_until_contiguous() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;

        // 2, 3 held; 5 held; 1 releases 1-3; 4 releases 4-5.
        assert!(matches!(r.accept_sample(fx.sample(2), &mut adj, false), ReorderResult::Accept));
        assert!(matches!(r.accept_sample(fx.sample(3), &mut adj, false), ReorderResult::Accept));
        assert!(matches!(r.accept_sample(fx.sample(5), &mut adj, false), ReorderResult::Accept));
        assert_eq!(r.n_samples(), 3);

        let res = r.accept_sample(fx.sample(1), &mut adj, false);
        assert_eq!(deliver_seqs(&res), vec![1, 2, 3]);
        let res = r.accept_sample(fx.sample(4), &mut adj, false);
        assert_eq!(deliver_seqs(&res), vec![4, 5]);
        assert_eq!(r.next_seq(), SeqNr(6));
        assert_eq!(r.n_samples(), 0);
        assert_eq!(adj, 5);
    }

    #[test]
    fn test_too_old_and_duplicate() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        let _ = r.accept_sample(fx.sample(1), &mut adj, false);
        assert!(matches!(r.accept_sample(fx.sample(1), &mut adj, false), ReorderResult::TooOld));
        let _ = r.accept_sample(fx.sample(3), &mut adj, false);
        assert!(matches!(r.accept_sample(fx.sample(3), &mut adj, false), ReorderResult::Reject));
        assert_eq!(adj, 2);
    }

    #[test]
    fn test_gap_releases_following_samples() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        let res = r.accept_sample(fx.sample(1), &mut adj, false);
        assert_eq!(deliver_seqs(&res), vec![1]);
        assert!(matches!(r.accept_sample(fx.sample(3), &mut adj, false), ReorderResult::Accept));

        // GAP [2,3): 2 never existed; 3 becomes deliverable.
        let res = r.accept_gap(SeqNr(2), SeqNr(3), false);
        assert_eq!(deliver_seqs(&res), vec![3]);
        assert_eq!(r.next_seq(), SeqNr(4));
    }

    #[test]
    fn test_gap_below_next_seq_absorbed() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        let _ = r.accept_sample(fx.sample(1), &mut adj, false);
        assert!(matches!(r.accept_gap(SeqNr(1), SeqNr(2), false), ReorderResult::TooOld));
    }

    #[test]
    fn test_gap_stored_in_middle() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        assert!(matches!(r.accept_sample(fx.sample(5), &mut adj, false), ReorderResult::Accept));
        // [4,6) coalesces with the stored 5 but stays above next_seq = 1.
        assert!(matches!(r.accept_gap(SeqNr(4), SeqNr(6), false), ReorderResult::Accept));
        // Now 1..4 gap releases everything.
        let res = r.accept_gap(SeqNr(1), SeqNr(4), false);
        assert_eq!(deliver_seqs(&res), vec![5]);
        assert_eq!(r.next_seq(), SeqNr(6));
    }

    #[test]
    fn test_monotonically_increasing_mode() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::MonotonicallyIncreasing, 16, false);
        let mut adj = 0;
        let res = r.accept_sample(fx.sample(4), &mut adj, false);
        assert_eq!(deliver_seqs(&res), vec![4]);
        assert_eq!(r.next_seq(), SeqNr(5));
        assert!(matches!(r.accept_sample(fx.sample(2), &mut adj, false), ReorderResult::TooOld));
    }

    #[test]
    fn test_always_deliver_mode() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::AlwaysDeliver, 16, false);
        let mut adj = 0;
        for seq in [5, 2, 9] {
            let res = r.accept_sample(fx.sample(seq), &mut adj, false);
            assert_eq!(deliver_seqs(&res), vec![seq]);
        }
    }

    #[test]
    fn test_delivery_queue_full_rejects() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        assert!(matches!(r.accept_sample(fx.sample(1), &mut adj, true), ReorderResult::Reject));
        assert_eq!(adj, 0);
        assert_eq!(r.next_seq(), SeqNr(1));
    }

    #[test]
    fn test_capacity_evicts_highest() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 2, false);
        let mut adj = 0;
        assert!(matches!(r.accept_sample(fx.sample(3), &mut adj, false), ReorderResult::Accept));
        assert!(matches!(r.accept_sample(fx.sample(5), &mut adj, false), ReorderResult::Accept));
        assert_eq!(adj, 2);
        // Full, and 7 would be the new highest: refused outright.
        assert!(matches!(r.accept_sample(fx.sample(7), &mut adj, false), ReorderResult::Reject));
        assert_eq!(r.n_samples(), 2);
        assert_eq!(adj, 2);
        // Full, and 2 sits below the stored highest: 5 is evicted for it.
        assert!(matches!(r.accept_sample(fx.sample(2), &mut adj, false), ReorderResult::Accept));
        assert_eq!(r.n_samples(), 2);
        // 2 and 3 survive: delivering across 1..=5 yields them.
        let res = r.accept_gap(SeqNr(1), SeqNr(6), false);
        assert_eq!(deliver_seqs(&res), vec![2, 3]);
    }

    #[test]
    fn test_next_seq_monotone_under_random_input() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 8, false);
        let mut adj = 0;
        let mut last = r.next_seq();
        fastrand::seed(0x5eed);
        for _ in 0..500 {
            let seq = fastrand::i64(1..40);
            if fastrand::bool() {
                let _ = r.accept_sample(fx.sample(seq), &mut adj, false);
            } else {
                let _ = r.accept_gap(SeqNr(seq), SeqNr(seq + fastrand::i64(1..4)), false);
            }
            assert!(r.next_seq() >= last, "next_seq went backwards");
            assert!(r.n_samples() <= 8);
            last = r.next_seq();
        }
    }

    #[test]
    fn test_nackmap_reports_holes() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        let _ = r.accept_sample(fx.sample(1), &mut adj, false); // delivered
        let _ = r.accept_sample(fx.sample(4), &mut adj, false); // held
        let _ = r.accept_sample(fx.sample(5), &mut adj, false); // held

        let map = r.nackmap(SeqNr(1), SeqNr(6), 256, false).unwrap();
        assert_eq!(map.base, SeqNr(2));
        // Missing: 2, 3, 6 -> offsets 0, 1, 4.
        assert!(crate::bitset::bitset_isset(map.numbits, &map.bits, 0));
        assert!(crate::bitset::bitset_isset(map.numbits, &map.bits, 1));
        assert!(!crate::bitset::bitset_isset(map.numbits, &map.bits, 2));
        assert!(!crate::bitset::bitset_isset(map.numbits, &map.bits, 3));
        assert!(crate::bitset::bitset_isset(map.numbits, &map.bits, 4));
        assert_eq!(map.numbits, 5);

        // notail: the hole past the stored tail (6) is suppressed.
        let map = r.nackmap(SeqNr(1), SeqNr(6), 256, true).unwrap();
        assert_eq!(map.numbits, 2);
    }

    #[test]
    fn test_nackmap_nothing_missing() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        for seq in 1..=3 {
            let _ = r.accept_sample(fx.sample(seq), &mut adj, false);
        }
        assert!(r.nackmap(SeqNr(1), SeqNr(3), 256, false).is_none());
    }

    #[test]
    fn test_drop_up_to() {
        let fx = Fixture::new();
        let mut r = Reorder::new(ReorderMode::Normal, 16, false);
        let mut adj = 0;
        let _ = r.accept_sample(fx.sample(3), &mut adj, false);
        let _ = r.accept_sample(fx.sample(6), &mut adj, false);
        assert_eq!(r.drop_up_to(SeqNr(5)), 1);
        assert_eq!(r.next_seq(), SeqNr(5));
        assert_eq!(r.n_samples(), 1);
    }

    #[test]
    fn test_secondary_admission_via_dup() {
        let fx = Fixture::new();
        let mut primary = Reorder::new(ReorderMode::Normal, 16, false);
        let mut secondary = Reorder::new(ReorderMode::Normal, 16, false);
        secondary.set_next_seq(SeqNr(1));
        let mut adj = 0;
        let s = fx.sample(1);
        let dup = s.dup_first();
        let r1 = primary.accept_sample(s, &mut adj, false);
        let r2 = secondary.accept_sample(dup, &mut adj, false);
        assert!(matches!(r1, ReorderResult::Deliver(_)));
        assert!(matches!(r2, ReorderResult::Deliver(_)));
        // Two storing places: one reconciliation applies both.
        assert_eq!(adj, 2);
    }
}
