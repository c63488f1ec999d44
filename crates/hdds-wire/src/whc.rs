// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer history cache contract.
//!
//! The cache itself (storage policy, instance bookkeeping) is an external
//! collaborator; the reliability layer only needs to ask what span of
//! sequences is retransmittable, borrow one sample, and drop everything a
//! reader has acknowledged. [`InMemoryWhc`] is the reference implementation
//! backing the transmit path and the tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{SeqNr, WireTime};

/// Span of sequences currently held, as seen by the reliability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhcState {
    /// Oldest retransmittable sequence, `None` when empty.
    pub min_seq: Option<SeqNr>,
    /// Newest written sequence, `None` when nothing was ever written.
    pub max_seq: Option<SeqNr>,
}

/// One sample borrowed for (re)transmission.
#[derive(Debug, Clone)]
pub struct WhcSample {
    pub seq: SeqNr,
    pub timestamp: WireTime,
    /// Serialized payload including the CDR encapsulation header.
    pub serdata: Arc<Vec<u8>>,
}

/// What the receive side calls into when ACKNACK/NACKFRAG arrive.
pub trait WriterHistoryCache: Send + Sync {
    fn get_state(&self) -> WhcState;

    /// Smallest held sequence strictly greater than `seq`.
    fn next_seq(&self, seq: SeqNr) -> Option<SeqNr>;

    /// Borrow the sample at `seq`, `None` when it is no longer cached.
    fn borrow_sample(&self, seq: SeqNr) -> Option<WhcSample>;

    /// Drop every sample at or below `max_acked.pred()`; returns how many
    /// went.
    fn remove_acked_messages(&self, max_acked: SeqNr) -> usize;
}

/// BTreeMap-backed history cache for tests and simple writers.
#[derive(Debug, Default)]
pub struct InMemoryWhc {
    samples: Mutex<BTreeMap<i64, WhcSample>>,
}

impl InMemoryWhc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, seq: SeqNr, timestamp: WireTime, serdata: Vec<u8>) {
        let mut s = self.samples.lock();
        s.insert(
            seq.0,
            WhcSample {
                seq,
                timestamp,
                serdata: Arc::new(serdata),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

impl WriterHistoryCache for InMemoryWhc {
    fn get_state(&self) -> WhcState {
        let s = self.samples.lock();
        WhcState {
            min_seq: s.keys().next().map(|&k| SeqNr(k)),
            max_seq: s.keys().next_back().map(|&k| SeqNr(k)),
        }
    }

    fn next_seq(&self, seq: SeqNr) -> Option<SeqNr> {
        self.samples
            .lock()
            .range(seq.0 + 1..)
            .next()
            .map(|(&k, _)| SeqNr(k))
    }

    fn borrow_sample(&self, seq: SeqNr) -> Option<WhcSample> {
        self.samples.lock().get(&seq.0).cloned()
    }

    fn remove_acked_messages(&self, max_acked: SeqNr) -> usize {
        let mut s = self.samples.lock();
        let doomed: Vec<i64> = s.range(..max_acked.0).map(|(&k, _)| k).collect();
        for k in &doomed {
            s.remove(k);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TIME_INVALID;

    fn filled() -> InMemoryWhc {
        let whc = InMemoryWhc::new();
        for seq in 1..=5 {
            whc.insert(SeqNr(seq), TIME_INVALID, vec![seq as u8]);
        }
        whc
    }

    #[test]
    fn test_state_span() {
        let whc = filled();
        let st = whc.get_state();
        assert_eq!(st.min_seq, Some(SeqNr(1)));
        assert_eq!(st.max_seq, Some(SeqNr(5)));
        assert_eq!(InMemoryWhc::new().get_state().min_seq, None);
    }

    #[test]
    fn test_remove_acked() {
        let whc = filled();
        // Reader acked everything below 4.
        assert_eq!(whc.remove_acked_messages(SeqNr(4)), 3);
        assert_eq!(whc.get_state().min_seq, Some(SeqNr(4)));
        assert!(whc.borrow_sample(SeqNr(2)).is_none());
        assert!(whc.borrow_sample(SeqNr(4)).is_some());
    }

    #[test]
    fn test_next_seq_skips_holes() {
        let whc = InMemoryWhc::new();
        whc.insert(SeqNr(2), TIME_INVALID, vec![]);
        whc.insert(SeqNr(7), TIME_INVALID, vec![]);
        assert_eq!(whc.next_seq(SeqNr(1)), Some(SeqNr(2)));
        assert_eq!(whc.next_seq(SeqNr(2)), Some(SeqNr(7)));
        assert_eq!(whc.next_seq(SeqNr(7)), None);
    }
}
