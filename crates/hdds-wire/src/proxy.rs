// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local bookkeeping mirrors of remote endpoints and the GUID index.
//!
//! Matches are values owned by each side's own set, keyed by the peer GUID;
//! there are no cross-side back-pointers. Anything that needs the other
//! side re-resolves through the [`EntityIndex`] under its own lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::addrset::AddrSet;
use crate::config::{Config, DefragDropMode};
use crate::defrag::Defrag;
use crate::reorder::{Reorder, ReorderMode};
use crate::types::{FragNr, Guid, SeqNr};
use crate::whc::WriterHistoryCache;

/// Monotone-count acceptance shared by the ACKNACK and HEARTBEAT paths.
///
/// Counts must strictly advance; a stale count is accepted anyway after the
/// silence threshold (peer restart recovery) or when the caller flags the
/// message pre-emptive.
#[derive(Debug, Clone, Copy)]
pub struct CountState {
    last: Option<i32>,
    t_accepted: Instant,
}

impl Default for CountState {
    fn default() -> Self {
        Self {
            last: None,
            t_accepted: Instant::now(),
        }
    }
}

impl CountState {
    /// Decide and record in one step.
    pub fn accept(&mut self, count: i32, now: Instant, silence: Duration, preemptive: bool) -> bool {
        let ok = match self.last {
            None => true,
            Some(prev) => count > prev || preemptive || now.duration_since(self.t_accepted) >= silence,
        };
        if ok {
            self.last = Some(count);
            self.t_accepted = now;
        }
        ok
    }

    #[must_use]
    pub fn last(&self) -> Option<i32> {
        self.last
    }
}

/// A local reader matched to a proxy writer.
#[derive(Debug)]
pub struct ReaderMatch {
    pub reader_guid: Guid,
    /// Caught up with the primary reorderer; out-of-sync readers run their
    /// own secondary admin over duplicated samples.
    pub in_sync: bool,
    pub secondary_reorder: Option<Reorder>,
    /// HEARTBEAT count acceptance for this pairing.
    pub heartbeat: CountState,
    /// The last heartbeat had its FINAL flag clear: an ACKNACK is owed.
    pub ack_requested: bool,
    /// Count for the ACKNACKs we send back.
    pub next_acknack_count: i32,
}

impl ReaderMatch {
    #[must_use]
    pub fn new(reader_guid: Guid) -> Self {
        Self {
            reader_guid,
            in_sync: true,
            secondary_reorder: None,
            heartbeat: CountState::default(),
            ack_requested: false,
            next_acknack_count: 1,
        }
    }

    /// Out-of-sync match catching up on historical data from `start`.
    #[must_use]
    pub fn new_out_of_sync(reader_guid: Guid, cfg: &Config, start: SeqNr) -> Self {
        let mut secondary = Reorder::new(ReorderMode::Normal, cfg.secondary_reorder_max_samples, true);
        secondary.set_next_seq(start);
        Self {
            reader_guid,
            in_sync: false,
            secondary_reorder: Some(secondary),
            heartbeat: CountState::default(),
            ack_requested: false,
            next_acknack_count: 1,
        }
    }
}

/// Mutable state of a proxy writer, under its single mutex.
#[derive(Debug)]
pub struct ProxyWriterState {
    pub defrag: Defrag,
    pub reorder: Reorder,
    /// Highest sequence the writer is known to have published.
    pub last_seq: SeqNr,
    /// Highest fragment seen of `last_seq`, when it is still partial.
    pub last_fragnum: Option<FragNr>,
    pub matches: Vec<ReaderMatch>,
}

/// Local mirror of a remote writer.
#[derive(Debug)]
pub struct ProxyWriter {
    pub guid: Guid,
    pub reliable: bool,
    /// Some matched reader wants data from before it joined; a volatile-only
    /// match lets the first heartbeat jump straight to the writer's tail.
    pub request_historical_data: AtomicBool,
    /// Liveliness as asserted by discovery / lease tracking.
    pub alive: AtomicBool,
    /// No heartbeat seen yet: a reliable writer's samples cannot be safely
    /// admitted (no way to know what to ack).
    pub have_seen_heartbeat: AtomicBool,
    /// Where to send responses, as announced by discovery.
    pub addrset: Mutex<AddrSet>,
    pub state: Mutex<ProxyWriterState>,
}

impl ProxyWriter {
    #[must_use]
    pub fn new(guid: Guid, reliable: bool, cfg: &Config) -> Arc<Self> {
        let defrag_cap = if reliable {
            cfg.defrag_reliable_max_samples
        } else {
            cfg.defrag_unreliable_max_samples
        };
        let drop_mode = if reliable {
            DefragDropMode::DropOldest
        } else {
            DefragDropMode::DropNewest
        };
        let mode = if reliable {
            ReorderMode::Normal
        } else {
            ReorderMode::MonotonicallyIncreasing
        };
        Arc::new(Self {
            guid,
            reliable,
            request_historical_data: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            have_seen_heartbeat: AtomicBool::new(false),
            addrset: Mutex::new(AddrSet::new()),
            state: Mutex::new(ProxyWriterState {
                defrag: Defrag::new(drop_mode, defrag_cap),
                reorder: Reorder::new(mode, cfg.primary_reorder_max_samples, false),
                last_seq: SeqNr(0),
                last_fragnum: None,
                matches: Vec::new(),
            }),
        })
    }

    pub fn add_match(&self, m: ReaderMatch) {
        let mut st = self.state.lock();
        if !st.matches.iter().any(|x| x.reader_guid == m.reader_guid) {
            st.matches.push(m);
        }
    }

    pub fn remove_match(&self, reader_guid: &Guid) {
        self.state.lock().matches.retain(|m| &m.reader_guid != reader_guid);
    }
}

/// A remote reader matched to a local writer.
#[derive(Debug)]
pub struct ProxyReaderMatch {
    pub reader_guid: Guid,
    /// ACKNACK/NACKFRAG count acceptance for this pairing.
    pub acknack: CountState,
    /// Retransmit requests serviced, for throttling decisions.
    pub rexmit_requests: u64,
    /// Highest sequence this reader has positively acknowledged.
    pub max_acked: SeqNr,
}

impl ProxyReaderMatch {
    #[must_use]
    pub fn new(reader_guid: Guid) -> Self {
        Self {
            reader_guid,
            acknack: CountState::default(),
            rexmit_requests: 0,
            max_acked: SeqNr(0),
        }
    }
}

#[derive(Debug)]
pub struct LocalWriterState {
    pub matches: Vec<ProxyReaderMatch>,
    /// Highest sequence actually handed to the transport (reconciled by the
    /// packer on commit).
    pub seq_xmit: SeqNr,
}

/// A local writer, as the receive side sees it: the history cache plus the
/// per-reader reliability bookkeeping.
pub struct LocalWriter {
    pub guid: Guid,
    pub whc: Arc<dyn WriterHistoryCache>,
    /// Union address set over matched readers.
    pub addrset: Mutex<AddrSet>,
    pub heartbeat_count: AtomicU32,
    pub state: Mutex<LocalWriterState>,
}

impl std::fmt::Debug for LocalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWriter").field("guid", &self.guid).finish()
    }
}

impl LocalWriter {
    #[must_use]
    pub fn new(guid: Guid, whc: Arc<dyn WriterHistoryCache>) -> Arc<Self> {
        Arc::new(Self {
            guid,
            whc,
            addrset: Mutex::new(AddrSet::new()),
            heartbeat_count: AtomicU32::new(1),
            state: Mutex::new(LocalWriterState {
                matches: Vec::new(),
                seq_xmit: SeqNr(0),
            }),
        })
    }

    pub fn add_match(&self, m: ProxyReaderMatch) {
        let mut st = self.state.lock();
        if !st.matches.iter().any(|x| x.reader_guid == m.reader_guid) {
            st.matches.push(m);
        }
    }

    /// Next heartbeat count (strictly monotone per writer).
    pub fn next_heartbeat_count(&self) -> i32 {
        self.heartbeat_count.fetch_add(1, Ordering::Relaxed) as i32
    }

    /// Advance the transmitted-sequence watermark; the packer calls this
    /// once per packet for the highest DATA it carried.
    pub fn update_seq_xmit(&self, seq: SeqNr) {
        let mut st = self.state.lock();
        if seq > st.seq_xmit {
            st.seq_xmit = seq;
        }
    }
}

/// Local mirror of a remote reader.
#[derive(Debug)]
pub struct ProxyReader {
    pub guid: Guid,
    pub addrset: AddrSet,
    /// Security transforms (or redundant networking) forbid rewriting the
    /// reader-id slot of retransmits addressed to this reader.
    pub no_merge_rexmit: bool,
}

impl ProxyReader {
    #[must_use]
    pub fn new(guid: Guid, addrset: AddrSet) -> Arc<Self> {
        Arc::new(Self {
            guid,
            addrset,
            no_merge_rexmit: false,
        })
    }
}

/// GUID -> endpoint index. Lock-free lookups; writers insert/remove around
/// discovery events.
#[derive(Debug, Default)]
pub struct EntityIndex {
    proxy_writers: DashMap<Guid, Arc<ProxyWriter>>,
    proxy_readers: DashMap<Guid, Arc<ProxyReader>>,
    local_writers: DashMap<Guid, Arc<LocalWriter>>,
}

impl EntityIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_proxy_writer(&self, pw: Arc<ProxyWriter>) {
        self.proxy_writers.insert(pw.guid, pw);
    }

    pub fn remove_proxy_writer(&self, guid: &Guid) -> Option<Arc<ProxyWriter>> {
        self.proxy_writers.remove(guid).map(|(_, v)| v)
    }

    #[must_use]
    pub fn proxy_writer(&self, guid: &Guid) -> Option<Arc<ProxyWriter>> {
        self.proxy_writers.get(guid).map(|e| Arc::clone(e.value()))
    }

    pub fn insert_proxy_reader(&self, pr: Arc<ProxyReader>) {
        self.proxy_readers.insert(pr.guid, pr);
    }

    pub fn remove_proxy_reader(&self, guid: &Guid) -> Option<Arc<ProxyReader>> {
        self.proxy_readers.remove(guid).map(|(_, v)| v)
    }

    #[must_use]
    pub fn proxy_reader(&self, guid: &Guid) -> Option<Arc<ProxyReader>> {
        self.proxy_readers.get(guid).map(|e| Arc::clone(e.value()))
    }

    pub fn insert_local_writer(&self, w: Arc<LocalWriter>) {
        self.local_writers.insert(w.guid, w);
    }

    pub fn remove_local_writer(&self, guid: &Guid) -> Option<Arc<LocalWriter>> {
        self.local_writers.remove(guid).map(|(_, v)| v)
    }

    #[must_use]
    pub fn local_writer(&self, guid: &Guid) -> Option<Arc<LocalWriter>> {
        self.local_writers.get(guid).map(|e| Arc::clone(e.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, GuidPrefix};
    use crate::whc::InMemoryWhc;

    fn guid(n: u8, kind: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId([0, 0, n, kind]))
    }

    #[test]
    fn test_count_state_monotone() {
        let mut cs = CountState::default();
        let t0 = Instant::now();
        let silence = Duration::from_millis(500);
        assert!(cs.accept(1, t0, silence, false));
        assert!(!cs.accept(1, t0, silence, false));
        assert!(!cs.accept(0, t0, silence, false));
        assert!(cs.accept(2, t0, silence, false));
        // Stale count accepted after silence.
        assert!(cs.accept(1, t0 + Duration::from_millis(600), silence, false));
        // Pre-emptive always passes.
        assert!(cs.accept(0, t0, silence, true));
    }

    #[test]
    fn test_entity_index_roundtrip() {
        let idx = EntityIndex::new();
        let cfg = Config::default();
        let pw = ProxyWriter::new(guid(1, 0xc2), true, &cfg);
        idx.insert_proxy_writer(Arc::clone(&pw));
        assert!(idx.proxy_writer(&pw.guid).is_some());
        assert!(idx.remove_proxy_writer(&pw.guid).is_some());
        assert!(idx.proxy_writer(&pw.guid).is_none());

        let lw = LocalWriter::new(guid(2, 0x02), Arc::new(InMemoryWhc::new()));
        idx.insert_local_writer(Arc::clone(&lw));
        assert!(idx.local_writer(&lw.guid).is_some());
    }

    #[test]
    fn test_match_sets_dedup() {
        let cfg = Config::default();
        let pw = ProxyWriter::new(guid(1, 0xc2), true, &cfg);
        let rg = guid(3, 0x04);
        pw.add_match(ReaderMatch::new(rg));
        pw.add_match(ReaderMatch::new(rg));
        assert_eq!(pw.state.lock().matches.len(), 1);
        pw.remove_match(&rg);
        assert!(pw.state.lock().matches.is_empty());
    }

    #[test]
    fn test_out_of_sync_match_has_secondary() {
        let cfg = Config::default();
        let m = ReaderMatch::new_out_of_sync(guid(4, 0x04), &cfg, SeqNr(10));
        assert!(!m.in_sync);
        assert_eq!(m.secondary_reorder.as_ref().unwrap().next_seq(), SeqNr(10));
    }
}
