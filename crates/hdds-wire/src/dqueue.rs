// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery queue between the receive path and user delivery.
//!
//! A mutex/condvar FIFO of ordered sample chains plus control "bubbles". A
//! dedicated worker drains the queue: data entries go to the caller-supplied
//! handler (with the current reader-GUID override, when one is set) and have
//! their fragment chains unreferenced afterwards; bubbles mutate worker
//! state. Capacity is advisory: producers consult [`DeliveryQueue::is_full`]
//! for backpressure decisions, and `wait_until_empty_if_full` blocks only
//! when over capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::rbuf::fragchain_unref;
use crate::sample::Rsample;
use crate::stats::Stats;
use crate::types::Guid;

/// Per-data-entry delivery callback.
///
/// `rdguid` is the reader-GUID override for targeted historical delivery;
/// `None` means "all matched readers".
pub type DeliveryHandler = dyn Fn(&Guid, &Rsample, Option<&Guid>) + Send + Sync;

enum Entry {
    /// An in-order chain of complete samples from one writer.
    Chain { writer: Guid, chain: Vec<Rsample> },
    /// Run a closure on the delivery thread (barrier-style callbacks).
    Callback(Box<dyn FnOnce() + Send>),
    /// Set or clear the reader-GUID override for subsequent chains.
    ReaderGuid(Option<Guid>),
    Stop,
}

struct State {
    queue: VecDeque<Entry>,
    /// Samples (not entries) currently queued.
    n_samples: u32,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Signaled on enqueue (worker side) and on drain (producer side).
    nonempty: Condvar,
    empty: Condvar,
    max_samples: u32,
    stats: Arc<Stats>,
}

/// The delivery queue; producers clone the `Arc` freely.
pub struct DeliveryQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    name: &'static str,
}

impl DeliveryQueue {
    /// Spawn the worker and return the queue handle.
    pub fn new(
        name: &'static str,
        max_samples: u32,
        stats: Arc<Stats>,
        handler: Box<DeliveryHandler>,
    ) -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                n_samples: 0,
                stopped: false,
            }),
            nonempty: Condvar::new(),
            empty: Condvar::new(),
            max_samples,
            stats,
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("dq.{}", name))
            .spawn(move || worker_loop(&worker_shared, handler))?;
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            name,
        }))
    }

    /// Queue holds more samples than its advisory capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.shared.state.lock().n_samples > self.shared.max_samples
    }

    /// Apply backpressure: block until the queue drains, but only when it is
    /// currently over capacity.
    pub fn wait_until_empty_if_full(&self) {
        let mut st = self.shared.state.lock();
        if st.n_samples > self.shared.max_samples {
            while st.n_samples > 0 && !st.stopped {
                self.shared.empty.wait(&mut st);
            }
        }
    }

    /// Enqueue one ordered chain, waking the worker.
    pub fn enqueue_chain(&self, writer: Guid, chain: Vec<Rsample>) {
        self.enqueue_common(writer, chain, true);
    }

    /// Enqueue without waking; pair with [`DeliveryQueue::wakeup`] to batch
    /// several enqueues under a single broadcast.
    pub fn enqueue_chain_deferred_wakeup(&self, writer: Guid, chain: Vec<Rsample>) {
        self.enqueue_common(writer, chain, false);
    }

    fn enqueue_common(&self, writer: Guid, chain: Vec<Rsample>, wake: bool) {
        if chain.is_empty() {
            return;
        }
        let mut st = self.shared.state.lock();
        if st.stopped {
            // Late chain racing shutdown: release the references here.
            for r in &chain {
                fragchain_unref(&r.fragchain);
            }
            return;
        }
        st.n_samples += chain.len() as u32;
        st.queue.push_back(Entry::Chain { writer, chain });
        drop(st);
        if wake {
            self.shared.nonempty.notify_one();
        }
    }

    /// Flush a deferred-wakeup batch.
    pub fn wakeup(&self) {
        self.shared.nonempty.notify_one();
    }

    /// Run `f` on the delivery thread after everything queued before it.
    pub fn enqueue_callback(&self, f: Box<dyn FnOnce() + Send>) {
        let mut st = self.shared.state.lock();
        if st.stopped {
            return;
        }
        st.queue.push_back(Entry::Callback(f));
        drop(st);
        self.shared.nonempty.notify_one();
    }

    /// Scope subsequent chains to one reader (historical data), or clear
    /// with `None`.
    pub fn enqueue_reader_guid(&self, rdguid: Option<Guid>) {
        let mut st = self.shared.state.lock();
        if st.stopped {
            return;
        }
        st.queue.push_back(Entry::ReaderGuid(rdguid));
        drop(st);
        self.shared.nonempty.notify_one();
    }

    /// Stop the worker after draining everything already queued.
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.stopped {
                return;
            }
            st.stopped = true;
            st.queue.push_back(Entry::Stop);
        }
        self.shared.nonempty.notify_one();
        if let Some(h) = self.worker.lock().take() {
            let _ = h.join();
        }
        log::debug!("[dqueue] {} stopped", self.name);
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared, handler: Box<DeliveryHandler>) {
    let mut rdguid: Option<Guid> = None;
    loop {
        let entry = {
            let mut st = shared.state.lock();
            loop {
                if let Some(e) = st.queue.pop_front() {
                    break e;
                }
                shared.nonempty.wait(&mut st);
            }
        };
        match entry {
            Entry::Chain { writer, chain } => {
                for rsample in &chain {
                    handler(&writer, rsample, rdguid.as_ref());
                    Stats::bump(&shared.stats.num_samples_delivered);
                }
                // References transfer out only after the handler returns.
                for rsample in &chain {
                    fragchain_unref(&rsample.fragchain);
                }
                let mut st = shared.state.lock();
                st.n_samples -= chain.len() as u32;
                if st.n_samples == 0 {
                    shared.empty.notify_all();
                }
            }
            Entry::Callback(f) => f(),
            Entry::ReaderGuid(g) => rdguid = g,
            Entry::Stop => {
                // Everything enqueued after the stop bubble was refused at
                // the producer side, so the queue is drained.
                shared.empty.notify_all();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbuf::{RbufPool, Rdata};
    use crate::sample::SampleInfo;
    use crate::types::{EntityId, GuidPrefix, SeqNr};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    fn wguid() -> Guid {
        Guid::new(GuidPrefix([1; 12]), EntityId([0, 0, 0, 0x02]))
    }

    fn chain_of(pool: &RbufPool, seqs: &[i64]) -> Vec<Rsample> {
        let mut m = pool.new_rmsg();
        m.set_size(16);
        let m = Arc::new(m);
        seqs.iter()
            .map(|&s| {
                let rd = Rdata::new(&m, 0, 4, 0, 0, None);
                rd.add_bias();
                crate::rbuf::fragchain_adjust(&[rd.clone()], 1);
                Rsample::new(SampleInfo::new(SeqNr(s), 4), vec![rd])
            })
            .collect()
    }

    #[test]
    fn test_delivers_in_order() {
        let pool = RbufPool::new(256, 8);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let stats = Arc::new(Stats::new());
        let dq = DeliveryQueue::new(
            "t",
            16,
            Arc::clone(&stats),
            Box::new(move |_, r, _| seen2.lock().unwrap().push(r.info.seq.0)),
        )
        .unwrap();

        dq.enqueue_chain(wguid(), chain_of(&pool, &[1, 2]));
        dq.enqueue_chain(wguid(), chain_of(&pool, &[3]));
        dq.wait_until_empty_if_full();
        dq.stop();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(stats.snapshot().num_samples_delivered, 3);
    }

    #[test]
    fn test_reader_guid_bubble_scopes_delivery() {
        let pool = RbufPool::new(256, 8);
        let target = Guid::new(GuidPrefix([7; 12]), EntityId([0, 0, 0, 0x04]));
        let overrides = Arc::new(StdMutex::new(Vec::new()));
        let o2 = Arc::clone(&overrides);
        let dq = DeliveryQueue::new(
            "t",
            16,
            Arc::new(Stats::new()),
            Box::new(move |_, _, g| o2.lock().unwrap().push(g.copied())),
        )
        .unwrap();

        dq.enqueue_reader_guid(Some(target));
        dq.enqueue_chain(wguid(), chain_of(&pool, &[1]));
        dq.enqueue_reader_guid(None);
        dq.enqueue_chain(wguid(), chain_of(&pool, &[2]));
        dq.stop();
        assert_eq!(*overrides.lock().unwrap(), vec![Some(target), None]);
    }

    #[test]
    fn test_callback_runs_in_sequence() {
        let pool = RbufPool::new(256, 8);
        let counter = Arc::new(AtomicU32::new(0));
        let c1 = Arc::clone(&counter);
        let dq = DeliveryQueue::new(
            "t",
            16,
            Arc::new(Stats::new()),
            Box::new(move |_, _, _| {
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let c2 = Arc::clone(&counter);
        dq.enqueue_chain(wguid(), chain_of(&pool, &[1]));
        dq.enqueue_callback(Box::new(move || {
            // Runs after the chain before it.
            assert_eq!(c2.load(Ordering::SeqCst), 1);
            c2.fetch_add(10, Ordering::SeqCst);
        }));
        dq.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_is_full_advisory() {
        let pool = RbufPool::new(256, 8);
        // Handler parks until released so the queue backs up.
        let gate = Arc::new((StdMutex::new(false), std::sync::Condvar::new()));
        let g2 = Arc::clone(&gate);
        let dq = DeliveryQueue::new(
            "t",
            1,
            Arc::new(Stats::new()),
            Box::new(move |_, _, _| {
                let (m, cv) = &*g2;
                let mut open = m.lock().unwrap();
                while !*open {
                    open = cv.wait(open).unwrap();
                }
            }),
        )
        .unwrap();

        dq.enqueue_chain(wguid(), chain_of(&pool, &[1, 2]));
        assert!(dq.is_full());
        {
            let (m, cv) = &*gate;
            *m.lock().unwrap() = true;
            cv.notify_all();
        }
        dq.wait_until_empty_if_full();
        assert!(!dq.is_full());
        dq.stop();
    }
}
