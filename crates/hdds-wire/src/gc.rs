// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quiescence-based deferred reclamation.
//!
//! Receive and delivery threads chase pointers into structures that
//! discovery may concurrently retire. Instead of per-object locks, every
//! such thread keeps a virtual-time counter: odd while awake (possibly
//! holding pointers), even while asleep. Retirement enqueues a request that
//! snapshots the awake threads; the GC worker runs the request's callback
//! only after each snapshotted thread has either advanced its counter or
//! gone away, at which point no thread can still hold a pointer taken
//! before the request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

/// One registered thread's awake/asleep counter.
#[derive(Debug)]
pub struct ThreadState {
    name: String,
    /// Odd while awake, even while asleep.
    vtime: AtomicU32,
}

impl ThreadState {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            vtime: AtomicU32::new(0),
        })
    }

    /// Mark awake: pointer-chasing may begin.
    pub fn awake(&self) {
        let v = self.vtime.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(v % 2, 0, "{}: awake while awake", self.name);
    }

    /// Mark asleep: no RMSG-dependent pointer survives this point.
    pub fn asleep(&self) {
        let v = self.vtime.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(v % 2, 1, "{}: asleep while asleep", self.name);
    }

    #[must_use]
    pub fn vtime(&self) -> u32 {
        self.vtime.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.vtime() % 2 == 1
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// RAII awake scope.
pub struct AwakeGuard<'a>(&'a ThreadState);

impl Drop for AwakeGuard<'_> {
    fn drop(&mut self) {
        self.0.asleep();
    }
}

impl ThreadState {
    #[must_use]
    pub fn awake_scope(&self) -> AwakeGuard<'_> {
        self.awake();
        AwakeGuard(self)
    }
}

/// Registry of the domain's pointer-chasing threads.
#[derive(Debug, Default)]
pub struct ThreadStates {
    threads: Mutex<Vec<Weak<ThreadState>>>,
}

impl ThreadStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) -> Arc<ThreadState> {
        let ts = ThreadState::new(name.to_string());
        let mut v = self.threads.lock();
        v.retain(|w| w.strong_count() > 0);
        v.push(Arc::downgrade(&ts));
        ts
    }

    /// Snapshot the currently awake threads with their virtual times.
    fn snapshot(&self) -> Vec<(Weak<ThreadState>, u32)> {
        self.threads
            .lock()
            .iter()
            .filter_map(|w| {
                let ts = w.upgrade()?;
                let vt = ts.vtime();
                (vt % 2 == 1).then(|| (Weak::clone(w), vt))
            })
            .collect()
    }
}

struct GcRequest {
    snapshots: Vec<(Weak<ThreadState>, u32)>,
    callback: Box<dyn FnOnce() + Send>,
}

enum Msg {
    Req(GcRequest),
    Stop,
}

struct Counters {
    outstanding: Mutex<u32>,
    drained: Condvar,
}

/// The per-domain garbage collector.
pub struct Gc {
    tx: Sender<Msg>,
    counters: Arc<Counters>,
    threads: Arc<ThreadStates>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Gc {
    /// Spawn the worker. `lease_check` runs on `lease_interval` regardless
    /// of request traffic.
    pub fn new(
        threads: Arc<ThreadStates>,
        lease_interval: Duration,
        lease_check: Box<dyn Fn() + Send>,
    ) -> std::io::Result<Arc<Self>> {
        let (tx, rx) = unbounded();
        let counters = Arc::new(Counters {
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
        });
        let wc = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("gc".to_string())
            .spawn(move || worker_loop(&rx, &wc, lease_interval, lease_check))?;
        Ok(Arc::new(Self {
            tx,
            counters,
            threads,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Defer `callback` until quiescence. Requests run in FIFO order.
    pub fn enqueue(&self, callback: Box<dyn FnOnce() + Send>) {
        *self.counters.outstanding.lock() += 1;
        let req = GcRequest {
            snapshots: self.threads.snapshot(),
            callback,
        };
        if let Err(e) = self.tx.send(Msg::Req(req)) {
            // Worker already gone (shutdown race): run inline, the threads
            // it would have waited for are gone too.
            if let Msg::Req(req) = e.into_inner() {
                (req.callback)();
            }
            let mut n = self.counters.outstanding.lock();
            *n -= 1;
            if *n == 0 {
                self.counters.drained.notify_all();
            }
        }
    }

    /// Block until every queued request has run.
    pub fn drain(&self) {
        let mut n = self.counters.outstanding.lock();
        while *n > 0 {
            self.counters.drained.wait(&mut n);
        }
    }

    /// Drain, then terminate the worker.
    pub fn stop(&self) {
        self.drain();
        let _ = self.tx.send(Msg::Stop);
        if let Some(h) = self.worker.lock().take() {
            let _ = h.join();
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        self.stop();
    }
}

fn quiescent(snapshots: &[(Weak<ThreadState>, u32)]) -> bool {
    snapshots.iter().all(|(w, vt)| match w.upgrade() {
        // Advanced (slept at least once) since the snapshot.
        Some(ts) => ts.vtime() != *vt,
        // Thread left the domain entirely.
        None => true,
    })
}

fn worker_loop(
    rx: &Receiver<Msg>,
    counters: &Counters,
    lease_interval: Duration,
    lease_check: Box<dyn Fn() + Send>,
) {
    let step = Duration::from_millis(1);
    loop {
        match rx.recv_timeout(lease_interval) {
            Ok(Msg::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => lease_check(),
            Ok(Msg::Req(req)) => {
                // Sleep in short steps until every snapshotted thread moved,
                // keeping the lease checker ticking meanwhile.
                let mut since_lease = Duration::ZERO;
                while !quiescent(&req.snapshots) {
                    std::thread::sleep(step);
                    since_lease += step;
                    if since_lease >= lease_interval {
                        lease_check();
                        since_lease = Duration::ZERO;
                    }
                }
                (req.callback)();
                let mut n = counters.outstanding.lock();
                *n -= 1;
                if *n == 0 {
                    counters.drained.notify_all();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_runs_immediately_without_threads() {
        let threads = Arc::new(ThreadStates::new());
        let gc = Gc::new(Arc::clone(&threads), Duration::from_secs(10), Box::new(|| {})).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        gc.enqueue(Box::new(move || r.store(true, Ordering::SeqCst)));
        gc.drain();
        assert!(ran.load(Ordering::SeqCst));
        gc.stop();
    }

    #[test]
    fn test_waits_for_awake_thread() {
        let threads = Arc::new(ThreadStates::new());
        let ts = threads.register("recv");
        let gc = Gc::new(Arc::clone(&threads), Duration::from_secs(10), Box::new(|| {})).unwrap();

        ts.awake();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        gc.enqueue(Box::new(move || r.store(true, Ordering::SeqCst)));

        // The callback must not run while the thread stays awake.
        std::thread::sleep(Duration::from_millis(30));
        assert!(!ran.load(Ordering::SeqCst));

        ts.asleep();
        gc.drain();
        assert!(ran.load(Ordering::SeqCst));
        gc.stop();
    }

    #[test]
    fn test_asleep_threads_do_not_block() {
        let threads = Arc::new(ThreadStates::new());
        let _ts = threads.register("idle");
        let gc = Gc::new(Arc::clone(&threads), Duration::from_secs(10), Box::new(|| {})).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        gc.enqueue(Box::new(move || r.store(true, Ordering::SeqCst)));
        gc.drain();
        assert!(ran.load(Ordering::SeqCst));
        gc.stop();
    }

    #[test]
    fn test_lease_check_ticks() {
        let threads = Arc::new(ThreadStates::new());
        let ticks = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&ticks);
        let gc = Gc::new(
            threads,
            Duration::from_millis(5),
            Box::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        gc.stop();
    }

    #[test]
    fn test_awake_scope_guard() {
        let threads = ThreadStates::new();
        let ts = threads.register("t");
        assert!(!ts.is_awake());
        {
            let _g = ts.awake_scope();
            assert!(ts.is_awake());
        }
        assert!(!ts.is_awake());
    }
}
