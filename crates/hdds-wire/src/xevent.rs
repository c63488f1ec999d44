// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed events: delayed ACKNACKs, heartbeat responses, lease checks.
//!
//! A single worker sleeps until the earliest deadline and runs callbacks
//! outside the lock. Events are one-shot; recurring behavior is a callback
//! posting its successor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type EventFn = Box<dyn FnOnce() + Send>;

struct Scheduled {
    deadline: Instant,
    seqno: u64,
    f: EventFn,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seqno == other.seqno
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seqno).cmp(&(other.deadline, other.seqno))
    }
}

struct State {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seqno: u64,
    terminate: bool,
}

struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

/// The event admin; one per domain.
pub struct EventQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new(name: &str) -> std::io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_seqno: 0,
                terminate: false,
            }),
            cv: Condvar::new(),
        });
        let ws = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("xevent.{}", name))
            .spawn(move || worker_loop(&ws))?;
        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Run `f` at (or shortly after) `deadline`.
    pub fn post_at(&self, deadline: Instant, f: EventFn) {
        let mut st = self.shared.state.lock();
        if st.terminate {
            return;
        }
        let seqno = st.next_seqno;
        st.next_seqno += 1;
        st.heap.push(Reverse(Scheduled { deadline, seqno, f }));
        drop(st);
        self.cv_notify();
    }

    /// Run `f` after `delay`.
    pub fn post_after(&self, delay: Duration, f: EventFn) {
        self.post_at(Instant::now() + delay, f);
    }

    fn cv_notify(&self) {
        self.shared.cv.notify_one();
    }

    /// Stop without running the remaining events.
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.terminate {
                return;
            }
            st.terminate = true;
        }
        self.shared.cv.notify_all();
        if let Some(h) = self.worker.lock().take() {
            let _ = h.join();
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let due = {
            let mut st = shared.state.lock();
            loop {
                if st.terminate {
                    return;
                }
                let now = Instant::now();
                match st.heap.peek() {
                    Some(Reverse(s)) if s.deadline <= now => {
                        break st.heap.pop().expect("peeked").0;
                    }
                    Some(Reverse(s)) => {
                        let deadline = s.deadline;
                        let _ = shared.cv.wait_until(&mut st, deadline);
                    }
                    None => shared.cv.wait(&mut st),
                }
            }
        };
        (due.f)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_events_fire_in_deadline_order() {
        let eq = EventQueue::new("t").unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let now = Instant::now();
        for (tag, delay_ms) in [(2, 20u64), (1, 5), (3, 35)] {
            let o = Arc::clone(&order);
            eq.post_at(now + Duration::from_millis(delay_ms), Box::new(move || {
                o.lock().unwrap().push(tag);
            }));
        }
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        eq.stop();
    }

    #[test]
    fn test_chained_event_reposts() {
        let eq = EventQueue::new("t").unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let eq2 = Arc::clone(&eq);
        eq.post_after(
            Duration::from_millis(1),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                let c2 = Arc::clone(&c);
                eq2.post_after(
                    Duration::from_millis(1),
                    Box::new(move || {
                        c2.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        eq.stop();
    }

    #[test]
    fn test_stop_discards_pending() {
        let eq = EventQueue::new("t").unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        eq.post_after(
            Duration::from_secs(30),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        eq.stop();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
