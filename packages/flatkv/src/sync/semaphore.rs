//! Counting semaphore with FIFO hand-off and optional deadlines.
//!
//! Waiters take a ticket on arrival and are served strictly in ticket
//! order, so a steady stream of short acquisitions cannot starve an earlier
//! waiter. A waiter that gives up on its deadline marks its ticket as
//! abandoned and the queue skips over it.
//!
//! [`FairSemaphore::acquire_many`] gathers several permits under one
//! ticket, holding the head of the queue until it has them all, so later
//! arrivals cannot slip in between.

use std::collections::BTreeSet;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    permits: usize,
    next_ticket: u64,
    serving: u64,
    abandoned: BTreeSet<u64>,
}

impl State {
    fn advance(&mut self) {
        self.serving += 1;
        while self.abandoned.remove(&self.serving) {
            self.serving += 1;
        }
    }
}

/// Counting semaphore that serves waiters in arrival order.
#[derive(Debug)]
pub struct FairSemaphore {
    state: Mutex<State>,
    available: Condvar,
    capacity: usize,
}

impl FairSemaphore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits: capacity,
                next_ticket: 0,
                serving: 0,
                abandoned: BTreeSet::new(),
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }

    /// Waiters currently queued for a permit.
    #[must_use]
    pub fn queued(&self) -> usize {
        let state = self.state.lock();
        let outstanding = usize::try_from(state.next_ticket - state.serving).unwrap_or(usize::MAX);
        outstanding.saturating_sub(state.abandoned.len())
    }

    /// Waits for a permit in arrival order. Returns `false` if `deadline`
    /// passed before this waiter reached the head of the queue with a
    /// permit free.
    pub fn acquire(&self, deadline: Option<Instant>) -> bool {
        self.acquire_many(1, deadline)
    }

    /// Waits for `count` permits under a single ticket. Once at the head of
    /// the queue the waiter takes permits as they free up and keeps the
    /// head until it holds all of them.
    ///
    /// Returns `false` if `deadline` passed first; any permits gathered so
    /// far are given back.
    pub fn acquire_many(&self, count: usize, deadline: Option<Instant>) -> bool {
        debug_assert!(count <= self.capacity, "asked for more permits than exist");
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let mut held = 0;

        loop {
            if state.serving == ticket {
                let take = (count - held).min(state.permits);
                state.permits -= take;
                held += take;
                if held == count {
                    state.advance();
                    // The next waiter may be able to proceed too.
                    self.available.notify_all();
                    return true;
                }
            }

            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        if state.serving == ticket && held + state.permits >= count {
                            continue;
                        }
                        if state.serving == ticket {
                            state.permits += held;
                            state.advance();
                            self.available.notify_all();
                        } else {
                            state.abandoned.insert(ticket);
                        }
                        return false;
                    }
                }
            }
        }
    }

    /// Takes a permit only if one is free and nobody is queued ahead.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.serving == state.next_ticket && state.permits > 0 {
            state.permits -= 1;
            state.next_ticket += 1;
            state.serving += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.permits < self.capacity, "released more permits than issued");
        state.permits += 1;
        drop(state);
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn wait_for_queue(sem: &FairSemaphore, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sem.queued() != len {
            assert!(Instant::now() < deadline, "queue never reached {len}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn counts_permits() {
        let sem = FairSemaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        assert_eq!(sem.available(), 0);

        sem.release();
        assert_eq!(sem.available(), 1);
        assert!(sem.acquire(None));
        assert_eq!(sem.capacity(), 2);
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let sem = Arc::new(FairSemaphore::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        assert!(sem.try_acquire());

        let mut handles = Vec::new();
        for name in ["first", "second", "third"] {
            let worker_sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            let queued_before = handles.len();
            handles.push(thread::spawn(move || {
                assert!(worker_sem.acquire(None));
                order.lock().push(name);
                worker_sem.release();
            }));
            wait_for_queue(&sem, queued_before + 1);
        }

        sem.release();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn released_permit_reaches_waiter() {
        let sem = Arc::new(FairSemaphore::new(1));
        assert!(sem.try_acquire());

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                assert!(sem.acquire(None));
                sem.release();
            })
        };
        wait_for_queue(&sem, 1);

        sem.release();
        waiter.join().unwrap();
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_times_out_when_exhausted() {
        let sem = FairSemaphore::new(1);
        assert!(sem.try_acquire());

        let started = Instant::now();
        assert!(!sem.acquire(Some(Instant::now() + Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(sem.queued(), 0);

        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn bulk_waiter_keeps_the_head_until_filled() {
        let sem = Arc::new(FairSemaphore::new(2));
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        let order = Arc::new(Mutex::new(Vec::new()));

        let bulk = {
            let sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                assert!(sem.acquire_many(2, None));
                order.lock().push("bulk");
                thread::sleep(Duration::from_millis(20));
                sem.release();
                sem.release();
            })
        };
        wait_for_queue(&sem, 1);

        let single = {
            let sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                assert!(sem.acquire(None));
                order.lock().push("single");
                sem.release();
            })
        };
        wait_for_queue(&sem, 2);

        // One permit frees up: the bulk waiter keeps it and stays in front.
        sem.release();
        thread::sleep(Duration::from_millis(20));
        assert!(order.lock().is_empty());
        assert!(!sem.try_acquire());

        sem.release();
        bulk.join().unwrap();
        single.join().unwrap();
        assert_eq!(*order.lock(), vec!["bulk", "single"]);
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn timed_out_bulk_waiter_returns_what_it_gathered() {
        let sem = FairSemaphore::new(3);
        assert!(sem.try_acquire());

        assert!(!sem.acquire_many(3, Some(Instant::now() + Duration::from_millis(30))));
        assert_eq!(sem.available(), 2);
        assert_eq!(sem.queued(), 0);

        sem.release();
        assert!(sem.acquire_many(3, None));
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn abandoned_ticket_is_skipped() {
        let sem = Arc::new(FairSemaphore::new(1));
        assert!(sem.try_acquire());

        let impatient = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(Some(Instant::now() + Duration::from_millis(250))))
        };
        wait_for_queue(&sem, 1);

        let patient = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || {
                assert!(sem.acquire(None));
                sem.release();
            })
        };
        wait_for_queue(&sem, 2);

        assert!(!impatient.join().unwrap());
        sem.release();
        patient.join().unwrap();
        assert_eq!(sem.available(), 1);
    }
}
