// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::UnsafeCell;

use lock_api::RawMutex as _;
use spin::{Backoff, RawMutex};

use crate::list::FiberList;
use crate::scheduler;
use crate::sync::make_ready;

/// A one-shot countdown barrier.
///
/// Created with a count, usually the number of tasks in a batch:
/// [`Scheduler::submit_with_barrier`](crate::Scheduler::submit_with_barrier)
/// wires one up so each task completion signals it once. It works just as
/// well standalone, signalled by hand.
///
/// The countdown never goes back up. The [`signal`][Barrier::signal] that
/// reaches zero releases every parked waiter in one batch; from then on the
/// barrier is terminal: further waits return immediately and further signals
/// are no-ops (over-signalling a released barrier is allowed).
pub struct Barrier {
    lock: RawMutex,
    shared: UnsafeCell<Shared>,
}

struct Shared {
    remaining: usize,
    waiters: FiberList,
}

// Safety: `shared` is only ever accessed with `lock` held, which also
// carries the acquire/release edges that publish it between threads.
unsafe impl Send for Barrier {}
unsafe impl Sync for Barrier {}

impl Barrier {
    /// A barrier that releases after `count` signals. With `count` zero it
    /// is born released.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            lock: RawMutex::new(),
            shared: UnsafeCell::new(Shared {
                remaining: count,
                waiters: FiberList::new(),
            }),
        }
    }

    /// Suspends the calling fiber until the countdown reaches zero; returns
    /// immediately if it already has.
    ///
    /// On a thread that is not running a fiber this cannot suspend; it spins
    /// with backoff until the barrier releases.
    pub fn wait(&self) {
        let mut boff = Backoff::new();

        loop {
            self.lock.lock();
            // Safety: flag held.
            let shared = unsafe { &mut *self.shared.get() };

            if shared.remaining == 0 {
                // Safety: we hold the flag.
                unsafe { self.lock.unlock() };
                return;
            }

            if scheduler::block_current(&self.lock, &mut shared.waiters) {
                // Woken by the releasing signal.
                return;
            }

            // Not on a fiber: give the flag back and retry.
            // Safety: we hold the flag.
            unsafe { self.lock.unlock() };
            boff.spin();
        }
    }

    /// Counts the barrier down by one.
    ///
    /// The signal that reaches zero detaches the whole waiter list and
    /// re-admits it to the ready queue as one contiguous segment, strictly
    /// after the final decrement. Signals on a released barrier do nothing.
    pub fn signal(&self) {
        self.lock.lock();
        // Safety: flag held.
        let shared = unsafe { &mut *self.shared.get() };

        if shared.remaining > 0 {
            shared.remaining -= 1;

            if shared.remaining == 0 {
                let waiters = shared.waiters.take_all();
                // Safety: we hold the flag.
                unsafe { self.lock.unlock() };

                tracing::trace!("barrier released");
                make_ready(waiters);
                return;
            }
        }

        // Safety: we hold the flag.
        unsafe { self.lock.unlock() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_count_is_born_released() {
        let barrier = Barrier::new(0);
        barrier.wait();
    }

    #[test]
    fn releases_after_exact_count() {
        let barrier = Barrier::new(2);
        barrier.signal();
        barrier.signal();
        barrier.wait();
    }

    #[test]
    fn over_signalling_is_a_noop() {
        let barrier = Barrier::new(1);
        barrier.signal();
        barrier.signal();
        barrier.signal();
        barrier.wait();
    }
}
