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

/// A counting semaphore for fibers.
///
/// [`wait`][Semaphore::wait] consumes a permit, suspending the calling fiber
/// when none are banked; [`signal`][Semaphore::signal] hands its permit
/// directly to the oldest parked fiber, or banks it when nobody is parked.
/// No signal is lost and no waiter wakes spuriously: a woken fiber's permit
/// was consumed on its behalf by the signal that woke it.
///
/// Whenever the flag is free, either the counter is positive and no fiber is
/// parked, or the counter is zero.
pub struct Semaphore {
    lock: RawMutex,
    shared: UnsafeCell<Shared>,
}

struct Shared {
    permits: usize,
    waiters: FiberList,
}

// Safety: `shared` is only ever accessed with `lock` held, which also
// carries the acquire/release edges that publish it between threads.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// A semaphore with `permits` banked.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            lock: RawMutex::new(),
            shared: UnsafeCell::new(Shared {
                permits,
                waiters: FiberList::new(),
            }),
        }
    }

    /// Consumes one permit, suspending the calling fiber until one is
    /// available.
    ///
    /// On a thread that is not running a fiber this cannot suspend; it spins
    /// with backoff until a permit can be taken.
    pub fn wait(&self) {
        let mut boff = Backoff::new();

        loop {
            self.lock.lock();
            // Safety: flag held.
            let shared = unsafe { &mut *self.shared.get() };

            if shared.permits > 0 {
                shared.permits -= 1;
                // Safety: we hold the flag.
                unsafe { self.lock.unlock() };
                return;
            }

            if scheduler::block_current(&self.lock, &mut shared.waiters) {
                // Woken by a signal; its permit was transferred to us.
                return;
            }

            // Not on a fiber: give the flag back and retry.
            // Safety: we hold the flag.
            unsafe { self.lock.unlock() };
            boff.spin();
        }
    }

    /// Makes one permit available, waking the oldest parked fiber if there
    /// is one.
    pub fn signal(&self) {
        self.lock.lock();
        // Safety: flag held.
        let shared = unsafe { &mut *self.shared.get() };

        if let Some(waiter) = shared.waiters.pop_front() {
            let mut segment = FiberList::new();
            segment.push_back(waiter);
            // Safety: we hold the flag.
            unsafe { self.lock.unlock() };
            make_ready(segment);
        } else {
            shared.permits += 1;
            // Safety: we hold the flag.
            unsafe { self.lock.unlock() };
        }
    }
}

impl Default for Semaphore {
    /// A semaphore with no permits banked.
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_off_fiber() {
        let sem = Semaphore::new(2);
        sem.wait();
        sem.wait();

        // Banked again by the signal; the next wait must not spin.
        sem.signal();
        sem.wait();
    }

    #[test]
    fn default_starts_empty() {
        let sem = Semaphore::default();
        sem.signal();
        sem.wait();
    }
}
