// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::Backoff;

pub type Mutex<T> = lock_api::Mutex<RawMutex, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, RawMutex, T>;

/// A test-and-set spin flag.
///
/// This is the lock behind every shared structure in the fiber runtime: the
/// ready queue and each synchronization primitive carry one. It is only ever
/// held across O(1) pointer work, so contention is resolved by spinning with
/// [`Backoff`] rather than by parking the thread.
///
/// The runtime's blocking-wait path acquires the flag through
/// [`lock_api::RawMutex::lock`] and hands the *release* to another piece of
/// code entirely (the worker that observes the parked fiber), which is why
/// this type is exposed directly and not only through the [`Mutex`] wrapper.
pub struct RawMutex {
    lock: AtomicBool,
}

impl RawMutex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
        }
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for RawMutex {
    type GuardMarker = lock_api::GuardSend;

    const INIT: Self = Self::new();

    fn lock(&self) {
        let mut boff = Backoff::default();
        while self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                boff.spin();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use lock_api::RawMutex as _;

    use super::*;
    use crate::loom;
    use crate::loom::sync::Arc;
    use crate::loom::thread;

    #[test]
    #[cfg(not(loom))]
    fn smoke() {
        let m = Mutex::new(());
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    #[cfg(not(loom))]
    fn try_lock() {
        let mutex = Mutex::<_>::new(42);

        let a = mutex.try_lock();
        assert_eq!(a.as_ref().map(|r| **r), Some(42));

        // Additional lock fails while the first guard is live.
        let b = mutex.try_lock();
        assert!(b.is_none());

        drop(a);
        let c = mutex.try_lock();
        assert_eq!(c.as_ref().map(|r| **r), Some(42));
    }

    #[test]
    #[cfg(not(loom))]
    fn raw_handoff() {
        // Lock on one thread, release on another. The blocking-wait path of
        // the fiber runtime depends on this being sound.
        let raw = Arc::new(RawMutex::new());
        raw.lock();

        let t = {
            let raw = raw.clone();
            thread::spawn(move || {
                // Safety: the flag is locked and nobody else will release it.
                unsafe { raw.unlock() };
            })
        };
        t.join().unwrap();

        assert!(raw.try_lock());
    }

    #[test]
    fn concurrent_increments() {
        loom::model(|| {
            let lock = Arc::new(Mutex::new(0_usize));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let lock = lock.clone();
                    thread::spawn(move || {
                        *lock.lock() += 1;
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(*lock.lock(), 2);
        });
    }
}
