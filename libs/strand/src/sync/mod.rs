// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fiber-aware synchronization primitives.
//!
//! Both primitives share one shape: a spin flag, a counter and an intrusive
//! waiter FIFO. A `wait` that cannot proceed parks the calling fiber on the
//! waiter list through [`crate::scheduler::block_current`], leaving the flag
//! locked until the fiber's context save is complete; a `signal` that finds
//! waiters detaches them and hands them back to the ready queue. Called from
//! a thread that is not running a fiber, `wait` spins with backoff instead
//! of parking.

mod barrier;
mod semaphore;

pub use barrier::Barrier;
pub use semaphore::Semaphore;

use crate::list::FiberList;

/// Hands a detached segment of woken fibers back to their scheduler's ready
/// queue as one contiguous splice.
pub(crate) fn make_ready(segment: FiberList) {
    let Some(head) = segment.head() else {
        return;
    };

    // Safety: parked fibers are alive, and each keeps its scheduler alive
    // through its own Arc. The clone keeps the scheduler valid past the
    // append even if every woken fiber finishes in the meantime.
    let scheduler = unsafe { (*head.as_ptr()).scheduler.clone() };
    scheduler.ready.append(segment);
}
