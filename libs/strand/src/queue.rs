// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ptr::NonNull;

use spin::Mutex;

use crate::fiber::Fiber;
use crate::list::FiberList;

/// The scheduler-wide FIFO of runnable fibers.
///
/// Strictly FIFO in the order appends complete. The spin flag is held only
/// across the O(1) splice or unlink; everything reachable from the queue
/// (list pointers, saved contexts) is published through it.
pub(crate) struct ReadyQueue {
    inner: Mutex<FiberList>,
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(FiberList::new()),
        }
    }

    /// Splices a pre-linked segment onto the tail. The segment's fibers stay
    /// contiguous; concurrent appends never interleave with them.
    pub(crate) fn append(&self, segment: FiberList) {
        self.inner.lock().append(segment);
    }

    /// Unlinks and returns the oldest runnable fiber.
    pub(crate) fn pop(&self) -> Option<NonNull<Fiber>> {
        self.inner.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fiber::TaskDecl;
    use crate::scheduler::Scheduler;

    #[test]
    fn segments_never_interleave() {
        let sched = Arc::new(Scheduler::new());
        let fiber = |_| {
            let f = crate::fiber::Fiber::new(&TaskDecl::default(), None, sched.clone(), 16 * 1024);
            NonNull::new(Box::into_raw(f)).unwrap()
        };
        let batch_a: Vec<_> = (0..3).map(fiber).collect();
        let batch_b: Vec<_> = (0..2).map(fiber).collect();

        let queue = ReadyQueue::new();

        let mut seg = FiberList::new();
        for &f in &batch_a {
            seg.push_back(f);
        }
        queue.append(seg);

        let mut seg = FiberList::new();
        for &f in &batch_b {
            seg.push_back(f);
        }
        queue.append(seg);

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        let expected: Vec<_> = batch_a.iter().chain(&batch_b).copied().collect();
        assert_eq!(drained, expected);

        for f in expected {
            // Safety: leaked above, never dispatched.
            drop(unsafe { Box::from_raw(f.as_ptr()) });
        }
    }
}
