// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::mem;
use std::ptr::{self, NonNull};

use crate::fiber::Fiber;

/// An intrusive FIFO of fibers, threaded through [`Fiber::next`].
///
/// Every operation is O(1) pointer work and allocation-free, which keeps the
/// park and wake paths cheap. A whole list doubles as a pre-linked *segment*
/// that can be spliced onto another list in one step.
///
/// A fiber is on at most one list at any time; debug builds tag membership
/// and assert it on every transfer.
pub(crate) struct FiberList {
    head: *mut Fiber,
    tail: *mut Fiber,
}

// Safety: the list has exclusive access to the fibers threaded onto it
// (`Fiber` is `Send`); sending the list sends that access along.
unsafe impl Send for FiberList {}

impl FiberList {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub(crate) fn head(&self) -> Option<NonNull<Fiber>> {
        NonNull::new(self.head)
    }

    /// Links one fiber at the tail.
    ///
    /// The fiber's link is cleared unconditionally and head and tail are
    /// updated together, so the list stays consistent no matter what state
    /// the link was left in.
    pub(crate) fn push_back(&mut self, fiber: NonNull<Fiber>) {
        let fiber = fiber.as_ptr();
        // Safety: the caller hands the list exclusive access to `fiber`.
        unsafe {
            #[cfg(debug_assertions)]
            {
                assert!(!(*fiber).on_list, "fiber is already on a list");
                (*fiber).on_list = true;
            }

            (*fiber).next = ptr::null_mut();
            if self.tail.is_null() {
                self.head = fiber;
            } else {
                (*self.tail).next = fiber;
            }
            self.tail = fiber;
        }
    }

    /// Unlinks and returns the oldest fiber.
    pub(crate) fn pop_front(&mut self) -> Option<NonNull<Fiber>> {
        let fiber = NonNull::new(self.head)?;
        // Safety: fibers on the list are alive and exclusively ours.
        unsafe {
            self.head = (*fiber.as_ptr()).next;
            if self.head.is_null() {
                self.tail = ptr::null_mut();
            }
            (*fiber.as_ptr()).next = ptr::null_mut();

            #[cfg(debug_assertions)]
            {
                assert!((*fiber.as_ptr()).on_list);
                (*fiber.as_ptr()).on_list = false;
            }
        }
        Some(fiber)
    }

    /// Detaches the entire list as one pre-linked segment, leaving `self`
    /// empty. Fibers in a detached segment still count as "on a list".
    pub(crate) fn take_all(&mut self) -> FiberList {
        mem::replace(self, FiberList::new())
    }

    /// Splices a pre-linked segment onto the tail in O(1). Fibers of one
    /// segment end up contiguous, never interleaved with other appends.
    pub(crate) fn append(&mut self, other: FiberList) {
        if other.is_empty() {
            return;
        }

        if self.tail.is_null() {
            self.head = other.head;
        } else {
            // Safety: a non-null tail is a live fiber owned by this list.
            unsafe { (*self.tail).next = other.head };
        }
        self.tail = other.tail;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fiber::TaskDecl;
    use crate::scheduler::Scheduler;

    fn fibers(n: usize) -> Vec<NonNull<Fiber>> {
        let sched = Arc::new(Scheduler::new());
        (0..n)
            .map(|_| {
                let fiber = Fiber::new(&TaskDecl::default(), None, sched.clone(), 16 * 1024);
                NonNull::new(Box::into_raw(fiber)).unwrap()
            })
            .collect()
    }

    fn free(fibers: Vec<NonNull<Fiber>>) {
        for fiber in fibers {
            // Safety: test fibers were leaked by `fibers` and never ran.
            drop(unsafe { Box::from_raw(fiber.as_ptr()) });
        }
    }

    #[test]
    fn fifo_order() {
        let all = fibers(3);

        let mut list = FiberList::new();
        for &fiber in &all {
            list.push_back(fiber);
        }

        assert_eq!(list.pop_front(), Some(all[0]));
        assert_eq!(list.pop_front(), Some(all[1]));
        assert_eq!(list.pop_front(), Some(all[2]));
        assert_eq!(list.pop_front(), None);
        assert!(list.is_empty());

        free(all);
    }

    #[test]
    fn segment_splice() {
        let all = fibers(5);

        let mut a = FiberList::new();
        a.push_back(all[0]);
        a.push_back(all[1]);

        let mut b = FiberList::new();
        b.push_back(all[2]);
        b.push_back(all[3]);
        b.push_back(all[4]);

        a.append(b.take_all());
        assert!(b.is_empty());

        let drained: Vec<_> = std::iter::from_fn(|| a.pop_front()).collect();
        assert_eq!(drained, all);

        free(all);
    }

    #[test]
    fn append_into_empty() {
        let all = fibers(2);

        let mut seg = FiberList::new();
        seg.push_back(all[0]);
        seg.push_back(all[1]);

        let mut list = FiberList::new();
        list.append(seg);

        assert_eq!(list.pop_front(), Some(all[0]));
        assert_eq!(list.pop_front(), Some(all[1]));
        assert!(list.is_empty());

        free(all);
    }
}
