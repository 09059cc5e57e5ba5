// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arch::Context;
use crate::scheduler::Scheduler;
use crate::stack::FiberStack;
use crate::sync::Barrier;

/// Signature of a task entry point.
///
/// The parameter is the opaque pointer carried by the task's [`TaskDecl`];
/// what it points at (and whether it may be touched from whichever worker
/// thread ends up running the task) is entirely the submitter's business.
pub type TaskFn = fn(*mut ());

/// Describes one task to submit to a [`Scheduler`].
#[derive(Clone, Copy, Debug)]
pub struct TaskDecl {
    pub(crate) entry: Option<TaskFn>,
    pub(crate) param: *mut (),
}

impl TaskDecl {
    #[must_use]
    pub fn new(entry: TaskFn, param: *mut ()) -> Self {
        Self {
            entry: Some(entry),
            param,
        }
    }
}

impl Default for TaskDecl {
    /// An empty declaration. Its fiber runs no user code, only fires the
    /// completion signal.
    fn default() -> Self {
        Self {
            entry: None,
            param: ptr::null_mut(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FiberStatus {
    /// Never dispatched; the saved context points at the bootstrap.
    New,
    /// Running on exactly one worker; on no list.
    Active,
    /// Parked on a primitive's waiter list; the saved context points at the
    /// yield site on the fiber's own stack.
    Blocked,
    /// Terminal. The worker that observes this frees the fiber.
    Done,
}

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(0);

/// One suspended or running task.
///
/// The record is boxed and travels between lists and workers by raw pointer;
/// its [`FiberStack`] is a separate mapping so a stack overflow trips the
/// guard page instead of overwriting this struct. The `next` link threads the
/// fiber onto at most one [`FiberList`](crate::list::FiberList) at a time.
pub(crate) struct Fiber {
    pub(crate) ctx: Context,
    stack: FiberStack,
    pub(crate) entry: Option<TaskFn>,
    pub(crate) param: *mut (),
    /// Completion signal; fired once after the task returns.
    pub(crate) signal: Option<Arc<Barrier>>,
    /// The scheduler whose ready queue this fiber runs on. Keeps the
    /// scheduler alive for as long as any of its fibers exist.
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) status: FiberStatus,
    pub(crate) next: *mut Fiber,
    pub(crate) id: u64,
    #[cfg(debug_assertions)]
    pub(crate) on_list: bool,
}

// Safety: a fiber is only ever touched by the single worker that currently
// owns it (Active) or under the lock of the one list it is parked on; it
// migrates between threads only at suspension points, after its context has
// been fully saved. The opaque `param` is the submitter's contract.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Allocates the record and its stack, with the context set up so the
    /// first restore lands in the scheduler's bootstrap.
    ///
    /// # Panics
    ///
    /// Panics if the stack cannot be mapped.
    pub(crate) fn new(
        decl: &TaskDecl,
        signal: Option<Arc<Barrier>>,
        scheduler: Arc<Scheduler>,
        stack_size: usize,
    ) -> Box<Self> {
        let stack = FiberStack::new(stack_size).expect("failed to map a fiber stack");
        let ctx = Context::new_for_fiber(stack.top(), crate::scheduler::fiber_main);

        Box::new(Self {
            ctx,
            stack,
            entry: decl.entry,
            param: decl.param,
            signal,
            scheduler,
            status: FiberStatus::New,
            next: ptr::null_mut(),
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            #[cfg(debug_assertions)]
            on_list: false,
        })
    }

    /// Whether `sp` lies within this fiber's own stack.
    pub(crate) fn stack_contains(&self, sp: usize) -> bool {
        self.stack.bottom().get() < sp && sp <= self.stack.top().get()
    }
}
