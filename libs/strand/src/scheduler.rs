// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler and yield engine.
//!
//! A [`Scheduler`] is nothing but a ready queue and a stack-size setting; it
//! owns no threads. Callers donate threads by looping over [`Scheduler::poll`],
//! and each polling thread becomes a *worker* with a small amount of state
//! ([`WorkerContext`]) on its own stack frame: the worker's saved context,
//! the fiber it is currently running, and at most one primitive spin flag it
//! still owes a release for.
//!
//! A dispatch is a context switch from the worker into a fiber. Control
//! comes back in one of three ways, and the worker reads which off the
//! fiber's status:
//!
//! - **Done**: the task returned; the bootstrap fired the completion signal
//!   and switched back without saving. The worker frees the fiber.
//! - **Blocked**: the fiber parked itself on a primitive's waiter list. The
//!   primitive's flag is still locked; the worker releases it now that the
//!   context save is complete, which is what closes the race against a
//!   concurrent signal.
//! - **Active**: a cooperative [`yield_now`]. The worker re-admits the fiber
//!   at the tail of the ready queue.
//!
//! In every case the worker then falls through to acquiring the next
//! runnable fiber, all within the same `poll` invocation.

use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use lock_api::RawMutex as _;
use spin::RawMutex;

use crate::arch;
use crate::fiber::{Fiber, FiberStatus, TaskDecl};
use crate::list::FiberList;
use crate::queue::ReadyQueue;
use crate::sync::Barrier;

/// Default usable size of a fiber stack.
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Multiplexes fibers onto caller-provided worker threads.
///
/// Schedulers are fully independent of each other; nothing in this crate is
/// process-global. Submitted fibers keep their scheduler alive, so the
/// scheduler's storage goes away only after the last of its fibers has.
pub struct Scheduler {
    pub(crate) ready: ReadyQueue,
    stack_size: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_stack_size(DEFAULT_STACK_SIZE)
    }

    /// A scheduler whose fibers get `stack_size` bytes of stack (rounded up
    /// to at least one page).
    #[must_use]
    pub fn with_stack_size(stack_size: usize) -> Self {
        Self {
            ready: ReadyQueue::new(),
            stack_size,
        }
    }

    /// Submits a batch of tasks.
    ///
    /// One fiber per declaration is created, and the whole batch is spliced
    /// onto the ready queue as a single contiguous segment in declaration
    /// order. No context switch happens; the tasks run when workers
    /// [`poll`][Scheduler::poll].
    ///
    /// # Panics
    ///
    /// Panics if a fiber stack cannot be mapped.
    pub fn submit(self: &Arc<Self>, decls: &[TaskDecl]) {
        self.submit_inner(decls, None);
    }

    /// Like [`submit`][Scheduler::submit], additionally returning a
    /// [`Barrier`] that counts down once per completed task. Waiting on it
    /// joins the whole batch; the barrier's storage belongs to the caller.
    pub fn submit_with_barrier(self: &Arc<Self>, decls: &[TaskDecl]) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(decls.len()));
        self.submit_inner(decls, Some(&barrier));
        barrier
    }

    fn submit_inner(self: &Arc<Self>, decls: &[TaskDecl], signal: Option<&Arc<Barrier>>) {
        if decls.is_empty() {
            return;
        }

        let mut segment = FiberList::new();
        for decl in decls {
            let fiber = Fiber::new(decl, signal.cloned(), Arc::clone(self), self.stack_size);
            segment.push_back(NonNull::from(Box::leak(fiber)));
        }

        tracing::trace!(tasks = decls.len(), "submitting batch");
        self.ready.append(segment);
    }

    /// Drives this worker: dispatches runnable fibers until the ready queue
    /// is empty.
    ///
    /// Returns `false` if the queue was empty on entry, `true` once at least
    /// one fiber has been dispatched. Callers run this in a loop from as
    /// many threads as they want to donate; what to do when it returns
    /// `false` (back off, park, exit) is their policy.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a fiber.
    pub fn poll(&self) -> bool {
        assert!(
            current_worker().is_none(),
            "Scheduler::poll called from inside a fiber"
        );

        let Some(first) = self.ready.pop() else {
            return false;
        };

        let mut worker = WorkerContext {
            caller: arch::Context::default(),
            current: ptr::null_mut(),
            held_lock: None,
        };
        let worker = &raw mut worker;
        let _guard = EnterGuard::new(worker);

        let mut next = Some(first);
        while let Some(fiber) = next {
            // Safety: `worker` lives until the end of this frame and belongs
            // to this thread; `fiber` came off the ready queue, which grants
            // exclusive ownership.
            unsafe { self.dispatch(worker, fiber) };
            next = self.ready.pop();
        }

        true
    }

    /// Switches into `fiber` and handles whatever state it leaves behind
    /// when control returns to the worker.
    ///
    /// # Safety
    ///
    /// `worker` must be the calling thread's published worker context and
    /// `fiber` must have been popped off this scheduler's ready queue.
    unsafe fn dispatch(&self, worker: *mut WorkerContext, fiber: NonNull<Fiber>) {
        let fiber = fiber.as_ptr();

        // Safety: the fiber came off a list, so nothing else references it;
        // the worker context is only ever touched from its own thread.
        unsafe {
            debug_assert!(matches!(
                (*fiber).status,
                FiberStatus::New | FiberStatus::Blocked
            ));
            if (*fiber).status == FiberStatus::Blocked {
                // A parked context must point at the yield site on the
                // fiber's own stack.
                debug_assert!((*fiber).stack_contains((*fiber).ctx.stack_pointer()));
            }

            (*fiber).status = FiberStatus::Active;
            (*worker).current = fiber;
            tracing::trace!(fiber = (*fiber).id, "dispatching");

            arch::switch(&raw mut (*worker).caller, &raw const (*fiber).ctx);

            // Back on the worker stack: the fiber yielded, parked or
            // finished.
            let fiber = (*worker).current;
            (*worker).current = ptr::null_mut();

            match (*fiber).status {
                FiberStatus::Done => {
                    tracing::trace!(fiber = (*fiber).id, "fiber finished");
                    drop(Box::from_raw(fiber));
                }
                FiberStatus::Blocked => {
                    // The fiber parked itself and left the primitive's flag
                    // locked so no signal could race the save. The save is
                    // complete now: publish the park.
                    let lock = (*worker)
                        .held_lock
                        .take()
                        .expect("blocked fiber did not hand over a lock");
                    lock.as_ref().unlock();
                }
                FiberStatus::Active => {
                    // Cooperative yield: re-admit at the tail, now that the
                    // context save is complete.
                    let mut segment = FiberList::new();
                    segment.push_back(NonNull::new_unchecked(fiber));
                    self.ready.append(segment);
                }
                FiberStatus::New => unreachable!("fiber yielded without ever running"),
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// First code every fiber runs; entered through the context planted by
/// `Context::new_for_fiber`. Invokes the task, fires the completion signal
/// and leaves through a Return-mode switch, never to come back.
pub(crate) extern "C" fn fiber_main() -> ! {
    let worker = current_worker().expect("fiber bootstrap outside a worker");
    // Safety: dispatch stored the fiber in the worker slot right before
    // switching here.
    let fiber = unsafe { (*worker.as_ptr()).current };

    // Safety: `fiber` is the Active fiber owned by this worker; entry and
    // param are immutable after construction.
    let (entry, param) = unsafe { ((*fiber).entry, (*fiber).param) };
    if let Some(entry) = entry {
        entry(param);
    }

    // The task may have parked and been re-dispatched elsewhere: this can be
    // a different worker than the one that entered the bootstrap.
    let worker = current_worker().expect("fiber completion outside a worker");

    // Safety: still the Active fiber of the current worker; the worker's
    // caller context was saved when this fiber was last dispatched. Nothing
    // on this fiber stack is needed after the final switch.
    unsafe {
        if let Some(signal) = (*fiber).signal.take() {
            signal.signal();
        }
        (*fiber).status = FiberStatus::Done;
        arch::switch_to(&raw const (*worker.as_ptr()).caller)
    }
}

/// Cooperatively yields the calling fiber.
///
/// The fiber stays runnable: its worker re-admits it at the tail of the
/// ready queue once the context save has completed, so every other runnable
/// fiber gets a turn first. Outside a fiber this is a no-op.
pub fn yield_now() {
    let Some(worker) = current_worker() else {
        return;
    };
    let worker = worker.as_ptr();

    // Safety: the worker context is only ever touched from its own thread;
    // the current fiber is owned by this worker until the save completes.
    unsafe {
        let fiber = (*worker).current;
        if fiber.is_null() {
            return;
        }

        // Status stays Active; the worker re-enqueues on seeing it.
        arch::switch(&raw mut (*fiber).ctx, &raw const (*worker).caller);
    }
}

/// Parks the calling fiber on `waiters` and yields in Block mode.
///
/// `lock` must be held by the caller and guard `waiters`. It stays locked
/// across the context save (the worker releases it afterwards), which is
/// what forces a concurrent signal to wait until the parked context is
/// whole.
///
/// Returns `false` without touching anything when the calling thread is not
/// running a fiber; the caller keeps the lock and has to fall back to
/// spinning.
pub(crate) fn block_current(lock: &RawMutex, waiters: &mut FiberList) -> bool {
    let Some(worker) = current_worker() else {
        return false;
    };
    let worker = worker.as_ptr();

    // Safety: worker context touched only from its own thread; the current
    // fiber is owned by this worker until the switch completes.
    unsafe {
        let fiber = (*worker).current;
        if fiber.is_null() {
            return false;
        }

        (*fiber).status = FiberStatus::Blocked;
        waiters.push_back(NonNull::new_unchecked(fiber));
        (*worker).held_lock = Some(NonNull::from(lock));
        tracing::trace!(fiber = (*fiber).id, "parking");

        arch::switch(&raw mut (*fiber).ctx, &raw const (*worker).caller);
    }

    true
}

std::thread_local! {
    static ACTIVE_WORKER: Cell<*mut WorkerContext> = const { Cell::new(ptr::null_mut()) };
}

/// Per-worker scheduling state. Lives on the stack frame of the `poll`
/// invocation driving the worker and is published through [`ACTIVE_WORKER`]
/// so suspension points deep inside task code can find their way back.
pub(crate) struct WorkerContext {
    /// The worker's own saved context; restored whenever the current fiber
    /// yields, parks or finishes.
    pub(crate) caller: arch::Context,
    /// Currently executing fiber, or null between dispatches.
    pub(crate) current: *mut Fiber,
    /// A primitive spin flag the parked fiber was still holding; the worker
    /// owes its release.
    pub(crate) held_lock: Option<NonNull<RawMutex>>,
}

pub(crate) fn current_worker() -> Option<NonNull<WorkerContext>> {
    NonNull::new(ACTIVE_WORKER.with(Cell::get))
}

/// Publishes a worker context in the thread-local slot for the duration of
/// one `poll` invocation.
struct EnterGuard;

impl EnterGuard {
    fn new(worker: *mut WorkerContext) -> Self {
        ACTIVE_WORKER.with(|slot| {
            debug_assert!(slot.get().is_null());
            slot.set(worker);
        });
        Self
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        ACTIVE_WORKER.with(|slot| slot.set(ptr::null_mut()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn bump(param: *mut ()) {
        // Safety: the test passes a pointer to a live AtomicUsize.
        let counter = unsafe { &*param.cast::<AtomicUsize>() };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let sched = Arc::new(Scheduler::new());
        sched.submit(&[]);
        assert!(!sched.poll());

        let barrier = sched.submit_with_barrier(&[]);
        // A batch of zero tasks is already complete.
        barrier.wait();
    }

    #[test]
    fn poll_runs_submitted_tasks() {
        let sched = Arc::new(Scheduler::new());
        let counter = AtomicUsize::new(0);
        let param = (&raw const counter).cast_mut().cast::<()>();

        sched.submit(&[TaskDecl::new(bump, param); 3]);

        assert!(sched.poll());
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        // Queue drained: the next poll reports no work.
        assert!(!sched.poll());
    }

    #[test]
    fn default_decl_runs_no_user_code() {
        let sched = Arc::new(Scheduler::new());
        let barrier = sched.submit_with_barrier(&[TaskDecl::default()]);
        assert!(sched.poll());
        barrier.wait();
    }

    #[test]
    fn yield_outside_a_fiber_is_a_noop() {
        yield_now();
    }
}
