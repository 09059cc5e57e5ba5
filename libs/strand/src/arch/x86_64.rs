// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! x86_64 (SysV) context switching.

use core::arch::naked_asm;
use core::ptr;

use crate::stack::StackPointer;

pub const STACK_ALIGNMENT: usize = 16;

/// The callee-saved register file of a suspended execution context.
///
/// The layout is fixed because the switch assembly addresses the fields by
/// byte offset.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// Builds the resumption context of a fiber that has never run.
    ///
    /// The SysV ABI wants `rsp ≡ 16n + 8` at function entry, i.e. the state
    /// left behind by a `call` on an aligned stack. [`switch`] enters a
    /// context with `ret`, so the entry address is planted at `top - 16`:
    /// popping it leaves `rsp = top - 8`, which is exactly that state.
    pub(crate) fn new_for_fiber(stack_top: StackPointer, entry: super::FiberEntry) -> Self {
        debug_assert_eq!(stack_top.get() % STACK_ALIGNMENT, 0);
        let sp = stack_top.get() - 16;

        // Safety: the topmost 16 bytes of the (writable, freshly mapped)
        // fiber stack are reserved for this slot.
        unsafe { ptr::write(sp as *mut u64, entry as usize as u64) };

        Self {
            rsp: sp as u64,
            ..Self::default()
        }
    }

    /// The saved stack pointer, for membership checks against the owning
    /// fiber's stack.
    pub(crate) fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Stores the current callee-saved state into `save` and resumes `load`.
///
/// `rsp` still points at the return address pushed by the `call` into this
/// function; it is saved as-is, so the matching restore `ret`s straight back
/// to the caller of `switch`. A context built by [`Context::new_for_fiber`]
/// instead `ret`s into the fiber bootstrap.
///
/// # Safety
///
/// `load` must describe a context built by `new_for_fiber` or saved by an
/// earlier `switch`, and its stack must be live. No other thread may resume
/// the same context.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(_save: *mut Context, _load: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ret",
    );
}

/// Resumes `load` without saving the current state.
///
/// # Safety
///
/// Same as [`switch`]; additionally the current context becomes unreachable,
/// so nothing on the current stack may still be needed.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_to(_load: *const Context) -> ! {
    naked_asm!(
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
        "ret",
    );
}
