// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fiber stacks.
//!
//! Every fiber owns a [`FiberStack`]: a dedicated mapping with an
//! inaccessible guard page at the low end, allocated separately from the
//! fiber record so an overflow faults instead of silently corrupting
//! neighbouring state.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod valgrind;
        mod unix;
        pub(crate) use unix::FiberStack;
    } else {
        compile_error!("fiber stacks are only supported on unix targets");
    }
}

/// Address of a stack slot. Stacks grow downward; `top` is one past the
/// highest usable byte.
pub(crate) type StackPointer = core::num::NonZeroUsize;

/// Minimum usable size of a stack, excluding the guard page.
pub(crate) const MIN_STACK_SIZE: usize = 4096;
