// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The architecture-specific context switch primitive.
//!
//! Each backend provides a [`Context`] holding the callee-saved register file
//! and the stack pointer, plus two operations:
//!
//! - [`switch`]: store the current execution state into one context and
//!   resume another. Always paired; the saved context resumes at the
//!   instruction after its own `switch` call when something later restores
//!   it.
//! - [`switch_to`]: restore-only half, used when the current context is dead
//!   (a finished fiber) and there is nothing worth saving.
//!
//! Only the callee-saved state is transferred. Caller-saved registers and
//! (on x86_64) the SSE state are not preserved, which is safe because every
//! suspension point is an ordinary `extern "C"` call site and the compiler
//! already assumes they are clobbered there. On aarch64 the lower halves of
//! v8–v15 *are* callee-saved under AAPCS64 and are therefore part of the
//! [`Context`].
//!
//! Both operations are naked functions and can never be inlined into a
//! caller.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub(crate) use aarch64::*;
    } else if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub(crate) use x86_64::*;
    } else {
        compile_error!("unsupported target architecture");
    }
}

/// Bootstrap routine a New fiber's first restore lands in.
///
/// It never returns; finished fibers leave through [`switch_to`].
pub(crate) type FiberEntry = extern "C" fn() -> !;
