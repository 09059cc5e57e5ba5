// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shim that lets the tests in this crate run both natively and under the
//! [`loom`] model checker (build with `RUSTFLAGS="--cfg loom"`).

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::model;
        pub(crate) use loom::sync;
        pub(crate) use loom::thread;
    } else {
        #[cfg(test)]
        pub(crate) use std::thread;

        #[cfg(test)]
        pub(crate) mod sync {
            pub(crate) use std::sync::Arc;
        }

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            f()
        }
    }
}
