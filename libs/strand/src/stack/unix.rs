// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io::Error;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::stack::valgrind::ValgrindStackRegistration;
use crate::stack::{MIN_STACK_SIZE, StackPointer};

/// An mmap'd fiber stack with a guard page at the low end.
pub(crate) struct FiberStack {
    top: StackPointer,
    mmap_len: usize,
    valgrind: ManuallyDrop<ValgrindStackRegistration>,
}

impl FiberStack {
    /// Maps a new stack with at least `size` usable bytes.
    pub(crate) fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(MIN_STACK_SIZE);

        // One extra page below the stack stays PROT_NONE as the guard; the
        // whole mapping is rounded up to a page boundary.
        let page_size = page_size();
        let mmap_len = size
            .checked_add(page_size + page_size - 1)
            .expect("integer overflow while calculating stack size")
            & !(page_size - 1);

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }

        // Safety: anonymous mapping, no aliasing of existing memory.
        unsafe {
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            // Construct the result before the mprotect call so the mapping is
            // unmapped again if that call fails.
            let out = Self {
                top: StackPointer::new(mmap as usize + mmap_len).unwrap(),
                mmap_len,
                valgrind: ManuallyDrop::new(ValgrindStackRegistration::new(
                    mmap.cast::<u8>(),
                    mmap_len,
                )),
            };

            // Everything above the guard page becomes usable.
            if libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                mmap_len - page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                return Err(Error::last_os_error());
            }

            Ok(out)
        }
    }

    /// One past the highest usable byte. Aligned to the page size.
    pub(crate) fn top(&self) -> StackPointer {
        self.top
    }

    /// Lowest address of the mapping, including the guard page.
    pub(crate) fn bottom(&self) -> StackPointer {
        StackPointer::new(self.top.get() - self.mmap_len).unwrap()
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // Safety: `self` owns the mapping; the registration is dropped
        // exactly once, before the memory disappears.
        unsafe {
            ManuallyDrop::drop(&mut self.valgrind);

            let mmap = self.top.get() - self.mmap_len;
            let ret = libc::munmap(mmap as _, self.mmap_len);
            debug_assert_eq!(ret, 0);
        }
    }
}

fn page_size() -> usize {
    // Safety: sysconf(_SC_PAGESIZE) has no preconditions.
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    assert!(pagesize.is_power_of_two());
    pagesize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_and_stays_writable() {
        let stack = FiberStack::new(1).unwrap();
        assert!(stack.top.get() - stack.bottom().get() >= MIN_STACK_SIZE);

        // The byte right below the top must be writable.
        // Safety: inside the mapped, RW region of the stack.
        unsafe {
            let p = (stack.top.get() - 1) as *mut u8;
            p.write(0xA5);
            assert_eq!(p.read(), 0xA5);
        }
    }
}
