// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::ptr;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use strand::{Scheduler, TaskDecl, yield_now};

fn noop(_param: *mut ()) {}

fn yielder(_param: *mut ()) {
    for _ in 0..100 {
        yield_now();
    }
}

fn dispatch_throughput(c: &mut Criterion) {
    let sched = Arc::new(Scheduler::with_stack_size(16 * 1024));
    let decls = [TaskDecl::new(noop, ptr::null_mut()); 64];

    c.bench_function("dispatch_64_noop_fibers", |b| {
        b.iter(|| {
            let done = sched.submit_with_barrier(&decls);
            while sched.poll() {}
            done.wait();
        });
    });
}

fn yield_roundtrips(c: &mut Criterion) {
    let sched = Arc::new(Scheduler::with_stack_size(16 * 1024));
    let decls = [TaskDecl::new(yielder, ptr::null_mut())];

    c.bench_function("yield_100_roundtrips", |b| {
        b.iter(|| {
            let done = sched.submit_with_barrier(&decls);
            while sched.poll() {}
            done.wait();
        });
    });
}

criterion_group!(benches, dispatch_throughput, yield_roundtrips);
criterion_main!(benches);
