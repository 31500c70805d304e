// Copyright 2026 the Taint Runtime Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use taint_runtime::error::Status;
use taint_runtime::tag::{Taint, TaintTags};
use taint_runtime::thread::ThreadTaint;
use taint_runtime::trace::{ScopeKind, TaintCause, TraceMask, TraceOutcome, TraceSink};
use taint_runtime::value::ThreadId;
use taint_runtime::vm::{Limits, Returns, Vm};

fn bench_propagation(c: &mut Criterion) {
    bench_push_stamped(c);
    bench_table_read(c);
    bench_table_write(c);
    bench_call_overhead(c);
    bench_call_overhead_traced(c);
    bench_secure_call(c);
    bench_secure_call_tainted_callee(c);
}

fn bench_push_stamped(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_stamped");
    for (label, tainted) in [("secure", false), ("tainted", true)] {
        for &n in &[16_usize, 256, 4096] {
            let mut vm = wide_open_vm();
            if tainted {
                let addon = vm.tags_mut().intern("bench");
                vm.set_thread_taint(None, Some(addon)).unwrap();
            }
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                b.iter(|| {
                    for i in 0..n {
                        vm.push_number(i as f64);
                    }
                    black_box(vm.get_top());
                    vm.set_top(0).unwrap();
                });
            });
        }
    }
    group.finish();
}

fn bench_table_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_read");
    for (label, tainted_slots) in [("secure_slots", false), ("tainted_slots", true)] {
        for &n in &[16_usize, 256] {
            let mut vm = wide_open_vm();
            build_table(&mut vm, n, tainted_slots);
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                b.iter(|| {
                    for i in 0..n {
                        vm.push_number(i as f64);
                        vm.get_table(1).unwrap();
                    }
                    black_box(vm.thread_taint(None).unwrap());
                    vm.set_top(1).unwrap();
                    vm.clear_taint(None).unwrap();
                });
            });
        }
    }
    group.finish();
}

fn bench_table_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_write");
    for (label, tainted) in [("secure", false), ("tainted", true)] {
        for &n in &[16_usize, 256] {
            let mut vm = wide_open_vm();
            vm.create_table(n);
            if tainted {
                let addon = vm.tags_mut().intern("bench");
                vm.set_thread_taint(None, Some(addon)).unwrap();
            }
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, &n| {
                b.iter(|| {
                    for i in 0..n {
                        vm.push_number(i as f64);
                        vm.push_boolean(true);
                        vm.set_table(1).unwrap();
                    }
                    black_box(vm.get_top());
                });
            });
        }
    }
    group.finish();
}

fn bench_call_overhead(c: &mut Criterion) {
    let mut vm = wide_open_vm();
    vm.push_function(|vm| {
        vm.push_number(1.0);
        Ok(1)
    });

    c.bench_function("call_overhead_one_call", |b| {
        b.iter(|| {
            vm.push_value(1).unwrap();
            vm.call(0, Returns::Exactly(1)).unwrap();
            black_box(vm.to_number(-1));
            vm.set_top(1).unwrap();
        });
    });
}

fn bench_call_overhead_traced(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_overhead_traced");
    for (label, mask) in [
        ("none", TraceMask::NONE),
        ("call", TraceMask::CALL),
        ("all", TraceMask::ALL),
    ] {
        let mut vm = wide_open_vm();
        vm.set_trace_sink(Box::new(CountingSink { mask, events: 0 }));
        let addon = vm.tags_mut().intern("bench");
        vm.push_function(|vm| {
            vm.push_number(1.0);
            Ok(1)
        });
        // A tainted callee makes every call contaminate the thread.
        vm.set_object_taint(1, Some(addon)).unwrap();
        group.bench_function(label, |b| {
            b.iter(|| {
                vm.push_value(1).unwrap();
                vm.call(0, Returns::Exactly(1)).unwrap();
                black_box(vm.to_number(-1));
                vm.set_top(1).unwrap();
                vm.clear_taint(None).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_secure_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("secure_call");
    for (label, tainted_caller) in [("secure_caller", false), ("tainted_caller", true)] {
        let mut vm = wide_open_vm();
        vm.push_function(|vm| {
            vm.push_number(1.0);
            Ok(1)
        });
        if tainted_caller {
            let addon = vm.tags_mut().intern("bench");
            vm.set_thread_taint(None, Some(addon)).unwrap();
        }
        group.bench_function(label, |b| {
            b.iter(|| {
                vm.push_value(1).unwrap();
                let status = vm.secure_call(0, Returns::All, 0).unwrap();
                debug_assert_eq!(status, Status::Ok);
                black_box(vm.to_number(-1));
                vm.set_top(1).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_secure_call_tainted_callee(c: &mut Criterion) {
    let mut vm = wide_open_vm();
    vm.push_function(|vm| {
        vm.force_taint_thread(None)?;
        vm.push_number(1.0);
        Ok(1)
    });

    c.bench_function("secure_call_tainted_callee", |b| {
        b.iter(|| {
            vm.push_value(1).unwrap();
            let status = vm.secure_call(0, Returns::All, 0).unwrap();
            debug_assert_eq!(status, Status::Ok);
            black_box(vm.is_secure_thread(None).unwrap());
            vm.set_top(1).unwrap();
        });
    });
}

fn build_table(vm: &mut Vm, n: usize, tainted: bool) {
    vm.create_table(n);
    if tainted {
        let addon = vm.tags_mut().intern("bench");
        vm.set_thread_taint(None, Some(addon)).unwrap();
    }
    for i in 0..n {
        vm.push_number(i as f64);
        vm.push_number((i * 2) as f64);
        vm.set_table(1).unwrap();
    }
    vm.clear_taint(None).unwrap();
}

fn wide_open_vm() -> Vm {
    Vm::new(Limits {
        max_call_depth: usize::MAX,
        max_stack_slots: usize::MAX,
    })
}

struct CountingSink {
    mask: TraceMask,
    events: u64,
}

impl TraceSink for CountingSink {
    fn mask(&self) -> TraceMask {
        self.mask
    }

    fn scope_enter(
        &mut self,
        _tags: &TaintTags,
        _kind: ScopeKind,
        _thread: ThreadId,
        _depth: usize,
        _taint: Taint,
    ) {
        self.events = self.events.wrapping_add(1);
    }

    fn scope_exit(
        &mut self,
        _tags: &TaintTags,
        _kind: ScopeKind,
        _thread: ThreadId,
        _depth: usize,
        _outcome: TraceOutcome<'_>,
    ) {
        self.events = self.events.wrapping_add(1);
    }

    fn taint_changed(
        &mut self,
        _tags: &TaintTags,
        _thread: ThreadId,
        _from: ThreadTaint,
        _to: ThreadTaint,
        _cause: TaintCause,
    ) {
        self.events = self.events.wrapping_add(1);
    }
}

criterion_group!(benches, bench_propagation);
criterion_main!(benches);
