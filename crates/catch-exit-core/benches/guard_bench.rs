//! Guard overhead on the normal-return path.

use std::io::Write;
use std::sync::Arc;

use catch_exit_core::{Guard, HookOrder, HookRegistry, OutputChannel};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_normal_return(c: &mut Criterion) {
    let registry = Arc::new(HookRegistry::with_order(HookOrder::Lifo));
    let guard = Guard::new(Arc::clone(&registry), OutputChannel::memory());

    c.bench_function("guard_normal_return", |b| {
        b.iter(|| {
            let value = guard.run(|| criterion::black_box(42_u64), "fallback");
            // Completed callbacks are no-ops; drain them so the registry stays small.
            registry.run_all();
            value
        });
    });

    let mut out = guard.channel().clone();
    c.bench_function("guard_normal_return_with_output", |b| {
        b.iter(|| {
            let value = guard.run(
                || {
                    out.write_all(b"discarded output line\n").ok();
                    criterion::black_box(42_u64)
                },
                "fallback",
            );
            registry.run_all();
            value
        });
    });
}

fn bench_channel(c: &mut Criterion) {
    let channel = OutputChannel::memory();
    c.bench_function("channel_begin_write_drain", |b| {
        b.iter(|| {
            let frame = channel.begin();
            (&channel).write_all(b"partial").ok();
            criterion::black_box(channel.drain(frame))
        });
    });
}

criterion_group!(benches, bench_normal_return, bench_channel);
criterion_main!(benches);
