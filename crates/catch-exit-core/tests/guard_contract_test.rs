//! Integration test: guard contract against a simulated teardown.
//!
//! A `HookRegistry` stands in for the process: `shutdown()` is teardown, and
//! a panic that escapes `work` stands in for work that never returns. The
//! real-process versions of these checks live in catch-exit-harness.
//!
//! Run: cargo test -p catch-exit-core --test guard_contract_test

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use catch_exit_core::{Fallback, Guard, HookOrder, HookRegistry, OutputChannel};

fn simulated(order: HookOrder) -> (Guard<Arc<HookRegistry>>, Arc<HookRegistry>) {
    let registry = Arc::new(HookRegistry::with_order(order));
    let guard = Guard::new(Arc::clone(&registry), OutputChannel::memory());
    (guard, registry)
}

fn recovered(captured: Option<String>) -> String {
    format!("recovered: {}", captured.unwrap_or_default())
}

/// Run `work` under `guard` and swallow the panic it ends with.
fn abandon(guard: &Guard<Arc<HookRegistry>>, text: &'static str, fallback: Fallback) {
    let mut out = guard.channel().clone();
    let result = catch_unwind(AssertUnwindSafe(|| {
        guard.run(
            || -> u8 {
                if !text.is_empty() {
                    out.write_all(text.as_bytes()).unwrap();
                }
                panic!("work abandoned");
            },
            fallback,
        )
    }));
    assert!(result.is_err(), "work should not have returned");
}

#[test]
fn returned_value_is_passed_through_and_fallback_never_runs() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut out = guard.channel().clone();

    let value = guard
        .run(
            || {
                write!(out, "discard me").unwrap();
                vec![1, 2, 3]
            },
            Fallback::compute(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                String::new()
            }),
        )
        .unwrap();

    assert_eq!(value, vec![1, 2, 3]);
    let report = registry.shutdown();
    assert_eq!(report.ran, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(guard.channel().emitted(), "");
}

#[test]
fn abandoned_work_is_replaced_by_computed_fallback() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    abandon(&guard, "partial", Fallback::compute(recovered));

    assert_eq!(guard.channel().emitted(), "");
    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "recovered: partial");
}

#[test]
fn abandoned_work_is_replaced_by_fixed_value() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    abandon(&guard, "partial", Fallback::value("fixed"));

    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "fixed");
}

#[test]
fn nothing_captured_means_none() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    abandon(
        &guard,
        "",
        Fallback::compute(|captured| format!("{captured:?}")),
    );

    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "None");
}

#[test]
fn sequential_guards_are_independent() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    let first = guard.run(|| "done", "first fallback").unwrap();
    assert_eq!(first, "done");

    abandon(&guard, "second", Fallback::compute(recovered));
    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "recovered: second");
}

#[test]
fn inner_failure_recovered_by_outer_fires_only_inner_fallback() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    let mut out = guard.channel().clone();

    let outer = guard
        .run(
            || {
                write!(out, "outer;").unwrap();
                abandon(
                    &guard,
                    "inner",
                    Fallback::compute(|c| format!("[inner:{}]", c.unwrap_or_default())),
                );
                "outer done"
            },
            Fallback::value("[outer]"),
        )
        .unwrap();
    assert_eq!(outer, "outer done");

    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "[inner:inner]");
}

#[test]
fn both_abandoned_compose_inner_into_outer() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    let mut out = guard.channel().clone();

    let result = catch_unwind(AssertUnwindSafe(|| {
        guard.run(
            || {
                write!(out, "outer;").unwrap();
                let mut inner_out = guard.channel().clone();
                let _ = guard.run(
                    || -> u8 {
                        write!(inner_out, "inner").unwrap();
                        panic!("inner abandoned");
                    },
                    Fallback::compute(|c| format!("[inner:{}]", c.unwrap_or_default())),
                );
            },
            Fallback::compute(|c| format!("[outer:{}]", c.unwrap_or_default())),
        )
    }));
    assert!(result.is_err());
    assert_eq!(guard.channel().depth(), 2);

    registry.shutdown();
    assert_eq!(guard.channel().emitted(), "[outer:outer;[inner:inner]]");
}

#[test]
fn fallback_fires_at_most_once_across_teardowns() {
    let (guard, registry) = simulated(HookOrder::Lifo);
    abandon(&guard, "partial", Fallback::compute(recovered));

    registry.run_all();
    registry.run_all();
    assert_eq!(guard.channel().emitted(), "recovered: partial");
}
