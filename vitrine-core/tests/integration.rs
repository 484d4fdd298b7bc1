//! Integration Tests for the Reactive Runtime
//!
//! These tests verify that signals, computeds, effects, and observable
//! containers work together across module boundaries.

use std::cell::Cell;
use std::rc::Rc;

use vitrine_core::{batch, effect, observe, observe_tree, reaction, untracked, Computed, Signal, Value};

fn observed_object() -> vitrine_core::ObjectRef {
    match observe(&Value::empty_object()) {
        Value::Object(r) => r,
        _ => unreachable!(),
    }
}

fn observed_list() -> vitrine_core::ListRef {
    match observe(&Value::empty_list()) {
        Value::List(r) => r,
        _ => unreachable!(),
    }
}

fn observed_map() -> vitrine_core::MapRef {
    match observe(&Value::empty_map()) {
        Value::Map(r) => r,
        _ => unreachable!(),
    }
}

/// A computed derived from a signal recomputes through an effect chain.
#[test]
fn signal_computed_effect_chain() {
    let count = Signal::new(1);
    let doubled = {
        let count = count.clone();
        Computed::new(move || count.get() * 2)
    };

    let seen = Rc::new(Cell::new(0));
    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let doubled = doubled.clone();
        let seen = seen.clone();
        let runs = runs.clone();
        effect(move || {
            seen.set(doubled.get());
            runs.set(runs.get() + 1);
        })
    };

    assert_eq!(seen.get(), 2);
    assert_eq!(runs.get(), 1);

    count.set(5);
    assert_eq!(seen.get(), 10);
    assert_eq!(runs.get(), 2);

    // Writing the same value does not propagate.
    count.set(5);
    assert_eq!(runs.get(), 2);
}

/// A computed over an observable object re-derives when the property it
/// reads changes, and only then.
#[test]
fn computed_over_observable_object() {
    let state = observed_object();
    state.set("first", Value::from("Ada")).unwrap();
    state.set("last", Value::from("Lovelace")).unwrap();

    let computes = Rc::new(Cell::new(0));
    let full = {
        let state = state.clone();
        let computes = computes.clone();
        Computed::new(move || {
            computes.set(computes.get() + 1);
            format!(
                "{} {}",
                state.get("first").coerce_string(),
                state.get("last").coerce_string()
            )
        })
    };

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let full = full.clone();
        let runs = runs.clone();
        effect(move || {
            full.get();
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(full.get_untracked(), "Ada Lovelace");
    assert_eq!(computes.get(), 1);

    // A property the computed never reads leaves it cached.
    state.set("age", Value::from(36)).unwrap();
    assert_eq!(computes.get(), 1);
    assert_eq!(runs.get(), 1);

    state.set("first", Value::from("A.")).unwrap();
    assert_eq!(full.get_untracked(), "A. Lovelace");
    assert_eq!(computes.get(), 2);
    assert_eq!(runs.get(), 2);
}

/// One batch spanning writes to several containers coalesces into a
/// single re-run of an effect observing all of them.
#[test]
fn batch_spans_containers() {
    let obj = observed_object();
    let list = observed_list();
    let count = Signal::new(0);

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let obj = obj.clone();
        let list = list.clone();
        let count = count.clone();
        let runs = runs.clone();
        effect(move || {
            obj.get("x");
            list.len();
            count.get();
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    batch(|| {
        obj.set("x", Value::from(1)).unwrap();
        list.push(Value::from(2)).unwrap();
        count.set(3);
    });
    assert_eq!(runs.get(), 2);
}

/// Reads inside `untracked` establish no dependencies.
#[test]
fn untracked_reads_do_not_subscribe() {
    let tracked = Signal::new(0);
    let ignored = Signal::new(0);

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let tracked = tracked.clone();
        let ignored = ignored.clone();
        let runs = runs.clone();
        effect(move || {
            tracked.get();
            untracked(|| ignored.get());
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    ignored.set(1);
    assert_eq!(runs.get(), 1);

    tracked.set(1);
    assert_eq!(runs.get(), 2);
}

/// An effect that switches which container it reads drops its stale
/// subscription after re-tracking.
#[test]
fn effect_retracks_across_containers() {
    let flag = Signal::new(true);
    let a = observed_object();
    let b = observed_object();

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let flag = flag.clone();
        let a = a.clone();
        let b = b.clone();
        let runs = runs.clone();
        effect(move || {
            if flag.get() {
                a.get("v");
            } else {
                b.get("v");
            }
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    flag.set(false);
    assert_eq!(runs.get(), 2);

    // `a` is no longer a dependency.
    a.set("v", Value::from(1)).unwrap();
    assert_eq!(runs.get(), 2);

    b.set("v", Value::from(1)).unwrap();
    assert_eq!(runs.get(), 3);
}

/// A reaction fires its callback only when the tracked output changes.
#[test]
fn reaction_dedups_on_tracked_output() {
    let state = observed_object();
    state.set("n", Value::from(1)).unwrap();

    let fired = Rc::new(Cell::new(0));
    let _sub = {
        let state = state.clone();
        let fired = fired.clone();
        reaction(
            move || match state.get("n") {
                Value::Number(n) => n >= 10.0,
                _ => false,
            },
            move |_| fired.set(fired.get() + 1),
        )
    };
    // Initial evaluation never fires the callback.
    assert_eq!(fired.get(), 0);

    state.set("n", Value::from(5)).unwrap();
    assert_eq!(fired.get(), 0);

    state.set("n", Value::from(12)).unwrap();
    assert_eq!(fired.get(), 1);

    state.set("n", Value::from(20)).unwrap();
    assert_eq!(fired.get(), 1);
}

/// A materialized tree propagates deep mutations through the observable
/// parents wired up by `observe_tree`.
#[test]
fn deep_tree_mutation_reaches_effect() {
    let root = Value::empty_object();
    if let Value::Object(r) = &root {
        let todos = Value::empty_list();
        if let Value::List(l) = &todos {
            let item = Value::empty_object();
            if let Value::Object(o) = &item {
                o.set("done", Value::from(false)).unwrap();
            }
            l.push(item).unwrap();
        }
        r.set("todos", todos).unwrap();
    }

    let Value::Object(root) = observe_tree(&root).unwrap() else {
        unreachable!()
    };

    let done_count = Rc::new(Cell::new(-1));
    let _sub = {
        let root = root.clone();
        let done_count = done_count.clone();
        effect(move || {
            let Value::List(todos) = root.get("todos") else {
                return;
            };
            let mut n = 0;
            for i in 0..todos.len() {
                if let Value::Object(item) = todos.get(i) {
                    if item.get("done") == Value::from(true) {
                        n += 1;
                    }
                }
            }
            done_count.set(n);
        })
    };
    assert_eq!(done_count.get(), 0);

    // Mutate the leaf through the observable root.
    let Value::List(todos) = root.get("todos") else {
        unreachable!()
    };
    let Value::Object(item) = todos.get(0) else {
        unreachable!()
    };
    item.set("done", Value::from(true)).unwrap();
    assert_eq!(done_count.get(), 1);
}

/// Dropping the subscription stops the effect; further writes are quiet.
#[test]
fn dropped_subscription_goes_quiet() {
    let count = Signal::new(0);
    let runs = Rc::new(Cell::new(0));
    let sub = {
        let count = count.clone();
        let runs = runs.clone();
        effect(move || {
            count.get();
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    drop(sub);
    count.set(1);
    assert_eq!(runs.get(), 1);
}

/// A computed chain (map size feeding a derived feeding an effect)
/// stays consistent under batched collection mutation.
#[test]
fn map_driven_computed_chain() {
    let map = observed_map();

    let parity = {
        let map = map.clone();
        Computed::new(move || map.size() % 2 == 0)
    };

    let seen = Rc::new(Cell::new(false));
    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let parity = parity.clone();
        let seen = seen.clone();
        let runs = runs.clone();
        effect(move || {
            seen.set(parity.get());
            runs.set(runs.get() + 1);
        })
    };
    assert!(seen.get());
    assert_eq!(runs.get(), 1);

    batch(|| {
        map.set(&Value::from("a"), Value::from(1)).unwrap();
        map.set(&Value::from("b"), Value::from(2)).unwrap();
    });
    // Two entries added in one batch: size went 0 to 2, parity unchanged
    // at the value level but the effect re-ran once on the dirty signal.
    assert!(seen.get());
    assert_eq!(runs.get(), 2);

    map.set(&Value::from("c"), Value::from(3)).unwrap();
    assert!(!seen.get());
    assert_eq!(runs.get(), 3);
}
