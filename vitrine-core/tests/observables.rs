//! Contract Tests for Observable Containers
//!
//! Each test pins one externally visible property of the container
//! layer: identity stability across wrapping, purity of the backing
//! stores, notification exactness, and the sparse-list and collection
//! key rules.

use std::cell::Cell;
use std::rc::Rc;

use vitrine_core::{
    batch, effect, is_observable, observe, observe_tree, source, StateError, Value,
};

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

/// Wrapping the same container twice, or wrapping an already observable
/// handle, yields the same observable identity.
#[test]
fn wrapping_is_idempotent() {
    let raw = Value::empty_object();
    let once = observe(&raw);
    let twice = observe(&once);

    assert!(is_observable(&once));
    assert!(once.same_value(&twice));
    assert_eq!(once.heap_addr(), raw.heap_addr());
    assert_eq!(source(&once).heap_addr(), raw.heap_addr());
    assert!(!is_observable(&source(&once)));
}

/// The backing store never holds an observable handle: writes unwrap,
/// and the source form reads back exactly what is stored.
#[test]
fn backing_store_stays_pure() {
    let parent = observed_object();
    let child = observe(&Value::empty_object());

    parent.set("child", child.clone()).unwrap();

    // Observable read resolves to the observable form.
    assert!(parent.get("child").is_observed());

    // Source-form read sees only raw data.
    let Value::Object(raw_parent) = source(&Value::Object(parent.clone())) else {
        unreachable!()
    };
    let stored = raw_parent.get("child");
    assert!(!stored.is_observed());
    assert_eq!(stored.heap_addr(), child.heap_addr());
}

/// Assigning the raw form of a child leaves reads raw; assigning the
/// observable form makes reads observable. The slot remembers which.
#[test]
fn ownership_follows_the_assigned_form() {
    let parent = observed_object();
    let raw_child = Value::empty_object();

    parent.set("plain", raw_child.clone()).unwrap();
    assert!(!parent.get("plain").is_observed());

    let obs_child = observe(&Value::empty_object());
    parent.set("wrapped", obs_child).unwrap();
    assert!(parent.get("wrapped").is_observed());
}

/// Writing a value equal to the stored one fires nothing.
#[test]
fn no_op_writes_are_suppressed() {
    let state = observed_object();
    state.set("x", Value::from(1)).unwrap();

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let state = state.clone();
        let runs = runs.clone();
        effect(move || {
            state.get("x");
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    state.set("x", Value::from(1)).unwrap();
    assert_eq!(runs.get(), 1);

    state.set("x", Value::from(2)).unwrap();
    assert_eq!(runs.get(), 2);
}

/// A write to one property never re-runs an effect reading another.
#[test]
fn per_key_reads_are_isolated() {
    let state = observed_object();
    state.set("a", Value::from(1)).unwrap();
    state.set("b", Value::from(1)).unwrap();

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let state = state.clone();
        let runs = runs.clone();
        effect(move || {
            state.get("a");
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    state.set("b", Value::from(2)).unwrap();
    assert_eq!(runs.get(), 1);

    state.set("a", Value::from(2)).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Writing past the end of a list creates holes, not elements.
#[test]
fn sparse_lists_have_holes() {
    let list = observed_list();
    list.set(100, Value::from(9)).unwrap();

    assert_eq!(list.len(), 101);
    assert!(list.has_index(100));
    assert!(!list.has_index(99));
    assert_eq!(list.get(99), Value::Undefined);
    assert_eq!(list.get(100), Value::from(9));
}

/// Two writes inside one batch produce a single re-run.
#[test]
fn batched_writes_coalesce() {
    let state = observed_object();

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let state = state.clone();
        let runs = runs.clone();
        effect(move || {
            state.get("a");
            state.get("b");
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    batch(|| {
        state.set("a", Value::from(1)).unwrap();
        state.set("b", Value::from(2)).unwrap();
    });
    assert_eq!(runs.get(), 2);
}

/// Deep materialization rejects cyclic trees with the offending path.
#[test]
fn cyclic_trees_are_rejected_with_path() {
    let root = Value::empty_object();
    let inner = Value::empty_object();
    if let (Value::Object(r), Value::Object(i)) = (&root, &inner) {
        r.set("inner", inner.clone()).unwrap();
        i.set("back", root.clone()).unwrap();
    }

    let err = observe_tree(&root).unwrap_err();
    assert!(matches!(err, StateError::CircularReference { .. }));
    let message = err.to_string();
    assert!(message.contains("circular"));
    assert!(message.contains("inner.back"));
}

/// Overwriting a list slot releases the displaced element's ownership
/// tag, so the same child may later be stored in raw form.
#[test]
fn list_overwrite_releases_ownership() {
    let list = observed_list();
    let child = Value::empty_object();

    list.push(observe(&child)).unwrap();
    assert!(list.get(0).is_observed());

    // Displace the observable child, then re-assign its raw form.
    list.set(0, Value::from(1)).unwrap();
    list.push(child.clone()).unwrap();
    assert!(!list.get(1).is_observed());
}

/// Overwriting a map entry releases the displaced value's ownership
/// tag, so the same child may later be stored in raw form.
#[test]
fn map_overwrite_releases_ownership() {
    let map = observed_map();
    let child = Value::empty_object();

    map.set(&Value::from("a"), observe(&child)).unwrap();
    assert!(map.get(&Value::from("a")).is_observed());

    map.set(&Value::from("a"), Value::from(1)).unwrap();
    map.set(&Value::from("b"), child).unwrap();
    assert!(!map.get(&Value::from("b")).is_observed());
}

/// Raw and observable forms of the same container address one map entry.
#[test]
fn map_keys_ignore_the_handle_form() {
    let map = observed_map();
    let raw_key = Value::empty_object();
    let obs_key = observe(&raw_key);

    map.set(&raw_key, Value::from(1)).unwrap();
    assert!(map.has(&obs_key));
    assert_eq!(map.get(&obs_key), Value::from(1));

    map.set(&obs_key, Value::from(2)).unwrap();
    assert_eq!(map.size(), 1);
    assert_eq!(map.get(&raw_key), Value::from(2));

    assert!(map.delete(&obs_key).unwrap());
    assert!(!map.has(&raw_key));
}

/// Scalar map keys compare by value with NaN unified and signed zeros
/// merged.
#[test]
fn scalar_map_keys_use_same_value_zero() {
    let map = observed_map();
    map.set(&Value::from(f64::NAN), Value::from("nan")).unwrap();
    assert_eq!(map.get(&Value::from(f64::NAN)), Value::from("nan"));

    map.set(&Value::from(0.0), Value::from("zero")).unwrap();
    assert_eq!(map.get(&Value::from(-0.0)), Value::from("zero"));
    assert_eq!(map.size(), 2);
}

/// Truncating a list through its length drops exactly the trailing
/// populated slots.
#[test]
fn length_truncation_is_exact() {
    let list = observed_list();
    for i in 0..5 {
        list.push(Value::from(i)).unwrap();
    }

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let list = list.clone();
        let runs = runs.clone();
        effect(move || {
            list.get(1);
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    // Dropping indices 3 and 4 leaves index 1 untouched.
    list.set_len(3).unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(runs.get(), 1);

    list.set_len(1).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(list.get(1), Value::Undefined);
}

/// Frozen containers reject writes without notifying anyone.
#[test]
fn frozen_writes_fail_silently_for_observers() {
    let state = observed_object();
    state.set("x", Value::from(1)).unwrap();
    state.freeze();

    let runs = Rc::new(Cell::new(0));
    let _sub = {
        let state = state.clone();
        let runs = runs.clone();
        effect(move || {
            state.get("x");
            runs.set(runs.get() + 1);
        })
    };
    assert_eq!(runs.get(), 1);

    assert!(matches!(
        state.set("x", Value::from(2)),
        Err(StateError::Frozen)
    ));
    assert_eq!(runs.get(), 1);
    assert_eq!(state.get("x"), Value::from(1));
}
