//! Registry
//!
//! The single source of truth associating every container with its
//! administration. The table is keyed by backing-allocation address and
//! holds the administration strongly alongside a weak liveness handle to
//! the backing data; entries whose data died are pruned opportunistically
//! on insertion, so unreferenced containers (and their administrations)
//! are collectible.
//!
//! This module is also the public dispatch surface: [`observe`] is the
//! idempotent wrapping entry point, [`source`] the unwrap, and
//! [`observe_tree`] the one-time deep materialization of a JSON-like
//! tree. [`report_observed`] and [`report_changed`] are the escape
//! hatches for code that mutates a source container directly.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::error::StateError;
use crate::observables::date::DateAdmin;
use crate::observables::list::ListAdmin;
use crate::observables::map::MapAdmin;
use crate::observables::object::ObjectAdmin;
use crate::observables::set::SetAdmin;
use crate::observables::weak::WeakAdmin;
use crate::reactive::{batch, Atom};
use crate::value::{
    parse_index, DateRef, Integrity, ListRef, MapRef, ObjectRef, SetRef, Value, ValueKey,
    WeakMapRef, WeakSetRef,
};

pub(crate) enum AdminRef {
    Object(Rc<ObjectAdmin>),
    List(Rc<ListAdmin>),
    Map(Rc<MapAdmin>),
    Set(Rc<SetAdmin>),
    WeakMap(Rc<WeakAdmin>),
    WeakSet(Rc<WeakAdmin>),
    Date(Rc<DateAdmin>),
}

struct Entry {
    alive: Weak<dyn Any>,
    admin: AdminRef,
}

thread_local! {
    static REGISTRY: RefCell<HashMap<usize, Entry>> = RefCell::new(HashMap::new());
    static PRUNE_AT: Cell<usize> = const { Cell::new(64) };
}

fn with_registry<T>(f: impl FnOnce(&mut HashMap<usize, Entry>) -> T) -> T {
    REGISTRY.with(|reg| f(&mut reg.borrow_mut()))
}

/// Drop entries whose backing data died. Runs when the table outgrows a
/// moving threshold, keeping registration amortized O(1).
fn prune_if_due(reg: &mut HashMap<usize, Entry>) {
    if reg.len() < PRUNE_AT.with(Cell::get) {
        return;
    }
    reg.retain(|_, entry| entry.alive.strong_count() > 0);
    PRUNE_AT.with(|p| p.set((reg.len() * 2).max(64)));
}

fn alive_handle<T: 'static>(rc: &Rc<RefCell<T>>) -> Weak<dyn Any> {
    let weak: Weak<RefCell<T>> = Rc::downgrade(rc);
    weak
}

macro_rules! admin_accessor {
    ($(#[$doc:meta])* $name:ident, $ref_ty:ty, $admin_ty:ty, $variant:ident) => {
        $(#[$doc])*
        pub(crate) fn $name(handle: &$ref_ty) -> Rc<$admin_ty> {
            with_registry(|reg| {
                let addr = handle.addr();
                if let Some(entry) = reg.get(&addr) {
                    // A dead entry at this address is a recycled
                    // allocation; fall through and replace it.
                    if entry.alive.strong_count() > 0 {
                        if let AdminRef::$variant(admin) = &entry.admin {
                            return Rc::clone(admin);
                        }
                    }
                }
                prune_if_due(reg);
                let admin = Rc::new(<$admin_ty>::new());
                reg.insert(
                    addr,
                    Entry {
                        alive: alive_handle(&handle.data),
                        admin: AdminRef::$variant(Rc::clone(&admin)),
                    },
                );
                admin
            })
        }
    };
}

admin_accessor!(object_admin, ObjectRef, ObjectAdmin, Object);
admin_accessor!(list_admin, ListRef, ListAdmin, List);
admin_accessor!(map_admin, MapRef, MapAdmin, Map);
admin_accessor!(set_admin, SetRef, SetAdmin, Set);
admin_accessor!(weak_map_admin, WeakMapRef, WeakAdmin, WeakMap);
admin_accessor!(weak_set_admin, WeakSetRef, WeakAdmin, WeakSet);
admin_accessor!(date_admin, DateRef, DateAdmin, Date);

fn container_frozen(value: &Value) -> bool {
    match value {
        Value::Object(r) => r.data.borrow().integrity == Integrity::Frozen,
        Value::List(r) => r.data.borrow().integrity == Integrity::Frozen,
        Value::Map(r) => r.data.borrow().integrity == Integrity::Frozen,
        Value::Set(r) => r.data.borrow().integrity == Integrity::Frozen,
        _ => false,
    }
}

/// The wrapping entry point: returns the observable form of a container,
/// registering its administration on first use. Idempotent; scalars pass
/// through unchanged, as do frozen containers (with a debug warning,
/// since a frozen container can never dispatch a write).
pub fn observe(value: &Value) -> Value {
    if container_frozen(value) {
        #[cfg(debug_assertions)]
        tracing::warn!(
            kind = value.kind_name(),
            "cannot observe a frozen container; returning it unchanged"
        );
        return value.clone();
    }
    match value {
        Value::Object(r) => {
            object_admin(r);
            Value::Object(r.observed_form())
        }
        Value::List(r) => {
            list_admin(r);
            Value::List(r.observed_form())
        }
        Value::Map(r) => {
            map_admin(r);
            Value::Map(r.observed_form())
        }
        Value::Set(r) => {
            set_admin(r);
            Value::Set(r.observed_form())
        }
        Value::WeakMap(r) => {
            weak_map_admin(r);
            Value::WeakMap(r.observed_form())
        }
        Value::WeakSet(r) => {
            weak_set_admin(r);
            Value::WeakSet(r.observed_form())
        }
        Value::Date(r) => {
            date_admin(r);
            Value::Date(r.observed_form())
        }
        scalar => scalar.clone(),
    }
}

/// The unwrap: the source form of a value. Always succeeds; scalars pass
/// through unchanged.
pub fn source(value: &Value) -> Value {
    value.source()
}

/// Whether `value` is an observable container handle.
pub fn is_observable(value: &Value) -> bool {
    value.is_observed()
}

/// The dependency node behind an observable container, for bridging into
/// external signal ecosystems. With no key this is the container's
/// structural atom; with a key it is the per-key value node. Errors for
/// anything that is not an observable container.
pub fn internal_node(value: &Value, key: Option<&Value>) -> Result<Rc<Atom>, StateError> {
    if !value.is_observed() {
        return Err(StateError::NotObservable);
    }
    match value {
        Value::Object(r) => {
            let admin = object_admin(r);
            Ok(match key {
                Some(Value::Str(k)) => admin.core.values.node(k),
                Some(other) => admin.core.values.node(&Rc::from(other.coerce_string().as_str())),
                None => Rc::clone(&admin.core.atom),
            })
        }
        Value::List(r) => {
            let admin = list_admin(r);
            Ok(match key {
                None => Rc::clone(&admin.core.atom),
                Some(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                    admin.core.values.node(&(*n as u32))
                }
                Some(Value::Str(k)) if k.as_ref() == "length" => Rc::clone(&admin.core.keys_atom),
                Some(Value::Str(k)) => match parse_index(k) {
                    Some(i) => admin.core.values.node(&i),
                    None => admin.prop_values.node(k),
                },
                Some(_) => Rc::clone(&admin.core.atom),
            })
        }
        Value::Map(r) => {
            let admin = map_admin(r);
            Ok(match key {
                Some(k) => admin.core.values.node(&ValueKey::new(k.source())),
                None => Rc::clone(&admin.core.atom),
            })
        }
        Value::Set(r) => {
            let admin = set_admin(r);
            Ok(match key {
                Some(k) => admin.core.has.node(&ValueKey::new(k.source())),
                None => Rc::clone(&admin.core.atom),
            })
        }
        Value::WeakMap(r) => Ok(weak_node(&weak_map_admin(r), key)),
        Value::WeakSet(r) => Ok(weak_node(&weak_set_admin(r), key)),
        Value::Date(r) => Ok(Rc::clone(&date_admin(r).atom)),
        _ => Err(StateError::NotObservable),
    }
}

fn weak_node(admin: &WeakAdmin, key: Option<&Value>) -> Rc<Atom> {
    match key.and_then(Value::heap_addr) {
        Some(addr) => admin.keys.node(&addr),
        None => Rc::clone(&admin.atom),
    }
}

fn structural_atom(value: &Value) -> Option<Rc<Atom>> {
    match value {
        Value::Object(r) => Some(Rc::clone(&object_admin(r).core.atom)),
        Value::List(r) => Some(Rc::clone(&list_admin(r).core.atom)),
        Value::Map(r) => Some(Rc::clone(&map_admin(r).core.atom)),
        Value::Set(r) => Some(Rc::clone(&set_admin(r).core.atom)),
        Value::WeakMap(r) => Some(Rc::clone(&weak_map_admin(r).atom)),
        Value::WeakSet(r) => Some(Rc::clone(&weak_set_admin(r).atom)),
        Value::Date(r) => Some(Rc::clone(&date_admin(r).atom)),
        _ => None,
    }
}

/// Stored child values reachable one level down through the backing
/// store. Weak collections hold their entries weakly and are not
/// traversed.
fn stored_children(value: &Value) -> Vec<Value> {
    match value {
        Value::Object(r) => r.data.borrow().entries.values().cloned().collect(),
        Value::List(r) => {
            let data = r.data.borrow();
            data.slots
                .values()
                .chain(data.props.values())
                .cloned()
                .collect()
        }
        Value::Map(r) => {
            let data = r.data.borrow();
            data.entries
                .iter()
                .flat_map(|(k, v)| [k.value().clone(), v.clone()])
                .collect()
        }
        Value::Set(r) => r
            .data
            .borrow()
            .entries
            .iter()
            .map(|k| k.value().clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// Manual observation escape hatch: record the container's structural
/// atom as a dependency of the running computation. With `deep`, every
/// container reachable through the backing stores is recorded too;
/// cyclic graphs are guarded by a call-scoped visited set.
pub fn report_observed(value: &Value, deep: bool) {
    if !deep {
        if let Some(atom) = structural_atom(value) {
            atom.report_observed();
        }
        return;
    }
    let mut visited = HashSet::new();
    deep_observe(value, &mut visited);
}

fn deep_observe(value: &Value, visited: &mut HashSet<usize>) {
    let Some(addr) = value.heap_addr() else { return };
    if !visited.insert(addr) {
        return;
    }
    if let Some(atom) = structural_atom(value) {
        atom.report_observed();
    }
    for child in stored_children(value) {
        deep_observe(&child, visited);
    }
}

/// Manual change escape hatch for code that mutated a source container
/// directly: notifies the container's structural atom, its keys atom,
/// and every existing per-key node, in one batch.
pub fn report_changed(value: &Value) {
    match value {
        Value::Object(r) => {
            let admin = object_admin(r);
            batch(|| {
                admin.core.values.report_all();
                admin.core.has.report_all();
                admin.core.keys_atom.report_changed();
                admin.core.atom.report_changed();
            });
        }
        Value::List(r) => {
            let admin = list_admin(r);
            batch(|| {
                admin.core.values.report_all();
                admin.core.has.report_all();
                admin.prop_values.report_all();
                admin.core.keys_atom.report_changed();
                admin.core.atom.report_changed();
            });
        }
        Value::Map(r) => {
            let admin = map_admin(r);
            batch(|| {
                admin.core.values.report_all();
                admin.core.has.report_all();
                admin.core.keys_atom.report_changed();
                admin.core.atom.report_changed();
            });
        }
        Value::Set(r) => {
            let admin = set_admin(r);
            batch(|| {
                admin.core.has.report_all();
                admin.core.keys_atom.report_changed();
                admin.core.atom.report_changed();
            });
        }
        Value::WeakMap(r) => {
            let admin = weak_map_admin(r);
            batch(|| {
                admin.keys.report_all();
                admin.atom.report_changed();
            });
        }
        Value::WeakSet(r) => {
            let admin = weak_set_admin(r);
            batch(|| {
                admin.keys.report_all();
                admin.atom.report_changed();
            });
        }
        Value::Date(r) => date_admin(r).atom.report_changed(),
        _ => {}
    }
}

/// One-time deep materialization of a JSON-like tree: wraps every nested
/// plain object and list found now, tagging the parent slots observable,
/// and returns the observable root. Maps, sets, dates, and weak
/// collections are left untouched and not traversed; values assigned
/// after this call are not auto-wrapped. Cycles error with the offending
/// path in dot/bracket notation.
pub fn observe_tree(value: &Value) -> Result<Value, StateError> {
    let mut visiting = HashSet::new();
    wrap_tree(value, String::new(), &mut visiting)
}

fn wrap_tree(
    value: &Value,
    path: String,
    visiting: &mut HashSet<usize>,
) -> Result<Value, StateError> {
    match value {
        Value::Object(r) => {
            enter_tree(r.addr(), &path, visiting)?;
            let admin = object_admin(r);
            let entries: Vec<(Rc<str>, Value)> = r
                .data
                .borrow()
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, child) in entries {
                if !matches!(child, Value::Object(_) | Value::List(_)) {
                    continue;
                }
                let child_path = if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{path}.{key}")
                };
                let wrapped = wrap_tree(&child, child_path, visiting)?;
                if wrapped.is_observed() {
                    admin.owned.borrow_mut().insert(key);
                }
            }
            visiting.remove(&r.addr());
            Ok(observe(value))
        }
        Value::List(r) => {
            enter_tree(r.addr(), &path, visiting)?;
            let admin = list_admin(r);
            let slots: Vec<(u32, Value)> = r
                .data
                .borrow()
                .slots
                .iter()
                .map(|(&i, v)| (i, v.clone()))
                .collect();
            for (index, child) in slots {
                if !matches!(child, Value::Object(_) | Value::List(_)) {
                    continue;
                }
                let child_path = format!("{path}[{index}]");
                let wrapped = wrap_tree(&child, child_path, visiting)?;
                if let (true, Some(addr)) = (wrapped.is_observed(), child.heap_addr()) {
                    admin.owned.promote(addr);
                }
            }
            visiting.remove(&r.addr());
            Ok(observe(value))
        }
        other => Ok(other.clone()),
    }
}

fn enter_tree(addr: usize, path: &str, visiting: &mut HashSet<usize>) -> Result<(), StateError> {
    if !visiting.insert(addr) {
        return Err(StateError::CircularReference {
            path: path.to_string(),
        });
    }
    Ok(())
}
