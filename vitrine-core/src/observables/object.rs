//! Object Administration
//!
//! The observable surface of a plain object. Every property is
//! independently observable, and a property resolves to one of three
//! kinds:
//!
//! - **observable** (the default): a data field. A tracked read records a
//!   per-key dependency and returns the stored raw value, or its
//!   observable form when the slot's ownership tag is set.
//! - **computed**: registered with [`ObjectRef::define_computed`]; reads
//!   go through a memoizing [`Computed`] whose getter receives the
//!   observable handle, so its dependencies are whatever the getter
//!   actually reads.
//! - **action**: registered with [`ObjectRef::define_action`]; invoking
//!   it through [`ObjectRef::call`] runs the body inside an implicit
//!   batch, coalescing every write it performs.
//!
//! Writes follow the ownership discipline: the raw form is stored, the
//! tag (per property key) carries whether the assignment was observable.
//! A write that does not change the effective value fires nothing.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::{batch, Computed};
use crate::registry;
use crate::value::{Integrity, ObjectRef, Value};

use super::admin::{self, effective_value, AdminCore};

/// How a property resolves on read.
#[derive(Clone)]
pub(crate) enum PropKind {
    Computed(Computed<Value>),
    Action(Rc<dyn Fn(&ObjectRef, &[Value]) -> Value>),
}

pub(crate) struct ObjectAdmin {
    pub(crate) core: AdminCore<Rc<str>>,
    /// Property keys whose current value was assigned in observable form.
    pub(crate) owned: RefCell<HashSet<Rc<str>>>,
    kinds: RefCell<HashMap<Rc<str>, PropKind>>,
}

impl ObjectAdmin {
    pub(crate) fn new() -> Self {
        Self {
            core: AdminCore::new(),
            owned: RefCell::new(HashSet::new()),
            kinds: RefCell::new(HashMap::new()),
        }
    }

    fn kind(&self, key: &str) -> Option<PropKind> {
        self.kinds.borrow().get(key).cloned()
    }
}

impl ObjectRef {
    /// Read a property. On the observable form this records a per-key
    /// dependency; computed properties re-enter their getter through the
    /// memoizing cache. Absent properties read as `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        if !self.observed {
            return self.data.borrow().entries.get(key).cloned().unwrap_or_default();
        }
        let admin = registry::object_admin(self);
        match admin.kind(key) {
            Some(PropKind::Computed(computed)) => return computed.get(),
            Some(PropKind::Action(_)) => return Value::Undefined,
            None => {}
        }

        let key: Rc<str> = Rc::from(key);
        admin.core.values.track(&key);

        let (stored, frozen) = {
            let data = self.data.borrow();
            (
                data.entries.get(&key).cloned().unwrap_or_default(),
                data.integrity == Integrity::Frozen,
            )
        };
        let owned = admin.owned.borrow().contains(&key);
        effective_value(&stored, owned, frozen)
    }

    /// Write a property. Stores the raw form of `value` and tags the slot
    /// when the assignment was observable. A write that leaves the
    /// effective value unchanged fires no notification. Integrity
    /// violations fail without notifying.
    pub fn set(&self, key: &str, value: Value) -> Result<(), StateError> {
        if !self.observed {
            return self.set_raw(key, value);
        }
        let admin = registry::object_admin(self);
        let key: Rc<str> = Rc::from(key);

        let added = {
            let mut data = self.data.borrow_mut();
            let existing = data.entries.get(&key).cloned();

            match &existing {
                Some(_) if !data.integrity.allows_write() => {
                    return Err(admin::write_error());
                }
                None if !data.integrity.allows_add() => {
                    return Err(admin::add_error(data.integrity));
                }
                _ => {}
            }

            let raw = value.source();
            let was_owned = admin.owned.borrow().contains(&key);
            let tag = if value.is_observed() {
                true
            } else if was_owned
                && raw.is_container()
                && existing.as_ref().and_then(Value::heap_addr) == raw.heap_addr()
            {
                // Same source assigned raw after observable.
                admin::conflict(&key)?;
                true
            } else {
                false
            };

            let changed = existing.as_ref().map_or(true, |old| !old.same_value(&raw))
                || tag != was_owned;
            if !changed {
                return Ok(());
            }

            if tag {
                admin.owned.borrow_mut().insert(Rc::clone(&key));
            } else {
                admin.owned.borrow_mut().remove(&key);
            }
            let added = existing.is_none();
            data.entries.insert(Rc::clone(&key), raw);
            added
        };

        batch(|| {
            admin.core.values.report_changed(&key);
            if added {
                admin.core.has.report_changed(&key);
                admin.core.keys_atom.report_changed();
            }
            admin.core.atom.report_changed();
        });
        Ok(())
    }

    /// Write through the source form: no tracking, no unwrapping, no
    /// notification. Integrity still applies, as it would on the native
    /// container.
    fn set_raw(&self, key: &str, value: Value) -> Result<(), StateError> {
        let mut data = self.data.borrow_mut();
        if data.entries.contains_key(key) {
            if !data.integrity.allows_write() {
                return Err(admin::write_error());
            }
        } else if !data.integrity.allows_add() {
            return Err(admin::add_error(data.integrity));
        }
        data.entries.insert(Rc::from(key), value);
        Ok(())
    }

    /// Remove a property. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool, StateError> {
        {
            let data = self.data.borrow();
            if data.entries.contains_key(key) && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
        }
        let present = self
            .data
            .borrow_mut()
            .entries
            .shift_remove(key)
            .is_some();
        if !self.observed || !present {
            return Ok(present);
        }

        let admin = registry::object_admin(self);
        let key: Rc<str> = Rc::from(key);
        admin.owned.borrow_mut().remove(&key);
        batch(|| {
            admin.core.values.report_changed(&key);
            admin.core.has.report_changed(&key);
            admin.core.keys_atom.report_changed();
            admin.core.atom.report_changed();
        });
        Ok(present)
    }

    /// Whether a property exists. Tracks a presence node independent of
    /// the value node, so value rewrites on the key do not re-run a
    /// presence-only dependent.
    pub fn has(&self, key: &str) -> bool {
        if self.observed {
            let admin = registry::object_admin(self);
            admin.core.has.track(&Rc::from(key));
        }
        self.data.borrow().entries.contains_key(key)
    }

    /// Property keys in insertion order. Tracks enumeration only: value
    /// rewrites on existing keys do not re-run a keys-only dependent.
    pub fn keys(&self) -> Vec<Rc<str>> {
        if self.observed {
            let admin = registry::object_admin(self);
            admin.core.keys_atom.report_observed();
        }
        self.data.borrow().entries.keys().cloned().collect()
    }

    /// All entries in insertion order, with effective values.
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        if !self.observed {
            return self
                .data
                .borrow()
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }
        let admin = registry::object_admin(self);
        admin.core.atom.report_observed();

        let snapshot: Vec<(Rc<str>, Value)> = self
            .data
            .borrow()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let frozen = self.data.borrow().integrity == Integrity::Frozen;
        snapshot
            .into_iter()
            .map(|(k, v)| {
                let owned = admin.owned.borrow().contains(&k);
                let v = effective_value(&v, owned, frozen);
                (k, v)
            })
            .collect()
    }

    /// Register a computed property. Reading `key` afterwards re-enters
    /// `getter` (with the observable handle as its receiver) through a
    /// memoizing cache.
    pub fn define_computed(&self, key: &str, getter: impl Fn(&ObjectRef) -> Value + 'static) {
        let admin = registry::object_admin(self);
        let this = self.observed_form();
        admin.kinds.borrow_mut().insert(
            Rc::from(key),
            PropKind::Computed(Computed::new(move || getter(&this))),
        );
    }

    /// Register an action. Invoking it through [`call`](ObjectRef::call)
    /// runs the body inside an implicit batch.
    pub fn define_action(
        &self,
        key: &str,
        action: impl Fn(&ObjectRef, &[Value]) -> Value + 'static,
    ) {
        let admin = registry::object_admin(self);
        admin
            .kinds
            .borrow_mut()
            .insert(Rc::from(key), PropKind::Action(Rc::new(action)));
    }

    /// Invoke a registered action; all writes it performs are batched.
    /// Returns `None` when `key` is not an action.
    pub fn call(&self, key: &str, args: &[Value]) -> Option<Value> {
        let admin = registry::object_admin(self);
        match admin.kind(key) {
            Some(PropKind::Action(f)) => {
                let this = self.observed_form();
                Some(batch(|| f(&this, args)))
            }
            _ => None,
        }
    }

    /// Make the object fully immutable.
    pub fn freeze(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Frozen);
    }

    /// Forbid adding and removing properties; existing values stay
    /// writable.
    pub fn seal(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Sealed);
    }

    /// Forbid adding new properties.
    pub fn prevent_extensions(&self) {
        admin::strengthen(
            &mut self.data.borrow_mut().integrity,
            Integrity::NonExtensible,
        );
    }

    /// The current integrity level.
    pub fn integrity(&self) -> Integrity {
        self.data.borrow().integrity
    }
}
