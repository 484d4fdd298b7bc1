//! Map Administration
//!
//! The observable surface of a keyed collection. Keys are compared by
//! logical identity ([`ValueKey`]): a raw container and its observable
//! form are the same key, so a value stored under the raw form is
//! retrievable through the observable form and vice versa. A new entry
//! is stored under the raw key; an existing entry keeps whatever key
//! form it was first stored with.
//!
//! Presence and value are tracked independently per key: a dependent
//! that only asks `has(k)` is untouched by value rewrites of `k`, and a
//! `get` of an absent key stays reactive to the key's later arrival
//! because the add notifies the key's value node as well.

use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::batch;
use crate::registry;
use crate::value::{Integrity, MapRef, Value, ValueKey};

use super::admin::{self, effective_value, AdminCore, Ownership};

pub(crate) struct MapAdmin {
    pub(crate) core: AdminCore<ValueKey>,
    pub(crate) owned: Ownership,
}

impl MapAdmin {
    pub(crate) fn new() -> Self {
        Self {
            core: AdminCore::new(),
            owned: Ownership::new(),
        }
    }
}

impl MapRef {
    fn admin(&self) -> Rc<MapAdmin> {
        registry::map_admin(self)
    }

    fn frozen(&self) -> bool {
        self.data.borrow().integrity == Integrity::Frozen
    }

    /// Read the value stored under `key` (through either key form).
    /// Tracked on the key's value node; an absent key reads `Undefined`
    /// and re-fires when the key arrives.
    pub fn get(&self, key: &Value) -> Value {
        let lookup = ValueKey::new(key.source());
        if !self.observed {
            return self.data.borrow().entries.get(&lookup).cloned().unwrap_or_default();
        }
        let admin = self.admin();
        admin.core.values.track(&lookup);
        let stored = self.data.borrow().entries.get(&lookup).cloned();
        match stored {
            Some(v) => effective_value(&v, admin.owned.is_owned(&v), self.frozen()),
            None => Value::Undefined,
        }
    }

    /// Store `value` under `key`. The raw forms of both are stored; the
    /// value's ownership tag records an observable assignment. A write
    /// that changes nothing fires nothing.
    pub fn set(&self, key: &Value, value: Value) -> Result<(), StateError> {
        let lookup = ValueKey::new(key.source());
        if !self.observed {
            let mut data = self.data.borrow_mut();
            check_entry_write(data.integrity, data.entries.contains_key(&lookup))?;
            data.entries.insert(lookup, value);
            return Ok(());
        }

        let admin = self.admin();
        let (added, displaced) = {
            let mut data = self.data.borrow_mut();
            let existing = data.entries.get(&lookup).cloned();
            check_entry_write(data.integrity, existing.is_some())?;

            let raw = value.source();
            let promoted = value.is_observed() && !admin.owned.is_owned(&raw);
            let raw = admin.owned.resolve_write(&value, &key.coerce_string())?;

            let changed = existing.as_ref().map_or(true, |old| !old.same_value(&raw)) || promoted;
            if !changed {
                return Ok(());
            }
            let added = existing.is_none();
            data.entries.insert(lookup.clone(), raw);
            (added, existing)
        };

        // The tag of an overwritten value must not outlive its presence.
        if let Some(displaced) = &displaced {
            self.release_missing(&admin, displaced);
        }

        batch(|| {
            admin.core.values.report_changed(&lookup);
            if added {
                admin.core.has.report_changed(&lookup);
                admin.core.keys_atom.report_changed();
            }
            admin.core.atom.report_changed();
        });
        Ok(())
    }

    /// Whether an entry exists under `key` (through either form).
    /// Tracked on the key's presence node.
    pub fn has(&self, key: &Value) -> bool {
        let lookup = ValueKey::new(key.source());
        if self.observed {
            self.admin().core.has.track(&lookup);
        }
        self.data.borrow().entries.contains_key(&lookup)
    }

    /// Remove the entry under `key`; returns whether it existed.
    pub fn delete(&self, key: &Value) -> Result<bool, StateError> {
        let lookup = ValueKey::new(key.source());
        let removed = {
            let mut data = self.data.borrow_mut();
            if data.entries.contains_key(&lookup) && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            data.entries.shift_remove(&lookup)
        };
        let Some(removed) = removed else {
            return Ok(false);
        };
        if !self.observed {
            return Ok(true);
        }
        let admin = self.admin();
        self.release_missing(&admin, &removed);
        batch(|| {
            admin.core.values.report_changed(&lookup);
            admin.core.has.report_changed(&lookup);
            admin.core.keys_atom.report_changed();
            admin.core.atom.report_changed();
        });
        Ok(true)
    }

    /// Remove every entry, as a sequence of per-key deletes inside one
    /// batch, so each key's observers fire exactly once.
    pub fn clear(&self) -> Result<(), StateError> {
        let keys: Vec<Value> = self
            .data
            .borrow()
            .entries
            .keys()
            .map(|k| k.value().clone())
            .collect();
        batch(|| {
            for key in keys {
                self.delete(&key)?;
            }
            Ok(())
        })
    }

    /// The entry count. Tracked on the keys atom.
    pub fn size(&self) -> usize {
        if self.observed {
            self.admin().core.keys_atom.report_observed();
        }
        self.data.borrow().entries.len()
    }

    /// Keys in insertion order, in their stored form.
    pub fn keys(&self) -> Vec<Value> {
        if self.observed {
            self.admin().core.atom.report_observed();
        }
        self.data
            .borrow()
            .entries
            .keys()
            .map(|k| k.value().clone())
            .collect()
    }

    /// Values in insertion order, with effective identities.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Entries in insertion order, with effective value identities.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        if !self.observed {
            return self
                .data
                .borrow()
                .entries
                .iter()
                .map(|(k, v)| (k.value().clone(), v.clone()))
                .collect();
        }
        let admin = self.admin();
        admin.core.atom.report_observed();
        let frozen = self.frozen();
        let snapshot: Vec<(Value, Value)> = self
            .data
            .borrow()
            .entries
            .iter()
            .map(|(k, v)| (k.value().clone(), v.clone()))
            .collect();
        snapshot
            .into_iter()
            .map(|(k, v)| {
                let v = effective_value(&v, admin.owned.is_owned(&v), frozen);
                (k, v)
            })
            .collect()
    }

    /// Make the map fully immutable.
    pub fn freeze(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Frozen);
    }

    /// The current integrity level.
    pub fn integrity(&self) -> Integrity {
        self.data.borrow().integrity
    }

    fn release_missing(&self, admin: &MapAdmin, removed: &Value) {
        let Some(addr) = removed.heap_addr() else {
            return;
        };
        let still_present = {
            let data = self.data.borrow();
            data.entries
                .values()
                .any(|v| v.heap_addr() == Some(addr))
        };
        if !still_present {
            admin.owned.release(addr);
        }
    }
}

fn check_entry_write(integrity: Integrity, exists: bool) -> Result<(), StateError> {
    if exists {
        if !integrity.allows_write() {
            return Err(admin::write_error());
        }
    } else if !integrity.allows_add() {
        return Err(admin::add_error(integrity));
    }
    Ok(())
}
