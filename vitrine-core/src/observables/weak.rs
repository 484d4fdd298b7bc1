//! Weak Collection Administrations
//!
//! Weak maps and weak sets carry a deliberately restricted surface: no
//! size, no iteration, container keys only. Keys are held by backing
//! allocation address plus a weak liveness handle, so an entry never
//! keeps its key alive; dead entries are pruned on access.

use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::{batch, Atom};
use crate::registry;
use crate::value::{Value, WeakMapEntry, WeakMapRef, WeakSetRef};

use super::admin::{effective_value, AtomMap, Ownership};

pub(crate) struct WeakAdmin {
    pub(crate) atom: Rc<Atom>,
    /// Per-key nodes, keyed by the key's backing-allocation address.
    pub(crate) keys: Rc<AtomMap<usize>>,
    pub(crate) owned: Ownership,
}

impl WeakAdmin {
    pub(crate) fn new() -> Self {
        let atom = Atom::new();
        let keys = Rc::new(AtomMap::new());
        {
            let keys = Rc::clone(&keys);
            atom.set_on_unobserved(move || keys.prune());
        }
        Self {
            atom,
            keys,
            owned: Ownership::new(),
        }
    }
}

fn weak_key(key: &Value) -> Result<usize, StateError> {
    key.heap_addr().ok_or(StateError::InvalidWeakKey)
}

impl WeakMapRef {
    fn admin(&self) -> Rc<WeakAdmin> {
        registry::weak_map_admin(self)
    }

    fn prune_dead(&self) {
        self.data
            .borrow_mut()
            .entries
            .retain(|_, entry| entry.alive.strong_count() > 0);
    }

    /// Read the value stored under a container key.
    pub fn get(&self, key: &Value) -> Result<Value, StateError> {
        let addr = weak_key(key)?;
        self.prune_dead();
        if !self.observed {
            return Ok(self
                .data
                .borrow()
                .entries
                .get(&addr)
                .map(|e| e.value.clone())
                .unwrap_or_default());
        }
        let admin = self.admin();
        admin.keys.track(&addr);
        let stored = self.data.borrow().entries.get(&addr).map(|e| e.value.clone());
        Ok(match stored {
            Some(v) => effective_value(&v, admin.owned.is_owned(&v), false),
            None => Value::Undefined,
        })
    }

    /// Store a value under a container key; the key is held weakly.
    pub fn set(&self, key: &Value, value: Value) -> Result<(), StateError> {
        let addr = weak_key(key)?;
        let alive = key.weak_alive().ok_or(StateError::InvalidWeakKey)?;
        self.prune_dead();

        if !self.observed {
            self.data
                .borrow_mut()
                .entries
                .insert(addr, WeakMapEntry { alive, value });
            return Ok(());
        }

        let admin = self.admin();
        let raw = value.source();
        let promoted = value.is_observed() && !admin.owned.is_owned(&raw);
        let raw = admin.owned.resolve_write(&value, &format!("weak:{addr:#x}"))?;

        let displaced = {
            let mut data = self.data.borrow_mut();
            if let Some(existing) = data.entries.get(&addr) {
                if existing.value.same_value(&raw) && !promoted {
                    return Ok(());
                }
            }
            data.entries
                .insert(addr, WeakMapEntry { alive, value: raw })
                .map(|e| e.value)
        };
        // The tag of an overwritten value must not outlive its presence.
        if let Some(displaced) = &displaced {
            self.release_missing(&admin, displaced);
        }
        batch(|| {
            admin.keys.report_changed(&addr);
            admin.atom.report_changed();
        });
        Ok(())
    }

    /// Whether a live entry exists for the key.
    pub fn has(&self, key: &Value) -> Result<bool, StateError> {
        let addr = weak_key(key)?;
        self.prune_dead();
        if self.observed {
            self.admin().keys.track(&addr);
        }
        Ok(self.data.borrow().entries.contains_key(&addr))
    }

    /// Remove the entry for the key; returns whether it existed.
    pub fn delete(&self, key: &Value) -> Result<bool, StateError> {
        let addr = weak_key(key)?;
        self.prune_dead();
        let removed = self.data.borrow_mut().entries.remove(&addr);
        let Some(removed) = removed else {
            return Ok(false);
        };
        if self.observed {
            let admin = self.admin();
            self.release_missing(&admin, &removed.value);
            batch(|| {
                admin.keys.report_changed(&addr);
                admin.atom.report_changed();
            });
        }
        Ok(true)
    }

    fn release_missing(&self, admin: &WeakAdmin, removed: &Value) {
        let Some(addr) = removed.heap_addr() else {
            return;
        };
        let still_present = self
            .data
            .borrow()
            .entries
            .values()
            .any(|e| e.value.heap_addr() == Some(addr));
        if !still_present {
            admin.owned.release(addr);
        }
    }
}

impl WeakSetRef {
    fn admin(&self) -> Rc<WeakAdmin> {
        registry::weak_set_admin(self)
    }

    fn prune_dead(&self) {
        self.data
            .borrow_mut()
            .entries
            .retain(|_, alive| alive.strong_count() > 0);
    }

    /// Add a container member; returns whether it was newly added.
    pub fn insert(&self, value: &Value) -> Result<bool, StateError> {
        let addr = weak_key(value)?;
        let alive = value.weak_alive().ok_or(StateError::InvalidWeakKey)?;
        self.prune_dead();

        let added = self.data.borrow_mut().entries.insert(addr, alive).is_none();
        if added && self.observed {
            let admin = self.admin();
            batch(|| {
                admin.keys.report_changed(&addr);
                admin.atom.report_changed();
            });
        }
        Ok(added)
    }

    /// Whether a live member exists for the value's identity.
    pub fn has(&self, value: &Value) -> Result<bool, StateError> {
        let addr = weak_key(value)?;
        self.prune_dead();
        if self.observed {
            self.admin().keys.track(&addr);
        }
        Ok(self.data.borrow().entries.contains_key(&addr))
    }

    /// Remove the member; returns whether it existed.
    pub fn delete(&self, value: &Value) -> Result<bool, StateError> {
        let addr = weak_key(value)?;
        self.prune_dead();
        let removed = self.data.borrow_mut().entries.remove(&addr).is_some();
        if removed && self.observed {
            let admin = self.admin();
            batch(|| {
                admin.keys.report_changed(&addr);
                admin.atom.report_changed();
            });
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect;
    use std::cell::Cell;

    fn observed_weak_map() -> WeakMapRef {
        match registry::observe(&Value::empty_weak_map()) {
            Value::WeakMap(r) => r,
            _ => unreachable!(),
        }
    }

    #[test]
    fn scalar_keys_are_rejected() {
        let map = observed_weak_map();
        assert!(matches!(
            map.set(&Value::from(1), Value::from(2)),
            Err(StateError::InvalidWeakKey)
        ));
        assert!(matches!(
            map.get(&Value::from("k")),
            Err(StateError::InvalidWeakKey)
        ));
    }

    #[test]
    fn entries_work_through_either_key_form() {
        let raw = Value::empty_object();
        let obs = registry::observe(&raw);
        let map = observed_weak_map();

        map.set(&raw, Value::from(1)).unwrap();
        assert!(map.has(&obs).unwrap());
        assert_eq!(map.get(&obs).unwrap(), Value::from(1));
    }

    #[test]
    fn dead_keys_are_pruned() {
        let map = observed_weak_map();
        let key = Value::empty_object();
        map.set(&key, Value::from(1)).unwrap();
        assert!(map.has(&key).unwrap());

        let probe = Value::empty_object();
        drop(key);
        // Any access prunes entries whose key allocation died.
        map.has(&probe).unwrap();
        assert!(map.data.borrow().entries.is_empty());
    }

    #[test]
    fn weak_set_membership_is_reactive() {
        let set = match registry::observe(&Value::empty_weak_set()) {
            Value::WeakSet(r) => r,
            _ => unreachable!(),
        };
        let member = Value::empty_object();

        let runs = Rc::new(Cell::new(0));
        let _sub = {
            let set = set.clone();
            let member = member.clone();
            let runs = runs.clone();
            effect(move || {
                set.has(&member).unwrap();
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        set.insert(&member).unwrap();
        assert_eq!(runs.get(), 2);

        set.delete(&member).unwrap();
        assert_eq!(runs.get(), 3);
    }
}
