//! Set Administration
//!
//! The observable surface of a value set. Membership is keyed by logical
//! identity, so the raw and observable forms of one container are one
//! member. Unlike lists and objects, `insert` never raises an ownership
//! conflict: once a member has been inserted in observable form it stays
//! observable, and a later raw insert of the same identity is silently
//! absorbed ("observable wins").
//!
//! The algebra methods return plain, non-observable sets whose members
//! are the ownership-resolved elements of both operands; reading them
//! inside an effect establishes dependencies on both source sets.

use std::collections::HashSet;
use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::batch;
use crate::registry;
use crate::value::{Integrity, SetRef, Value, ValueKey};

use super::admin::{self, effective_value, AdminCore, Ownership};

pub(crate) struct SetAdmin {
    pub(crate) core: AdminCore<ValueKey>,
    pub(crate) owned: Ownership,
}

impl SetAdmin {
    pub(crate) fn new() -> Self {
        Self {
            core: AdminCore::new(),
            owned: Ownership::new(),
        }
    }
}

impl SetRef {
    fn admin(&self) -> Rc<SetAdmin> {
        registry::set_admin(self)
    }

    /// Add a member; returns whether it was newly added. Inserting an
    /// already-present identity in observable form promotes its tag
    /// without an error; a raw re-insert of an observable member changes
    /// nothing.
    pub fn insert(&self, value: Value) -> Result<bool, StateError> {
        let raw = value.source();
        let lookup = ValueKey::new(raw.clone());

        if !self.observed {
            let mut data = self.data.borrow_mut();
            if !data.entries.contains(&lookup) && !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
            return Ok(data.entries.insert(ValueKey::new(value)));
        }

        let admin = self.admin();
        let present = self.data.borrow().entries.contains(&lookup);

        if present {
            // Observable wins, silently.
            if value.is_observed() {
                if let Some(addr) = raw.heap_addr() {
                    if admin.owned.promote(addr) {
                        admin.core.atom.report_changed();
                    }
                }
            }
            return Ok(false);
        }

        {
            let mut data = self.data.borrow_mut();
            if !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
            data.entries.insert(lookup.clone());
        }
        if value.is_observed() {
            if let Some(addr) = raw.heap_addr() {
                admin.owned.promote(addr);
            }
        }
        batch(|| {
            admin.core.has.report_changed(&lookup);
            admin.core.keys_atom.report_changed();
            admin.core.atom.report_changed();
        });
        Ok(true)
    }

    /// Whether `value` is a member (through either form). Tracked on the
    /// member's presence node.
    pub fn has(&self, value: &Value) -> bool {
        let lookup = ValueKey::new(value.source());
        if self.observed {
            self.admin().core.has.track(&lookup);
        }
        self.data.borrow().entries.contains(&lookup)
    }

    /// Remove a member; returns whether it existed.
    pub fn delete(&self, value: &Value) -> Result<bool, StateError> {
        let lookup = ValueKey::new(value.source());
        let removed = {
            let mut data = self.data.borrow_mut();
            if data.entries.contains(&lookup) && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            data.entries.shift_remove(&lookup)
        };
        if !removed {
            return Ok(false);
        }
        if !self.observed {
            return Ok(true);
        }
        let admin = self.admin();
        if let Some(addr) = value.heap_addr() {
            admin.owned.release(addr);
        }
        batch(|| {
            admin.core.has.report_changed(&lookup);
            admin.core.keys_atom.report_changed();
            admin.core.atom.report_changed();
        });
        Ok(true)
    }

    /// Remove every member as per-member deletes inside one batch.
    pub fn clear(&self) -> Result<(), StateError> {
        let members: Vec<Value> = self
            .data
            .borrow()
            .entries
            .iter()
            .map(|k| k.value().clone())
            .collect();
        batch(|| {
            for member in members {
                self.delete(&member)?;
            }
            Ok(())
        })
    }

    /// The member count. Tracked on the keys atom.
    pub fn size(&self) -> usize {
        if self.observed {
            self.admin().core.keys_atom.report_observed();
        }
        self.data.borrow().entries.len()
    }

    /// Members in insertion order, with effective identities. Tracks
    /// iteration when observed.
    pub fn values(&self) -> Vec<Value> {
        if !self.observed {
            return self
                .data
                .borrow()
                .entries
                .iter()
                .map(|k| k.value().clone())
                .collect();
        }
        let admin = self.admin();
        admin.core.atom.report_observed();
        let frozen = self.data.borrow().integrity == Integrity::Frozen;
        let snapshot: Vec<Value> = self
            .data
            .borrow()
            .entries
            .iter()
            .map(|k| k.value().clone())
            .collect();
        snapshot
            .into_iter()
            .map(|v| effective_value(&v, admin.owned.is_owned(&v), frozen))
            .collect()
    }

    fn key_set(&self) -> HashSet<ValueKey> {
        self.data.borrow().entries.iter().cloned().collect()
    }

    /// Plain set of the members of both operands.
    pub fn union(&self, other: &SetRef) -> Value {
        let mut members = self.values();
        let mine: HashSet<ValueKey> = self.key_set();
        for v in other.values() {
            if !mine.contains(&ValueKey::new(v.source())) {
                members.push(v);
            }
        }
        plain_set(members)
    }

    /// Plain set of the members present in both operands.
    pub fn intersection(&self, other: &SetRef) -> Value {
        let theirs = other.key_set();
        let members: Vec<Value> = self
            .values()
            .into_iter()
            .filter(|v| theirs.contains(&ValueKey::new(v.source())))
            .collect();
        // Establish the dependency on the other operand too.
        let _ = other.values();
        plain_set(members)
    }

    /// Plain set of this set's members absent from `other`.
    pub fn difference(&self, other: &SetRef) -> Value {
        let theirs = other.key_set();
        let members: Vec<Value> = self
            .values()
            .into_iter()
            .filter(|v| !theirs.contains(&ValueKey::new(v.source())))
            .collect();
        let _ = other.values();
        plain_set(members)
    }

    /// Plain set of the members in exactly one operand.
    pub fn symmetric_difference(&self, other: &SetRef) -> Value {
        let mine = self.key_set();
        let theirs = other.key_set();
        let mut members: Vec<Value> = self
            .values()
            .into_iter()
            .filter(|v| !theirs.contains(&ValueKey::new(v.source())))
            .collect();
        for v in other.values() {
            if !mine.contains(&ValueKey::new(v.source())) {
                members.push(v);
            }
        }
        plain_set(members)
    }

    /// Whether every member of this set is in `other`.
    pub fn is_subset_of(&self, other: &SetRef) -> bool {
        let theirs = other.key_set();
        let _ = other.values();
        self.values()
            .iter()
            .all(|v| theirs.contains(&ValueKey::new(v.source())))
    }

    /// Whether every member of `other` is in this set.
    pub fn is_superset_of(&self, other: &SetRef) -> bool {
        other.is_subset_of(self)
    }

    /// Whether the operands share no member.
    pub fn is_disjoint_from(&self, other: &SetRef) -> bool {
        let theirs = other.key_set();
        let _ = other.values();
        self.values()
            .iter()
            .all(|v| !theirs.contains(&ValueKey::new(v.source())))
    }

    /// Make the set fully immutable.
    pub fn freeze(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Frozen);
    }

    /// The current integrity level.
    pub fn integrity(&self) -> Integrity {
        self.data.borrow().integrity
    }
}

fn plain_set(members: Vec<Value>) -> Value {
    let out = SetRef::new();
    {
        let mut data = out.data.borrow_mut();
        for member in members {
            data.entries.insert(ValueKey::new(member));
        }
    }
    Value::Set(out)
}
