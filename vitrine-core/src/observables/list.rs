//! List Administration
//!
//! The observable surface of a sparse list. The backing store keeps only
//! populated slots, so a list with length near 2^32 and three elements
//! costs three slots; every operation here is proportional to the
//! populated region (plus any explicitly requested range), never to the
//! length.
//!
//! # How It Works
//!
//! Index reads track per-index nodes; `len` tracks the keys atom;
//! iteration and derived copies track the structural atom. Structural
//! mutators snapshot the state of the currently-observed indices before
//! applying the raw mutation and notify exactly the indices whose
//! effective content changed, so an effect pinned to `list.get(0)` does
//! not re-run when `push` appends but does re-run when `shift` moves a
//! new element into slot 0.
//!
//! Ownership tags are keyed by value identity, so permuting mutators
//! (`reverse`, `sort`, `splice`) keep each element's observable-ness
//! attached to the element, not to the index it happens to occupy.
//!
//! String-keyed access goes through [`ListRef::get_key`] /
//! [`ListRef::set_key`]: `"length"` follows the native length rules, a
//! canonical index string routes to the index surface, and anything else
//! is an ordinary named property.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::batch;
use crate::registry;
use crate::value::{parse_index, Integrity, ListData, ListRef, Value, MAX_INDEX};

use super::admin::{self, effective_value, AdminCore, AtomMap, Ownership};

pub(crate) struct ListAdmin {
    pub(crate) core: AdminCore<u32>,
    /// Per-key nodes for named (non-index) properties.
    pub(crate) prop_values: Rc<AtomMap<Rc<str>>>,
    /// Identity-keyed ownership tags shared by slots and named props.
    pub(crate) owned: Ownership,
}

impl ListAdmin {
    pub(crate) fn new() -> Self {
        let core: AdminCore<u32> = AdminCore::new();
        let prop_values = Rc::new(AtomMap::new());
        {
            let props = Rc::clone(&prop_values);
            let values = Rc::clone(&core.values);
            let has = Rc::clone(&core.has);
            core.atom.set_on_unobserved(move || {
                values.prune();
                has.prune();
                props.prune();
            });
        }
        Self {
            core,
            prop_values,
            owned: Ownership::new(),
        }
    }
}

/// Strict-equality matching for index searches: numbers by `==` (so NaN
/// never matches and the zero signs are equal), containers by backing
/// allocation regardless of form.
fn strict_matches(stored: &Value, needle: &Value) -> bool {
    match (stored.heap_addr(), needle.heap_addr()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => match (stored, needle) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => stored.same_value_zero(needle),
        },
        _ => false,
    }
}

/// SameValueZero matching, used by `contains`: like strict matching but
/// NaN matches NaN.
fn svz_matches(stored: &Value, needle: &Value) -> bool {
    match (stored.heap_addr(), needle.heap_addr()) {
        (Some(a), Some(b)) => a == b,
        (None, None) => stored.same_value_zero(needle),
        _ => false,
    }
}

fn parse_length(value: &Value) -> Result<u32, StateError> {
    let n = match value {
        Value::Number(n) => *n,
        _ => f64::NAN,
    };
    if !n.is_finite() || n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(StateError::InvalidLength { value: n });
    }
    Ok(n as u32)
}

impl ListRef {
    fn admin(&self) -> Rc<ListAdmin> {
        registry::list_admin(self)
    }

    fn frozen(&self) -> bool {
        self.data.borrow().integrity == Integrity::Frozen
    }

    /// Effective value for a stored slot: the observable form when the
    /// slot's identity is tagged, the raw value otherwise.
    fn resolve(&self, admin: &ListAdmin, stored: &Value) -> Value {
        effective_value(stored, admin.owned.is_owned(stored), self.frozen())
    }

    /// Read the element at `index`; holes and out-of-range reads are
    /// `Undefined`. Tracked per index.
    pub fn get(&self, index: u32) -> Value {
        if !self.observed {
            return self.data.borrow().slots.get(&index).cloned().unwrap_or_default();
        }
        let admin = self.admin();
        admin.core.values.track(&index);
        let stored = self.data.borrow().slots.get(&index).cloned();
        match stored {
            Some(v) => self.resolve(&admin, &v),
            None => Value::Undefined,
        }
    }

    /// Write the element at `index`, growing `len` past it if needed.
    pub fn set(&self, index: u32, value: Value) -> Result<(), StateError> {
        if !self.observed {
            let mut data = self.data.borrow_mut();
            check_slot_write(&data, index)?;
            data.slots.insert(index, value);
            if index >= data.len {
                data.len = index + 1;
            }
            return Ok(());
        }

        let admin = self.admin();
        let (added, grew, displaced) = {
            let mut data = self.data.borrow_mut();
            check_slot_write(&data, index)?;

            let existing = data.slots.get(&index).cloned();
            let raw = value.source();
            let promoted = value.is_observed() && !admin.owned.is_owned(&raw);
            let raw = admin.owned.resolve_write(&value, &index.to_string())?;

            let changed = existing.as_ref().map_or(true, |old| !old.same_value(&raw)) || promoted;
            if !changed {
                return Ok(());
            }

            data.slots.insert(index, raw);
            let grew = index >= data.len;
            if grew {
                data.len = index + 1;
            }
            let displaced = existing.as_ref().is_some_and(Value::is_container);
            (existing.is_none(), grew, displaced)
        };

        // The tag of an overwritten element must not outlive its presence.
        if displaced {
            self.release_missing(&admin);
        }
        self.notify_index(&admin, index, added, grew);
        Ok(())
    }

    /// Remove the element at `index`, leaving a hole. Length is
    /// unaffected. Returns whether a populated slot existed.
    pub fn delete(&self, index: u32) -> Result<bool, StateError> {
        let removed = {
            let mut data = self.data.borrow_mut();
            if data.slots.contains_key(&index) && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            data.slots.remove(&index)
        };
        if removed.is_none() {
            return Ok(false);
        }
        if !self.observed {
            return Ok(true);
        }
        let admin = self.admin();
        self.release_missing(&admin);
        self.notify_index(&admin, index, true, false);
        Ok(true)
    }

    /// Whether `index` holds a populated slot (`false` for holes, even
    /// inside the length). Tracked per index, on the presence node.
    pub fn has_index(&self, index: u32) -> bool {
        if self.observed {
            self.admin().core.has.track(&index);
        }
        self.data.borrow().slots.contains_key(&index)
    }

    /// The list length. Tracked on the keys atom, so element rewrites do
    /// not re-run a length-only dependent.
    pub fn len(&self) -> u32 {
        if self.observed {
            self.admin().core.keys_atom.report_observed();
        }
        self.data.borrow().len
    }

    /// Whether the length is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assign the length. Growing creates holes in O(1); shrinking drops
    /// the truncated slots, releases their ownership tags, and notifies
    /// exactly the truncated observed indices.
    pub fn set_len(&self, new_len: u32) -> Result<(), StateError> {
        {
            let data = self.data.borrow();
            if data.integrity == Integrity::Frozen {
                return Err(admin::write_error());
            }
            let truncates = data.slots.range(new_len..).next().is_some();
            if truncates && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            if data.len == new_len {
                return Ok(());
            }
        }
        if !self.observed {
            let mut data = self.data.borrow_mut();
            data.slots.retain(|i, _| *i < new_len);
            data.len = new_len;
            return Ok(());
        }
        let admin = self.admin();
        self.structural(&admin, |data| {
            data.slots.retain(|i, _| *i < new_len);
            data.len = new_len;
        });
        Ok(())
    }

    /// String-keyed read: `"length"`, a canonical index, or a named
    /// property.
    pub fn get_key(&self, key: &str) -> Value {
        if key == "length" {
            return Value::Number(self.len() as f64);
        }
        if let Some(index) = parse_index(key) {
            return self.get(index);
        }
        if !self.observed {
            return self.data.borrow().props.get(key).cloned().unwrap_or_default();
        }
        let admin = self.admin();
        let key: Rc<str> = Rc::from(key);
        admin.prop_values.track(&key);
        let stored = self.data.borrow().props.get(&key).cloned();
        match stored {
            Some(v) => self.resolve(&admin, &v),
            None => Value::Undefined,
        }
    }

    /// String-keyed write, following the same routing as
    /// [`get_key`](ListRef::get_key). `"length"` assignment enforces the
    /// native length rules.
    pub fn set_key(&self, key: &str, value: Value) -> Result<(), StateError> {
        if key == "length" {
            return self.set_len(parse_length(&value)?);
        }
        if let Some(index) = parse_index(key) {
            return self.set(index, value);
        }

        if !self.observed {
            let mut data = self.data.borrow_mut();
            check_prop_write(&data, key)?;
            data.props.insert(Rc::from(key), value);
            return Ok(());
        }

        let admin = self.admin();
        let key: Rc<str> = Rc::from(key);
        let (added, displaced) = {
            let mut data = self.data.borrow_mut();
            check_prop_write(&data, &key)?;

            let existing = data.props.get(&key).cloned();
            let raw = value.source();
            let promoted = value.is_observed() && !admin.owned.is_owned(&raw);
            let raw = admin.owned.resolve_write(&value, &key)?;

            let changed = existing.as_ref().map_or(true, |old| !old.same_value(&raw)) || promoted;
            if !changed {
                return Ok(());
            }
            let added = existing.is_none();
            data.props.insert(Rc::clone(&key), raw);
            let displaced = existing.as_ref().is_some_and(Value::is_container);
            (added, displaced)
        };

        if displaced {
            self.release_missing(&admin);
        }
        batch(|| {
            admin.prop_values.report_changed(&key);
            if added {
                admin.core.keys_atom.report_changed();
            }
            admin.core.atom.report_changed();
        });
        Ok(())
    }

    /// Append an element; returns the new length.
    pub fn push(&self, value: Value) -> Result<u32, StateError> {
        {
            let data = self.data.borrow();
            if !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
            if data.len == u32::MAX {
                return Err(StateError::InvalidLength {
                    value: data.len as f64 + 1.0,
                });
            }
        }
        if !self.observed {
            let mut data = self.data.borrow_mut();
            let index = data.len;
            data.slots.insert(index, value);
            data.len += 1;
            return Ok(data.len);
        }
        let admin = self.admin();
        let raw = admin.owned.resolve_write(&value, "push")?;
        Ok(self.structural(&admin, |data| {
            let index = data.len;
            data.slots.insert(index, raw);
            data.len += 1;
            data.len
        }))
    }

    /// Remove and return the last element (with its pre-removal effective
    /// identity). `Undefined` on an empty list.
    pub fn pop(&self) -> Result<Value, StateError> {
        let (last, stored) = {
            let data = self.data.borrow();
            if data.len == 0 {
                return Ok(Value::Undefined);
            }
            if data.integrity == Integrity::Frozen {
                return Err(admin::write_error());
            }
            let last = data.len - 1;
            if data.slots.contains_key(&last) && !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            (last, data.slots.get(&last).cloned())
        };
        if !self.observed {
            let mut data = self.data.borrow_mut();
            let out = data.slots.remove(&last).unwrap_or_default();
            data.len = last;
            return Ok(out);
        }
        let admin = self.admin();
        let out = match &stored {
            Some(v) => self.resolve(&admin, v),
            None => Value::Undefined,
        };
        self.structural(&admin, |data| {
            data.slots.remove(&last);
            data.len = last;
        });
        Ok(out)
    }

    /// Remove and return the first element; every other element moves
    /// down one index (tags follow the elements).
    pub fn shift(&self) -> Result<Value, StateError> {
        let stored = {
            let data = self.data.borrow();
            if data.len == 0 {
                return Ok(Value::Undefined);
            }
            if !data.integrity.allows_remove() {
                return Err(admin::remove_error(data.integrity));
            }
            data.slots.get(&0).cloned()
        };
        let shift_down = |data: &mut ListData| {
            let moved: Vec<(u32, Value)> = std::mem::take(&mut data.slots)
                .into_iter()
                .filter(|(i, _)| *i > 0)
                .map(|(i, v)| (i - 1, v))
                .collect();
            data.slots = moved.into_iter().collect();
            data.len -= 1;
        };
        if !self.observed {
            shift_down(&mut self.data.borrow_mut());
            return Ok(stored.unwrap_or_default());
        }
        let admin = self.admin();
        let out = match &stored {
            Some(v) => self.resolve(&admin, v),
            None => Value::Undefined,
        };
        self.structural(&admin, shift_down);
        Ok(out)
    }

    /// Insert an element at the front; returns the new length.
    pub fn unshift(&self, value: Value) -> Result<u32, StateError> {
        {
            let data = self.data.borrow();
            if !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
        }
        let shift_up = move |data: &mut ListData, first: Value| {
            let moved: Vec<(u32, Value)> = std::mem::take(&mut data.slots)
                .into_iter()
                .map(|(i, v)| (i + 1, v))
                .collect();
            data.slots = moved.into_iter().collect();
            data.slots.insert(0, first);
            data.len += 1;
            data.len
        };
        if !self.observed {
            let mut data = self.data.borrow_mut();
            return Ok(shift_up(&mut data, value));
        }
        let admin = self.admin();
        let raw = admin.owned.resolve_write(&value, "unshift")?;
        Ok(self.structural(&admin, move |data| shift_up(data, raw)))
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `items` in their place. Returns the removed elements with their
    /// pre-removal effective identities (holes as `Undefined`).
    pub fn splice(
        &self,
        start: u32,
        delete_count: u32,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StateError> {
        let (start, delete_count) = {
            let data = self.data.borrow();
            let start = start.min(data.len);
            let delete_count = delete_count.min(data.len - start);
            if (delete_count > 0 || !items.is_empty()) && !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
            (start, delete_count)
        };

        let admin = self.observed.then(|| self.admin());
        let mut resolved = Vec::with_capacity(items.len());
        for (offset, item) in items.into_iter().enumerate() {
            let raw = match &admin {
                Some(admin) => admin
                    .owned
                    .resolve_write(&item, &(start + offset as u32).to_string())?,
                None => item,
            };
            resolved.push(raw);
        }

        let removed: Vec<Value> = {
            let data = self.data.borrow();
            (start..start + delete_count)
                .map(|i| match data.slots.get(&i) {
                    Some(v) => match &admin {
                        Some(admin) => self.resolve(admin, v),
                        None => v.clone(),
                    },
                    None => Value::Undefined,
                })
                .collect()
        };

        let inserted = resolved.len() as u32;
        let apply = move |data: &mut ListData| {
            let end = start + delete_count;
            let mut next: Vec<(u32, Value)> = Vec::with_capacity(data.slots.len());
            for (i, v) in std::mem::take(&mut data.slots) {
                if i < start {
                    next.push((i, v));
                } else if i >= end {
                    next.push((i - delete_count + inserted, v));
                }
            }
            data.slots = next.into_iter().collect();
            for (offset, v) in resolved.into_iter().enumerate() {
                data.slots.insert(start + offset as u32, v);
            }
            data.len = data.len - delete_count + inserted;
        };

        match admin {
            Some(admin) => self.structural(&admin, apply),
            None => apply(&mut self.data.borrow_mut()),
        }
        Ok(removed)
    }

    /// Fill `[start, end)` with `value` (clamped to the length).
    pub fn fill(&self, value: Value, start: u32, end: u32) -> Result<(), StateError> {
        let (start, end) = {
            let data = self.data.borrow();
            let end = end.min(data.len);
            let start = start.min(end);
            if !data.integrity.allows_write() {
                return Err(admin::write_error());
            }
            let holes = (start..end).any(|i| !data.slots.contains_key(&i));
            if holes && !data.integrity.allows_add() {
                return Err(admin::add_error(data.integrity));
            }
            (start, end)
        };
        let fill_in = move |data: &mut ListData, raw: Value| {
            for i in start..end {
                data.slots.insert(i, raw.clone());
            }
        };
        if !self.observed {
            fill_in(&mut self.data.borrow_mut(), value);
            return Ok(());
        }
        let admin = self.admin();
        let raw = admin.owned.resolve_write(&value, "fill")?;
        self.structural(&admin, move |data| fill_in(data, raw));
        Ok(())
    }

    /// Copy `[start, end)` onto the region beginning at `target`,
    /// propagating holes like the native operation.
    pub fn copy_within(&self, target: u32, start: u32, end: u32) -> Result<(), StateError> {
        let (target, start, end) = {
            let data = self.data.borrow();
            if !data.integrity.allows_write() {
                return Err(admin::write_error());
            }
            let end = end.min(data.len);
            let start = start.min(end);
            let target = target.min(data.len);
            (target, start, end)
        };
        let count = (end - start).min(self.data.borrow().len - target);
        let apply = move |data: &mut ListData| {
            let window: Vec<Option<Value>> = (start..start + count)
                .map(|i| data.slots.get(&i).cloned())
                .collect();
            for (offset, slot) in window.into_iter().enumerate() {
                let dest = target + offset as u32;
                match slot {
                    Some(v) => {
                        data.slots.insert(dest, v);
                    }
                    None => {
                        data.slots.remove(&dest);
                    }
                }
            }
        };
        if !self.observed {
            apply(&mut self.data.borrow_mut());
            return Ok(());
        }
        let admin = self.admin();
        self.structural(&admin, apply);
        Ok(())
    }

    /// Reverse in place; ownership tags follow the elements.
    pub fn reverse(&self) -> Result<(), StateError> {
        {
            let data = self.data.borrow();
            if !data.integrity.allows_write() {
                return Err(admin::write_error());
            }
        }
        let apply = |data: &mut ListData| {
            let len = data.len;
            let flipped: Vec<(u32, Value)> = std::mem::take(&mut data.slots)
                .into_iter()
                .map(|(i, v)| (len - 1 - i, v))
                .collect();
            data.slots = flipped.into_iter().collect();
        };
        if !self.observed {
            apply(&mut self.data.borrow_mut());
            return Ok(());
        }
        let admin = self.admin();
        self.structural(&admin, apply);
        Ok(())
    }

    /// Sort in place. The comparator receives effective values; without
    /// one, elements order by their string coercion. Undefined elements
    /// sort after defined ones, and holes compact to the tail.
    pub fn sort(
        &self,
        mut comparator: Option<&mut dyn FnMut(&Value, &Value) -> Ordering>,
    ) -> Result<(), StateError> {
        {
            let data = self.data.borrow();
            if !data.integrity.allows_write() {
                return Err(admin::write_error());
            }
        }
        let admin = self.observed.then(|| self.admin());

        let mut defined: Vec<Value> = Vec::new();
        let mut undefined_count = 0usize;
        {
            let data = self.data.borrow();
            for v in data.slots.values() {
                let eff = match &admin {
                    Some(admin) => self.resolve(admin, v),
                    None => v.clone(),
                };
                if matches!(eff, Value::Undefined) {
                    undefined_count += 1;
                } else {
                    defined.push(eff);
                }
            }
        }

        match comparator.as_mut() {
            Some(cmp) => defined.sort_by(|a, b| cmp(a, b)),
            None => defined.sort_by(|a, b| a.coerce_string().cmp(&b.coerce_string())),
        }

        let apply = move |data: &mut ListData| {
            data.slots.clear();
            let mut i: u32 = 0;
            for v in defined {
                data.slots.insert(i, v.source());
                i += 1;
            }
            for _ in 0..undefined_count {
                data.slots.insert(i, Value::Undefined);
                i += 1;
            }
        };
        match admin {
            Some(admin) => self.structural(&admin, apply),
            None => apply(&mut self.data.borrow_mut()),
        }
        Ok(())
    }

    /// Copy of `[start, end)` as a plain, non-observable list. Holes stay
    /// holes; element identities are preserved.
    pub fn slice(&self, start: u32, end: u32) -> Value {
        let admin = self.track_iteration();
        let data = self.data.borrow();
        let end = end.min(data.len);
        let start = start.min(end);

        let out = ListRef::new();
        {
            let mut out_data = out.data.borrow_mut();
            out_data.len = end - start;
            for (&i, v) in data.slots.range(start..end) {
                let v = match &admin {
                    Some(admin) => self.resolve(admin, v),
                    None => v.clone(),
                };
                out_data.slots.insert(i - start, v);
            }
        }
        Value::List(out)
    }

    /// Concatenation as a plain list: list arguments spread one level,
    /// everything else appends as a single element.
    pub fn concat(&self, others: &[Value]) -> Value {
        let admin = self.track_iteration();
        let out = ListRef::new();
        {
            let mut out_data = out.data.borrow_mut();
            let data = self.data.borrow();
            for (&i, v) in &data.slots {
                let v = match &admin {
                    Some(admin) => self.resolve(admin, v),
                    None => v.clone(),
                };
                out_data.slots.insert(i, v);
            }
            out_data.len = data.len;
            drop(data);

            for other in others {
                match other {
                    Value::List(list) => {
                        let base = out_data.len;
                        for (i, v) in list.effective_entries() {
                            out_data.slots.insert(base + i, v);
                        }
                        out_data.len += list.len();
                    }
                    v => {
                        let i = out_data.len;
                        out_data.slots.insert(i, v.clone());
                        out_data.len += 1;
                    }
                }
            }
        }
        Value::List(out)
    }

    /// Populated entries with effective values, tracking iteration when
    /// observed.
    pub(crate) fn effective_entries(&self) -> Vec<(u32, Value)> {
        let admin = self.track_iteration();
        self.data
            .borrow()
            .slots
            .iter()
            .map(|(&i, v)| {
                let v = match &admin {
                    Some(admin) => self.resolve(admin, v),
                    None => v.clone(),
                };
                (i, v)
            })
            .collect()
    }

    /// Flatten nested lists `depth` levels into a plain dense list; holes
    /// are dropped.
    pub fn flat(&self, depth: u32) -> Value {
        fn walk(list: &ListRef, depth: u32, out: &mut Vec<Value>) {
            for (_, v) in list.effective_entries() {
                match &v {
                    Value::List(inner) if depth > 0 => walk(inner, depth - 1, out),
                    _ => out.push(v),
                }
            }
        }
        let mut out = Vec::new();
        walk(self, depth, &mut out);
        Value::list_from(out)
    }

    /// Plain dense list of the elements for which `pred` returns true.
    pub fn filter(&self, mut pred: impl FnMut(&Value, u32) -> bool) -> Value {
        let kept: Vec<Value> = self
            .effective_entries()
            .into_iter()
            .filter(|(i, v)| pred(v, *i))
            .map(|(_, v)| v)
            .collect();
        Value::list_from(kept)
    }

    /// Plain list of `f` applied to every populated element; holes stay
    /// holes and the length is preserved.
    pub fn map(&self, mut f: impl FnMut(&Value, u32) -> Value) -> Value {
        let admin = self.track_iteration();
        let out = ListRef::new();
        {
            let data = self.data.borrow();
            let mut out_data = out.data.borrow_mut();
            out_data.len = data.len;
            for (&i, v) in &data.slots {
                let v = match &admin {
                    Some(admin) => self.resolve(admin, v),
                    None => v.clone(),
                };
                out_data.slots.insert(i, f(&v, i));
            }
        }
        Value::List(out)
    }

    /// First element for which `pred` returns true.
    pub fn find(&self, mut pred: impl FnMut(&Value, u32) -> bool) -> Value {
        self.effective_entries()
            .into_iter()
            .find(|(i, v)| pred(v, *i))
            .map(|(_, v)| v)
            .unwrap_or_default()
    }

    /// Index of the first element for which `pred` returns true.
    pub fn find_index(&self, mut pred: impl FnMut(&Value, u32) -> bool) -> Option<u32> {
        self.effective_entries()
            .into_iter()
            .find(|(i, v)| pred(v, *i))
            .map(|(i, _)| i)
    }

    /// Index of the first occurrence of `needle`, matching either its raw
    /// or its observable form.
    pub fn index_of(&self, needle: &Value) -> Option<u32> {
        let _admin = self.track_iteration();
        let needle = needle.source();
        self.data
            .borrow()
            .slots
            .iter()
            .find(|(_, v)| strict_matches(v, &needle))
            .map(|(&i, _)| i)
    }

    /// Index of the last occurrence of `needle`.
    pub fn last_index_of(&self, needle: &Value) -> Option<u32> {
        let _admin = self.track_iteration();
        let needle = needle.source();
        self.data
            .borrow()
            .slots
            .iter()
            .rev()
            .find(|(_, v)| strict_matches(v, &needle))
            .map(|(&i, _)| i)
    }

    /// Whether `needle` occurs in the list (SameValueZero, so NaN is
    /// found), matching raw or observable form.
    pub fn contains(&self, needle: &Value) -> bool {
        let _admin = self.track_iteration();
        let needle = needle.source();
        self.data
            .borrow()
            .slots
            .values()
            .any(|v| svz_matches(v, &needle))
    }

    /// Make the list fully immutable.
    pub fn freeze(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Frozen);
    }

    /// Forbid adds and removals; existing elements stay writable.
    pub fn seal(&self) {
        admin::strengthen(&mut self.data.borrow_mut().integrity, Integrity::Sealed);
    }

    /// Forbid adding new elements.
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

    fn track_iteration(&self) -> Option<Rc<ListAdmin>> {
        if !self.observed {
            return None;
        }
        let admin = self.admin();
        admin.core.atom.report_observed();
        Some(admin)
    }

    /// Single notification path for index-level changes.
    fn notify_index(&self, admin: &ListAdmin, index: u32, shape: bool, grew: bool) {
        batch(|| {
            admin.core.values.report_changed(&index);
            if shape {
                admin.core.has.report_changed(&index);
                admin.core.keys_atom.report_changed();
            } else if grew {
                admin.core.keys_atom.report_changed();
            }
            admin.core.atom.report_changed();
        });
    }

    /// Apply a structural mutation and notify exactly what changed:
    /// snapshots the currently-observed indices beforehand, compares their
    /// effective content afterwards, and fires only the differing nodes.
    /// Ownership tags for identities that left the list are released.
    fn structural<R>(&self, admin: &Rc<ListAdmin>, f: impl FnOnce(&mut ListData) -> R) -> R {
        let observed_vals = admin.core.values.observed_keys();
        let observed_has = admin.core.has.observed_keys();

        let (before_vals, before_has, old_len, old_keys) = {
            let data = self.data.borrow();
            let vals: HashMap<u32, Option<Value>> = observed_vals
                .iter()
                .map(|i| (*i, data.slots.get(i).cloned()))
                .collect();
            let has: HashMap<u32, bool> = observed_has
                .iter()
                .map(|i| (*i, data.slots.contains_key(i)))
                .collect();
            let keys: Vec<u32> = data.slots.keys().copied().collect();
            (vals, has, data.len, keys)
        };

        let result = f(&mut self.data.borrow_mut());

        let (changed_vals, changed_has, shape_changed) = {
            let data = self.data.borrow();
            let changed_vals: Vec<u32> = observed_vals
                .into_iter()
                .filter(|i| match (&before_vals[i], data.slots.get(i)) {
                    (Some(b), Some(n)) => !b.same_value(n),
                    (None, None) => false,
                    _ => true,
                })
                .collect();
            let changed_has: Vec<u32> = observed_has
                .into_iter()
                .filter(|i| before_has[i] != data.slots.contains_key(i))
                .collect();
            let new_keys: Vec<u32> = data.slots.keys().copied().collect();
            (
                changed_vals,
                changed_has,
                old_len != data.len || old_keys != new_keys,
            )
        };

        self.release_missing(admin);

        batch(|| {
            for i in &changed_vals {
                admin.core.values.report_changed(i);
            }
            for i in &changed_has {
                admin.core.has.report_changed(i);
            }
            if shape_changed {
                admin.core.keys_atom.report_changed();
            }
            admin.core.atom.report_changed();
        });
        result
    }

    /// Release ownership tags whose identity no longer appears anywhere
    /// in the list.
    fn release_missing(&self, admin: &ListAdmin) {
        let data = self.data.borrow();
        let present: HashSet<usize> = data
            .slots
            .values()
            .chain(data.props.values())
            .filter_map(Value::heap_addr)
            .collect();
        admin.owned.retain_present(|addr| present.contains(&addr));
    }
}

fn check_slot_write(data: &ListData, index: u32) -> Result<(), StateError> {
    if index > MAX_INDEX {
        return Err(StateError::InvalidLength {
            value: index as f64 + 1.0,
        });
    }
    if data.slots.contains_key(&index) {
        if !data.integrity.allows_write() {
            return Err(admin::write_error());
        }
    } else if !data.integrity.allows_add() {
        return Err(admin::add_error(data.integrity));
    }
    Ok(())
}

fn check_prop_write(data: &ListData, key: &str) -> Result<(), StateError> {
    if data.props.contains_key(key) {
        if !data.integrity.allows_write() {
            return Err(admin::write_error());
        }
    } else if !data.integrity.allows_add() {
        return Err(admin::add_error(data.integrity));
    }
    Ok(())
}
