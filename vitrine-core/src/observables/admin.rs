//! Administration Building Blocks
//!
//! Every observable container is backed by an administration: the
//! bookkeeping that owns its dependency nodes and ownership tags. The
//! pieces shared by all container kinds live here:
//!
//! - [`AtomMap`]: lazily-created per-key dependency nodes. A node is
//!   created the first time its key is read under active tracking and
//!   pruned once nothing observes it after the container's structural
//!   atom goes unobserved, so transient reads of many keys never
//!   accumulate nodes.
//! - [`AdminCore`]: the structural atom ("anything changed"), the keys
//!   atom (enumeration/length/size only), and the per-key value and
//!   presence maps, wired together with the pruning hook.
//! - [`Ownership`]: identity-keyed ownership tags for lists, maps, and
//!   sets, where the tag follows the assigned value rather than the slot
//!   position.
//!
//! The ownership discipline: writes always store the raw form of the
//! assigned value, and the tag alone decides whether a read hands back
//! the observable form. Assigning the same source once observable and
//! once raw in one container is a programming error; debug builds refuse
//! it, release builds keep the observable tag and warn.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::rc::Rc;

use crate::error::StateError;
use crate::reactive::Atom;
use crate::reactive::context;
use crate::value::Value;

/// Lazily-populated per-key dependency nodes.
pub(crate) struct AtomMap<K> {
    atoms: RefCell<HashMap<K, Rc<Atom>>>,
}

impl<K: Eq + Hash + Clone> AtomMap<K> {
    pub(crate) fn new() -> Self {
        Self {
            atoms: RefCell::new(HashMap::new()),
        }
    }

    /// Record the current computation as depending on `key`. Nodes are
    /// only materialized while tracking is active; an untracked read
    /// creates nothing.
    pub(crate) fn track(&self, key: &K) {
        if !context::is_tracking() {
            return;
        }
        let atom = self
            .atoms
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(Atom::new)
            .clone();
        atom.report_observed();
    }

    /// Notify the node for `key`, if one was ever observed.
    pub(crate) fn report_changed(&self, key: &K) {
        let atom = self.atoms.borrow().get(key).cloned();
        if let Some(atom) = atom {
            atom.report_changed();
        }
    }

    /// Notify every existing node.
    pub(crate) fn report_all(&self) {
        let atoms: Vec<_> = self.atoms.borrow().values().cloned().collect();
        for atom in atoms {
            atom.report_changed();
        }
    }

    /// Keys with a currently-observed node.
    pub(crate) fn observed_keys(&self) -> Vec<K> {
        self.atoms
            .borrow()
            .iter()
            .filter(|(_, atom)| atom.is_observed())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// The node for `key`, creating it if absent.
    pub(crate) fn node(&self, key: &K) -> Rc<Atom> {
        self.atoms
            .borrow_mut()
            .entry(key.clone())
            .or_insert_with(Atom::new)
            .clone()
    }

    /// Drop nodes nothing observes anymore.
    pub(crate) fn prune(&self) {
        self.atoms.borrow_mut().retain(|_, atom| atom.is_observed());
    }
}

/// The dependency nodes every container administration carries.
pub(crate) struct AdminCore<K> {
    /// Fires on every mutation; observed by iteration and derived copies.
    pub(crate) atom: Rc<Atom>,
    /// Fires on shape changes only (key added/removed, length, size).
    pub(crate) keys_atom: Rc<Atom>,
    /// Per-key value nodes.
    pub(crate) values: Rc<AtomMap<K>>,
    /// Per-key presence nodes, independent of the value nodes.
    pub(crate) has: Rc<AtomMap<K>>,
}

impl<K: Eq + Hash + Clone + 'static> AdminCore<K> {
    pub(crate) fn new() -> Self {
        let atom = Atom::new();
        let values = Rc::new(AtomMap::new());
        let has = Rc::new(AtomMap::new());

        // Once the container as a whole stops being observed, per-key
        // nodes that lost their observers are released.
        {
            let values = Rc::clone(&values);
            let has = Rc::clone(&has);
            atom.set_on_unobserved(move || {
                values.prune();
                has.prune();
            });
        }

        Self {
            atom,
            keys_atom: Atom::new(),
            values,
            has,
        }
    }
}

/// Identity-keyed ownership tags: the set of backing-allocation addresses
/// assigned in observable form.
pub(crate) struct Ownership {
    addrs: RefCell<HashSet<usize>>,
}

impl Ownership {
    pub(crate) fn new() -> Self {
        Self {
            addrs: RefCell::new(HashSet::new()),
        }
    }

    /// Whether the stored raw value at a slot was assigned observable.
    pub(crate) fn is_owned(&self, stored: &Value) -> bool {
        stored
            .heap_addr()
            .is_some_and(|addr| self.addrs.borrow().contains(&addr))
    }

    /// Resolve a write: unwrap the incoming value and update the tag for
    /// its identity. Errors on a raw assignment of an identity previously
    /// assigned observable (debug builds only; release keeps the tag).
    pub(crate) fn resolve_write(&self, incoming: &Value, slot: &str) -> Result<Value, StateError> {
        let raw = incoming.source();
        let Some(addr) = raw.heap_addr() else {
            return Ok(raw);
        };
        if incoming.is_observed() {
            self.addrs.borrow_mut().insert(addr);
        } else if self.addrs.borrow().contains(&addr) {
            conflict(slot)?;
        }
        Ok(raw)
    }

    /// Tag an identity observable unconditionally ("observable wins").
    pub(crate) fn promote(&self, addr: usize) -> bool {
        self.addrs.borrow_mut().insert(addr)
    }

    /// Release the tag for an identity that left the container.
    pub(crate) fn release(&self, addr: usize) {
        self.addrs.borrow_mut().remove(&addr);
    }

    /// Release every tag whose identity is absent from `remaining`.
    pub(crate) fn retain_present(&self, remaining: impl Fn(usize) -> bool) {
        self.addrs.borrow_mut().retain(|addr| remaining(*addr));
    }
}

/// Surface an ownership conflict: an error in debug builds, a warning
/// (keeping the observable tag) in release builds.
pub(crate) fn conflict(slot: &str) -> Result<(), StateError> {
    if cfg!(debug_assertions) {
        Err(StateError::OwnershipConflict { slot: slot.into() })
    } else {
        tracing::warn!(
            slot,
            "source assigned both observable and raw; keeping the observable tag"
        );
        Ok(())
    }
}

/// Raise `current` to `target` if `target` is the stronger level; the
/// integrity ladder never weakens.
pub(crate) fn strengthen(current: &mut crate::value::Integrity, target: crate::value::Integrity) {
    use crate::value::Integrity::*;
    let rank = |i: crate::value::Integrity| match i {
        Extensible => 0,
        NonExtensible => 1,
        Sealed => 2,
        Frozen => 3,
    };
    if rank(target) > rank(*current) {
        *current = target;
    }
}

/// The error a rejected rewrite surfaces.
pub(crate) fn write_error() -> StateError {
    StateError::Frozen
}

/// The error a rejected add surfaces.
pub(crate) fn add_error(integrity: crate::value::Integrity) -> StateError {
    if integrity == crate::value::Integrity::Frozen {
        StateError::Frozen
    } else {
        StateError::NotExtensible
    }
}

/// The error a rejected removal surfaces.
pub(crate) fn remove_error(integrity: crate::value::Integrity) -> StateError {
    if integrity == crate::value::Integrity::Frozen {
        StateError::Frozen
    } else {
        StateError::NotExtensible
    }
}

/// The value a tracked read hands back: the observable form for an
/// owned slot, the stored raw value otherwise. A frozen container cannot
/// dispatch writes through an administration, so its owned slots fall
/// back to the raw value.
pub(crate) fn effective_value(stored: &Value, owned: bool, frozen: bool) -> Value {
    if !owned || !stored.is_container() {
        return stored.clone();
    }
    if frozen {
        #[cfg(debug_assertions)]
        tracing::warn!(
            kind = stored.kind_name(),
            "returning raw value for an observable-tagged slot of a frozen container"
        );
        return stored.clone();
    }
    crate::registry::observe(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::NodeId;

    #[test]
    fn atom_map_creates_nodes_only_under_tracking() {
        let map: AtomMap<u32> = AtomMap::new();

        map.track(&0);
        assert!(map.observed_keys().is_empty());
        assert!(map.atoms.borrow().is_empty());

        let ((), deps) = context::tracked(NodeId::new(), || {
            map.track(&0);
        });
        assert_eq!(deps.len(), 1);
        assert_eq!(map.atoms.borrow().len(), 1);
    }

    #[test]
    fn prune_keeps_observed_nodes() {
        let map: AtomMap<u32> = AtomMap::new();
        map.node(&0);
        map.node(&1);
        assert_eq!(map.atoms.borrow().len(), 2);

        map.prune();
        assert!(map.atoms.borrow().is_empty());
    }

    #[test]
    fn ownership_tracks_assignment_form() {
        let ownership = Ownership::new();
        let raw = Value::empty_object();
        let observed = crate::registry::observe(&raw);

        let stored = ownership.resolve_write(&observed, "0").unwrap();
        assert!(!stored.is_observed());
        assert!(ownership.is_owned(&stored));
    }

    #[test]
    #[cfg(debug_assertions)]
    fn conflicting_assignment_errors_in_debug() {
        let ownership = Ownership::new();
        let raw = Value::empty_object();
        let observed = crate::registry::observe(&raw);

        ownership.resolve_write(&observed, "0").unwrap();
        let result = ownership.resolve_write(&raw, "1");
        assert!(matches!(
            result,
            Err(StateError::OwnershipConflict { .. })
        ));
    }
}
