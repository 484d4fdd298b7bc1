//! Computed Values
//!
//! A computed is a lazy, memoized derivation. Reading it reports its own
//! atom as observed, then returns the cached value, recomputing only when
//! a tracked dependency has changed since the last run. When a dependency
//! changes the computed does not recompute eagerly; it marks itself stale
//! and cascades the change to its own subscribers, which pull the fresh
//! value on their next run.
//!
//! A computed with no subscribers of its own is suspended: it drops its
//! dependency subscriptions and recomputes from scratch on the next read.
//! Resubscription happens transparently when it is read under tracking
//! again.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::atom::Atom;
use super::context::{self, CollectedDeps};
use super::subscriber::{NodeId, Subscriber};

struct ComputedCore<T> {
    id: NodeId,
    compute: Box<dyn Fn() -> T>,
    cached: RefCell<Option<T>>,
    stale: Cell<bool>,
    deps: RefCell<CollectedDeps>,
    atom: Rc<Atom>,
    self_weak: Weak<ComputedCore<T>>,
}

impl<T: Clone + 'static> ComputedCore<T> {
    fn recompute(self: &Rc<Self>) {
        let (value, new_deps) = context::tracked(self.id, || (self.compute)());

        // Diff-subscribe: drop atoms no longer read, attach to new ones.
        let old_deps = std::mem::take(&mut *self.deps.borrow_mut());
        for old in &old_deps {
            if !new_deps.iter().any(|n| n.id() == old.id()) {
                old.remove_observer(self.id);
            }
        }
        let weak: Weak<dyn Subscriber> = self.self_weak.clone();
        for dep in &new_deps {
            dep.add_observer(self.id, weak.clone());
        }
        *self.deps.borrow_mut() = new_deps;

        *self.cached.borrow_mut() = Some(value);
        self.stale.set(false);
    }

    fn suspend(&self) {
        for dep in self.deps.borrow_mut().drain(..) {
            dep.remove_observer(self.id);
        }
        self.stale.set(true);
        self.cached.borrow_mut().take();
    }
}

impl<T: Clone + 'static> Subscriber for ComputedCore<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_change(&self) {
        // Already stale: the cascade has run once, nothing new to report.
        if self.stale.replace(true) {
            return;
        }
        self.atom.report_changed();
    }

    fn run(&self) {}
}

/// A lazy, memoized derived value.
///
/// Cloning a `Computed` clones the handle; all clones share one cache and
/// one dependency node.
pub struct Computed<T> {
    core: Rc<ComputedCore<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed from a derivation function. The function is not
    /// run until the first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        let core = Rc::new_cyclic(|self_weak: &Weak<ComputedCore<T>>| ComputedCore {
            id: NodeId::new(),
            compute: Box::new(compute),
            cached: RefCell::new(None),
            stale: Cell::new(true),
            deps: RefCell::new(CollectedDeps::new()),
            atom: Atom::new(),
            self_weak: self_weak.clone(),
        });

        let suspend = Rc::downgrade(&core);
        core.atom.set_on_unobserved(move || {
            if let Some(core) = suspend.upgrade() {
                core.suspend();
            }
        });

        Self { core }
    }

    /// Read the derived value, recomputing if stale. Registers this
    /// computed as a dependency of the running tracked computation.
    pub fn get(&self) -> T {
        self.core.atom.report_observed();
        if self.core.stale.get() || self.core.cached.borrow().is_none() {
            self.core.recompute();
        }
        self.core
            .cached
            .borrow()
            .clone()
            .unwrap_or_else(|| unreachable!("computed cache populated by recompute"))
    }

    /// Read the derived value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        context::untracked(|| self.get())
    }

    /// Drop the cached value without notifying subscribers. The next read
    /// recomputes.
    pub fn clear(&self) {
        self.core.cached.borrow_mut().take();
        self.core.stale.set(true);
    }
}

impl<T: std::fmt::Debug + Clone + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &self.core.cached.borrow())
            .field("stale", &self.core.stale.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal::Signal;
    use std::cell::Cell;

    #[test]
    fn computes_lazily_and_memoizes() {
        let runs = Rc::new(Cell::new(0));
        let source = Signal::new(2);

        let computed = {
            let runs = runs.clone();
            let source = source.clone();
            Computed::new(move || {
                runs.set(runs.get() + 1);
                source.get() * 10
            })
        };

        assert_eq!(runs.get(), 0);
        assert_eq!(computed.get(), 20);
        assert_eq!(runs.get(), 1);

        // Unchanged input: cached value, no rerun.
        assert_eq!(computed.get(), 20);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn recomputes_after_dependency_change() {
        let source = Signal::new(1);
        let computed = {
            let source = source.clone();
            Computed::new(move || source.get() + 1)
        };

        assert_eq!(computed.get(), 2);
        source.set(5);
        assert_eq!(computed.get(), 6);
    }

    #[test]
    fn clear_forces_recompute_without_notification() {
        let runs = Rc::new(Cell::new(0));
        let computed = {
            let runs = runs.clone();
            Computed::new(move || {
                runs.set(runs.get() + 1);
                7
            })
        };

        assert_eq!(computed.get(), 7);
        assert_eq!(runs.get(), 1);

        computed.clear();
        assert_eq!(computed.get(), 7);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn chains_through_computeds() {
        let source = Signal::new(3);
        let doubled = {
            let source = source.clone();
            Computed::new(move || source.get() * 2)
        };
        let squared = {
            let doubled = doubled.clone();
            Computed::new(move || {
                let d = doubled.get();
                d * d
            })
        };

        assert_eq!(squared.get(), 36);
        source.set(4);
        assert_eq!(squared.get(), 64);
    }
}
