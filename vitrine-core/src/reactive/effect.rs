//! Effects and Reactions
//!
//! An effect runs its body once at creation under tracking, then re-runs
//! whenever a tracked dependency changes. Each re-run re-tracks from
//! scratch, so dependencies read conditionally come and go with the
//! branches actually taken.
//!
//! A reaction splits the tracked read from the side effect: the track
//! function runs under tracking and produces a value, and the callback
//! fires (untracked) only when that value actually changed. The creation
//! run establishes tracking but never invokes the callback.
//!
//! Both return a [`Subscription`] that stops future runs when disposed or
//! dropped. Disposal is idempotent; disposing an effect from inside its
//! own run is a bug and panics.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::batch;
use super::context::{self, CollectedDeps};
use super::subscriber::{NodeId, Subscriber};

trait Disposer {
    /// Explicit disposal; panics when called from inside the node's own
    /// run.
    fn dispose(&self);

    /// Drop-path disposal; defers until the active run completes instead
    /// of panicking.
    fn dispose_quiet(&self);

    fn is_disposed(&self) -> bool;
}

/// Handle to a running effect or reaction.
///
/// The subscription owns the node: dropping it disposes the node, so hold
/// on to it for as long as the effect should stay live.
pub struct Subscription {
    inner: Rc<dyn Disposer>,
}

impl Subscription {
    /// Stop future runs. Calling this twice is a no-op; calling it from
    /// inside the node's own run panics.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the node has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.dispose_quiet();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Shared lifecycle state for effect-like nodes.
struct Lifecycle {
    disposed: Cell<bool>,
    running: Cell<bool>,
    pending_dispose: Cell<bool>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            disposed: Cell::new(false),
            running: Cell::new(false),
            pending_dispose: Cell::new(false),
        }
    }

    fn dispose(&self, finish: impl FnOnce()) {
        if self.disposed.get() || self.pending_dispose.get() {
            return;
        }
        if self.running.get() {
            panic!("cannot dispose an effect from within its own run");
        }
        self.disposed.set(true);
        finish();
    }

    fn dispose_quiet(&self, finish: impl FnOnce()) {
        if self.disposed.get() || self.pending_dispose.get() {
            return;
        }
        if self.running.get() {
            self.pending_dispose.set(true);
            return;
        }
        self.disposed.set(true);
        finish();
    }

    /// Settle a deferred disposal after a run completes.
    fn after_run(&self, finish: impl FnOnce()) {
        if self.pending_dispose.replace(false) {
            self.disposed.set(true);
            finish();
        }
    }
}

fn resubscribe(
    id: NodeId,
    weak: Weak<dyn Subscriber>,
    deps: &RefCell<CollectedDeps>,
    new_deps: CollectedDeps,
) {
    let old_deps = std::mem::take(&mut *deps.borrow_mut());
    for old in &old_deps {
        if !new_deps.iter().any(|n| n.id() == old.id()) {
            old.remove_observer(id);
        }
    }
    for dep in &new_deps {
        dep.add_observer(id, weak.clone());
    }
    *deps.borrow_mut() = new_deps;
}

fn unsubscribe_all(id: NodeId, deps: &RefCell<CollectedDeps>) {
    for dep in deps.borrow_mut().drain(..) {
        dep.remove_observer(id);
    }
}

struct EffectCore {
    id: NodeId,
    body: RefCell<Box<dyn FnMut()>>,
    deps: RefCell<CollectedDeps>,
    lifecycle: Lifecycle,
    self_weak: Weak<EffectCore>,
}

impl EffectCore {
    fn execute(self: &Rc<Self>) {
        if self.lifecycle.disposed.get() {
            return;
        }
        self.lifecycle.running.set(true);
        let ((), new_deps) = context::tracked(self.id, || (self.body.borrow_mut())());
        self.lifecycle.running.set(false);

        resubscribe(self.id, self.self_weak.clone(), &self.deps, new_deps);
        self.lifecycle.after_run(|| unsubscribe_all(self.id, &self.deps));
    }
}

impl Subscriber for EffectCore {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_change(&self) {
        if self.lifecycle.disposed.get() {
            return;
        }
        batch::schedule(self.id, self.self_weak.clone());
    }

    fn run(&self) {
        if let Some(core) = self.self_weak.upgrade() {
            core.execute();
        }
    }
}

impl Disposer for EffectCore {
    fn dispose(&self) {
        self.lifecycle
            .dispose(|| unsubscribe_all(self.id, &self.deps));
    }

    fn dispose_quiet(&self) {
        self.lifecycle
            .dispose_quiet(|| unsubscribe_all(self.id, &self.deps));
    }

    fn is_disposed(&self) -> bool {
        self.lifecycle.disposed.get()
    }
}

/// Run `body` now under tracking and re-run it whenever a tracked
/// dependency changes.
pub fn effect(body: impl FnMut() + 'static) -> Subscription {
    let core = Rc::new_cyclic(|self_weak: &Weak<EffectCore>| EffectCore {
        id: NodeId::new(),
        body: RefCell::new(Box::new(body)),
        deps: RefCell::new(CollectedDeps::new()),
        lifecycle: Lifecycle::new(),
        self_weak: self_weak.clone(),
    });

    core.execute();
    Subscription { inner: core }
}

struct ReactionCore<T> {
    id: NodeId,
    track: Box<dyn Fn() -> T>,
    callback: RefCell<Box<dyn FnMut(&T)>>,
    last: RefCell<Option<T>>,
    deps: RefCell<CollectedDeps>,
    lifecycle: Lifecycle,
    self_weak: Weak<ReactionCore<T>>,
}

impl<T: PartialEq + 'static> ReactionCore<T> {
    fn execute(self: &Rc<Self>) {
        if self.lifecycle.disposed.get() {
            return;
        }
        self.lifecycle.running.set(true);
        let (value, new_deps) = context::tracked(self.id, || (self.track)());

        let changed = {
            let last = self.last.borrow();
            matches!(last.as_ref(), Some(prev) if *prev != value)
        };
        if changed {
            context::untracked(|| (self.callback.borrow_mut())(&value));
        }
        *self.last.borrow_mut() = Some(value);
        self.lifecycle.running.set(false);

        resubscribe(self.id, self.self_weak.clone(), &self.deps, new_deps);
        self.lifecycle.after_run(|| unsubscribe_all(self.id, &self.deps));
    }
}

impl<T: PartialEq + 'static> Subscriber for ReactionCore<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn on_change(&self) {
        if self.lifecycle.disposed.get() {
            return;
        }
        batch::schedule(self.id, self.self_weak.clone());
    }

    fn run(&self) {
        if let Some(core) = self.self_weak.upgrade() {
            core.execute();
        }
    }
}

impl<T: PartialEq + 'static> Disposer for ReactionCore<T> {
    fn dispose(&self) {
        self.lifecycle
            .dispose(|| unsubscribe_all(self.id, &self.deps));
    }

    fn dispose_quiet(&self) {
        self.lifecycle
            .dispose_quiet(|| unsubscribe_all(self.id, &self.deps));
    }

    fn is_disposed(&self) -> bool {
        self.lifecycle.disposed.get()
    }
}

/// Track `track` and invoke `callback` whenever its output changes.
///
/// The creation run establishes tracking without invoking the callback.
/// The callback runs untracked, so its reads never become dependencies.
pub fn reaction<T: PartialEq + 'static>(
    track: impl Fn() -> T + 'static,
    callback: impl FnMut(&T) + 'static,
) -> Subscription {
    let core = Rc::new_cyclic(|self_weak: &Weak<ReactionCore<T>>| ReactionCore {
        id: NodeId::new(),
        track: Box::new(track),
        callback: RefCell::new(Box::new(callback)),
        last: RefCell::new(None),
        deps: RefCell::new(CollectedDeps::new()),
        lifecycle: Lifecycle::new(),
        self_weak: self_weak.clone(),
    });

    core.execute();
    Subscription { inner: core }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::batch::batch;
    use crate::reactive::signal::Signal;
    use std::cell::Cell;

    #[test]
    fn effect_runs_immediately_and_on_change() {
        let source = Signal::new(1);
        let runs = Rc::new(Cell::new(0));

        let _sub = {
            let source = source.clone();
            let runs = runs.clone();
            effect(move || {
                source.get();
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        source.set(2);
        assert_eq!(runs.get(), 2);
        source.set(3);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn disposed_effect_stops_rerunning() {
        let source = Signal::new(1);
        let runs = Rc::new(Cell::new(0));

        let sub = {
            let source = source.clone();
            let runs = runs.clone();
            effect(move || {
                source.get();
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        sub.dispose();
        assert!(sub.is_disposed());
        sub.dispose();

        source.set(2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn drop_disposes() {
        let source = Signal::new(1);
        let runs = Rc::new(Cell::new(0));

        {
            let source = source.clone();
            let runs = runs.clone();
            let _sub = effect(move || {
                source.get();
                runs.set(runs.get() + 1);
            });
        }

        source.set(2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_retracks_conditional_dependencies() {
        let gate = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(10);
        let runs = Rc::new(Cell::new(0));

        let _sub = {
            let (gate, a, b, runs) = (gate.clone(), a.clone(), b.clone(), runs.clone());
            effect(move || {
                if gate.get() {
                    a.get();
                } else {
                    b.get();
                }
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        // Branch taken reads `a`; `b` is not a dependency.
        b.set(11);
        assert_eq!(runs.get(), 1);

        gate.set(false);
        assert_eq!(runs.get(), 2);

        // Now `b` is tracked and `a` is not.
        a.set(2);
        assert_eq!(runs.get(), 2);
        b.set(12);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn batch_coalesces_effect_runs() {
        let a = Signal::new(1);
        let b = Signal::new(2);
        let runs = Rc::new(Cell::new(0));

        let _sub = {
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            effect(move || {
                a.get();
                b.get();
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        batch(|| {
            a.set(10);
            b.set(20);
            assert_eq!(runs.get(), 1);
        });
        assert_eq!(runs.get(), 2);
    }

    #[test]
    #[should_panic(expected = "within its own run")]
    fn dispose_inside_own_run_panics() {
        let source = Signal::new(0);
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let sub = {
            let source = source.clone();
            let slot = slot.clone();
            effect(move || {
                if source.get() > 0 {
                    if let Some(sub) = slot.borrow().as_ref() {
                        sub.dispose();
                    }
                }
            })
        };
        *slot.borrow_mut() = Some(sub);

        source.set(1);
    }

    #[test]
    fn reaction_suppresses_initial_run_and_fires_on_change() {
        let source = Signal::new(1);
        let seen: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));

        let _sub = {
            let source = source.clone();
            let seen = seen.clone();
            reaction(
                move || source.get() * 2,
                move |v| seen.borrow_mut().push(*v),
            )
        };
        assert!(seen.borrow().is_empty());

        source.set(2);
        assert_eq!(*seen.borrow(), vec![4]);
    }

    #[test]
    fn reaction_skips_unchanged_output() {
        let source = Signal::new(1);
        let fired = Rc::new(Cell::new(0));

        let _sub = {
            let source = source.clone();
            let fired = fired.clone();
            reaction(
                move || source.get() > 0,
                move |_| fired.set(fired.get() + 1),
            )
        };

        // Output stays `true` for both writes.
        source.set(5);
        source.set(9);
        assert_eq!(fired.get(), 0);

        source.set(-1);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn reaction_callback_reads_are_untracked() {
        let tracked_src = Signal::new(1);
        let untracked_src = Signal::new(100);
        let fired = Rc::new(Cell::new(0));

        let _sub = {
            let (t, u, fired) = (tracked_src.clone(), untracked_src.clone(), fired.clone());
            reaction(
                move || t.get(),
                move |_| {
                    u.get();
                    fired.set(fired.get() + 1);
                },
            )
        };

        tracked_src.set(2);
        assert_eq!(fired.get(), 1);

        // Reads inside the callback never became dependencies.
        untracked_src.set(200);
        assert_eq!(fired.get(), 1);
    }
}
