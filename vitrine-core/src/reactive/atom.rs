//! Atom Implementation
//!
//! An Atom is the minimal dependency node: it carries no value, only the
//! two halves of the observation contract. `report_observed` records the
//! atom into the computation currently being tracked; `report_changed`
//! notifies every subscriber, inside an implicit batch so that downstream
//! effects run at most once per top-level mutation.
//!
//! Atoms also track their own observed/unobserved transitions: when the
//! last subscriber unsubscribes, an optional hook fires. The container
//! administrations use this to release per-key nodes, and computed values
//! use it to suspend themselves.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::batch;
use super::context;
use super::subscriber::{NodeId, Subscriber};

type ObserverList = SmallVec<[(NodeId, Weak<dyn Subscriber>); 2]>;

/// A minimal dependency-graph node.
pub struct Atom {
    id: NodeId,
    observers: RefCell<ObserverList>,
    on_unobserved: RefCell<Option<Box<dyn Fn()>>>,
}

impl Atom {
    /// Create a new atom.
    pub fn new() -> Rc<Atom> {
        Rc::new(Atom {
            id: NodeId::new(),
            observers: RefCell::new(ObserverList::new()),
            on_unobserved: RefCell::new(None),
        })
    }

    /// The atom's unique node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Record this atom as a dependency of the computation currently being
    /// tracked, if any.
    pub fn report_observed(self: &Rc<Self>) {
        if context::is_tracking() {
            context::record(Rc::clone(self));
        }
    }

    /// Notify all subscribers that this atom changed.
    ///
    /// Runs inside an implicit batch: if no explicit batch is open, one is
    /// opened around the notification so each downstream effect is flushed
    /// exactly once.
    pub fn report_changed(&self) {
        batch::enter();

        // Snapshot live subscribers first; notification may re-borrow the
        // observer list (a computed cascading, an effect rescheduling).
        let live: SmallVec<[Rc<dyn Subscriber>; 4]> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|(_, weak)| weak.strong_count() > 0);
            observers.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };

        for subscriber in live {
            subscriber.on_change();
        }

        batch::exit();
    }

    /// Whether anything currently subscribes to this atom.
    pub fn is_observed(&self) -> bool {
        self.observers
            .borrow()
            .iter()
            .any(|(_, weak)| weak.strong_count() > 0)
    }

    /// Install the hook fired when the subscriber count drops to zero.
    pub(crate) fn set_on_unobserved(&self, hook: impl Fn() + 'static) {
        *self.on_unobserved.borrow_mut() = Some(Box::new(hook));
    }

    /// Subscribe `subscriber` to this atom (idempotent per ID).
    pub(crate) fn add_observer(&self, id: NodeId, subscriber: Weak<dyn Subscriber>) {
        let mut observers = self.observers.borrow_mut();
        if observers.iter().any(|(existing, _)| *existing == id) {
            return;
        }
        observers.push((id, subscriber));
    }

    /// Unsubscribe the subscriber with the given ID; fires the unobserved
    /// hook when the list empties.
    pub(crate) fn remove_observer(&self, id: NodeId) {
        let emptied = {
            let mut observers = self.observers.borrow_mut();
            let before = observers.len();
            observers.retain(|(existing, weak)| *existing != id && weak.strong_count() > 0);
            before > 0 && observers.is_empty()
        };
        if emptied {
            let hook = self.on_unobserved.borrow();
            if let Some(hook) = hook.as_ref() {
                hook();
            }
        }
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id)
            .field("observed", &self.is_observed())
            .finish()
    }
}
