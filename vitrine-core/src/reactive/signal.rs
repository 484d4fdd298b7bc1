//! Signal Implementation
//!
//! A Signal is an atom with a value attached: reads report the atom as
//! observed, writes replace the value and report a change. Writes that
//! store a value equal to the current one are suppressed entirely, so
//! dependents never re-run for a no-op assignment.

use std::cell::RefCell;
use std::rc::Rc;

use super::atom::Atom;
use super::context;

struct SignalInner<T> {
    value: RefCell<T>,
    atom: Rc<Atom>,
}

/// A reactive value cell.
///
/// Cloning a `Signal` clones the handle, not the value; all clones share
/// the same backing cell and dependency node.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a new signal holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                atom: Atom::new(),
            }),
        }
    }

    /// Read the current value, registering a dependency if a tracked
    /// computation is running.
    pub fn get(&self) -> T {
        self.inner.atom.report_observed();
        self.inner.value.borrow().clone()
    }

    /// Read the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        context::untracked(|| self.get())
    }

    /// Replace the value. Notification is suppressed when the new value
    /// equals the current one.
    pub fn set(&self, value: T) {
        {
            let mut slot = self.inner.value.borrow_mut();
            if *slot == value {
                return;
            }
            *slot = value;
        }
        self.inner.atom.report_changed();
    }

    /// Derive the next value from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.inner.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::NodeId;

    #[test]
    fn get_returns_current_value() {
        let signal = Signal::new(10);
        assert_eq!(signal.get(), 10);
        signal.set(20);
        assert_eq!(signal.get(), 20);
    }

    #[test]
    fn equal_write_is_suppressed() {
        use crate::reactive::subscriber::Subscriber;
        use std::cell::Cell;

        struct Probe {
            id: NodeId,
            changes: Cell<usize>,
        }
        impl Subscriber for Probe {
            fn id(&self) -> NodeId {
                self.id
            }
            fn on_change(&self) {
                self.changes.set(self.changes.get() + 1);
            }
            fn run(&self) {}
        }

        let signal = Signal::new(5);
        let ((), deps) = context::tracked(NodeId::new(), || {
            signal.get();
        });
        assert_eq!(deps.len(), 1);

        let probe = Rc::new(Probe {
            id: NodeId::new(),
            changes: Cell::new(0),
        });
        let weak = Rc::downgrade(&probe);
        deps[0].add_observer(probe.id, weak);

        signal.set(5);
        assert_eq!(probe.changes.get(), 0);

        signal.set(6);
        assert_eq!(probe.changes.get(), 1);
    }

    #[test]
    fn update_applies_function() {
        let signal = Signal::new(3);
        signal.update(|n| n * 2);
        assert_eq!(signal.get(), 6);
    }

    #[test]
    fn clones_share_state() {
        let a = Signal::new(String::from("x"));
        let b = a.clone();
        a.set(String::from("y"));
        assert_eq!(b.get(), "y");
    }
}
