//! Tracking Context
//!
//! The tracking context records which computation is currently running so
//! that dependency nodes read during its execution can register themselves
//! automatically. We use a thread-local stack of frames: entering a
//! tracked execution pushes a frame, reads append the atoms they touch to
//! the top frame, and leaving pops it. Nested tracked executions (an
//! effect reading a computed) therefore each collect their own
//! dependencies.
//!
//! Partial tracking is discarded on unwind: the frame guard pops on drop,
//! so a computation that panics leaves no half-recorded dependency list
//! behind.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use super::atom::Atom;
use super::subscriber::NodeId;

/// Dependencies collected during one tracked execution.
pub(crate) type CollectedDeps = SmallVec<[Rc<Atom>; 4]>;

struct Frame {
    subscriber: NodeId,
    deps: CollectedDeps,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static UNTRACKED_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether a tracked computation is currently running (and not suspended
/// by [`untracked`]).
pub fn is_tracking() -> bool {
    UNTRACKED_DEPTH.with(|d| d.get()) == 0 && STACK.with(|s| !s.borrow().is_empty())
}

/// Record a read of `atom` into the current frame, if any.
pub(crate) fn record(atom: Rc<Atom>) {
    if UNTRACKED_DEPTH.with(|d| d.get()) > 0 {
        return;
    }
    STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.deps.push(atom);
        }
    });
}

/// Run `f` without recording any dependency reads into the active
/// tracking frame.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
    UNTRACKED_DEPTH.with(|d| d.set(d.get() + 1));

    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            UNTRACKED_DEPTH.with(|d| d.set(d.get() - 1));
        }
    }

    let _guard = Guard;
    f()
}

/// Run `f` inside a fresh tracking frame for `subscriber`, returning the
/// result together with the dependencies read during execution.
///
/// If `f` panics the frame is popped and its partial dependency list is
/// dropped before the panic propagates.
pub(crate) fn tracked<T>(subscriber: NodeId, f: impl FnOnce() -> T) -> (T, CollectedDeps) {
    STACK.with(|stack| {
        stack.borrow_mut().push(Frame {
            subscriber,
            deps: CollectedDeps::new(),
        });
    });

    struct Guard {
        subscriber: NodeId,
        completed: bool,
    }
    impl Drop for Guard {
        fn drop(&mut self) {
            if !self.completed {
                STACK.with(|stack| {
                    let popped = stack.borrow_mut().pop();
                    debug_assert!(
                        popped.map(|f| f.subscriber) == Some(self.subscriber),
                        "tracking frame mismatch on unwind"
                    );
                });
            }
        }
    }

    let mut guard = Guard {
        subscriber,
        completed: false,
    };

    let out = f();

    guard.completed = true;
    let frame = STACK.with(|stack| stack.borrow_mut().pop());
    let deps = match frame {
        Some(frame) => {
            debug_assert_eq!(frame.subscriber, subscriber, "tracking frame mismatch");
            frame.deps
        }
        None => CollectedDeps::new(),
    };
    (out, deps)
}
