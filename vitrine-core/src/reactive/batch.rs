//! Batching
//!
//! A batch is a transactional scope: every change notification raised
//! while a batch is open is deferred, deduplicated per subscriber, and
//! flushed once when the outermost batch exits. Mutations inside the batch
//! are applied to the backing stores immediately (read-after-write sees
//! the latest state); only the downstream effect runs are deferred, so
//! dependents observe the settled state exactly once.
//!
//! Every `report_changed` outside an explicit batch opens an implicit one,
//! which is what guarantees "each effect runs at most once per top-level
//! mutation" even without user batching.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Weak;

use super::subscriber::{NodeId, Subscriber};

/// Runaway-update guard: an effect that keeps retriggering itself will be
/// stopped after this many flush iterations.
const MAX_FLUSH_RUNS: usize = 1000;

struct BatchState {
    depth: Cell<usize>,
    flushing: Cell<bool>,
    queue: RefCell<VecDeque<(NodeId, Weak<dyn Subscriber>)>>,
    queued: RefCell<HashSet<NodeId>>,
}

thread_local! {
    static BATCH: BatchState = BatchState {
        depth: Cell::new(0),
        flushing: Cell::new(false),
        queue: RefCell::new(VecDeque::new()),
        queued: RefCell::new(HashSet::new()),
    };
}

/// Run `f` inside a batch, deferring all change notifications until the
/// outermost batch exits. Nested batches compose; the inner exit does not
/// flush early.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    enter();

    // Exit on drop so a panicking body still closes the batch.
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            exit();
        }
    }

    let _guard = Guard;
    f()
}

/// Whether a batch is currently open.
pub fn is_batching() -> bool {
    BATCH.with(|b| b.depth.get() > 0)
}

pub(crate) fn enter() {
    BATCH.with(|b| b.depth.set(b.depth.get() + 1));
}

pub(crate) fn exit() {
    let flush_now = BATCH.with(|b| {
        let depth = b.depth.get() - 1;
        b.depth.set(depth);
        depth == 0 && !b.flushing.get()
    });
    if flush_now {
        flush();
    }
}

/// Queue a subscriber for execution when the current batch flushes.
/// Duplicate schedules of the same subscriber within one flush cycle are
/// coalesced.
pub(crate) fn schedule(id: NodeId, subscriber: Weak<dyn Subscriber>) {
    let run_now = BATCH.with(|b| {
        if b.queued.borrow_mut().insert(id) {
            b.queue.borrow_mut().push_back((id, subscriber));
        }
        b.depth.get() == 0 && !b.flushing.get()
    });
    // Only reachable when a change is reported outside any batch; the
    // implicit batch in `Atom::report_changed` normally covers this.
    if run_now {
        flush();
    }
}

fn flush() {
    let already_flushing = BATCH.with(|b| {
        if b.flushing.get() {
            true
        } else {
            b.flushing.set(true);
            false
        }
    });
    if already_flushing {
        return;
    }

    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            BATCH.with(|b| b.flushing.set(false));
        }
    }
    let _guard = Guard;

    let mut runs = 0usize;
    loop {
        let next = BATCH.with(|b| {
            let entry = b.queue.borrow_mut().pop_front();
            if let Some((id, _)) = &entry {
                b.queued.borrow_mut().remove(id);
            }
            entry
        });

        let Some((_, weak)) = next else { break };
        let Some(subscriber) = weak.upgrade() else {
            continue;
        };

        runs += 1;
        if runs > MAX_FLUSH_RUNS {
            panic!(
                "maximum update depth exceeded; an effect is continuously \
                 retriggering itself"
            );
        }

        tracing::trace!(subscriber = subscriber.id().raw(), "flushing scheduled run");
        subscriber.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_returns_value() {
        assert_eq!(batch(|| 42), 42);
        assert_eq!(batch(|| String::from("hello")), "hello");
    }

    #[test]
    fn is_batching_flag_nests() {
        assert!(!is_batching());
        batch(|| {
            assert!(is_batching());
            batch(|| assert!(is_batching()));
            assert!(is_batching());
        });
        assert!(!is_batching());
    }

    #[test]
    fn batch_panic_safety() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| panic!("intentional panic"));
        }));
        assert!(result.is_err());
        assert!(!is_batching());
    }
}
