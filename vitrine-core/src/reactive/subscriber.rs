//! Subscriber types for the reactive system.
//!
//! A Subscriber is any computation that depends on dependency nodes:
//! computed values, effects, and reactions. Atoms hold weak handles to
//! their subscribers and notify them through this trait when they change.

use std::cell::Cell;

/// Unique identifier for a node in the dependency graph.
///
/// Every atom and every subscriber gets a unique ID when created. IDs are
/// used to deduplicate subscriptions and scheduled runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        thread_local! {
            static COUNTER: Cell<u64> = const { Cell::new(0) };
        }
        COUNTER.with(|c| {
            let id = c.get();
            c.set(id + 1);
            Self(id)
        })
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A computation subscribed to dependency nodes.
///
/// `on_change` is invoked synchronously by an atom inside the notification
/// batch; eager subscribers (effects, reactions) respond by scheduling
/// themselves, lazy subscribers (computeds) by marking themselves stale and
/// cascading to their own subscribers.
pub(crate) trait Subscriber {
    /// The subscriber's unique ID.
    fn id(&self) -> NodeId;

    /// A tracked dependency reported a change.
    fn on_change(&self);

    /// Execute a scheduled run (effects and reactions; no-op for lazy
    /// subscribers, which recompute on demand).
    fn run(&self);
}
