//! Reactive Core
//!
//! The dependency-graph primitives underneath the observable containers:
//!
//! - [`Atom`]: a bare dependency node with `report_observed` and
//!   `report_changed`.
//! - [`Signal`]: an atom with a value attached.
//! - [`Computed`]: a lazy, memoized derivation.
//! - [`effect`] / [`reaction`]: eager subscribers that re-run when their
//!   tracked dependencies change.
//! - [`batch`]: defers and deduplicates notifications until the outermost
//!   scope exits.
//! - [`untracked`]: suppresses dependency recording.
//!
//! # How It Works
//!
//! Reads and writes meet through a thread-local tracking stack. Running an
//! effect (or recomputing a computed) pushes a frame; every atom read
//! while the frame is open records itself into it. When the run finishes
//! the collected atoms become the subscriber's dependency set, diffed
//! against the previous run so stale subscriptions are dropped. Writes go
//! the other way: an atom's `report_changed` walks its subscribers, each
//! of which either marks itself stale (computed) or schedules a re-run in
//! the current batch (effect, reaction).
//!
//! Everything here is single-threaded by design; handles are `Rc`-based
//! and the graph lives in thread-local state.

mod atom;
mod batch;
mod computed;
pub(crate) mod context;
mod effect;
mod signal;
pub(crate) mod subscriber;

pub use atom::Atom;
pub use batch::{batch, is_batching};
pub use computed::Computed;
pub use context::untracked;
pub use effect::{effect, reaction, Subscription};
pub use signal::Signal;
pub use subscriber::NodeId;
