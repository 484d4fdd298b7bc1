//! Vitrine Core
//!
//! This crate provides the core runtime for the Vitrine reactive state
//! framework. It implements:
//!
//! - Reactive primitives (signals, computeds, effects, batching)
//! - Transparent observable containers (objects, lists, maps, sets, weak
//!   collections, dates)
//! - A registry pairing every container with its administration
//! - One-time deep materialization of JSON-like state trees
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `value`: The dynamic value model and dual-form container handles
//! - `observables`: Per-container administrations and method surfaces
//! - `registry`: Wrapping, unwrapping, and the source-to-admin table
//!
//! Containers come in two forms sharing one backing allocation: the raw
//! *source* form, whose accesses touch plain data, and the *observable*
//! form returned by [`observe`], whose reads register dependencies and
//! whose writes notify exactly the computations that depend on what
//! changed. [`source`] recovers the raw form at any time, so state can
//! always be handed off as plain data.
//!
//! # Example
//!
//! ```rust,ignore
//! use vitrine_core::{effect, observe, Value};
//!
//! let state = observe(&Value::empty_object());
//! let Value::Object(state) = state else { unreachable!() };
//!
//! let sub = {
//!     let state = state.clone();
//!     effect(move || println!("count = {:?}", state.get("count")))
//! };
//!
//! state.set("count", Value::from(1)).unwrap();
//! // Effect automatically re-runs, prints: count = Number(1.0)
//! drop(sub);
//! ```

pub mod error;
mod observables;
pub mod reactive;
pub mod registry;
pub mod value;

pub use error::StateError;
pub use reactive::{
    batch, effect, is_batching, reaction, untracked, Atom, Computed, Signal, Subscription,
};
pub use registry::{
    internal_node, is_observable, observe, observe_tree, report_changed, report_observed, source,
};
pub use value::{
    DateRef, Integrity, ListRef, MapRef, ObjectRef, SetRef, Value, ValueKey, WeakMapRef, WeakSetRef,
};
