//! Error Types
//!
//! All fallible operations in the observable core surface errors
//! synchronously through [`StateError`]. The taxonomy mirrors the native
//! failure modes of the containers being modeled: integrity violations map
//! to the `TypeError` family, invalid list lengths to `RangeError`, and the
//! remaining variants cover programmer misuse of the core's own API.
//!
//! Notification is never fired alongside an error: a mutation that fails
//! leaves the dependency graph exactly as it was.

use thiserror::Error;

/// Errors produced by the observable-state core.
#[derive(Debug, Error)]
pub enum StateError {
    /// Deep materialization found a cycle. The path is reported in
    /// dot/bracket notation, e.g. `items[0].nested.cycle`.
    #[error("circular reference detected at path `{path}`")]
    CircularReference {
        /// Dot/bracket path from the root to the slot that closed the cycle.
        path: String,
    },

    /// A list `length` assignment that the native container would reject
    /// with a `RangeError`: non-integer, negative, NaN, infinite, or
    /// beyond 2^32 - 1.
    #[error("invalid list length: {value}")]
    InvalidLength {
        /// The rejected length value.
        value: f64,
    },

    /// An internal-node accessor or administration-only operation was
    /// invoked on a value that is not an observable container.
    #[error("value is not an observable container")]
    NotObservable,

    /// A write against a frozen container, or a write to an existing entry
    /// of a sealed container where the native operation would fail.
    #[error("cannot mutate a frozen container")]
    Frozen,

    /// An entry add against a sealed or non-extensible container, or an
    /// entry removal against a sealed container.
    #[error("container is not extensible; cannot add or remove entries")]
    NotExtensible,

    /// The same underlying source was assigned once in observable form and
    /// once in raw form within a single container. Raised in debug builds;
    /// release builds log a warning and keep the observable tag.
    #[error("slot `{slot}` was assigned both as observable and as raw within one container")]
    OwnershipConflict {
        /// The key or index description of the conflicting slot.
        slot: String,
    },

    /// Weak collections accept only container keys.
    #[error("weak collections only accept container keys")]
    InvalidWeakKey,

    /// A value that has no JSON representation was reached during
    /// serialization.
    #[error("cannot represent {kind} as JSON")]
    NonJson {
        /// The kind of value that stopped serialization.
        kind: &'static str,
    },
}
