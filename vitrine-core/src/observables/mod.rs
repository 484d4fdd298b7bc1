//! Container Administrations
//!
//! One administration per wrapped container: the bookkeeping that owns
//! the container's dependency nodes, ownership tags, and (for objects)
//! property-kind configuration. The administrations live in the registry,
//! keyed by backing-allocation identity; the handle types in
//! [`crate::value`] gain their observable method surfaces here, with
//! every method dispatching through the administration when the handle
//! is the observable form and falling through to plain backing-store
//! access when it is the source form.

pub(crate) mod admin;
pub(crate) mod date;
pub(crate) mod list;
pub(crate) mod map;
pub(crate) mod object;
pub(crate) mod set;
pub(crate) mod weak;
