//! Backing Stores
//!
//! The raw, unwrapped container data behind every handle. These types hold
//! plain values only: the administrations guarantee that nothing the core
//! itself wraps is ever written into a backing store (unwrap-on-write), so
//! a backing store is always a self-contained plain data structure.
//!
//! Lists are sparse by construction: a hole is simply an absent slot in the
//! `slots` tree, and `len` is free to run far ahead of the populated
//! region. Every operation on the backing store is proportional to the
//! populated slot count, never to `len`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::rc::Weak;

use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::rc::Rc;

use super::key::ValueKey;
use super::Value;

/// Integrity level of a container, mirroring the native
/// `preventExtensions` / `seal` / `freeze` ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    /// Entries may be added, removed, and rewritten.
    #[default]
    Extensible,
    /// No new entries may be added; existing entries may be rewritten or
    /// removed.
    NonExtensible,
    /// No entries may be added or removed; existing entries may be
    /// rewritten.
    Sealed,
    /// Fully immutable.
    Frozen,
}

impl Integrity {
    /// Whether existing entries may be rewritten.
    pub fn allows_write(self) -> bool {
        self != Integrity::Frozen
    }

    /// Whether new entries may be added.
    pub fn allows_add(self) -> bool {
        self == Integrity::Extensible
    }

    /// Whether entries may be removed.
    pub fn allows_remove(self) -> bool {
        matches!(self, Integrity::Extensible | Integrity::NonExtensible)
    }
}

/// Backing store for a plain object: insertion-ordered string-keyed
/// entries.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub(crate) entries: IndexMap<Rc<str>, Value>,
    pub(crate) integrity: Integrity,
}

/// The maximum valid list index: `2^32 - 2`.
pub const MAX_INDEX: u32 = u32::MAX - 1;

/// Backing store for a list. `len` follows the native array length rules
/// (at most `2^32 - 1`); `slots` holds only the populated indices; string
/// keys that are not canonical indices live in `props`.
#[derive(Debug, Default)]
pub struct ListData {
    pub(crate) len: u32,
    pub(crate) slots: BTreeMap<u32, Value>,
    pub(crate) props: IndexMap<Rc<str>, Value>,
    pub(crate) integrity: Integrity,
}

/// Backing store for a map: insertion-ordered entries keyed by logical
/// value identity (see [`ValueKey`]).
#[derive(Debug, Default)]
pub struct MapData {
    pub(crate) entries: IndexMap<ValueKey, Value>,
    pub(crate) integrity: Integrity,
}

/// Backing store for a set.
#[derive(Debug, Default)]
pub struct SetData {
    pub(crate) entries: IndexSet<ValueKey>,
    pub(crate) integrity: Integrity,
}

/// One weak-map entry: the key is held weakly (by backing-allocation
/// address plus a weak handle for liveness), the value strongly.
pub struct WeakMapEntry {
    pub(crate) alive: Weak<dyn Any>,
    pub(crate) value: Value,
}

/// Backing store for a weak map. Keys must be containers; dead keys are
/// pruned opportunistically on access.
#[derive(Default)]
pub struct WeakMapData {
    pub(crate) entries: HashMap<usize, WeakMapEntry>,
}

/// Backing store for a weak set.
#[derive(Default)]
pub struct WeakSetData {
    pub(crate) entries: HashMap<usize, Weak<dyn Any>>,
}

/// Backing store for a date: milliseconds since the Unix epoch.
#[derive(Debug, Default)]
pub struct DateData {
    pub(crate) timestamp_ms: i64,
}

/// Shared handle type for every backing store.
pub type Shared<T> = Rc<RefCell<T>>;

/// Parse a string key as a canonical list index.
///
/// A key is an index iff it is the canonical decimal representation of an
/// integer in `[0, 2^32 - 2]`. Leading zeros (`"01"`), signs (`"-1"`),
/// and out-of-range values (`"4294967295"`) are ordinary named properties.
pub fn parse_index(key: &str) -> Option<u32> {
    let bytes = key.as_bytes();
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // Canonical form: no leading zero unless the key is exactly "0".
    if bytes[0] == b'0' && bytes.len() > 1 {
        return None;
    }
    let n: u64 = key.parse().ok()?;
    if n <= MAX_INDEX as u64 {
        Some(n as u32)
    } else {
        None
    }
}
