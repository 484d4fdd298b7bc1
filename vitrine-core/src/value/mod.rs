//! Dynamic Value Model
//!
//! Observable state is modeled as a dynamic [`Value`]: scalars plus
//! identity-bearing container handles. A container handle pairs a shared
//! backing allocation with an `observed` flag: the flag-off form is the
//! *source* (plain access, no tracking) and the flag-on form is the
//! observable surface whose reads and writes dispatch through the
//! container's administration.
//!
//! Because both forms share one allocation, identity is stable across
//! wrapping: `source(observe(v))` refers to the same container as `v`, and
//! wrapping is idempotent.

mod data;
pub mod json;
mod key;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub use data::{
    parse_index, DateData, Integrity, ListData, MapData, ObjectData, SetData, Shared,
    WeakMapData, WeakSetData, MAX_INDEX,
};
pub(crate) use data::WeakMapEntry;
pub use key::ValueKey;

macro_rules! container_ref {
    ($(#[$doc:meta])* $name:ident, $data:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            pub(crate) data: Rc<RefCell<$data>>,
            pub(crate) observed: bool,
        }

        impl $name {
            /// Create a fresh raw container.
            pub fn new() -> Self {
                Self {
                    data: Rc::new(RefCell::new($data::default())),
                    observed: false,
                }
            }

            pub(crate) fn from_parts(data: Rc<RefCell<$data>>, observed: bool) -> Self {
                Self { data, observed }
            }

            /// Address of the backing allocation; the container's identity.
            pub fn addr(&self) -> usize {
                Rc::as_ptr(&self.data) as usize
            }

            /// Whether this handle is the observable form.
            pub fn is_observed(&self) -> bool {
                self.observed
            }

            /// The source form of this handle (same backing allocation).
            pub fn source(&self) -> Self {
                Self {
                    data: Rc::clone(&self.data),
                    observed: false,
                }
            }

            pub(crate) fn observed_form(&self) -> Self {
                Self {
                    data: Rc::clone(&self.data),
                    observed: true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Rc::ptr_eq(&self.data, &other.data) && self.observed == other.observed
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("addr", &self.addr())
                    .field("observed", &self.observed)
                    .finish()
            }
        }
    };
}

container_ref!(
    /// Handle to an object container (string-keyed, insertion-ordered).
    ObjectRef,
    ObjectData
);
container_ref!(
    /// Handle to a list container (sparse, index-keyed).
    ListRef,
    ListData
);
container_ref!(
    /// Handle to a map container.
    MapRef,
    MapData
);
container_ref!(
    /// Handle to a set container.
    SetRef,
    SetData
);
container_ref!(
    /// Handle to a weak map (container keys only, no iteration).
    WeakMapRef,
    WeakMapData
);
container_ref!(
    /// Handle to a weak set (container keys only, no iteration).
    WeakSetRef,
    WeakSetData
);
container_ref!(
    /// Handle to a date container (milliseconds since the Unix epoch).
    DateRef,
    DateData
);

/// A dynamic value: a scalar, or a handle to a shared container.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value (a missing property, a list hole).
    #[default]
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An immutable string.
    Str(Rc<str>),
    /// An object container.
    Object(ObjectRef),
    /// A list container.
    List(ListRef),
    /// A map container.
    Map(MapRef),
    /// A set container.
    Set(SetRef),
    /// A weak map container.
    WeakMap(WeakMapRef),
    /// A weak set container.
    WeakSet(WeakSetRef),
    /// A date container.
    Date(DateRef),
}

impl Value {
    /// Create a fresh raw object.
    pub fn empty_object() -> Value {
        Value::Object(ObjectRef::new())
    }

    /// Create a fresh raw list.
    pub fn empty_list() -> Value {
        Value::List(ListRef::new())
    }

    /// Create a fresh raw list populated densely from `items`.
    pub fn list_from(items: Vec<Value>) -> Value {
        let list = ListRef::new();
        {
            let mut data = list.data.borrow_mut();
            data.len = items.len() as u32;
            for (i, item) in items.into_iter().enumerate() {
                data.slots.insert(i as u32, item);
            }
        }
        Value::List(list)
    }

    /// Create a fresh raw map.
    pub fn empty_map() -> Value {
        Value::Map(MapRef::new())
    }

    /// Create a fresh raw set.
    pub fn empty_set() -> Value {
        Value::Set(SetRef::new())
    }

    /// Create a fresh raw weak map.
    pub fn empty_weak_map() -> Value {
        Value::WeakMap(WeakMapRef::new())
    }

    /// Create a fresh raw weak set.
    pub fn empty_weak_set() -> Value {
        Value::WeakSet(WeakSetRef::new())
    }

    /// Create a date from milliseconds since the Unix epoch.
    pub fn date(timestamp_ms: i64) -> Value {
        let date = DateRef::new();
        date.data.borrow_mut().timestamp_ms = timestamp_ms;
        Value::Date(date)
    }

    /// Whether this value is a container handle.
    pub fn is_container(&self) -> bool {
        self.heap_addr().is_some()
    }

    /// Identity of the backing allocation, for containers.
    pub fn heap_addr(&self) -> Option<usize> {
        match self {
            Value::Object(r) => Some(r.addr()),
            Value::List(r) => Some(r.addr()),
            Value::Map(r) => Some(r.addr()),
            Value::Set(r) => Some(r.addr()),
            Value::WeakMap(r) => Some(r.addr()),
            Value::WeakSet(r) => Some(r.addr()),
            Value::Date(r) => Some(r.addr()),
            _ => None,
        }
    }

    /// A weak handle to the backing allocation, for containers.
    pub(crate) fn weak_alive(&self) -> Option<Weak<dyn Any>> {
        fn downgrade<T: 'static>(rc: &Rc<RefCell<T>>) -> Weak<dyn Any> {
            let weak: Weak<RefCell<T>> = Rc::downgrade(rc);
            weak
        }
        match self {
            Value::Object(r) => Some(downgrade(&r.data)),
            Value::List(r) => Some(downgrade(&r.data)),
            Value::Map(r) => Some(downgrade(&r.data)),
            Value::Set(r) => Some(downgrade(&r.data)),
            Value::WeakMap(r) => Some(downgrade(&r.data)),
            Value::WeakSet(r) => Some(downgrade(&r.data)),
            Value::Date(r) => Some(downgrade(&r.data)),
            _ => None,
        }
    }

    /// Whether this value is an observable container handle.
    pub fn is_observed(&self) -> bool {
        match self {
            Value::Object(r) => r.observed,
            Value::List(r) => r.observed,
            Value::Map(r) => r.observed,
            Value::Set(r) => r.observed,
            Value::WeakMap(r) => r.observed,
            Value::WeakSet(r) => r.observed,
            Value::Date(r) => r.observed,
            _ => false,
        }
    }

    /// The source form of this value. Scalars are returned unchanged;
    /// container handles come back with the observed flag cleared, still
    /// sharing the same backing allocation.
    pub fn source(&self) -> Value {
        match self {
            Value::Object(r) => Value::Object(r.source()),
            Value::List(r) => Value::List(r.source()),
            Value::Map(r) => Value::Map(r.source()),
            Value::Set(r) => Value::Set(r.source()),
            Value::WeakMap(r) => Value::WeakMap(r.source()),
            Value::WeakSet(r) => Value::WeakSet(r.source()),
            Value::Date(r) => Value::Date(r.source()),
            other => other.clone(),
        }
    }

    /// A short name for the value's kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::WeakMap(_) => "weak map",
            Value::WeakSet(_) => "weak set",
            Value::Date(_) => "date",
        }
    }

    /// Identity comparison in the Object.is sense: NaN equals NaN, +0 and
    /// -0 differ, containers compare by backing allocation *and* form
    /// (a source handle and its observable form are different values).
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b && a.is_sign_positive() == b.is_sign_positive()
                }
            }
            _ => self.eq_non_numeric(other),
        }
    }

    /// Like [`same_value`](Value::same_value) but +0 equals -0; the
    /// equality used for collection keys.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self.eq_non_numeric(other),
        }
    }

    fn eq_non_numeric(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::WeakMap(a), Value::WeakMap(b)) => a == b,
            (Value::WeakSet(a), Value::WeakSet(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }

    /// String coercion following the native rules closely enough for
    /// default sort order: scalars render as their text form, lists join
    /// their elements with commas (holes and null-ish elements render
    /// empty), objects render as `[object Object]`.
    pub fn coerce_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Map(_) => "[object Map]".to_string(),
            Value::Set(_) => "[object Set]".to_string(),
            Value::WeakMap(_) => "[object WeakMap]".to_string(),
            Value::WeakSet(_) => "[object WeakSet]".to_string(),
            Value::Date(r) => {
                let ms = r.data.borrow().timestamp_ms;
                match chrono::DateTime::from_timestamp_millis(ms) {
                    Some(dt) => dt.to_rfc3339(),
                    None => "Invalid Date".to_string(),
                }
            }
            Value::List(r) => {
                let data = r.data.borrow();
                if data.len == 0 {
                    return String::new();
                }
                let mut out = String::new();
                let mut cursor: u32 = 0;
                for (&i, v) in &data.slots {
                    out.push_str(&",".repeat((i - cursor) as usize));
                    match v {
                        Value::Undefined | Value::Null => {}
                        other => out.push_str(&other.coerce_string()),
                    }
                    cursor = i;
                }
                out.push_str(&",".repeat((data.len - 1 - cursor) as usize));
                out
            }
        }
    }
}

/// Render a number the way the native string coercion would: integral
/// values without a fraction, NaN and infinities by name.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_shares_identity() {
        let obj = Value::empty_object();
        let src = obj.source();
        assert_eq!(obj.heap_addr(), src.heap_addr());
        assert!(!src.is_observed());
    }

    #[test]
    fn same_value_distinguishes_zero_signs() {
        let pos = Value::Number(0.0);
        let neg = Value::Number(-0.0);
        assert!(!pos.same_value(&neg));
        assert!(pos.same_value_zero(&neg));
    }

    #[test]
    fn same_value_treats_nan_as_itself() {
        let a = Value::Number(f64::NAN);
        let b = Value::Number(f64::NAN);
        assert!(a.same_value(&b));
        assert!(a.same_value_zero(&b));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::empty_list();
        let b = Value::empty_list();
        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
    }

    #[test]
    fn list_coercion_renders_holes_empty() {
        let list = Value::list_from(vec![Value::from(1), Value::Undefined, Value::from(3)]);
        assert_eq!(list.coerce_string(), "1,,3");
    }
}
