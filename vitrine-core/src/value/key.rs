//! Collection Keys
//!
//! Maps and sets key their entries by *logical identity*: a raw container
//! and its observable form are the same key, scalars compare by
//! SameValueZero (NaN equals NaN, +0 equals -0). The wrapper preserves the
//! exact `Value` that was first stored, so iteration hands back the stored
//! form while lookups succeed through either form.

use std::hash::{Hash, Hasher};

use super::Value;

/// A map/set key: a `Value` hashed and compared by logical identity.
#[derive(Debug, Clone)]
pub struct ValueKey(pub(crate) Value);

impl ValueKey {
    /// Wrap a value for use as a collection key.
    pub fn new(value: Value) -> Self {
        ValueKey(value)
    }

    /// The stored key form (raw or observable, as first inserted).
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            // Containers are the same key iff they share a backing
            // allocation, regardless of which form refers to it.
            (a, b) if a.heap_addr().is_some() => a.heap_addr() == b.heap_addr(),
            (a, b) => a.same_value_zero(b),
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Undefined => state.write_u8(0),
            Value::Null => state.write_u8(1),
            Value::Bool(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            Value::Number(n) => {
                state.write_u8(3);
                // SameValueZero: -0 hashes like +0, every NaN hashes alike.
                let canonical = if *n == 0.0 {
                    0.0f64
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                state.write_u64(canonical.to_bits());
            }
            Value::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            other => {
                state.write_u8(5);
                // All container kinds hash by backing-allocation address.
                state.write_usize(other.heap_addr().unwrap_or(0));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn scalar_keys_use_same_value_zero() {
        let mut set = HashSet::new();
        set.insert(ValueKey::new(Value::Number(0.0)));
        assert!(set.contains(&ValueKey::new(Value::Number(-0.0))));

        set.insert(ValueKey::new(Value::Number(f64::NAN)));
        assert!(set.contains(&ValueKey::new(Value::Number(f64::NAN))));
    }

    #[test]
    fn string_keys_compare_by_content() {
        let mut set = HashSet::new();
        set.insert(ValueKey::new(Value::from("hello")));
        assert!(set.contains(&ValueKey::new(Value::from(String::from("hello")))));
        assert!(!set.contains(&ValueKey::new(Value::from("world"))));
    }

    #[test]
    fn container_keys_compare_by_backing_allocation() {
        let a = Value::empty_object();
        let b = Value::empty_object();

        let mut set = HashSet::new();
        set.insert(ValueKey::new(a.clone()));
        assert!(set.contains(&ValueKey::new(a)));
        assert!(!set.contains(&ValueKey::new(b)));
    }
}
