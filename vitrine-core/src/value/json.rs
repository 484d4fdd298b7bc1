//! JSON Bridge
//!
//! Conversions between [`Value`] trees and `serde_json::Value`, used by
//! outer layers to seed state from configuration and to take snapshots.
//! Conversion reads the backing stores directly (untracked) and covers the
//! JSON-like subset: objects, lists, scalars, and dates (as epoch
//! milliseconds). Maps, sets, and weak collections have no JSON form.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value as Json;

use crate::error::StateError;

use super::{ObjectRef, Value};

/// Build a raw (non-observable) value tree from JSON.
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::Str(Rc::from(s.as_str())),
        Json::Array(items) => Value::list_from(items.iter().map(from_json).collect()),
        Json::Object(fields) => {
            let obj = ObjectRef::new();
            {
                let mut data = obj.data.borrow_mut();
                for (k, v) in fields {
                    data.entries.insert(Rc::from(k.as_str()), from_json(v));
                }
            }
            Value::Object(obj)
        }
    }
}

/// Serialize a value tree to JSON.
///
/// `Undefined` renders as `null` (as it would under native JSON
/// stringification inside arrays); non-finite numbers render as `null`;
/// dates render as epoch milliseconds. Cycles and non-JSON containers
/// error.
pub fn to_json(value: &Value) -> Result<Json, StateError> {
    let mut visiting = HashSet::new();
    convert(value, &mut visiting)
}

fn convert(value: &Value, visiting: &mut HashSet<usize>) -> Result<Json, StateError> {
    match value {
        Value::Undefined | Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Number(n) => Ok(serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .unwrap_or(Json::Null)),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::Date(r) => Ok(Json::Number(r.data.borrow().timestamp_ms.into())),
        Value::Object(r) => {
            enter(r.addr(), visiting)?;
            let mut out = serde_json::Map::new();
            // Snapshot entries so nested conversion can re-borrow.
            let entries: Vec<_> = r
                .data
                .borrow()
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, v) in entries {
                out.insert(k.to_string(), convert(&v, visiting)?);
            }
            visiting.remove(&r.addr());
            Ok(Json::Object(out))
        }
        Value::List(r) => {
            enter(r.addr(), visiting)?;
            let (len, slots) = {
                let data = r.data.borrow();
                (
                    data.len,
                    data.slots
                        .iter()
                        .map(|(i, v)| (*i, v.clone()))
                        .collect::<Vec<_>>(),
                )
            };
            let mut out = vec![Json::Null; len as usize];
            for (i, v) in slots {
                out[i as usize] = convert(&v, visiting)?;
            }
            visiting.remove(&r.addr());
            Ok(Json::Array(out))
        }
        other => Err(StateError::NonJson {
            kind: other.kind_name(),
        }),
    }
}

fn enter(addr: usize, visiting: &mut HashSet<usize>) -> Result<(), StateError> {
    if !visiting.insert(addr) {
        return Err(StateError::CircularReference {
            path: String::from("<json>"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_json_trees() {
        let json = serde_json::json!({"a": 1.0, "b": [true, null, "x"]});
        let value = from_json(&json);
        let back = to_json(&value).unwrap();
        assert_eq!(json, back);
    }

    #[test]
    fn undefined_serializes_as_null() {
        let list = Value::list_from(vec![Value::from(1), Value::Undefined]);
        let json = to_json(&list).unwrap();
        assert_eq!(json, serde_json::json!([1.0, null]));
    }

    #[test]
    fn non_json_containers_error() {
        let map = Value::empty_map();
        assert!(matches!(to_json(&map), Err(StateError::NonJson { .. })));
    }
}
