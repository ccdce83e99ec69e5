use serde_json::{Map, Number};
use std::collections::BTreeMap;

/// A loosely-typed document tree produced by the binary decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(key),
            _ => None,
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(value),
            Value::Int(value) => serde_json::Value::Number(Number::from(value)),
            Value::Float(value) => Number::from_f64(value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(*value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(value) => Value::String(value.clone()),
            serde_json::Value::Array(items) => Value::Array(items.iter().map(Into::into).collect()),
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.into()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_tree_into_json() {
        let value = Value::Map(BTreeMap::from([
            ("a".to_string(), Value::Int(-3)),
            (
                "b".to_string(),
                Value::Array(vec![Value::Bool(true), Value::Null, Value::Float(1.5)]),
            ),
            ("c".to_string(), Value::String("x".to_string())),
        ]));

        let json: serde_json::Value = value.into();
        assert_eq!(json, json!({"a": -3, "b": [true, null, 1.5], "c": "x"}));
    }

    #[test]
    fn json_round_trips_through_the_tree() {
        let json = json!({"id": "x", "n": [1, -2, 2.5], "ok": false, "none": null});
        let tree = Value::from(&json);

        assert_eq!(tree.get("id").and_then(Value::as_str), Some("x"));
        assert_eq!(serde_json::Value::from(tree), json);
    }

    #[test]
    fn non_finite_float_becomes_null() {
        let json: serde_json::Value = Value::Float(f64::NAN).into();
        assert!(json.is_null());
    }
}
