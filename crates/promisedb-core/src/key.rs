//! Record keys
//!
//! A key is a number, a string, or an array of keys. Keys order the way the
//! engine orders them: every number sorts before every string, every string
//! before every array. Strings compare by UTF-16 code units and arrays
//! compare element by element.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{ErrorKind, NativeError};

/// Message the engine reports for values that are not valid keys.
pub const INVALID_KEY_MESSAGE: &str = "Data provided to an operation does not meet requirements.";

/// A valid engine key.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Validate a value as a key. Anything other than a number, a string or
    /// an array of keys is a `DataError`.
    pub fn from_value(value: &Value) -> Result<Key, NativeError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Key::Number)
                .ok_or_else(invalid_key),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Key::Array),
            _ => Err(invalid_key()),
        }
    }

    /// Convert back to a JSON value. Integral numbers come back as integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    Value::from(*n as i64)
                } else {
                    Value::from(*n)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Evaluate a key path against a record. Dotted paths walk nested
    /// objects; the empty path selects the record itself.
    pub fn extract<'a>(record: &'a Value, key_path: &str) -> Option<&'a Value> {
        if key_path.is_empty() {
            return Some(record);
        }
        key_path
            .split('.')
            .try_fold(record, |current, segment| current.as_object()?.get(segment))
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

fn invalid_key() -> NativeError {
    NativeError::new(ErrorKind::Data, INVALID_KEY_MESSAGE)
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Key::String(a), Key::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Array(a), Key::Array(b)) => a.iter().cmp(b.iter()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        key.to_value()
    }
}

impl TryFrom<Value> for Key {
    type Error = NativeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Key::from_value(&value)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n.into())
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n.into())
    }
}

/// Keys passed to `remove`: one key, or a batch deleted in one transaction.
///
/// A JSON array converts to [`Keys::Batch`], anything else to
/// [`Keys::Single`]. Array-valued compound keys therefore need
/// `Keys::Single` spelled out.
#[derive(Debug, Clone, PartialEq)]
pub enum Keys {
    Single(Value),
    Batch(Vec<Value>),
}

impl From<Value> for Keys {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Keys::Batch(items),
            other => Keys::Single(other),
        }
    }
}

impl From<Key> for Keys {
    fn from(key: Key) -> Self {
        Keys::Single(key.to_value())
    }
}

impl From<&str> for Keys {
    fn from(s: &str) -> Self {
        Keys::Single(Value::from(s))
    }
}

impl From<String> for Keys {
    fn from(s: String) -> Self {
        Keys::Single(Value::from(s))
    }
}

impl From<i64> for Keys {
    fn from(n: i64) -> Self {
        Keys::Single(Value::from(n))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Keys {
    fn from(items: Vec<T>) -> Self {
        Keys::Batch(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_valid_keys() {
        assert_eq!(Key::from_value(&json!(7)).unwrap(), Key::Number(7.0));
        assert_eq!(Key::from_value(&json!("a")).unwrap(), Key::from("a"));
        assert_eq!(
            Key::from_value(&json!([1, "b"])).unwrap(),
            Key::Array(vec![Key::Number(1.0), Key::from("b")])
        );
    }

    #[test]
    fn test_invalid_keys() {
        for value in [json!(null), json!(true), json!({"a": 1}), json!([1, {}])] {
            let err = Key::from_value(&value).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Data);
            assert_eq!(err.message, INVALID_KEY_MESSAGE);
        }
    }

    #[test]
    fn test_ordering_across_types() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::from("b"),
            Key::Number(10.0),
            Key::from("a"),
            Key::Number(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Number(-1.0),
                Key::Number(10.0),
                Key::from("a"),
                Key::from("b"),
                Key::Array(vec![]),
            ]
        );
    }

    #[test]
    fn test_string_order_is_utf16() {
        // U+FF5E encodes above a surrogate pair in UTF-16 but below it in UTF-8
        let bmp = Key::from("\u{FF5E}");
        let astral = Key::from("\u{1F600}");
        assert!(astral < bmp);
    }

    #[test]
    fn test_to_value_keeps_integers() {
        assert_eq!(Key::Number(1.0).to_value(), json!(1));
        assert_eq!(Key::Number(1.5).to_value(), json!(1.5));
        assert_eq!(Key::from("1").to_value(), json!("1"));
    }

    #[test]
    fn test_extract_key_path() {
        let record = json!({"id": "1", "meta": {"owner": "ALICE"}});
        assert_eq!(Key::extract(&record, "id"), Some(&json!("1")));
        assert_eq!(Key::extract(&record, "meta.owner"), Some(&json!("ALICE")));
        assert_eq!(Key::extract(&record, "missing"), None);
        assert_eq!(Key::extract(&record, "id.deeper"), None);
        assert_eq!(Key::extract(&json!(5), ""), Some(&json!(5)));
    }

    #[test]
    fn test_keys_from_value() {
        assert_eq!(Keys::from(json!("7")), Keys::Single(json!("7")));
        assert_eq!(
            Keys::from(json!(["1", "2"])),
            Keys::Batch(vec![json!("1"), json!("2")])
        );
        assert_eq!(Keys::from(vec!["1", "2"]), Keys::Batch(vec![json!("1"), json!("2")]));
    }
}
