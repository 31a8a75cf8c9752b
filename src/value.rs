//! The value tree held by a form.
//!
//! Containers are reference counted so that copy-on-write updates share every
//! subtree they do not touch. [`FormValue::same`] exposes that sharing as an
//! identity check, while `==` compares structurally.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::error::{FormError, FormResult};

pub type FormMap = IndexMap<String, FormValue>;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum FormValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    List(Arc<Vec<FormValue>>),
    Map(Arc<FormMap>),
}

impl FormValue {
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FormValue>,
    {
        Self::Map(Arc::new(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }

    pub fn list<V>(items: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<FormValue>,
    {
        Self::List(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    pub fn from_serialize<T: Serialize>(value: &T) -> FormResult<Self> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|error| FormError::Conversion(error.to_string()))
    }

    pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> FormResult<T> {
        serde_json::from_value(self.to_json())
            .map_err(|error| FormError::Conversion(error.to_string()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(value) => value.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FormValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FormMap> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Null, `false`, zero and the empty string count as blank input.
    /// Containers never do.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(value) => !value,
            Self::Number(value) => value.as_f64() == Some(0.0),
            Self::String(value) => value.is_empty(),
            Self::List(_) | Self::Map(_) => false,
        }
    }

    /// Identity comparison: scalars by value, containers by reference.
    pub fn same(&self, other: &FormValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            (Self::List(left), Self::List(right)) => Arc::ptr_eq(left, right),
            (Self::Map(left), Self::Map(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::Number(value) => Value::Number(value.clone()),
            Self::String(value) => Value::String(value.to_string()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// One level of structural comparison: lists index-wise and maps key-wise,
/// with each element compared by [`FormValue::same`].
pub fn shallow_equal(left: &FormValue, right: &FormValue) -> bool {
    if left.same(right) {
        return true;
    }
    match (left, right) {
        (FormValue::List(left), FormValue::List(right)) => {
            left.len() == right.len() && left.iter().zip(right.iter()).all(|(l, r)| l.same(r))
        }
        (FormValue::Map(left), FormValue::Map(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| value.same(other)))
        }
        _ => false,
    }
}

impl Display for FormValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<Value> for FormValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(value.into()),
            Value::Array(items) => Self::List(Arc::new(items.into_iter().map(Self::from).collect())),
            Value::Object(entries) => Self::Map(Arc::new(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            )),
        }
    }
}

impl From<bool> for FormValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        Self::String(value.into())
    }
}

impl From<i32> for FormValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for FormValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for FormValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for FormValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl<V: Into<FormValue>> From<Option<V>> for FormValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<FormValue>> for FormValue {
    fn from(items: Vec<FormValue>) -> Self {
        Self::List(Arc::new(items))
    }
}

impl From<FormMap> for FormValue {
    fn from(entries: FormMap) -> Self {
        Self::Map(Arc::new(entries))
    }
}

impl Serialize for FormValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FormValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_compares_containers_by_reference() {
        let list = FormValue::from(json!([1, 2]));
        let shared = list.clone();
        let rebuilt = FormValue::from(json!([1, 2]));

        assert!(list.same(&shared));
        assert!(!list.same(&rebuilt));
        assert_eq!(list, rebuilt);
        assert!(FormValue::from("a").same(&FormValue::from("a")));
    }

    #[test]
    fn shallow_equal_looks_one_level_deep() {
        let inner = FormValue::from(json!({ "x": 1 }));
        let left = FormValue::list([inner.clone(), 2.into()]);
        let right = FormValue::list([inner, 2.into()]);
        assert!(shallow_equal(&left, &right));

        let deep_left = FormValue::from(json!([{ "x": 1 }]));
        let deep_right = FormValue::from(json!([{ "x": 1 }]));
        assert!(!shallow_equal(&deep_left, &deep_right));

        let map_left = FormValue::from(json!({ "a": 1, "b": "two" }));
        let map_right = FormValue::from(json!({ "b": "two", "a": 1 }));
        assert!(shallow_equal(&map_left, &map_right));
        assert!(!shallow_equal(&map_left, &FormValue::from(json!({ "a": 1 }))));
    }

    #[test]
    fn blank_values_match_empty_input() {
        assert!(FormValue::Null.is_blank());
        assert!(FormValue::from("").is_blank());
        assert!(FormValue::from(0).is_blank());
        assert!(!FormValue::from("x").is_blank());
        assert!(!FormValue::from(json!([])).is_blank());
    }

    #[test]
    fn serde_bridge_preserves_key_order() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Profile {
            name: String,
            age: u32,
        }

        let value = FormValue::from_serialize(&Profile {
            name: "Ada".into(),
            age: 36,
        })
        .expect("serialize profile");
        let keys = value
            .as_map()
            .expect("profile is a map")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(keys.len(), 2);

        let back: Profile = value.deserialize_into().expect("deserialize profile");
        assert_eq!(back.age, 36);
    }
}
