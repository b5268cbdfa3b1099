//! AMQP-typed values
//!
//! The subset of the AMQP 1.0 type system needed for application
//! properties, annotations and management request/response bodies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BusError, BusResult};

/// A dynamically typed AMQP value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(String),
    Binary(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Signed view over either integer variant.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Build a map value from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

/// Typed lookups in a management body map that fail with
/// [`BusError::Malformed`] naming the missing or mistyped field.
pub trait MapExt {
    fn required(&self, field: &str) -> BusResult<&Value>;

    fn required_list(&self, field: &str) -> BusResult<&[Value]> {
        self.required(field)?
            .as_list()
            .ok_or_else(|| BusError::malformed(field, "expected a list"))
    }

    fn required_timestamp(&self, field: &str) -> BusResult<DateTime<Utc>> {
        self.required(field)?
            .as_timestamp()
            .ok_or_else(|| BusError::malformed(field, "expected a timestamp"))
    }

    fn required_binary(&self, field: &str) -> BusResult<&[u8]> {
        self.required(field)?
            .as_binary()
            .ok_or_else(|| BusError::malformed(field, "expected binary data"))
    }
}

impl MapExt for BTreeMap<String, Value> {
    fn required(&self, field: &str) -> BusResult<&Value> {
        self.get(field).ok_or_else(|| BusError::malformed(field, "missing from response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates integer accessors across both integer variants.
    ///
    /// Assertions:
    /// - Confirms `UInt(7).as_i64()` equals `Some(7)`.
    /// - Confirms `UInt(u64::MAX).as_i64()` equals `None`.
    /// - Confirms a string has no integer view.
    #[test]
    fn test_integer_accessors() {
        assert_eq!(Value::UInt(7).as_i64(), Some(7));
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::from("7").as_i64(), None);
    }

    /// Validates required-field lookups on a body map.
    ///
    /// Assertions:
    /// - Ensures a missing field yields `Malformed` naming that field.
    /// - Ensures a mistyped field yields `Malformed`.
    #[test]
    fn test_map_ext_errors() {
        let Value::Map(body) = Value::map([("expirations", Value::from("soon"))]) else {
            panic!("expected map");
        };

        match body.required("messages") {
            Err(BusError::Malformed { field, .. }) => assert_eq!(field, "messages"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(body.required_list("expirations"), Err(BusError::Malformed { .. })));
    }
}
