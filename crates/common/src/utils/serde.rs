//! Serialization utilities for common data types
//!
//! Configuration files and environment overrides express durations as plain
//! millisecond integers; these helpers map them onto [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Serialize a [`Duration`] as milliseconds (u64)
///
/// ```rust
/// use std::time::Duration;
///
/// use busline_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Same as [`duration_millis`] for `Option<Duration>`; `null` maps to `None`.
pub mod option_duration_millis {
    use super::{Deserialize, Deserializer, Duration, SerializeResult, Serializer};

    /// Serialize an optional Duration as milliseconds or null
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional milliseconds into an optional Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for serialization utilities

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        #[serde(with = "duration_millis")]
        timeout: Duration,
        #[serde(with = "option_duration_millis", default)]
        grace: Option<Duration>,
    }

    /// Tests that milliseconds deserialize to Duration
    #[test]
    fn test_duration_millis_deserialize() {
        let json = r#"{"timeout":2500,"grace":null}"#;
        let data: TestStruct = serde_json::from_str(json).unwrap();

        assert_eq!(data.timeout, Duration::from_millis(2500));
        assert_eq!(data.grace, None);
    }

    /// Validates serialization of both helpers.
    ///
    /// Assertions:
    /// - Ensures the JSON carries `"timeout":1500`.
    /// - Ensures the JSON carries `"grace":20`.
    #[test]
    fn test_duration_millis_serialize() {
        let data =
            TestStruct { timeout: Duration::from_millis(1500), grace: Some(Duration::from_millis(20)) };

        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"timeout\":1500"));
        assert!(json.contains("\"grace\":20"));
    }

    /// Validates that the optional field may be omitted entirely.
    ///
    /// Assertions:
    /// - Confirms `grace` equals `None` when absent.
    #[test]
    fn test_option_duration_missing_field() {
        let data: TestStruct = serde_json::from_str(r#"{"timeout":0}"#).unwrap();
        assert_eq!(data.timeout, Duration::ZERO);
        assert_eq!(data.grace, None);
    }
}
