//! Serde helpers for numeric fields that travel as strings.
//!
//! JSON consumers on the other side of a carrier treat block heights as
//! bigint-like values, so they are emitted as decimal strings. Both the
//! string form and a plain non-negative number are accepted on decode.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

struct U64OrString;

impl<'de> Visitor<'de> for U64OrString {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a non-negative integer or its decimal string form")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
        u64::try_from(value).map_err(|_| E::custom("negative value"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
        value.parse::<u64>().map_err(E::custom)
    }
}

pub mod u64_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(U64OrString)
    }
}

pub mod opt_u64_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }

    struct OptVisitor;

    impl<'de> Visitor<'de> for OptVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a non-negative integer, its string form, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(U64OrString).map(Some)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        deserializer.deserialize_option(OptVisitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Height {
        #[serde(with = "super::u64_string")]
        value: u64,
    }

    #[test]
    fn u64_round_trips_as_string() {
        let raw = serde_json::to_string(&Height { value: 812_345 }).unwrap();
        assert_eq!(raw, "{\"value\":\"812345\"}");
        let back: Height = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.value, 812_345);
    }

    #[test]
    fn u64_accepts_plain_number() {
        let back: Height = serde_json::from_str("{\"value\":812345}").unwrap();
        assert_eq!(back.value, 812_345);
    }

    #[test]
    fn negative_and_garbage_are_rejected() {
        assert!(serde_json::from_str::<Height>("{\"value\":-1}").is_err());
        assert!(serde_json::from_str::<Height>("{\"value\":\"12ab\"}").is_err());
    }
}
