//! Serde support for durations written as `"5s"`, `"250ms"` or `"1m30s"`.
//!
//! Integers are read as nanoseconds, the way JSON configs for the
//! `layer4.handlers.check` module have always encoded them.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Text(String),
    Nanos(u64),
}

pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => humantime::parse_duration(text.trim())
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{text}': {e}"))),
        Some(Raw::Nanos(nanos)) => Ok(Some(Duration::from_nanos(nanos))),
        None => Ok(None),
    }
}
