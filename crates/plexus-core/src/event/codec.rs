//! Wire encoding for events crossing a process boundary.
//!
//! Events travel as JSON documents; the opaque payload is carried as a
//! standard base64 string.
use crate::event::Event;
use crate::event::error::Result;

/// Encode an event for a transport frame.
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Decode an event received from a transport frame.
pub fn decode_event(bytes: &[u8]) -> Result<Event> {
    Ok(serde_json::from_slice(bytes)?)
}

/// `#[serde(with = "...")]` adapter storing `Vec<u8>` as base64 text.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
