//! Payload encodings.
//!
//! | Mode | Envelopes per event | Topic | Payload |
//! |------|---------------------|-------|---------|
//! | `AggregateJson` | 1 | `{base}` | JSON object of the full merged state |
//! | `KeyTopics` | 1 per delta key | `{base}/{key}` | literal scalar, or JSON for lists/maps |
//!
//! Aggregate encoding is all-or-nothing: if any value cannot be encoded, no
//! envelope is produced. Key-topic envelopes are independent, so a value that
//! cannot be encoded only drops its own envelope.

use crate::envelope::PublishEnvelope;
use crate::topics::key_topic;
use meshbridge_core::{AttrMap, AttrValue, ValueError};

/// Output encoding for device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// One JSON message per event on the device's base topic
    AggregateJson,
    /// One message per changed attribute on `{base}/{key}`
    KeyTopics,
}

impl EncodingMode {
    /// Select the mode from the `publish_as_json` and `publish_as_key_topics` flags.
    ///
    /// Aggregate JSON wins when both are set. Returns `None` when neither is.
    #[must_use]
    pub fn from_flags(publish_as_json: bool, publish_as_key_topics: bool) -> Option<Self> {
        if publish_as_json {
            Some(EncodingMode::AggregateJson)
        } else if publish_as_key_topics {
            Some(EncodingMode::KeyTopics)
        } else {
            None
        }
    }

    /// Encode merged state into envelopes.
    ///
    /// `delta_keys` are the keys of the current event's delta, in delta order;
    /// only key-topic encoding uses them.
    ///
    /// # Errors
    ///
    /// In aggregate mode, returns an error if the merged state cannot be
    /// serialized. Key-topic mode never fails as a whole; failing keys are
    /// reported in [`Encoded::skipped`].
    pub fn encode<'k>(
        self,
        base_topic: &str,
        merged: &AttrMap,
        delta_keys: impl IntoIterator<Item = &'k str>,
        retain: bool,
    ) -> Result<Encoded, EncodingError> {
        match self {
            EncodingMode::AggregateJson => {
                encode_aggregate(base_topic, merged, retain).map(|envelope| Encoded {
                    envelopes: vec![envelope],
                    skipped: Vec::new(),
                })
            }
            EncodingMode::KeyTopics => Ok(encode_key_topics(base_topic, merged, delta_keys, retain)),
        }
    }
}

/// Result of encoding one event.
#[derive(Debug, Default, PartialEq)]
pub struct Encoded {
    /// Envelopes in dispatch order
    pub envelopes: Vec<PublishEnvelope>,
    /// Keys left out because their value could not be encoded
    pub skipped: Vec<SkippedKey>,
}

/// A key-topic envelope that could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedKey {
    /// Attribute key
    pub key: String,
    /// Why it was skipped
    pub error: EncodingError,
}

fn encode_aggregate(
    base_topic: &str,
    merged: &AttrMap,
    retain: bool,
) -> Result<PublishEnvelope, EncodingError> {
    let obj = merged.to_json().map_err(|source| EncodingError::Value {
        topic: base_topic.to_string(),
        source,
    })?;
    let payload = serde_json::to_string(&obj)
        .map_err(|e| EncodingError::Serialize(e.to_string()))?;
    Ok(PublishEnvelope::new(base_topic, payload, retain))
}

fn encode_key_topics<'k>(
    base_topic: &str,
    merged: &AttrMap,
    delta_keys: impl IntoIterator<Item = &'k str>,
    retain: bool,
) -> Encoded {
    let mut encoded = Encoded::default();

    for key in delta_keys {
        let Some(value) = merged.get(key) else {
            continue;
        };
        let topic = key_topic(base_topic, key);
        match literal(value) {
            Ok(payload) => encoded
                .envelopes
                .push(PublishEnvelope::new(topic, payload, retain)),
            Err(source) => encoded.skipped.push(SkippedKey {
                key: key.to_string(),
                error: EncodingError::Value { topic, source },
            }),
        }
    }

    encoded
}

/// Payload text for a single attribute value.
///
/// Text is published as-is (no JSON quoting); other scalars use their JSON
/// spelling; lists and maps are compact JSON.
///
/// # Errors
///
/// Returns an error if the value has no JSON representation.
pub fn literal(value: &AttrValue) -> Result<String, ValueError> {
    match value {
        AttrValue::Text(text) => Ok(text.clone()),
        other => Ok(other.to_json()?.to_string()),
    }
}

/// Errors producing payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodingError {
    /// A value has no representation in the selected encoding
    #[error("cannot encode payload for '{topic}': {source}")]
    Value {
        /// Topic the payload was destined for
        topic: String,
        /// Underlying value failure
        #[source]
        source: ValueError,
    },
    /// JSON serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
}
