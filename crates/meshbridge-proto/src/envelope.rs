//! Transport-agnostic publish envelopes.

use serde::{Deserialize, Serialize};

/// Options passed to the bus transport with each publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Ask the broker to retain the message
    pub retain: bool,
}

/// One topic/payload pair ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEnvelope {
    /// Bus topic, without any transport prefix
    pub topic: String,
    /// Payload text
    pub payload: String,
    /// Whether the message should be retained
    pub retained: bool,
}

impl PublishEnvelope {
    /// Create an envelope.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained,
        }
    }

    /// Transport options for this envelope.
    #[must_use]
    pub fn options(&self) -> PublishOptions {
        PublishOptions {
            retain: self.retained,
        }
    }
}
