//! Queue message
//!
//! A message as handed over by a `QueueDriver`: backend id, delivery
//! counter, timestamps and the decoded JSON payload.

use crate::error::ConsumerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded message payload (a JSON object)
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A message fetched from a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Backend-assigned id, used for deletion
    pub msg_id: i64,

    /// Number of times this message has been delivered
    pub read_ct: i64,

    /// When the message was enqueued
    pub enqueued_at: DateTime<Utc>,

    /// When the message becomes visible again
    pub vt: DateTime<Utc>,

    /// The payload
    pub message: Payload,
}

impl Message {
    /// Create a message that was just delivered for the first time
    pub fn new(msg_id: i64, message: Payload) -> Self {
        let now = Utc::now();
        Self {
            msg_id,
            read_ct: 1,
            enqueued_at: now,
            vt: now,
            message,
        }
    }

    /// Set the delivery count
    pub fn with_read_ct(mut self, read_ct: i64) -> Self {
        self.read_ct = read_ct;
        self
    }

    /// Whether the delivery count is past the given retry threshold
    pub fn exceeded_retries(&self, retries: i64) -> bool {
        self.read_ct > retries
    }
}

/// Build a payload from a JSON value, rejecting anything but objects
pub fn payload_from_value(value: serde_json::Value) -> Result<Payload, ConsumerError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ConsumerError::Serialization(format!(
            "payload must be a JSON object, got {}",
            other
        ))),
    }
}
