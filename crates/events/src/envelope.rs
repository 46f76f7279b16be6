use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::bus::{PubSubError, Topic};
use crate::handler::HandlerError;

/// JSON envelope for a message published on a topic.
///
/// Notes:
/// - `event_id` is unique per publish; redeliveries of the same publish keep it.
/// - `payload` is the message body (a job, for the pipeline's topics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    event_id: Uuid,
    topic: String,
    occurred_at: DateTime<Utc>,
    payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(topic: &Topic, payload: T) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            topic: topic.as_str().to_string(),
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> EventEnvelope<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PubSubError> {
        serde_json::to_vec(self).map_err(|e| PubSubError::Serialization(e.to_string()))
    }
}

impl<T: DeserializeOwned> EventEnvelope<T> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandlerError> {
        serde_json::from_slice(bytes).map_err(|e| HandlerError::Decode(e.to_string()))
    }
}
