use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bazaar_core::EventId;

use crate::event::Event;

/// Wire envelope for an event.
///
/// ```json
/// { "discriminator": "CartItemAdded", "id": "…", "occurredAt": "2026-…Z",
///   "payload": { "userId": 7, "productId": 42, "quantity": 2 } }
/// ```
///
/// Notes:
/// - `id` and `occurredAt` are assigned once, when the envelope is sealed.
/// - `payload` stays untyped until a handler for `discriminator` decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    discriminator: String,
    id: EventId,
    occurred_at: DateTime<Utc>,
    payload: JsonValue,
}

impl EventEnvelope {
    /// Wrap an event with a fresh id and the current time.
    pub fn seal<E: Event>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            discriminator: E::DISCRIMINATOR.to_string(),
            id: EventId::new(),
            occurred_at: Utc::now(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// Build from parts (tests and replays).
    pub fn from_parts(
        discriminator: impl Into<String>,
        id: EventId,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            discriminator: discriminator.into(),
            id,
            occurred_at,
            payload,
        }
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Decode the payload as `E`.
    pub fn decode<E: Event>(&self) -> Result<E, serde_json::Error> {
        E::deserialize(&self.payload)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
