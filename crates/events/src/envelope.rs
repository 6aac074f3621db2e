use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// Envelope for a persisted event, containing stream metadata.
///
/// This is the unit a record store appends.
///
/// Notes:
/// - **Append-only**: `sequence_number` is monotonically increasing per store.
/// - `event_type` / `event_version` are copied from the payload so readers can
///   route without deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,
    event_version: u32,

    /// Monotonically increasing position in the store.
    sequence_number: u64,
    recorded_at: DateTime<Utc>,

    payload: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap an event, copying its type metadata.
    pub fn wrap(sequence_number: u64, recorded_at: DateTime<Utc>, payload: E) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: payload.event_type().to_string(),
            event_version: payload.version(),
            sequence_number,
            recorded_at,
            payload,
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
