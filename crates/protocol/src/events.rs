//! Event DTOs shared by the push and pull channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The normalized unit of realtime information.
///
/// `id` is globally unique within a session's lifetime: two envelopes with the
/// same id denote the same logical event. `ts` is advisory (client-receipt or
/// server time, whichever stamped it) and is only suitable for ordering and
/// display, never for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub ts: i64,
}

/// Response body of `GET /events`.
///
/// `latest_ts` is the server's authoritative high-water mark; when absent the
/// client falls back to the largest `ts` in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub events: Vec<EventEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ts: Option<i64>,
}

impl EventBatch {
    /// Largest event timestamp carried by the batch, preferring the server's
    /// explicit `latest_ts` when present.
    pub fn high_water_mark(&self) -> Option<i64> {
        self.latest_ts
            .or_else(|| self.events.iter().map(|e| e.ts).max())
    }
}
