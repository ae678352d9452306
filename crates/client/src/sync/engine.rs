//! Reconciliation engine: one deduplicated, ordered log from two channels.
//!
//! Push events arrive over the bus as they happen; pull batches arrive from
//! the events endpoint on resync. Both may redeliver the same logical event,
//! so every append goes through an id seen-set, and the pull cursor only ever
//! advances. The engine does not retry failed pulls; callers (and the poll
//! fallback) decide when to try again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use parlor_protocol::{EventBatch, EventEnvelope, PlayerId};

use crate::api::{ApiError, EventsApi};
use crate::messaging::{topics, EventBus};

struct EngineState {
    log: Vec<EventEnvelope>,
    seen: HashSet<String>,
    cursor: Option<i64>,
    /// Epoch bumped by reset and full resync; in-flight pulls from an older
    /// epoch are discarded instead of repopulating a log the consumer just
    /// observed as cleared.
    generation: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            log: Vec::new(),
            seen: HashSet::new(),
            cursor: None,
            generation: 0,
        }
    }

    fn advance_cursor(&mut self, observed: Option<i64>) {
        if let Some(ts) = observed {
            self.cursor = Some(self.cursor.map_or(ts, |current| current.max(ts)));
        }
    }
}

/// Merges push and pull channels into a single consumer-visible event log.
///
/// Owns the cursor and seen-set exclusively; consumers read through
/// [`events`](Self::events)/[`cursor`](Self::cursor) or the `log:*` bus
/// topics.
pub struct ReconciliationEngine {
    api: Arc<dyn EventsApi>,
    bus: EventBus,
    state: Mutex<EngineState>,
    player_id: Mutex<Option<PlayerId>>,
    pull_limit: u32,
}

impl ReconciliationEngine {
    pub fn new(api: Arc<dyn EventsApi>, bus: EventBus, pull_limit: u32) -> Self {
        Self {
            api,
            bus,
            state: Mutex::new(EngineState::new()),
            player_id: Mutex::new(None),
            pull_limit,
        }
    }

    /// Append one envelope unless its id was already applied.
    ///
    /// Idempotent: re-applying an id is a no-op regardless of payload, so the
    /// push and pull channels can freely redeliver each other's events.
    pub fn apply(&self, envelope: EventEnvelope) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if !state.seen.insert(envelope.id.clone()) {
                return false;
            }
            state.log.push(envelope.clone());
        }
        self.forward(&envelope);
        true
    }

    /// Normalize and apply a push payload from the live connection.
    ///
    /// Payloads missing an id get a client-local one so they still append
    /// exactly once; payloads missing a timestamp are stamped with receipt
    /// time. Both stay advisory for display only.
    pub fn apply_push(&self, payload: Value) {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let event_type = payload
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("event")
            .to_owned();
        let ts = payload
            .get("ts")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        self.apply(EventEnvelope {
            id,
            event_type,
            payload,
            ts,
        });
    }

    /// Replace the log with a fresh snapshot from the pull channel.
    ///
    /// Returns the new log length. On failure the previous log, seen-set and
    /// cursor are untouched.
    pub async fn full_resync(&self) -> Result<usize, ApiError> {
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.generation += 1;
            state.generation
        };
        let player_id = self.current_player_id();

        let batch = self
            .api
            .list_events(None, Some(self.pull_limit), player_id)
            .await?;

        let count = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.generation != generation {
                tracing::debug!("discarding snapshot from a superseded resync");
                return Ok(0);
            }
            state.seen = batch.events.iter().map(|e| e.id.clone()).collect();
            // Snapshot semantics: the cursor is set, not advanced; an empty
            // batch keeps the prior cursor.
            state.cursor = batch.high_water_mark().or(state.cursor);
            state.log = batch.events;
            state.log.len()
        };

        self.bus.emit(topics::LOG_RESET, json!({ "count": count }));
        tracing::info!(count, "full resync applied");
        Ok(count)
    }

    /// Pull everything after the cursor and apply it.
    ///
    /// Returns how many events were new. Idempotent against anything already
    /// pushed live; the cursor never moves backwards.
    pub async fn incremental_resync(&self) -> Result<usize, ApiError> {
        let (generation, since_ts) = {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            (state.generation, state.cursor)
        };
        let player_id = self.current_player_id();

        let batch = self
            .api
            .list_events(since_ts, Some(self.pull_limit), player_id)
            .await?;

        let appended = self.merge_batch(generation, batch);
        for envelope in &appended {
            self.forward(envelope);
        }
        tracing::debug!(applied = appended.len(), "incremental resync applied");
        Ok(appended.len())
    }

    /// Clear all reconciliation state and bind a (possibly absent) identity.
    ///
    /// Used when switching player or session: the log empties, the seen-set
    /// empties, the cursor returns to null, and in-flight pulls from before
    /// the reset are discarded.
    pub fn reset(&self, identity: Option<PlayerId>) {
        *self.player_id.lock().unwrap_or_else(|p| p.into_inner()) = identity;
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.log.clear();
            state.seen.clear();
            state.cursor = None;
            state.generation += 1;
        }
        self.bus.emit(topics::LOG_RESET, json!({ "count": 0 }));
    }

    /// Bind an identity without clearing state unless it actually changed
    /// from a previously bound one.
    pub fn bind_identity(&self, identity: Option<PlayerId>) {
        let had_different_identity = {
            let mut slot = self.player_id.lock().unwrap_or_else(|p| p.into_inner());
            if *slot == identity {
                return;
            }
            let switching = slot.is_some();
            *slot = identity.clone();
            switching
        };
        if had_different_identity {
            self.reset(identity);
        }
    }

    /// Snapshot of the merged log, in applied order.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .log
            .clone()
    }

    /// The pull cursor; null until the first successful pull.
    pub fn cursor(&self) -> Option<i64> {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).cursor
    }

    fn current_player_id(&self) -> Option<PlayerId> {
        self.player_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Merge a pulled batch under one lock, returning what was actually new.
    fn merge_batch(&self, generation: u64, batch: EventBatch) -> Vec<EventEnvelope> {
        let high_water_mark = batch.high_water_mark();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.generation != generation {
            tracing::debug!("discarding delta from a superseded resync");
            return Vec::new();
        }

        let mut appended = Vec::new();
        for envelope in batch.events {
            if state.seen.insert(envelope.id.clone()) {
                state.log.push(envelope.clone());
                appended.push(envelope);
            }
        }
        state.advance_cursor(high_water_mark);
        appended
    }

    fn forward(&self, envelope: &EventEnvelope) {
        let payload = serde_json::to_value(envelope).unwrap_or(Value::Null);
        self.bus.emit(topics::LOG_EVENT, payload);
    }
}
