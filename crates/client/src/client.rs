//! Composition root: wires the bus, the connection manager, the pull adapter
//! and the reconciliation engine into one owned client instance.
//!
//! There is deliberately no process-wide instance hiding in module state;
//! callers own the `SyncClient` and its lifecycle. Nothing is torn down
//! implicitly - call [`SyncClient::shutdown`] when done.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;

use parlor_protocol::{Envelope, EventEnvelope, PlayerId};

use crate::api::{ApiError, HttpEventsApi};
use crate::config::ClientConfig;
use crate::messaging::{topics, EventBus, Subscription};
use crate::sync::ReconciliationEngine;
use crate::websocket::{ConnectionManager, ConnectionStatus};

/// Realtime synchronization client for a live party session.
///
/// One instance per logical session. Must be created within a tokio runtime:
/// construction spawns the poll-fallback task, and the first
/// [`connect`](Self::connect) spawns the connection supervisor.
pub struct SyncClient {
    bus: EventBus,
    connection: ConnectionManager,
    engine: Arc<ReconciliationEngine>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        let bus = EventBus::new();
        let connection = ConnectionManager::new(config.ws_url.clone(), bus.clone());
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(HttpEventsApi::new(config.api_base.clone())),
            bus.clone(),
            config.pull_limit,
        ));

        // Push channel: every generic event feeds the merged log.
        let push_engine = Arc::clone(&engine);
        bus.on(topics::EVENT, move |payload| {
            push_engine.apply_push(payload);
        });

        // A reconnect leaves a gap the live connection cannot replay; close
        // it from the pull channel.
        let resync_engine = Arc::clone(&engine);
        bus.on(topics::RECONNECT, move |_| {
            let engine = Arc::clone(&resync_engine);
            tokio::spawn(async move {
                if let Err(e) = engine.incremental_resync().await {
                    tracing::warn!("post-reconnect resync failed: {}", e);
                }
            });
        });

        // Poll fallback while the connection is down. Failures here are
        // expected (the server may be the thing that is down) and only
        // logged; the next tick tries again.
        let poll_connection = connection.clone();
        let poll_engine = Arc::clone(&engine);
        let poll_interval = config.poll_interval;
        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if poll_connection.status().reconnecting {
                    if let Err(e) = poll_engine.incremental_resync().await {
                        tracing::debug!("poll fallback resync failed: {}", e);
                    }
                }
            }
        });

        Self {
            bus,
            connection,
            engine,
            poll_task: Mutex::new(Some(poll_task)),
        }
    }

    /// Connect to the session server, identifying as `identity` if supplied.
    ///
    /// Resolves once the socket is open and identify has been queued. On the
    /// first attach for an identity (cursor still null) a snapshot fetch is
    /// started in the background; callers that need its error surface call
    /// [`full_resync`](Self::full_resync) themselves.
    pub async fn connect(&self, identity: Option<PlayerId>) {
        self.engine.bind_identity(identity.clone());
        self.connection.connect(identity).await;

        if self.engine.cursor().is_none() {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                if let Err(e) = engine.full_resync().await {
                    tracing::warn!("initial snapshot fetch failed: {}", e);
                }
            });
        }
    }

    /// Subscribe to a bus topic (see [`crate::messaging::topics`]).
    pub fn on(
        &self,
        topic: impl Into<String>,
        handler: impl FnMut(Value) + Send + 'static,
    ) -> Subscription {
        self.bus.on(topic, handler)
    }

    /// Best-effort send over the live connection; false when it is down.
    pub fn send(&self, message: Envelope) -> bool {
        self.connection.send(message)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Snapshot of the merged, deduplicated event log.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.engine.events()
    }

    /// On-demand incremental resync; returns how many events were new.
    pub async fn resync(&self) -> Result<usize, ApiError> {
        self.engine.incremental_resync().await
    }

    /// On-demand snapshot resync, replacing the merged log.
    pub async fn full_resync(&self) -> Result<usize, ApiError> {
        self.engine.full_resync().await
    }

    /// Switch identity (or drop to anonymous): clears the merged log, the
    /// seen-set and the cursor, re-identifies on the live connection, and
    /// repopulates from a fresh snapshot.
    pub async fn reset(&self, identity: Option<PlayerId>) -> Result<usize, ApiError> {
        self.engine.reset(identity.clone());
        if identity.is_some() {
            self.connection.connect(identity).await;
        }
        self.engine.full_resync().await
    }

    /// Tear down the connection, the retry loop and the poll fallback.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .poll_task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            task.abort();
        }
        self.connection.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unroutable() -> ClientConfig {
        ClientConfig {
            ws_url: "ws://127.0.0.1:9".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn pushed_events_flow_into_the_merged_log() {
        let client = SyncClient::new(unroutable());

        client
            .bus
            .emit(topics::EVENT, json!({ "id": "e1", "kind": "clue_found", "ts": 1 }));
        client
            .bus
            .emit(topics::EVENT, json!({ "id": "e1", "kind": "clue_found", "ts": 1 }));

        let log = client.events();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, "clue_found");

        client.shutdown();
    }

    #[tokio::test]
    async fn status_reads_are_safe_before_connect() {
        let client = SyncClient::new(unroutable());

        assert!(!client.is_connected());
        assert_eq!(client.status(), ConnectionStatus::disconnected());
        assert!(!client.send(Envelope::new("event", Value::Null)));

        client.shutdown();
    }
}
