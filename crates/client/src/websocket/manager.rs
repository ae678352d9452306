//! Connection manager: owns the single live socket and its retry loop.
//!
//! A supervisor task drives connect → read-until-close → backoff-sleep
//! forever. All transport failure is absorbed here and expressed through the
//! status stream; callers never see a transport error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use parlor_protocol::{Envelope, PlayerId, RoutedFrame};

use crate::backoff;
use crate::messaging::{topics, EventBus};

use super::status::ConnectionStatus;

/// Outbound frames queued per session before the writer applies backpressure.
const OUTBOUND_QUEUE: usize = 32;

type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the single socket to the session server.
///
/// Cheap to clone and share; clones observe and drive the same connection.
/// All mutable state is only written by the supervisor task.
#[derive(Clone)]
pub struct ConnectionManager {
    url: String,
    bus: EventBus,
    identity: Arc<Mutex<Option<PlayerId>>>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    writer: Arc<Mutex<Option<mpsc::Sender<Envelope>>>>,
    started: Arc<AtomicBool>,
    ever_opened: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectionManager {
    /// Create a manager for `url`, publishing on `bus`.
    ///
    /// No socket is opened until the first [`connect`](Self::connect); the
    /// fully-disconnected status is observable immediately.
    pub fn new(url: impl Into<String>, bus: EventBus) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::disconnected());
        let manager = Self {
            url: url.into(),
            bus,
            identity: Arc::new(Mutex::new(None)),
            status_tx: Arc::new(status_tx),
            writer: Arc::new(Mutex::new(None)),
            started: Arc::new(AtomicBool::new(false)),
            ever_opened: Arc::new(AtomicBool::new(false)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            supervisor: Arc::new(Mutex::new(None)),
        };
        manager
            .bus
            .emit_retained(topics::STATUS, status_payload(manager.status()));
        manager
    }

    /// Connect, resolving once the socket is open and the identify handshake
    /// (if an identity is known) has been queued.
    ///
    /// Safe to call repeatedly: while a connection attempt is in flight or a
    /// socket is open this never opens a second one. Supplying a new identity
    /// to an open connection re-sends identify on the spot.
    pub async fn connect(&self, identity: Option<PlayerId>) {
        if let Some(id) = identity {
            let changed = {
                let mut slot = self.identity.lock().unwrap_or_else(|p| p.into_inner());
                if slot.as_ref() == Some(&id) {
                    false
                } else {
                    *slot = Some(id.clone());
                    true
                }
            };
            if changed && self.is_connected() && !self.send(Envelope::identify(&id)) {
                tracing::debug!("identify re-send raced a connection drop");
            }
        }

        self.ensure_supervisor();

        let mut status_rx = self.status_tx.subscribe();
        while !status_rx.borrow_and_update().connected {
            if status_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Current status; pure read, valid before the first connect.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().connected
    }

    /// Queue a frame for sending. Best-effort: returns false without blocking
    /// when there is no live connection or the outbound queue is full.
    pub fn send(&self, message: Envelope) -> bool {
        let writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        match writer.as_ref() {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Tear down the connection and stop retrying.
    ///
    /// This is owned-lifecycle teardown (tests, embedding); the retry loop
    /// itself never gives up on its own.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        *self.writer.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.publish_status(ConnectionStatus::disconnected());
    }

    fn ensure_supervisor(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run().await });
        *self.supervisor.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Supervisor loop: one iteration per socket lifetime.
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.url, "connected");
                    attempt = 0;
                    self.session(stream).await;
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, "connection attempt failed: {}", e);
                }
            }

            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            self.publish_status(ConnectionStatus::reconnecting(attempt));
            self.bus.emit(topics::CLOSE, Value::Null);
            let delay = backoff::delay_for_attempt(attempt);
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            tokio::time::sleep(delay).await;
            attempt = (attempt + 1).min(backoff::max_attempt_index());
        }
    }

    /// Drive one open socket until it closes.
    async fn session(&self, stream: SocketStream) {
        let (mut write, mut read) = stream.split();

        let (tx, mut rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
        *self.writer.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);

        let reconnection = self.ever_opened.swap(true, Ordering::SeqCst);
        self.publish_status(ConnectionStatus::open());
        self.bus.emit(topics::OPEN, Value::Null);

        let identity = self
            .identity
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(id) = identity {
            if !self.send(Envelope::identify(&id)) {
                tracing::warn!("failed to queue identify frame");
            }
        }
        if reconnection {
            self.bus.emit(topics::RECONNECT, Value::Null);
        }

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!("failed to serialize outbound frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("failed to send frame: {}", e);
                    break;
                }
            }
        });

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => self.route_frame(&text),
                Ok(Message::Close(_)) => {
                    tracing::info!("server closed connection");
                    break;
                }
                Ok(Message::Ping(_)) => {}
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    self.bus.emit(topics::ERROR, Value::Null);
                    break;
                }
                _ => {}
            }
        }

        writer_task.abort();
        *self.writer.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Route one inbound text frame to the bus.
    ///
    /// Malformed frames are dropped without touching connection state; the
    /// realtime path must not fall over on one bad frame.
    fn route_frame(&self, text: &str) {
        match RoutedFrame::decode(text) {
            Ok(RoutedFrame::Generic { topic, payload }) => self.bus.emit(&topic, payload),
            Ok(RoutedFrame::Kinded { kind, payload }) => {
                self.bus.emit(topics::EVENT, payload.clone());
                self.bus.emit(&topics::kinded(&kind), payload);
            }
            Err(e) => {
                tracing::debug!("dropping malformed frame: {}", e);
            }
        }
    }

    fn publish_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
        self.bus.emit_retained(topics::STATUS, status_payload(status));
    }
}

fn status_payload(status: ConnectionStatus) -> Value {
    serde_json::to_value(status).unwrap_or(Value::Null)
}
