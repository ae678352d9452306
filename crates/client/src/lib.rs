//! Parlor Client - realtime event synchronization for live party sessions.
//!
//! Keeps a local view of a live session consistent with the remote authority
//! under an unreliable network:
//!
//! - [`websocket::ConnectionManager`] owns the single socket and recovers it
//!   with bounded backoff, expressing all transport failure through a status
//!   stream.
//! - [`messaging::EventBus`] fans inbound messages out to typed subscribers,
//!   with a bounded backlog for late-mounting consumers.
//! - [`sync::ReconciliationEngine`] merges push events and pull snapshots
//!   into one deduplicated, time-ordered log.
//! - [`SyncClient`] composes the above into one owned instance.

pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod messaging;
pub mod sync;
pub mod websocket;

pub use api::{ApiError, EventsApi, HttpEventsApi};
pub use client::SyncClient;
pub use config::ClientConfig;
pub use messaging::{topics, EventBus, Subscription};
pub use sync::ReconciliationEngine;
pub use websocket::{ConnectionManager, ConnectionStatus};

// Re-export the wire vocabulary so consumers need only this crate.
pub use parlor_protocol as protocol;
