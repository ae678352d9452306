//! Parlor Protocol - shared types for session server and client communication
//!
//! This crate contains the wire vocabulary spoken over the realtime connection
//! and the pull endpoint:
//! - The `{type, payload}` frame envelope (both directions)
//! - Inbound frame classification ([`RoutedFrame`])
//! - Event DTOs for the pull endpoint ([`EventEnvelope`], [`EventBatch`])
//! - Shared value objects ([`PlayerId`])
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde and serde_json
//! 2. **No business logic** - Pure data types and serialization
//! 3. **Open message set** - the server may introduce new frame types at any
//!    time; clients route on the declared type string rather than a closed enum

pub mod events;
pub mod messages;
pub mod types;

pub use events::{EventBatch, EventEnvelope};
pub use messages::{Envelope, RoutedFrame};
pub use types::PlayerId;
