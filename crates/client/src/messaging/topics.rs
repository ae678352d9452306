//! Bus topic vocabulary.
//!
//! Kept in one place so the connection manager, the reconciliation engine,
//! and consumers agree on topic strings.

/// Connection status channel. Retained: new subscribers immediately receive
/// the current status.
pub const STATUS: &str = "ws:status";

/// Low-level signal emitted on every successful socket open.
pub const OPEN: &str = "ws:open";

/// Low-level signal emitted whenever the socket goes down.
pub const CLOSE: &str = "ws:close";

/// Low-level signal emitted on a socket transport error.
pub const ERROR: &str = "ws:error";

/// Emitted after the identify handshake on every open that follows a prior
/// open. Never emitted on the first open of the process lifetime.
pub const RECONNECT: &str = "ws:reconnect";

/// Generic server event topic.
pub const EVENT: &str = "event";

/// Each envelope appended to the merged log is forwarded here.
pub const LOG_EVENT: &str = "log:event";

/// Fired when the merged log is replaced (full resync) or cleared (identity
/// reset); payload carries the new entry count.
pub const LOG_RESET: &str = "log:reset";

/// Derived topic for a kinded server event, e.g. `event:envelopes_update`.
pub fn kinded(kind: &str) -> String {
    format!("{EVENT}:{kind}")
}
