//! Connection status as observed by consumers.

use serde::{Deserialize, Serialize};

/// Snapshot of the connection lifecycle, broadcast on every transition and
/// replayed to new status subscribers.
///
/// `connected` and `reconnecting` are never both true; the constructors below
/// are the only ways the connection manager builds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    /// Zero-based reconnection attempt counter; capped once the backoff table
    /// runs out of distinct delays.
    pub attempt: u32,
}

impl ConnectionStatus {
    /// Initial state, and the state after an intentional shutdown.
    pub const fn disconnected() -> Self {
        Self {
            connected: false,
            reconnecting: false,
            attempt: 0,
        }
    }

    /// The socket is open.
    pub const fn open() -> Self {
        Self {
            connected: true,
            reconnecting: false,
            attempt: 0,
        }
    }

    /// The socket is down and attempt `attempt` is scheduled.
    pub const fn reconnecting(attempt: u32) -> Self {
        Self {
            connected: false,
            reconnecting: true,
            attempt,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}
