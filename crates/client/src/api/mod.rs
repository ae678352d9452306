//! Pull channel: the events endpoint of the session server.
//!
//! The reconciliation engine depends on the object-safe [`EventsApi`] port
//! rather than a concrete HTTP client, so tests can substitute the transport.

use async_trait::async_trait;
use thiserror::Error;

use parlor_protocol::{EventBatch, PlayerId};

mod http;

pub use http::HttpEventsApi;

/// Errors from the pull channel.
///
/// These are data-freshness errors, surfaced to the caller of the resync
/// operation; they never feed back into the connection retry schedule.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Object-safe boundary over `GET /events`.
///
/// Omitting `since_ts` requests a full snapshot; supplying it requests only
/// events after that high-water mark.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventsApi: Send + Sync {
    async fn list_events(
        &self,
        since_ts: Option<i64>,
        limit: Option<u32>,
        player_id: Option<PlayerId>,
    ) -> Result<EventBatch, ApiError>;
}
