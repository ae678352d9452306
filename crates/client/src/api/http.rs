//! Production `EventsApi` adapter over HTTP.

use async_trait::async_trait;
use reqwest::Client;

use parlor_protocol::{EventBatch, PlayerId};

use super::{ApiError, EventsApi};

/// HTTP client for the session server's events endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventsApi {
    base_url: String,
    client: Client,
}

impl HttpEventsApi {
    /// `base_url` is the server root, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EventsApi for HttpEventsApi {
    async fn list_events(
        &self,
        since_ts: Option<i64>,
        limit: Option<u32>,
        player_id: Option<PlayerId>,
    ) -> Result<EventBatch, ApiError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ts) = since_ts {
            query.push(("since_ts", ts.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(player_id) = player_id {
            query.push(("player_id", player_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<EventBatch>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}
