use crate::common::ConnectorError;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

/// Local topic carrying hub connection status events.
pub const STATUS_TOPIC: &str = "edge/connection/remote/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCause {
    ConnectionTokenExpired,
    ConnectionNotAuthorized,
    ConnectionError,
    ConnectionClosed,
}

/// Hub connection status as published on [`STATUS_TOPIC`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<StatusCause>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            timestamp: Utc::now().timestamp_millis(),
            cause: None,
        }
    }

    pub fn disconnected(cause: StatusCause) -> Self {
        Self {
            connected: false,
            timestamp: Utc::now().timestamp_millis(),
            cause: Some(cause),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, ConnectorError> {
        serde_json::to_vec(self).map_err(|e| ConnectorError::Transport(e.to_string()))
    }
}

/// Publishes connection status events to the local broker.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish_status(&self, status: &ConnectionStatus) -> Result<(), ConnectorError>;
}

/// Publishes a status event; failures are logged and otherwise ignored.
pub async fn send_status(publisher: &dyn StatusPublisher, status: ConnectionStatus) {
    if let Err(e) = publisher.publish_status(&status).await {
        log::warn!("Failed to publish connection status {status:?}: {e}");
    }
}
