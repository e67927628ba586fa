//! Hub connection seam.
//!
//! The MQTT client itself lives in the agent; this module defines what the
//! connector needs from it and builds its configuration and credentials.

pub mod connection;
pub mod credentials;

pub use connection::{HUB_MQTT_PORT, HubConnectionConfig, ReconnectBackoff};
pub use credentials::{CredentialsProvider, HubCredentials, hub_username};

use crate::common::ConnectorError;
use async_trait::async_trait;

/// MQTT connection to the hub.
///
/// `connect` is called with fresh credentials on every (re)connect, which is how a
/// refreshed SAS token reaches the broker.
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn connect(&self, credentials: HubCredentials) -> Result<(), ConnectorError>;

    async fn disconnect(&self) -> Result<(), ConnectorError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError>;

    async fn subscribe(&self, topic: &str) -> Result<(), ConnectorError>;
}
