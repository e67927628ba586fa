//! # Hubbridge Connector Library
//!
//! Connection and credential negotiation for bridging a local MQTT broker to a
//! cloud IoT hub. The library derives the device connection identity from a
//! connection string, a device certificate or the device provisioning service,
//! signs SAS tokens and rotates them while the hub connection is live.
//!
//! ## Modules
//!
//! - [`auth`] - Connection identity resolution, SAS tokens and token refresh
//! - [`provisioning`] - Device provisioning protocol with on-disk caching
//! - [`hub`] - Hub connection configuration, credentials and transport trait
//! - [`routing`] - Message handlers, handler registry and connection status events
//! - [`config`] - Connector settings
//! - [`common`] - Error types
//! - [`utils`] - Environment variable helpers

pub mod auth;
pub mod common;
pub mod config;
pub mod hub;
pub mod provisioning;
pub mod routing;
pub mod utils;

pub use auth::{ConnectionIdentity, ConnectionSettingsResolver};
pub use common::{ConnectorError, ErrorKind};
pub use config::ConnectorSettings;
