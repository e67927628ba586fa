//! # Hubbridge Agent
//!
//! Composition root of the hubbridge gateway: loads the settings, configures
//! logging, resolves the hub connection identity and bridges messages between the
//! local MQTT broker and the hub until shutdown.
//!
//! ## Modules
//!
//! - [`app`] - Startup, run loop and teardown coordination
//! - [`cli`] - Command line flags
//! - [`settings`] - Settings loading from file, environment and flags
//! - [`logger`] - Logging configuration
//! - [`mqtt`] - `rumqttc` adapters for the hub and the local broker
//! - [`router`] - Message forwarding between both brokers

pub mod app;
pub mod cli;
pub mod logger;
pub mod mqtt;
pub mod router;
pub mod settings;
