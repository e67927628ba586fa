//! Shared helpers used across the connector.

pub mod env;

pub use env::{EnvUtils, EnvVarError};
