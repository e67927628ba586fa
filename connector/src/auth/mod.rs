//! Hub authentication.
//!
//! Resolves the device connection identity from the connector settings and keeps
//! SAS token credentials fresh for the lifetime of the hub connection.

pub mod certificate;
pub mod connection_settings;
pub mod connection_string;
pub mod sas_token_generator;
pub mod token_refresh_service;
pub mod types;

pub use certificate::{CertificateReader, DeviceCertificate, read_device_id};
pub use connection_settings::{
    ConnectionSettingsResolver, ProvisioningClientFactory, extract_hub_name,
};
pub use connection_string::ConnectionProperties;
pub use sas_token_generator::{
    DEFAULT_SAS_TOKEN_VALIDITY, SAS_TOKEN_VALIDITY_FACTOR, SasTokenGenerator,
    SharedAccessSignature, parse_token_validity, refresh_interval,
};
pub use token_refresh_service::{RefreshFailureCallback, TokenRefreshService};
pub use types::{AuthMethod, ConnectionIdentity, SharedAccessKey};
