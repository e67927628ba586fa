//! Device provisioning protocol.
//!
//! Registers a device against the provisioning endpoint, polls for its hub
//! assignment and caches the result on disk so later startups skip the network.

pub mod client;
pub mod models;
pub mod service;

pub use client::{
    HttpMethod, HttpRequest, HttpResponse, ProvisioningHttpClient, ReqwestProvisioningClient,
};
pub use models::{DeviceInfoResponse, ProvisioningRecord, RegistrationState};
pub use service::{DEFAULT_PROVISIONING_HOST, ProvisioningService};
