use crate::common::ConnectorError;
use serde::{Deserialize, Serialize};

/// Body of the device registration request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub registration_id: String,
}

/// Assignment state reported by the provisioning service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationState {
    pub registration_id: String,
    pub created_date_time_utc: String,
    pub assigned_hub: String,
    pub device_id: String,
    pub status: String,
    pub substatus: String,
    pub last_updated_date_time_utc: String,
    pub etag: String,
}

impl RegistrationState {
    /// True when the service sent no assignment information at all.
    pub fn is_empty(&self) -> bool {
        *self == RegistrationState::default()
    }
}

/// Response of both the registration and the operation status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfoResponse {
    pub operation_id: String,
    pub status: String,
    pub registration_state: RegistrationState,
}

/// Structured error body returned by the provisioning service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseError {
    pub message: String,
    pub detail: String,
}

/// Device assignment persisted to the provisioning cache file.
///
/// Serialized as exactly `{"assignedHub": "...", "deviceId": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisioningRecord {
    pub assigned_hub: String,
    pub device_id: String,
}

impl ProvisioningRecord {
    pub fn is_empty(&self) -> bool {
        self.assigned_hub.is_empty() && self.device_id.is_empty()
    }

    /// Returns the name of the first missing field.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.assigned_hub.is_empty() {
            Some("assignedHub")
        } else if self.device_id.is_empty() {
            Some("deviceId")
        } else {
            None
        }
    }

    /// Builds a record from a registration state, requiring both the assigned hub and
    /// the device id.
    pub fn from_registration_state(state: &RegistrationState) -> Result<Self, ConnectorError> {
        let record = ProvisioningRecord {
            assigned_hub: state.assigned_hub.clone(),
            device_id: state.device_id.clone(),
        };
        match record.missing_field() {
            Some(missing) => Err(ConnectorError::IncompleteAssignment { missing }),
            None => Ok(record),
        }
    }
}
