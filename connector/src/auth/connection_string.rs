use crate::common::ConnectorError;
use std::collections::HashMap;

pub const HOST_NAME: &str = "HostName";
pub const DEVICE_ID: &str = "DeviceId";
pub const SHARED_ACCESS_KEY: &str = "SharedAccessKey";
pub const SHARED_ACCESS_KEY_NAME: &str = "SharedAccessKeyName";

/// Properties parsed from a hub device connection string.
///
/// A connection string is a list of `key=value` segments separated by `;`, e.g.
/// `HostName=my-hub.azure-devices.net;DeviceId=dev-1;SharedAccessKey=cGFzc3dvcmQ=`.
/// Empty segments are skipped. Each segment is split on its first `=`, so values may
/// themselves contain `=` (base64 padding). When a key repeats, the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionProperties {
    values: HashMap<String, String>,
}

impl ConnectionProperties {
    pub fn parse(connection_string: &str) -> Result<Self, ConnectorError> {
        let mut values = HashMap::new();

        for segment in connection_string.split(';') {
            if segment.is_empty() {
                continue;
            }

            let (key, value) =
                segment
                    .split_once('=')
                    .ok_or_else(|| ConnectorError::InvalidConnectionString {
                        reason: format!("segment '{segment}' is not a key=value pair"),
                    })?;

            values
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the property value only when it is present and non-empty.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
