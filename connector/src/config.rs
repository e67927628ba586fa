use crate::common::ConnectorError;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_TENANT_ID: &str = "defaultTenant";
pub const DEFAULT_SAS_TOKEN_VALIDITY: &str = "1h";
pub const DEFAULT_TELEMETRY_TOPICS: &str = "device-to-cloud";
pub const DEFAULT_COMMAND_TOPIC: &str = "cloud-to-device";
pub const DEFAULT_HUB_DOMAIN_SUFFIX: &str = ".azure-devices.net";
pub const DEFAULT_PROVISIONING_FILE: &str = "provisioning.json";
pub const DEFAULT_LOG_FILE: &str = "logs/hubbridge.log";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level connector settings.
///
/// Every field has a default, so a partial configuration file deserializes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectorSettings {
    pub tenant_id: String,
    /// Hub device connection string, may be empty when the device is provisioned.
    pub connection_string: String,
    /// `<n><m|h|d>`, only used with a shared access key.
    pub sas_token_validity: String,
    /// Provisioning scope, required when the device has to be registered.
    pub id_scope: String,
    /// Comma separated local topics forwarded to the hub as telemetry.
    pub passthrough_telemetry_topics: String,
    /// Local topic receiving cloud-to-device messages.
    pub passthrough_command_topic: String,
    pub ca_cert: String,
    pub cert: String,
    pub key: String,
    pub hub_domain_suffix: String,
    pub provisioning_host: String,
    pub provisioning_file: String,
    pub local: LocalBrokerSettings,
    pub logging: LoggingSettings,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            connection_string: String::new(),
            sas_token_validity: DEFAULT_SAS_TOKEN_VALIDITY.to_string(),
            id_scope: String::new(),
            passthrough_telemetry_topics: DEFAULT_TELEMETRY_TOPICS.to_string(),
            passthrough_command_topic: DEFAULT_COMMAND_TOPIC.to_string(),
            ca_cert: String::new(),
            cert: String::new(),
            key: String::new(),
            hub_domain_suffix: DEFAULT_HUB_DOMAIN_SUFFIX.to_string(),
            provisioning_host: crate::provisioning::DEFAULT_PROVISIONING_HOST.to_string(),
            provisioning_file: DEFAULT_PROVISIONING_FILE.to_string(),
            local: LocalBrokerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConnectorSettings {
    /// Rejects settings that cannot work regardless of the authentication path.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConnectorError::Configuration(format!(
                "unknown log level '{}', expected one of {}",
                self.logging.level,
                LOG_LEVELS.join("|")
            )));
        }

        if self.local.port == 0 {
            return Err(ConnectorError::Configuration(
                "local broker port cannot be 0".to_string(),
            ));
        }

        if !self.ca_cert.is_empty() && !Path::new(&self.ca_cert).is_file() {
            return Err(ConnectorError::Configuration(format!(
                "failed to read CA certificates file '{}'",
                self.ca_cert
            )));
        }

        Ok(())
    }

    /// The configured telemetry topics, trimmed, without blanks.
    pub fn telemetry_topics(&self) -> Vec<String> {
        self.passthrough_telemetry_topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Connection to the local MQTT broker.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalBrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

impl Default for LocalBrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}
