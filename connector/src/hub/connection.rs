use crate::auth::{AuthMethod, ConnectionIdentity};
use crate::common::ConnectorError;
use crate::config::ConnectorSettings;
use crate::utils::EnvUtils;
use std::time::Duration;

pub const HUB_MQTT_PORT: u16 = 8883;

pub const ENV_CONNECT_INIT: &str = "HUB_CONNECT_INIT";
pub const ENV_CONNECT_MAX: &str = "HUB_CONNECT_MAX";
pub const ENV_CONNECT_MUL: &str = "HUB_CONNECT_MUL";

const DEFAULT_CONNECT_INIT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_MAX: Duration = Duration::from_secs(240);
const DEFAULT_CONNECT_MUL: f64 = 2.0;

/// Exponential delay between hub reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: DEFAULT_CONNECT_INIT,
            max: DEFAULT_CONNECT_MAX,
            multiplier: DEFAULT_CONNECT_MUL,
        }
    }
}

impl ReconnectBackoff {
    /// Reads `HUB_CONNECT_INIT`, `HUB_CONNECT_MAX` (seconds) and `HUB_CONNECT_MUL`.
    pub fn from_env() -> Self {
        Self::from_lookup(EnvUtils::get_optional_var)
    }

    /// Each value is independently overridable; a missing or invalid value keeps
    /// its default.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let initial = EnvUtils::parse_with::<u64, _>(ENV_CONNECT_INIT, &lookup)
            .map(Duration::from_secs)
            .unwrap_or(defaults.initial);
        let max = EnvUtils::parse_with::<u64, _>(ENV_CONNECT_MAX, &lookup)
            .map(Duration::from_secs)
            .unwrap_or(defaults.max);
        let multiplier = EnvUtils::parse_with::<f64, _>(ENV_CONNECT_MUL, &lookup)
            .filter(|multiplier| multiplier.is_finite() && *multiplier >= 1.0)
            .unwrap_or(defaults.multiplier);

        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Delay before the reconnect attempt number `attempt` (starting at 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Everything needed to open the MQTT connection to the hub.
#[derive(Clone)]
pub struct HubConnectionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub ca_cert_pem: Vec<u8>,
    /// Certificate and key PEM, set on the certificate path only.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
    pub backoff: ReconnectBackoff,
}

impl std::fmt::Debug for HubConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("client_auth", &self.client_auth.is_some())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl HubConnectionConfig {
    /// Builds the hub connection configuration for a resolved identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Configuration`] when no CA certificate is configured,
    /// or when the identity has neither a shared access key nor certificate material.
    pub async fn load(
        settings: &ConnectorSettings,
        identity: &ConnectionIdentity,
        backoff: ReconnectBackoff,
    ) -> Result<Self, ConnectorError> {
        if settings.ca_cert.is_empty() {
            return Err(ConnectorError::Configuration(
                "a CA certificate file is required for the hub connection".to_string(),
            ));
        }
        let ca_cert_pem = tokio::fs::read(&settings.ca_cert).await.map_err(|source| {
            ConnectorError::CertificateReadError {
                file: settings.ca_cert.clone(),
                source,
            }
        })?;

        let client_auth = match identity.auth_method() {
            AuthMethod::SasToken => None,
            AuthMethod::Certificate => {
                if identity.device_cert.is_empty() || identity.device_key.is_empty() {
                    return Err(ConnectorError::Configuration(
                        "either a shared access key or a device certificate and key are required"
                            .to_string(),
                    ));
                }
                Some((
                    identity.device_cert.clone().into_bytes(),
                    identity.device_key.clone().into_bytes(),
                ))
            }
        };

        Ok(Self {
            host: identity.host_name.clone(),
            port: HUB_MQTT_PORT,
            client_id: identity.device_id.clone(),
            ca_cert_pem,
            client_auth,
            backoff,
        })
    }
}
