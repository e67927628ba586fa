use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Authentication method used towards the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// Shared access key, a signed SAS token is sent as the MQTT password.
    SasToken,
    /// X.509 device certificate presented as the TLS client identity.
    Certificate,
}

/// A decoded shared access key and its policy name.
///
/// The decoded key bytes are wiped from memory when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedAccessKey {
    pub key_name: String,
    pub key_decoded: Vec<u8>,
}

impl fmt::Debug for SharedAccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAccessKey")
            .field("key_name", &self.key_name)
            .field("key_decoded", &"<redacted>")
            .finish()
    }
}

/// The resolved connection settings of the device towards the hub.
///
/// Built once by the connection settings resolver and immutable afterwards.
/// `hub_name` and `device_id` are never empty. When `shared_access_key` is set the
/// device authenticates with SAS tokens and carries no certificate material;
/// otherwise `device_cert` and `device_key` hold the PEM pair.
#[derive(Clone, Default)]
pub struct ConnectionIdentity {
    pub hub_name: String,
    pub host_name: String,
    pub device_id: String,
    pub device_cert: String,
    pub device_key: String,
    /// Zero on the certificate path.
    pub token_validity: Duration,
    pub shared_access_key: Option<SharedAccessKey>,
}

impl ConnectionIdentity {
    pub fn auth_method(&self) -> AuthMethod {
        if self.shared_access_key.is_some() {
            AuthMethod::SasToken
        } else {
            AuthMethod::Certificate
        }
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("hub_name", &self.hub_name)
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("has_device_cert", &!self.device_cert.is_empty())
            .field("has_device_key", &!self.device_key.is_empty())
            .field("token_validity", &self.token_validity)
            .field("shared_access_key", &self.shared_access_key)
            .finish()
    }
}
