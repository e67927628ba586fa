use crate::auth::{ConnectionIdentity, SasTokenGenerator};
use crate::common::ConnectorError;
use std::fmt;
use std::time::Duration;

pub const HUB_API_VERSION: &str = "2020-09-30";

/// MQTT username and password presented to the hub.
#[derive(Clone, PartialEq, Eq)]
pub struct HubCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Produces hub credentials for every connect attempt.
///
/// On the SAS path each call signs a new token valid for the identity's token
/// validity. On the certificate path the password is empty.
#[derive(Clone, Debug)]
pub struct CredentialsProvider {
    username: String,
    token_validity: Duration,
    generator: Option<SasTokenGenerator>,
}

impl CredentialsProvider {
    pub fn new(identity: &ConnectionIdentity) -> Self {
        Self {
            username: hub_username(&identity.host_name, &identity.device_id),
            token_validity: identity.token_validity,
            generator: SasTokenGenerator::from_identity(identity),
        }
    }

    pub fn credentials(&self) -> Result<HubCredentials, ConnectorError> {
        let password = match &self.generator {
            Some(generator) => {
                let token = generator.generate_with_validity(self.token_validity)?;
                log::debug!("Generated SAS token valid until {}", token.expiry);
                token.to_credential_string()
            }
            None => String::new(),
        };

        Ok(HubCredentials {
            username: self.username.clone(),
            password,
        })
    }
}

pub fn hub_username(host_name: &str, device_id: &str) -> String {
    format!("{host_name}/{device_id}/api-version={HUB_API_VERSION}")
}
