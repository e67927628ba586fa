use super::types::ConnectionIdentity;
use crate::common::ConnectorError;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Fraction of the token validity after which a SAS token is refreshed.
pub const SAS_TOKEN_VALIDITY_FACTOR: f64 = 0.9;

/// Token validity used when none is configured or the configured one cannot be parsed.
pub const DEFAULT_SAS_TOKEN_VALIDITY: Duration = Duration::from_secs(60 * 60);

/// A signed, time-bounded hub access token.
///
/// Created fresh on every issuance and serialized straight into the credential string
/// sent as the MQTT password. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAccessSignature {
    pub resource: String,
    pub signature: String,
    pub expiry: DateTime<Utc>,
    pub policy_name: String,
}

impl SharedAccessSignature {
    /// Serializes the signature into the credential string expected by the hub.
    ///
    /// The field order is fixed: `sr`, `sig`, `se` and, only for a non-empty policy
    /// name, `skn`.
    pub fn to_credential_string(&self) -> String {
        let mut credential = format!(
            "SharedAccessSignature sr={}&sig={}&se={}",
            urlencoding::encode(&self.resource),
            urlencoding::encode(&self.signature),
            urlencoding::encode(&self.expiry.timestamp().to_string()),
        );
        if !self.policy_name.is_empty() {
            credential.push_str("&skn=");
            credential.push_str(&urlencoding::encode(&self.policy_name));
        }
        credential
    }
}

impl fmt::Display for SharedAccessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_credential_string())
    }
}

/// Generator for hub Shared Access Signature (SAS) tokens.
///
/// Signs `urlencode(resource) + "\n" + expiry` with HMAC-SHA256 keyed by the decoded
/// shared access key. The generator holds no clock, so signing a fixed expiry is
/// deterministic.
///
/// # Examples
///
/// ```no_run
/// use connector::auth::SasTokenGenerator;
/// use std::time::Duration;
///
/// let generator = SasTokenGenerator::new("my-hub.azure-devices.net", "", b"secret".to_vec());
/// let token = generator.generate_with_validity(Duration::from_secs(3600))?;
/// println!("{}", token.to_credential_string());
/// # Ok::<(), connector::common::ConnectorError>(())
/// ```
#[derive(Clone)]
pub struct SasTokenGenerator {
    resource: String,
    policy_name: String,
    key: Vec<u8>,
}

impl fmt::Debug for SasTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasTokenGenerator")
            .field("resource", &self.resource)
            .field("policy_name", &self.policy_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SasTokenGenerator {
    pub fn new(resource: impl Into<String>, policy_name: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            resource: resource.into(),
            policy_name: policy_name.into(),
            key,
        }
    }

    /// Creates a generator for a resolved identity.
    ///
    /// Returns `None` when the identity authenticates with a certificate.
    pub fn from_identity(identity: &ConnectionIdentity) -> Option<Self> {
        identity.shared_access_key.as_ref().map(|sak| {
            Self::new(
                identity.host_name.clone(),
                sak.key_name.clone(),
                sak.key_decoded.to_vec(),
            )
        })
    }

    /// Signs a token expiring at the given instant.
    pub fn generate(&self, expiry: DateTime<Utc>) -> Result<SharedAccessSignature, ConnectorError> {
        let string_to_sign = format!(
            "{}\n{}",
            urlencoding::encode(&self.resource),
            expiry.timestamp()
        );

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| ConnectorError::InvalidCredential(format!("cannot sign the token: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(SharedAccessSignature {
            resource: self.resource.clone(),
            signature,
            expiry,
            policy_name: self.policy_name.clone(),
        })
    }

    /// Signs a token expiring `validity` from now.
    pub fn generate_with_validity(
        &self,
        validity: Duration,
    ) -> Result<SharedAccessSignature, ConnectorError> {
        let delta = TimeDelta::from_std(validity).map_err(|_| {
            ConnectorError::InvalidValidityPeriod {
                value: format!("{validity:?}"),
            }
        })?;
        let expiry = Utc::now().checked_add_signed(delta).ok_or_else(|| {
            ConnectorError::InvalidValidityPeriod {
                value: format!("{validity:?}"),
            }
        })?;
        self.generate(expiry)
    }
}

/// Parses a token validity period of the form `<positive integer><m|h|d>`.
///
/// The last character is the unit and everything before it must parse as an integer
/// of at least 1. `"7d"` is 168 hours.
pub fn parse_token_validity(value: &str) -> Result<Duration, ConnectorError> {
    let invalid = || ConnectorError::InvalidValidityPeriod {
        value: value.to_string(),
    };

    let unit = value.chars().last().ok_or_else(invalid)?;
    let period: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if period < 1 {
        return Err(invalid());
    }

    let unit_secs: u64 = match unit {
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    (period as u64)
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

/// Interval after which a token with the given validity must be refreshed.
pub fn refresh_interval(validity: Duration) -> Duration {
    validity.mul_f64(SAS_TOKEN_VALIDITY_FACTOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_generator(policy_name: &str) -> SasTokenGenerator {
        let key = general_purpose::STANDARD.decode("cGFzc3dvcmQ=").unwrap();
        SasTokenGenerator::new("dummy-hub.azure-devices.net", policy_name, key)
    }

    #[test]
    fn test_known_signature() {
        let expiry = Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap();
        let sas = test_generator("").generate(expiry).unwrap();

        assert_eq!(sas.resource, "dummy-hub.azure-devices.net");
        assert_eq!(sas.expiry.timestamp(), 1_609_462_800);
        assert_eq!(sas.signature, "ifZm2I0YKRkwc8Pc49e0qKSsu3l3FbxoWZRqGBtXtng=");
    }

    #[test]
    fn test_credential_string_without_policy() {
        let expiry = Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap();
        let sas = test_generator("").generate(expiry).unwrap();

        assert_eq!(
            sas.to_credential_string(),
            "SharedAccessSignature sr=dummy-hub.azure-devices.net\
             &sig=ifZm2I0YKRkwc8Pc49e0qKSsu3l3FbxoWZRqGBtXtng%3D&se=1609462800"
        );
    }

    #[test]
    fn test_credential_string_with_policy() {
        let expiry = Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap();
        let sas = test_generator("device policy").generate(expiry).unwrap();

        let credential = sas.to_string();
        assert!(credential.ends_with("&se=1609462800&skn=device%20policy"));
    }

    #[test]
    fn test_empty_key_still_signs() {
        let expiry = Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap();
        let sas = SasTokenGenerator::new("dummy-hub.azure-devices.net", "", Vec::new())
            .generate(expiry)
            .unwrap();

        assert_eq!(sas.expiry.timestamp(), 1_609_462_800);
        assert!(!sas.signature.is_empty());
    }

    #[test]
    fn test_generate_with_validity_sets_future_expiry() {
        let before = Utc::now();
        let sas = test_generator("")
            .generate_with_validity(Duration::from_secs(3600))
            .unwrap();

        let delta = sas.expiry - before;
        assert!(delta >= TimeDelta::seconds(3599));
        assert!(delta <= TimeDelta::seconds(3601));
    }

    #[test]
    fn test_parse_valid_periods() {
        assert_eq!(parse_token_validity("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_token_validity("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(
            parse_token_validity("7d").unwrap(),
            Duration::from_secs(168 * 3600)
        );
    }

    #[test]
    fn test_parse_invalid_periods() {
        for value in ["", "0h", "1", "h", "-1h", "1w", "1oh", "ä"] {
            assert!(
                matches!(
                    parse_token_validity(value),
                    Err(ConnectorError::InvalidValidityPeriod { .. })
                ),
                "'{value}' should be rejected"
            );
        }
    }

    #[test]
    fn test_refresh_interval() {
        assert_eq!(
            refresh_interval(Duration::from_secs(3600)),
            Duration::from_secs(3240)
        );
    }
}
