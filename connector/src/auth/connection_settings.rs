use super::certificate::{CertificateReader, DeviceCertificate};
use super::connection_string::{
    ConnectionProperties, DEVICE_ID, HOST_NAME, SHARED_ACCESS_KEY, SHARED_ACCESS_KEY_NAME,
};
use super::sas_token_generator::{DEFAULT_SAS_TOKEN_VALIDITY, parse_token_validity};
use super::types::{ConnectionIdentity, SharedAccessKey};
use crate::common::ConnectorError;
use crate::config::ConnectorSettings;
use crate::provisioning::{ProvisioningHttpClient, ProvisioningService, ReqwestProvisioningClient};
use base64::{Engine as _, engine::general_purpose};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds the provisioning HTTP client from the device certificate.
pub type ProvisioningClientFactory = Arc<
    dyn Fn(&DeviceCertificate) -> Result<Arc<dyn ProvisioningHttpClient>, ConnectorError>
        + Send
        + Sync,
>;

/// Derives the hub connection identity from the connector settings.
///
/// Exactly one of three paths applies:
///
/// - **SAS token**: the connection string carries a `SharedAccessKey`.
/// - **Certificate**: the connection string carries both `HostName` and `DeviceId`,
///   the device authenticates with its certificate.
/// - **Provisioning**: neither is present, the hub assignment is requested from the
///   provisioning service (or read from its cache file) using the device certificate.
///
/// Resolution never retries; every error is fatal to the connection bootstrap.
pub struct ConnectionSettingsResolver {
    settings: ConnectorSettings,
    client_factory: ProvisioningClientFactory,
}

impl ConnectionSettingsResolver {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            settings,
            client_factory: Arc::new(default_client_factory),
        }
    }

    /// Replaces the HTTP client used for provisioning.
    pub fn with_client_factory(mut self, client_factory: ProvisioningClientFactory) -> Self {
        self.client_factory = client_factory;
        self
    }

    pub async fn resolve(&self) -> Result<ConnectionIdentity, ConnectorError> {
        let props = ConnectionProperties::parse(&self.settings.connection_string)?;

        if props.non_empty(SHARED_ACCESS_KEY).is_some() {
            return self.resolve_shared_access_key(&props);
        }

        let (cert_path, key_path) = self.certificate_files()?;

        match (props.non_empty(HOST_NAME), props.non_empty(DEVICE_ID)) {
            (Some(host_name), Some(device_id)) => {
                self.resolve_certificate(host_name, device_id, cert_path, key_path)
                    .await
            }
            (Some(_), None) => Err(ConnectorError::InconsistentHostDeviceSpecification {
                missing: DEVICE_ID,
                present: HOST_NAME,
            }),
            (None, Some(_)) => Err(ConnectorError::InconsistentHostDeviceSpecification {
                missing: HOST_NAME,
                present: DEVICE_ID,
            }),
            (None, None) => self.resolve_provisioned(cert_path, key_path).await,
        }
    }

    fn resolve_shared_access_key(
        &self,
        props: &ConnectionProperties,
    ) -> Result<ConnectionIdentity, ConnectorError> {
        let key_decoded = general_purpose::STANDARD
            .decode(props.get(SHARED_ACCESS_KEY).unwrap_or_default())
            .map_err(|_| {
                ConnectorError::InvalidCredential("the SharedAccessKey is not base64 encoded".into())
            })?;

        let host_name = props
            .non_empty(HOST_NAME)
            .ok_or(ConnectorError::MissingRequiredProperty {
                property: HOST_NAME,
            })?;
        let device_id = props
            .non_empty(DEVICE_ID)
            .ok_or(ConnectorError::MissingRequiredProperty {
                property: DEVICE_ID,
            })?;
        let hub_name = extract_hub_name(host_name, &self.settings.hub_domain_suffix)?;

        let token_validity = match parse_token_validity(&self.settings.sas_token_validity) {
            Ok(validity) => validity,
            Err(e) => {
                log::warn!("The default SAS token validity period will be set: {e}");
                DEFAULT_SAS_TOKEN_VALIDITY
            }
        };

        Ok(ConnectionIdentity {
            hub_name,
            host_name: host_name.to_string(),
            device_id: device_id.to_string(),
            token_validity,
            shared_access_key: Some(SharedAccessKey {
                key_name: props
                    .get(SHARED_ACCESS_KEY_NAME)
                    .unwrap_or_default()
                    .to_string(),
                key_decoded,
            }),
            ..Default::default()
        })
    }

    fn certificate_files(&self) -> Result<(&str, &str), ConnectorError> {
        match (self.settings.cert.is_empty(), self.settings.key.is_empty()) {
            (false, false) => Ok((&self.settings.cert, &self.settings.key)),
            (true, true) => Err(ConnectorError::MissingCertificateFiles {
                missing: "cert/key pair",
            }),
            (true, false) => Err(ConnectorError::MissingCertificateFiles {
                missing: "client cert file",
            }),
            (false, true) => Err(ConnectorError::MissingCertificateFiles {
                missing: "private key file",
            }),
        }
    }

    async fn resolve_certificate(
        &self,
        host_name: &str,
        device_id: &str,
        cert_path: &str,
        key_path: &str,
    ) -> Result<ConnectionIdentity, ConnectorError> {
        let certificate = CertificateReader::read_pair(cert_path, key_path).await?;
        let hub_name = extract_hub_name(host_name, &self.settings.hub_domain_suffix)?;

        Ok(ConnectionIdentity {
            hub_name,
            host_name: host_name.to_string(),
            device_id: device_id.to_string(),
            device_cert: certificate.cert_pem,
            device_key: certificate.key_pem,
            ..Default::default()
        })
    }

    async fn resolve_provisioned(
        &self,
        cert_path: &str,
        key_path: &str,
    ) -> Result<ConnectionIdentity, ConnectorError> {
        let certificate = CertificateReader::read_pair(cert_path, key_path).await?;
        let identity = ConnectionIdentity {
            device_id: certificate.device_id()?,
            device_cert: certificate.cert_pem.clone(),
            device_key: certificate.key_pem.clone(),
            ..Default::default()
        };

        let cache_path = PathBuf::from(&self.settings.provisioning_file);
        // The HTTP client is only needed when there is no cache file to read from.
        let cache_existed = tokio::fs::try_exists(&cache_path).await.unwrap_or(false);
        let cache_file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&cache_path)
            .await?;

        let result = self
            .provision(cache_file, cache_existed, &certificate, identity)
            .await;
        if result.is_err() {
            delete_file_if_empty(&cache_path).await;
        }
        result
    }

    async fn provision(
        &self,
        cache_file: tokio::fs::File,
        cache_existed: bool,
        certificate: &DeviceCertificate,
        mut identity: ConnectionIdentity,
    ) -> Result<ConnectionIdentity, ConnectorError> {
        let client = if cache_existed {
            None
        } else {
            Some((self.client_factory)(certificate)?)
        };

        let mut service = ProvisioningService::new(client, cache_file)
            .with_host(self.settings.provisioning_host.clone());
        let record = service
            .get_device_data(&self.settings.id_scope, &identity)
            .await?;

        identity.hub_name = extract_hub_name(&record.assigned_hub, &self.settings.hub_domain_suffix)?;
        identity.host_name = record.assigned_hub;
        identity.device_id = record.device_id;
        Ok(identity)
    }
}

fn default_client_factory(
    certificate: &DeviceCertificate,
) -> Result<Arc<dyn ProvisioningHttpClient>, ConnectorError> {
    let client = ReqwestProvisioningClient::with_identity(certificate)?;
    Ok(Arc::new(client))
}

/// Returns the hub name, the part of `host_name` before the first `suffix`.
pub fn extract_hub_name(host_name: &str, suffix: &str) -> Result<String, ConnectorError> {
    let index = host_name
        .find(suffix)
        .ok_or_else(|| ConnectorError::InvalidHostName {
            host_name: host_name.to_string(),
            reason: format!("missing hub domain suffix '{suffix}'"),
        })?;

    let hub_name = &host_name[..index];
    if hub_name.is_empty() {
        return Err(ConnectorError::InvalidHostName {
            host_name: host_name.to_string(),
            reason: "the hub name cannot be empty".to_string(),
        });
    }

    Ok(hub_name.to_string())
}

async fn delete_file_if_empty(path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.len() == 0 => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                log::warn!("Failed to remove empty file {}: {e}", path.display());
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use std::time::Duration;

    const SUFFIX: &str = ".azure-devices.net";

    fn resolver(connection_string: &str) -> ConnectionSettingsResolver {
        ConnectionSettingsResolver::new(ConnectorSettings {
            connection_string: connection_string.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_extract_hub_name() {
        assert_eq!(
            extract_hub_name("dummy-hub.azure-devices.net", SUFFIX).unwrap(),
            "dummy-hub"
        );
        for host_name in [
            ".azure-devices.net",
            "malformed-host-name",
            "dummy-hub.azure-devices",
            "",
        ] {
            assert!(
                matches!(
                    extract_hub_name(host_name, SUFFIX),
                    Err(ConnectorError::InvalidHostName { .. })
                ),
                "'{host_name}' should be rejected"
            );
        }
    }

    #[test]
    fn test_extract_hub_name_custom_suffix() {
        assert_eq!(
            extract_hub_name("edge.hub.example.com", ".hub.example.com").unwrap(),
            "edge"
        );
    }

    #[tokio::test]
    async fn test_resolve_shared_access_key() {
        let identity = resolver(
            "HostName=dummy-hub.azure-devices.net;DeviceId=dummy-device;SharedAccessKey=cGFzc3dvcmQ=",
        )
        .resolve()
        .await
        .unwrap();

        assert_eq!(identity.auth_method(), AuthMethod::SasToken);
        assert_eq!(identity.hub_name, "dummy-hub");
        assert_eq!(identity.device_id, "dummy-device");
        assert_eq!(identity.token_validity, Duration::from_secs(3600));
        assert!(identity.device_cert.is_empty());

        let key = identity.shared_access_key.as_ref().unwrap();
        assert_eq!(key.key_decoded, b"password");
        assert!(key.key_name.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_shared_access_key_with_policy_and_validity() {
        let resolver = ConnectionSettingsResolver::new(ConnectorSettings {
            connection_string: "HostName=dummy-hub.azure-devices.net;DeviceId=d;\
                SharedAccessKeyName=device;SharedAccessKey=cGFzc3dvcmQ="
                .to_string(),
            sas_token_validity: "30m".to_string(),
            ..Default::default()
        });
        let identity = resolver.resolve().await.unwrap();

        assert_eq!(identity.token_validity, Duration::from_secs(1800));
        assert_eq!(
            identity.shared_access_key.as_ref().unwrap().key_name,
            "device"
        );
    }

    #[tokio::test]
    async fn test_invalid_validity_falls_back_to_default() {
        let resolver = ConnectionSettingsResolver::new(ConnectorSettings {
            connection_string:
                "HostName=dummy-hub.azure-devices.net;DeviceId=d;SharedAccessKey=cGFzc3dvcmQ="
                    .to_string(),
            sas_token_validity: "1w".to_string(),
            ..Default::default()
        });
        let identity = resolver.resolve().await.unwrap();
        assert_eq!(identity.token_validity, DEFAULT_SAS_TOKEN_VALIDITY);
    }

    #[tokio::test]
    async fn test_shared_access_key_not_base64() {
        let result = resolver("HostName=h.azure-devices.net;DeviceId=d;SharedAccessKey=%%%")
            .resolve()
            .await;
        assert!(matches!(result, Err(ConnectorError::InvalidCredential(_))));
    }

    #[tokio::test]
    async fn test_shared_access_key_requires_host_and_device() {
        let result = resolver("DeviceId=d;SharedAccessKey=cGFzc3dvcmQ=")
            .resolve()
            .await;
        assert!(matches!(
            result,
            Err(ConnectorError::MissingRequiredProperty {
                property: "HostName"
            })
        ));

        let result = resolver("HostName=h.azure-devices.net;SharedAccessKey=cGFzc3dvcmQ=")
            .resolve()
            .await;
        assert!(matches!(
            result,
            Err(ConnectorError::MissingRequiredProperty {
                property: "DeviceId"
            })
        ));
    }

    #[tokio::test]
    async fn test_shared_access_key_invalid_host() {
        let result = resolver("HostName=malformed-host-name;DeviceId=d;SharedAccessKey=cGFzc3dvcmQ=")
            .resolve()
            .await;
        assert!(matches!(result, Err(ConnectorError::InvalidHostName { .. })));
    }

    #[tokio::test]
    async fn test_malformed_connection_string() {
        let result = resolver("HostName=h;DeviceId").resolve().await;
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidConnectionString { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_certificate_files() {
        let cases = [
            ("", "", "cert/key pair"),
            ("", "device.key", "client cert file"),
            ("device.crt", "", "private key file"),
        ];
        for (cert, key, expected) in cases {
            let resolver = ConnectionSettingsResolver::new(ConnectorSettings {
                connection_string: "HostName=h.azure-devices.net;DeviceId=d".to_string(),
                cert: cert.to_string(),
                key: key.to_string(),
                ..Default::default()
            });
            match resolver.resolve().await {
                Err(ConnectorError::MissingCertificateFiles { missing }) => {
                    assert_eq!(missing, expected)
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_inconsistent_host_device() {
        for (connection_string, expected_missing) in [
            ("HostName=h.azure-devices.net", "DeviceId"),
            ("DeviceId=d", "HostName"),
        ] {
            let resolver = ConnectionSettingsResolver::new(ConnectorSettings {
                connection_string: connection_string.to_string(),
                cert: "device.crt".to_string(),
                key: "device.key".to_string(),
                ..Default::default()
            });
            match resolver.resolve().await {
                Err(ConnectorError::InconsistentHostDeviceSpecification { missing, .. }) => {
                    assert_eq!(missing, expected_missing)
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_delete_file_if_empty() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        let filled = dir.path().join("filled.json");
        std::fs::write(&empty, "").unwrap();
        std::fs::write(&filled, "{}").unwrap();

        delete_file_if_empty(&empty).await;
        delete_file_if_empty(&filled).await;
        delete_file_if_empty(&dir.path().join("missing.json")).await;

        assert!(!empty.exists());
        assert!(filled.exists());
    }
}
