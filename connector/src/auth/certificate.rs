use crate::common::ConnectorError;
use std::fmt;
use std::path::Path;
use x509_parser::pem::parse_x509_pem;

/// PEM contents of the device certificate and its private key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeviceCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

impl fmt::Debug for DeviceCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCertificate")
            .field("cert_pem_len", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl DeviceCertificate {
    /// Reads the device id from the common name of the certificate subject.
    pub fn device_id(&self) -> Result<String, ConnectorError> {
        read_device_id(&self.cert_pem)
    }
}

/// Loads the device certificate and key files.
pub struct CertificateReader;

impl CertificateReader {
    /// Reads both PEM files fully into memory.
    ///
    /// Only I/O failures are errors here; an empty file yields an empty field and is
    /// rejected later by whoever needs its content.
    pub async fn read_pair(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<DeviceCertificate, ConnectorError> {
        let cert_pem = read_pem_file(cert_path.as_ref()).await?;
        let key_pem = read_pem_file(key_path.as_ref()).await?;
        Ok(DeviceCertificate { cert_pem, key_pem })
    }
}

async fn read_pem_file(path: &Path) -> Result<String, ConnectorError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConnectorError::CertificateReadError {
            file: path.display().to_string(),
            source,
        })
}

/// Extracts the subject common name of the first PEM block of `cert_pem`.
pub fn read_device_id(cert_pem: &str) -> Result<String, ConnectorError> {
    let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).map_err(|e| {
        ConnectorError::CertificateParseError(format!("no PEM block in device certificate: {e}"))
    })?;

    let cert = pem
        .parse_x509()
        .map_err(|e| ConnectorError::CertificateParseError(e.to_string()))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .ok_or_else(|| {
            ConnectorError::CertificateParseError("certificate subject has no common name".into())
        })?
        .as_str()
        .map_err(|e| ConnectorError::CertificateParseError(e.to_string()))?;

    if common_name.is_empty() {
        return Err(ConnectorError::CertificateParseError(
            "certificate subject has an empty common name".into(),
        ));
    }

    Ok(common_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    fn self_signed(common_name: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, common_name);
        params.distinguished_name = name;
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn test_read_device_id_from_common_name() {
        let (cert, _) = self_signed("pap-demo-device");
        assert_eq!(read_device_id(&cert).unwrap(), "pap-demo-device");
    }

    #[test]
    fn test_read_device_id_rejects_private_key() {
        let (_, key) = self_signed("pap-demo-device");
        assert!(matches!(
            read_device_id(&key),
            Err(ConnectorError::CertificateParseError(_))
        ));
    }

    #[test]
    fn test_read_device_id_rejects_empty_pem_block() {
        let result = read_device_id("-----BEGIN CERTIFICATE----------END CERTIFICATE-----");
        assert!(matches!(
            result,
            Err(ConnectorError::CertificateParseError(_))
        ));
    }

    #[test]
    fn test_read_device_id_rejects_missing_pem() {
        assert!(read_device_id("").is_err());
        assert!(read_device_id("not a certificate").is_err());
    }

    #[test]
    fn test_read_device_id_without_common_name() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut name = DistinguishedName::new();
        name.push(DnType::OrganizationName, "Gateway Devices");
        params.distinguished_name = name;
        let cert = params.self_signed(&key).unwrap();

        assert!(matches!(
            read_device_id(&cert.pem()),
            Err(ConnectorError::CertificateParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_read_pair_accepts_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("device.crt");
        let key_path = dir.path().join("device.key");
        std::fs::write(&cert_path, "").unwrap();
        std::fs::write(&key_path, "").unwrap();

        let pair = CertificateReader::read_pair(&cert_path, &key_path)
            .await
            .unwrap();
        assert_eq!(pair, DeviceCertificate::default());
    }

    #[tokio::test]
    async fn test_read_pair_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("device.crt");
        std::fs::write(&cert_path, "cert").unwrap();

        let result = CertificateReader::read_pair(&cert_path, dir.path().join("missing.key")).await;
        match result {
            Err(ConnectorError::CertificateReadError { file, .. }) => {
                assert!(file.ends_with("missing.key"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
