use thiserror::Error;

/// Errors raised while deriving, provisioning or refreshing the hub connection identity.
///
/// Every variant carries enough context to produce a human-readable message naming
/// the offending field or file. Use [`ConnectorError::kind`] to classify an error
/// when the caller only cares about the broad failure category.
///
/// # Examples
///
/// ```no_run
/// use connector::common::{ConnectorError, ErrorKind};
///
/// fn report(error: &ConnectorError) {
///     match error.kind() {
///         ErrorKind::Parse | ErrorKind::Validation => log::error!("Bad configuration: {error}"),
///         ErrorKind::Credential => log::error!("Bad credentials: {error}"),
///         _ => log::error!("Connection bootstrap failed: {error}"),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The connection string contains a segment without a `key=value` pair.
    #[error("malformed connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// A credential (shared access key, key pair) cannot be decoded or used.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// A connection string property required by the selected authentication path is missing.
    #[error("the {property} is required")]
    MissingRequiredProperty { property: &'static str },

    /// Certificate authentication was selected but the cert/key files are not configured.
    #[error("missing connection string and {missing}")]
    MissingCertificateFiles { missing: &'static str },

    /// Only one of `HostName` and `DeviceId` was provided.
    #[error("the {missing} is required when {present} is provided")]
    InconsistentHostDeviceSpecification {
        missing: &'static str,
        present: &'static str,
    },

    /// The host name does not contain the configured hub domain suffix or has no hub prefix.
    #[error("invalid HostName '{host_name}': {reason}")]
    InvalidHostName { host_name: String, reason: String },

    /// Reading a certificate or key file failed.
    #[error("error occurred while reading {file}: {source}")]
    CertificateReadError {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// The device certificate has no PEM block or cannot be parsed.
    #[error("error on parsing the device certificate: {0}")]
    CertificateParseError(String),

    /// The SAS token validity period is not `<positive integer><m|h|d>`.
    #[error("invalid SAS token validity '{value}'")]
    InvalidValidityPeriod { value: String },

    #[error("idScope cannot be empty")]
    MissingIdScope,

    #[error("provisioning HTTP client not initialized")]
    ClientNotInitialized,

    /// The provisioning service rejected or failed the registration request.
    #[error("error on registering device: {0}")]
    RegistrationError(String),

    /// The `Retry-After` header of the registration response is absent or not a number.
    #[error("error on retry period '{value}'")]
    RetryPeriodParseError { value: String },

    /// Polling the registration operation failed.
    #[error("error on getting device info: {0}")]
    PollError(String),

    /// The provisioning service answered without a usable hub assignment.
    #[error("incomplete device assignment: missing {missing}")]
    IncompleteAssignment { missing: &'static str },

    /// The provisioning cache file holds data that is not valid JSON.
    #[error("error on unmarshalling provisioning file: {0}")]
    CorruptCache(String),

    /// The provisioning cache file holds a record with every field empty.
    #[error("provisioning cache holds an empty record")]
    EmptyCache,

    /// The provisioning cache file holds a record with a missing field.
    #[error("invalid cached provisioning record: missing {missing}")]
    InvalidCachedRecord { missing: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The hub transport failed to connect, publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Broad failure category of a [`ConnectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input strings (connection string, validity period, retry period).
    Parse,
    /// Missing or empty required fields (host name, device id, hub name, assigned hub).
    Validation,
    /// Bad base64, unusable key pair or unparsable certificate.
    Credential,
    /// File or network read/write failures.
    Io,
    /// Unexpected HTTP status or malformed provisioning response.
    Protocol,
    /// Corrupt or empty persisted provisioning record.
    Cache,
}

impl ConnectorError {
    /// Classifies the error into its broad category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::InvalidConnectionString { .. }
            | ConnectorError::InvalidValidityPeriod { .. }
            | ConnectorError::RetryPeriodParseError { .. } => ErrorKind::Parse,
            ConnectorError::MissingRequiredProperty { .. }
            | ConnectorError::MissingCertificateFiles { .. }
            | ConnectorError::InconsistentHostDeviceSpecification { .. }
            | ConnectorError::InvalidHostName { .. }
            | ConnectorError::MissingIdScope
            | ConnectorError::ClientNotInitialized
            | ConnectorError::IncompleteAssignment { .. }
            | ConnectorError::Configuration(_) => ErrorKind::Validation,
            ConnectorError::InvalidCredential(_) | ConnectorError::CertificateParseError(_) => {
                ErrorKind::Credential
            }
            ConnectorError::CertificateReadError { .. }
            | ConnectorError::Io(_)
            | ConnectorError::Transport(_) => ErrorKind::Io,
            ConnectorError::RegistrationError(_) | ConnectorError::PollError(_) => {
                ErrorKind::Protocol
            }
            ConnectorError::CorruptCache(_)
            | ConnectorError::EmptyCache
            | ConnectorError::InvalidCachedRecord { .. } => ErrorKind::Cache,
        }
    }
}

/// HTTP-related errors raised by the provisioning HTTP client.
///
/// These describe transport-level failures only. A response with an unexpected
/// status code is not an `HttpError`; the provisioning service inspects the
/// status itself and reports a [`ConnectorError::RegistrationError`] or
/// [`ConnectorError::PollError`].
#[derive(Debug, Error)]
pub enum HttpError {
    /// HTTP client initialization failed.
    ///
    /// Typically caused by an unusable TLS client identity (certificate and
    /// key that cannot be loaded or do not belong together).
    #[error("HTTP client creation failed: {reason}")]
    ClientCreation { reason: String },

    /// HTTP request execution failed.
    #[error("Request failed: {url} - {reason}")]
    RequestFailed { url: String, reason: String },

    /// The response body could not be read.
    #[error("Invalid response: expected {expected}, got {actual}")]
    InvalidResponse { expected: String, actual: String },
}

impl From<HttpError> for ConnectorError {
    fn from(error: HttpError) -> Self {
        match error {
            HttpError::ClientCreation { reason } => ConnectorError::InvalidCredential(reason),
            other => ConnectorError::Transport(other.to_string()),
        }
    }
}
