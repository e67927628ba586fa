use super::client::{HttpRequest, HttpResponse, ProvisioningHttpClient};
use super::models::{DeviceInfoResponse, ProvisioningRecord, RegisterDeviceRequest, ResponseError};
use crate::auth::ConnectionIdentity;
use crate::common::ConnectorError;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_PROVISIONING_HOST: &str = "global.azure-devices-provisioning.net";
pub const PROVISIONING_API_VERSION: &str = "2021-06-01";

const STATUS_OK: u16 = 200;
const STATUS_ACCEPTED: u16 = 202;

/// Client of the device provisioning protocol with a disk-backed assignment cache.
///
/// A call to [`get_device_data`](Self::get_device_data) first looks at the cache. A
/// usable cached record is returned without touching the network. Otherwise the
/// device is registered, the assignment is polled once after the server provided
/// retry period, and the result is written to the cache.
///
/// The cache is any seekable async read/write handle, normally the provisioning
/// file. Access is not synchronized, so a single service must own the cache for the
/// duration of a call.
pub struct ProvisioningService<F> {
    client: Option<Arc<dyn ProvisioningHttpClient>>,
    cache: F,
    host: String,
}

impl<F> ProvisioningService<F>
where
    F: AsyncRead + AsyncWrite + AsyncSeek + Unpin + Send,
{
    /// `client` may be `None` when the cache is expected to satisfy the request.
    pub fn new(client: Option<Arc<dyn ProvisioningHttpClient>>, cache: F) -> Self {
        Self {
            client,
            cache,
            host: DEFAULT_PROVISIONING_HOST.to_string(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn into_cache(self) -> F {
        self.cache
    }

    /// Returns the hub assignment of the device.
    ///
    /// `identity.device_id` is used as registration id.
    ///
    /// # Errors
    ///
    /// Cache errors ([`ConnectorError::CorruptCache`], [`ConnectorError::EmptyCache`],
    /// [`ConnectorError::InvalidCachedRecord`]) are returned without contacting the
    /// service. A failure to write the cache after a successful registration is only
    /// logged.
    pub async fn get_device_data(
        &mut self,
        id_scope: &str,
        identity: &ConnectionIdentity,
    ) -> Result<ProvisioningRecord, ConnectorError> {
        if let Some(record) = self.read_cached_record().await? {
            log::info!(
                "Using cached provisioning data for device '{}'",
                record.device_id
            );
            return Ok(record);
        }

        if id_scope.is_empty() {
            return Err(ConnectorError::MissingIdScope);
        }
        let client = self
            .client
            .clone()
            .ok_or(ConnectorError::ClientNotInitialized)?;

        let device_info = self
            .request_device_info(client.as_ref(), id_scope, &identity.device_id)
            .await?;
        let record = ProvisioningRecord::from_registration_state(&device_info.registration_state)?;

        if let Err(e) = self.persist_record(&record).await {
            log::warn!("Error occurred while writing provisioning data to disk: {e}");
        }

        Ok(record)
    }

    async fn read_cached_record(&mut self) -> Result<Option<ProvisioningRecord>, ConnectorError> {
        self.cache.seek(SeekFrom::Start(0)).await?;
        let mut contents = Vec::new();
        self.cache.read_to_end(&mut contents).await?;

        if contents.is_empty() {
            return Ok(None);
        }

        // a `null` document holds no record at all
        let record: Option<ProvisioningRecord> = serde_json::from_slice(&contents)
            .map_err(|e| ConnectorError::CorruptCache(e.to_string()))?;
        let record = match record {
            Some(record) if !record.is_empty() => record,
            _ => return Err(ConnectorError::EmptyCache),
        };
        if let Some(missing) = record.missing_field() {
            return Err(ConnectorError::InvalidCachedRecord { missing });
        }

        Ok(Some(record))
    }

    async fn request_device_info(
        &self,
        client: &dyn ProvisioningHttpClient,
        id_scope: &str,
        device_id: &str,
    ) -> Result<DeviceInfoResponse, ConnectorError> {
        let request = RegisterDeviceRequest {
            registration_id: device_id.to_string(),
        };
        let body = serde_json::to_vec(&request)
            .map_err(|e| ConnectorError::RegistrationError(e.to_string()))?;

        let url = register_url(&self.host, id_scope, device_id);
        log::info!("Registering device '{device_id}' in scope '{id_scope}'");
        let response = client
            .execute(HttpRequest::put_json(url, body))
            .await
            .map_err(|e| ConnectorError::RegistrationError(e.to_string()))?;
        check_status(&response, STATUS_ACCEPTED).map_err(ConnectorError::RegistrationError)?;

        let registration: DeviceInfoResponse =
            serde_json::from_slice(&response.body).map_err(|e| {
                ConnectorError::RegistrationError(format!(
                    "error on unmarshalling registration response body: {e}"
                ))
            })?;

        if !registration.registration_state.is_empty() {
            log::debug!("Registration response already carries the device assignment");
            return Ok(registration);
        }

        let retry_after = parse_retry_after(response.retry_after.as_deref())?;
        log::debug!(
            "Waiting {}s before polling registration operation '{}'",
            retry_after.as_secs(),
            registration.operation_id
        );
        tokio::time::sleep(retry_after).await;

        let url = operation_url(&self.host, id_scope, device_id, &registration.operation_id);
        let response = client
            .get(&url)
            .await
            .map_err(|e| ConnectorError::PollError(e.to_string()))?;
        check_status(&response, STATUS_OK).map_err(ConnectorError::PollError)?;

        serde_json::from_slice(&response.body).map_err(|e| {
            ConnectorError::PollError(format!("error on unmarshalling device info body: {e}"))
        })
    }

    async fn persist_record(&mut self, record: &ProvisioningRecord) -> Result<(), ConnectorError> {
        let contents = serde_json::to_vec(record)
            .map_err(|e| ConnectorError::CorruptCache(e.to_string()))?;

        self.cache.seek(SeekFrom::Start(0)).await?;
        self.cache.write_all(&contents).await?;
        self.cache.flush().await?;
        Ok(())
    }
}

pub fn register_url(host: &str, id_scope: &str, device_id: &str) -> String {
    format!(
        "https://{host}/{id_scope}/registrations/{device_id}/register?api-version={PROVISIONING_API_VERSION}"
    )
}

pub fn operation_url(host: &str, id_scope: &str, device_id: &str, operation_id: &str) -> String {
    format!(
        "https://{host}/{id_scope}/registrations/{device_id}/operations/{operation_id}?api-version={PROVISIONING_API_VERSION}"
    )
}

fn parse_retry_after(value: Option<&str>) -> Result<Duration, ConnectorError> {
    let value = value.unwrap_or_default();
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConnectorError::RetryPeriodParseError {
            value: value.to_string(),
        })
}

fn check_status(response: &HttpResponse, expected: u16) -> Result<(), String> {
    if response.status == expected {
        return Ok(());
    }

    match serde_json::from_slice::<ResponseError>(&response.body) {
        Ok(error) => Err(format!(
            "expected status code {expected}, but got {}, message: {}{}",
            response.status, error.message, error.detail
        )),
        Err(_) => Err("cannot unmarshal response error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::HttpError;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned responses in order and records the requests.
    struct MockHttpClient {
        responses: Mutex<Vec<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
        call_count: AtomicU32,
    }

    impl MockHttpClient {
        fn new(mut responses: Vec<Result<HttpResponse, HttpError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
                call_count: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProvisioningHttpClient for MockHttpClient {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| panic!("unexpected HTTP request"))
        }
    }

    fn response(status: u16, retry_after: Option<&str>, body: &str) -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse {
            status,
            retry_after: retry_after.map(str::to_string),
            body: body.as_bytes().to_vec(),
        })
    }

    fn identity() -> ConnectionIdentity {
        ConnectionIdentity {
            device_id: "dummy-device".to_string(),
            ..Default::default()
        }
    }

    const ASSIGNED: &str = r#"{"operationId":"op-1","status":"assigned","registrationState":{"assignedHub":"dummy-hub.azure-devices.net","deviceId":"dummy-device","status":"assigned"}}"#;
    const ASSIGNING: &str = r#"{"operationId":"op-1","status":"assigning"}"#;

    #[tokio::test]
    async fn test_cached_record_skips_network() {
        let cache = Cursor::new(
            br#"{"assignedHub":"dummy-hub.azure-devices.net","deviceId":"dummy-device"}"#.to_vec(),
        );
        let client = MockHttpClient::new(vec![]);
        let mut service = ProvisioningService::new(Some(client.clone() as _), cache);

        for _ in 0..3 {
            let record = service.get_device_data("scope", &identity()).await.unwrap();
            assert_eq!(record.assigned_hub, "dummy-hub.azure-devices.net");
            assert_eq!(record.device_id, "dummy-device");
        }
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cache() {
        let mut service = ProvisioningService::new(None, Cursor::new(b"{not json".to_vec()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::CorruptCache(_))));
    }

    #[tokio::test]
    async fn test_empty_record_cache() {
        let mut service = ProvisioningService::new(None, Cursor::new(b"{}".to_vec()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::EmptyCache)));
    }

    #[tokio::test]
    async fn test_null_cache_is_empty() {
        let mut service = ProvisioningService::new(None, Cursor::new(b"null".to_vec()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::EmptyCache)));
    }

    #[tokio::test]
    async fn test_cached_record_missing_device_id() {
        let cache = Cursor::new(br#"{"assignedHub":"dummy-hub.azure-devices.net"}"#.to_vec());
        let mut service = ProvisioningService::new(None, cache);
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidCachedRecord {
                missing: "deviceId"
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_id_scope() {
        let client = MockHttpClient::new(vec![]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));
        let result = service.get_device_data("", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::MissingIdScope)));
    }

    #[tokio::test]
    async fn test_client_not_initialized() {
        let mut service = ProvisioningService::new(None, Cursor::new(Vec::new()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::ClientNotInitialized)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_then_poll() {
        let client = MockHttpClient::new(vec![
            response(202, Some("3"), ASSIGNING),
            response(200, None, ASSIGNED),
        ]);
        let mut service = ProvisioningService::new(Some(client.clone() as _), Cursor::new(Vec::new()))
            .with_host("dps.example.test");

        let record = service.get_device_data("0ne000", &identity()).await.unwrap();
        assert_eq!(record.assigned_hub, "dummy-hub.azure-devices.net");
        assert_eq!(client.calls(), 2);

        let requests = client.requests.lock().unwrap();
        assert_eq!(
            requests[0].url,
            "https://dps.example.test/0ne000/registrations/dummy-device/register?api-version=2021-06-01"
        );
        assert_eq!(requests[0].body, br#"{"registrationId":"dummy-device"}"#.to_vec());
        assert_eq!(
            requests[1].url,
            "https://dps.example.test/0ne000/registrations/dummy-device/operations/op-1?api-version=2021-06-01"
        );
        drop(requests);

        let cache = service.into_cache().into_inner();
        assert_eq!(
            String::from_utf8(cache).unwrap(),
            r#"{"assignedHub":"dummy-hub.azure-devices.net","deviceId":"dummy-device"}"#
        );
    }

    #[tokio::test]
    async fn test_immediate_assignment_skips_polling() {
        let client = MockHttpClient::new(vec![response(202, None, ASSIGNED)]);
        let mut service = ProvisioningService::new(Some(client.clone() as _), Cursor::new(Vec::new()));

        let record = service.get_device_data("scope", &identity()).await.unwrap();
        assert_eq!(record.device_id, "dummy-device");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_registration_rejected_with_error_body() {
        let client = MockHttpClient::new(vec![response(
            401,
            None,
            r#"{"message":"Unauthorized","detail":" - bad certificate"}"#,
        )]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));

        match service.get_device_data("scope", &identity()).await {
            Err(ConnectorError::RegistrationError(message)) => {
                assert!(message.contains("but got 401"));
                assert!(message.contains("Unauthorized - bad certificate"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_rejected_without_error_body() {
        let client = MockHttpClient::new(vec![response(500, None, "")]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));

        match service.get_device_data("scope", &identity()).await {
            Err(ConnectorError::RegistrationError(message)) => {
                assert_eq!(message, "cannot unmarshal response error")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_transport_failure() {
        let client = MockHttpClient::new(vec![Err(HttpError::RequestFailed {
            url: "https://dps".to_string(),
            reason: "connection refused".to_string(),
        })]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::RegistrationError(_))));
    }

    #[tokio::test]
    async fn test_invalid_retry_after() {
        for retry_after in [None, Some("soon")] {
            let client = MockHttpClient::new(vec![response(202, retry_after, ASSIGNING)]);
            let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));
            let result = service.get_device_data("scope", &identity()).await;
            assert!(matches!(
                result,
                Err(ConnectorError::RetryPeriodParseError { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_poll_failure() {
        let client = MockHttpClient::new(vec![
            response(202, Some("0"), ASSIGNING),
            response(404, None, r#"{"message":"Not found"}"#),
        ]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(result, Err(ConnectorError::PollError(_))));
    }

    #[tokio::test]
    async fn test_poll_without_assignment() {
        let client = MockHttpClient::new(vec![
            response(202, Some("0"), ASSIGNING),
            response(200, None, ASSIGNING),
        ]);
        let mut service = ProvisioningService::new(Some(client as _), Cursor::new(Vec::new()));
        let result = service.get_device_data("scope", &identity()).await;
        assert!(matches!(
            result,
            Err(ConnectorError::IncompleteAssignment {
                missing: "assignedHub"
            })
        ));

        assert!(service.into_cache().into_inner().is_empty());
    }
}
