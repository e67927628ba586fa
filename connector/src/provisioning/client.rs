use crate::auth::DeviceCertificate;
use crate::common::HttpError;
use async_trait::async_trait;

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn put_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Put,
            url: url.into(),
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            body,
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Retry-After` header value, if the server sent one.
    pub retry_after: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP client used by the provisioning service.
///
/// Only [`execute`](ProvisioningHttpClient::execute) must be implemented; `get` and
/// `post` are shorthands over it.
#[async_trait]
pub trait ProvisioningHttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;

    async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.execute(HttpRequest::get(url)).await
    }

    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(HttpRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        })
        .await
    }
}

/// [`ProvisioningHttpClient`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestProvisioningClient {
    http_client: reqwest::Client,
}

impl ReqwestProvisioningClient {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Builds a client presenting the device certificate as TLS client identity.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::ClientCreation`] if the certificate and key cannot be
    /// loaded as a TLS identity.
    pub fn with_identity(certificate: &DeviceCertificate) -> Result<Self, HttpError> {
        let pem = format!("{}\n{}", certificate.cert_pem, certificate.key_pem);
        let identity =
            reqwest::Identity::from_pem(pem.as_bytes()).map_err(|e| HttpError::ClientCreation {
                reason: format!("error on loading X509 key pair: {e}"),
            })?;

        let http_client = reqwest::Client::builder()
            .identity(identity)
            .build()
            .map_err(|e| HttpError::ClientCreation {
                reason: e.to_string(),
            })?;

        Ok(Self::new(http_client))
    }
}

#[async_trait]
impl ProvisioningHttpClient for ReqwestProvisioningClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let builder = match request.method {
            HttpMethod::Get => self.http_client.get(&request.url),
            HttpMethod::Post => self.http_client.post(&request.url),
            HttpMethod::Put => self.http_client.put(&request.url),
        };
        let builder = match &request.content_type {
            Some(content_type) => builder.header(reqwest::header::CONTENT_TYPE, content_type),
            None => builder,
        };

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| HttpError::RequestFailed {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::InvalidResponse {
                expected: "readable response body".to_string(),
                actual: e.to_string(),
            })?
            .to_vec();

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_identity_rejects_garbage() {
        let certificate = DeviceCertificate {
            cert_pem: "not a certificate".to_string(),
            key_pem: "not a key".to_string(),
        };
        assert!(matches!(
            ReqwestProvisioningClient::with_identity(&certificate),
            Err(HttpError::ClientCreation { .. })
        ));
    }

    #[test]
    fn test_put_json_sets_content_type() {
        let request = HttpRequest::put_json("https://example.test", b"{}".to_vec());
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.content_type.as_deref(), Some(CONTENT_TYPE_JSON));
    }
}
