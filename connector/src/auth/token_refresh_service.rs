use super::sas_token_generator::refresh_interval;
use super::types::{AuthMethod, ConnectionIdentity};
use crate::common::ConnectorError;
use crate::hub::{CredentialsProvider, HubTransport};
use crate::routing::{ConnectionStatus, StatusCause, StatusPublisher, send_status};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Callback for handling a failed reconnect after a token refresh
pub type RefreshFailureCallback = Arc<dyn Fn(&ConnectorError) + Send + Sync>;

/// Service that rotates the SAS token of a live hub connection before it expires.
///
/// Every `token_validity * 0.9` it disconnects the hub transport, publishes a
/// `CONNECTION_TOKEN_EXPIRED` status, signs a new token and reconnects. A failed
/// reconnect ends the service with an error; it is not retried here.
pub struct TokenRefreshService {
    credentials: CredentialsProvider,
    interval: Duration,
    transport: Arc<dyn HubTransport>,
    status: Arc<dyn StatusPublisher>,
    shutdown: CancellationToken,
    failure_callback: Option<RefreshFailureCallback>,
}

impl TokenRefreshService {
    /// Creates the service for a SAS identity, `None` for certificate identities.
    pub fn for_identity(
        identity: &ConnectionIdentity,
        transport: Arc<dyn HubTransport>,
        status: Arc<dyn StatusPublisher>,
        shutdown: CancellationToken,
    ) -> Option<Self> {
        if identity.auth_method() != AuthMethod::SasToken {
            return None;
        }

        Some(Self {
            credentials: CredentialsProvider::new(identity),
            interval: refresh_interval(identity.token_validity),
            transport,
            status,
            shutdown,
            failure_callback: None,
        })
    }

    /// Set a callback to be invoked when reconnecting after a refresh fails
    pub fn with_failure_callback(mut self, callback: RefreshFailureCallback) -> Self {
        self.failure_callback = Some(callback);
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        self.interval
    }

    /// Start the background refresh loop
    pub fn start(self) -> tokio::task::JoinHandle<Result<(), ConnectorError>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) -> Result<(), ConnectorError> {
        log::debug!(
            "SAS token refresh scheduled every {}s",
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::info!("Token refresh service shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.refresh().await {
                        log::error!("Failed to reconnect to the hub after token refresh: {e}");
                        if let Some(callback) = &self.failure_callback {
                            callback(&e);
                        }
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn refresh(&self) -> Result<(), ConnectorError> {
        log::debug!("SAS token validity period is about to expire");

        if let Err(e) = self.transport.disconnect().await {
            log::warn!("Error while disconnecting from the hub: {e}");
        }
        send_status(
            self.status.as_ref(),
            ConnectionStatus::disconnected(StatusCause::ConnectionTokenExpired),
        )
        .await;

        let credentials = self.credentials.credentials()?;
        self.transport.connect(credentials).await?;

        log::info!("Reconnected to the hub with a refreshed SAS token");
        Ok(())
    }
}
