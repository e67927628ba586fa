use crate::mqtt::{HubMqttClient, LocalMqttClient};
use crate::router::Router;
use anyhow::{Context, Result};
use connector::auth::{ConnectionIdentity, ConnectionSettingsResolver, TokenRefreshService};
use connector::common::ConnectorError;
use connector::config::ConnectorSettings;
use connector::hub::{CredentialsProvider, HubConnectionConfig, HubTransport, ReconnectBackoff};
use connector::routing::{
    ConnectionStatus, GatewayParams, HandlerRegistry, PARAMS_REQUEST_TOPIC,
    PassthroughCommandHandler, PassthroughTelemetryHandler, RoutingTable, StatusCause, send_status,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TEARDOWN_STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the routing table with the handlers this gateway runs.
pub fn build_routes(settings: &ConnectorSettings, identity: &ConnectionIdentity) -> RoutingTable {
    HandlerRegistry::new()
        .with_telemetry_handler(Box::new(PassthroughTelemetryHandler::new(
            settings.telemetry_topics(),
        )))
        .with_command_handler(Box::new(PassthroughCommandHandler::new(
            settings.passthrough_command_topic.clone(),
        )))
        .initialize(identity)
}

/// Runs the bridge until a shutdown signal arrives or the hub connection is lost
/// for good.
pub async fn run(settings: ConnectorSettings) -> Result<()> {
    let identity = ConnectionSettingsResolver::new(settings.clone())
        .resolve()
        .await
        .context("Failed to resolve the hub connection settings")?;
    log::info!(
        "Resolved device '{}' on hub '{}' using {:?} authentication",
        identity.device_id,
        identity.hub_name,
        identity.auth_method()
    );

    let routes = build_routes(&settings, &identity);
    let hub_config = HubConnectionConfig::load(&settings, &identity, ReconnectBackoff::from_env())
        .await
        .context("Failed to configure the hub connection")?;
    log::debug!("Hub connection configuration: {hub_config:?}");

    let shutdown = CancellationToken::new();
    let (local_tx, local_rx) = flume::unbounded();
    let (hub_tx, hub_rx) = flume::unbounded();

    let params = GatewayParams::for_identity(&identity, &settings.tenant_id);
    log::info!(
        "Gateway parameters: device '{}', tenant '{}'",
        params.device_id,
        params.tenant_id
    );
    let local = Arc::new(LocalMqttClient::start(&settings.local, local_tx, &params));
    local.subscribe(PARAMS_REQUEST_TOPIC).await?;
    for topic in routes.local_subscriptions() {
        local.subscribe(&topic).await?;
    }

    let hub = Arc::new(HubMqttClient::new(
        hub_config,
        hub_tx,
        local.clone(),
        shutdown.clone(),
    ));
    let credentials = CredentialsProvider::new(&identity)
        .credentials()
        .context("Failed to create hub credentials")?;

    let connected = tokio::select! {
        result = hub.connect(credentials) => Some(result),
        _ = wait_for_shutdown_signal() => None,
    };
    match connected {
        Some(result) => result.context("Failed to connect to the hub")?,
        None => {
            log::info!("Shutdown requested before the hub connection was established");
            shutdown.cancel();
            return teardown(&local, hub.as_ref()).await;
        }
    }
    send_status(local.as_ref(), ConnectionStatus::connected()).await;

    for topic in routes.hub_subscriptions() {
        hub.subscribe(&topic).await?;
    }

    let refresh = TokenRefreshService::for_identity(
        &identity,
        hub.clone(),
        local.clone(),
        shutdown.clone(),
    )
    .map(|service| {
        log::info!(
            "SAS token refresh every {}s",
            service.refresh_interval().as_secs()
        );
        service.start()
    });

    let router = tokio::spawn(
        Router::new(routes, local.clone(), hub.clone())
            .with_gateway_params(params)
            .run(local_rx, hub_rx, shutdown.clone()),
    );

    let outcome = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            log::info!("Shutting down gracefully...");
            Ok(())
        }
        result = refresh_outcome(refresh) => result,
    };

    shutdown.cancel();
    if let Err(e) = router.await {
        log::warn!("Message router task failed: {e}");
    }
    teardown(&local, hub.as_ref()).await?;

    outcome
}

async fn teardown(local: &LocalMqttClient, hub: &dyn HubTransport) -> Result<()> {
    let closed = send_status(
        local,
        ConnectionStatus::disconnected(StatusCause::ConnectionClosed),
    );
    if tokio::time::timeout(TEARDOWN_STATUS_TIMEOUT, closed).await.is_err() {
        log::warn!("Timed out publishing the connection closed status");
    }

    if let Err(e) = hub.disconnect().await {
        log::warn!("Error while disconnecting from the hub: {e}");
    }
    local
        .disconnect()
        .await
        .context("Failed to disconnect from the local broker")?;

    log::info!("Bridge stopped");
    Ok(())
}

/// Completes when the token refresh service ends, never when there is none.
async fn refresh_outcome(handle: Option<JoinHandle<Result<(), ConnectorError>>>) -> Result<()> {
    match handle {
        Some(handle) => handle
            .await
            .context("Token refresh task failed")?
            .context("Lost the hub connection after a token refresh"),
        None => std::future::pending().await,
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => log::warn!("Cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for the interrupt signal: {e}");
        std::future::pending::<()>().await;
    }
}
