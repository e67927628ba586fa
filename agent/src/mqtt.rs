//! MQTT adapters over `rumqttc`.
//!
//! [`HubMqttClient`] implements the connector's [`HubTransport`] towards the hub and
//! [`LocalMqttClient`] talks to the local broker and publishes connection status
//! events. Both poll their event loop on a tokio task and forward incoming publishes
//! to the router over a `flume` channel.

use crate::router::MessageSink;
use async_trait::async_trait;
use connector::common::ConnectorError;
use connector::config::LocalBrokerSettings;
use connector::hub::{HubConnectionConfig, HubCredentials, HubTransport};
use connector::routing::{
    ConnectionStatus, GatewayParams, Message, PARAMS_RESPONSE_TOPIC, STATUS_TOPIC, StatusCause,
    StatusPublisher, send_status,
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, TlsConfiguration, Transport,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const LOCAL_RECONNECT_DELAY: Duration = Duration::from_secs(2);

type Subscriptions = Arc<Mutex<BTreeSet<String>>>;

fn transport_error(e: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::Transport(e.to_string())
}

fn is_not_authorized(error: &ConnectionError) -> bool {
    matches!(
        error,
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword
        )
    )
}

fn snapshot(subscriptions: &Subscriptions) -> Vec<String> {
    subscriptions
        .lock()
        .map(|topics| topics.iter().cloned().collect())
        .unwrap_or_default()
}

fn forward_publish(incoming: &flume::Sender<Message>, topic: String, payload: &[u8]) {
    if incoming.send(Message::new(topic, payload.to_vec())).is_err() {
        log::debug!("Router is gone, dropping incoming message");
    }
}

/// Re-issues every subscription after a (re)connect, clean sessions forget them.
fn resubscribe(client: &AsyncClient, subscriptions: &Subscriptions) {
    for topic in snapshot(subscriptions) {
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            log::warn!("Failed to subscribe to '{topic}': {e}");
        }
    }
}

struct Session {
    client: AsyncClient,
    driver: JoinHandle<()>,
}

impl Session {
    /// Bounded by [`DISCONNECT_TIMEOUT`] even when the request queue is full.
    async fn close(mut self) -> Result<(), ConnectorError> {
        let result = match tokio::time::timeout(DISCONNECT_TIMEOUT, self.client.disconnect()).await {
            Ok(sent) => sent.map_err(transport_error),
            Err(_) => Err(ConnectorError::Transport(
                "timed out queueing the disconnect request".to_string(),
            )),
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut self.driver)
            .await
            .is_err()
        {
            self.driver.abort();
        }
        result
    }
}

/// MQTT connection to the hub.
///
/// Every [`connect`](HubTransport::connect) starts a new session with the given
/// credentials. Transient failures are retried with the configured backoff; a
/// refused authorization is returned immediately.
pub struct HubMqttClient {
    config: HubConnectionConfig,
    incoming: flume::Sender<Message>,
    status: Arc<dyn StatusPublisher>,
    shutdown: CancellationToken,
    subscriptions: Subscriptions,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl HubMqttClient {
    pub fn new(
        config: HubConnectionConfig,
        incoming: flume::Sender<Message>,
        status: Arc<dyn StatusPublisher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            incoming,
            status,
            shutdown,
            subscriptions: Arc::default(),
            session: tokio::sync::Mutex::new(None),
        }
    }

    fn mqtt_options(&self, credentials: &HubCredentials) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_credentials(credentials.username.as_str(), credentials.password.as_str());
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca: self.config.ca_cert_pem.clone(),
            alpn: None,
            client_auth: self.config.client_auth.clone(),
        }));
        options
    }

    async fn connected_session(&self) -> Result<AsyncClient, ConnectorError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or_else(|| ConnectorError::Transport("not connected to the hub".to_string()))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

#[async_trait]
impl HubTransport for HubMqttClient {
    async fn connect(&self, credentials: HubCredentials) -> Result<(), ConnectorError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            if let Err(e) = previous.close().await {
                log::debug!("Previous hub session did not close cleanly: {e}");
            }
        }

        let mut attempt = 0;
        loop {
            let (client, mut eventloop) =
                AsyncClient::new(self.mqtt_options(&credentials), REQUEST_CHANNEL_CAPACITY);

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(ConnectorError::Transport(
                        "shutdown requested while connecting to the hub".to_string(),
                    ));
                }
                outcome = wait_for_connack(&mut eventloop) => outcome,
            };
            match outcome {
                Ok(()) => {
                    log::info!(
                        "Connected to hub {}:{} as '{}'",
                        self.config.host,
                        self.config.port,
                        self.config.client_id
                    );
                    resubscribe(&client, &self.subscriptions);
                    let driver = tokio::spawn(drive_hub_events(
                        eventloop,
                        client.clone(),
                        self.config.clone(),
                        self.subscriptions.clone(),
                        self.incoming.clone(),
                        self.status.clone(),
                    ));
                    *session = Some(Session { client, driver });
                    return Ok(());
                }
                Err(e) if is_not_authorized(&e) => {
                    send_status(
                        self.status.as_ref(),
                        ConnectionStatus::disconnected(StatusCause::ConnectionNotAuthorized),
                    )
                    .await;
                    return Err(ConnectorError::Transport(format!(
                        "hub refused the connection: {e}"
                    )));
                }
                Err(e) => {
                    let delay = self.config.backoff.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    log::warn!(
                        "Failed to connect to hub {}: {e}, retrying in {}s",
                        self.config.host,
                        delay.as_secs()
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            return Err(ConnectorError::Transport(
                                "shutdown requested while connecting to the hub".to_string(),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                log::info!("Disconnecting from hub {}", self.config.host);
                session.close().await
            }
            None => Ok(()),
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError> {
        self.connected_session()
            .await?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(transport_error)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ConnectorError> {
        if let Ok(mut topics) = self.subscriptions.lock() {
            topics.insert(topic.to_string());
        }
        log::info!("Subscribing to hub topic '{topic}'");
        self.connected_session()
            .await?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(transport_error)
    }
}

#[async_trait]
impl MessageSink for HubMqttClient {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError> {
        self.publish(topic, payload).await
    }
}

async fn drive_hub_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    config: HubConnectionConfig,
    subscriptions: Subscriptions,
    incoming: flume::Sender<Message>,
    status: Arc<dyn StatusPublisher>,
) {
    let mut failures: u32 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                forward_publish(&incoming, publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if failures > 0 {
                    log::info!("Reconnected to hub {}", config.host);
                    failures = 0;
                    resubscribe(&client, &subscriptions);
                    send_status(status.as_ref(), ConnectionStatus::connected()).await;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                let delay = config.backoff.delay(failures);
                if failures == 0 {
                    let cause = if is_not_authorized(&e) {
                        StatusCause::ConnectionNotAuthorized
                    } else {
                        StatusCause::ConnectionError
                    };
                    send_status(status.as_ref(), ConnectionStatus::disconnected(cause)).await;
                }
                failures = failures.saturating_add(1);
                log::warn!(
                    "Hub connection lost: {e}, reconnecting in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    log::debug!("Hub event loop stopped");
}

/// MQTT connection to the local broker.
pub struct LocalMqttClient {
    client: AsyncClient,
    subscriptions: Subscriptions,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LocalMqttClient {
    /// Starts the local broker connection; it (re)connects in the background.
    ///
    /// `params` are published on [`PARAMS_RESPONSE_TOPIC`] after every connect.
    pub fn start(
        settings: &LocalBrokerSettings,
        incoming: flume::Sender<Message>,
        params: &GatewayParams,
    ) -> Self {
        let (client, eventloop) =
            AsyncClient::new(local_mqtt_options(settings), REQUEST_CHANNEL_CAPACITY);
        let subscriptions = Subscriptions::default();
        let announcement = match params.to_payload() {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!("Failed to encode gateway parameters: {e}");
                None
            }
        };

        log::info!(
            "Connecting to local broker {}:{}",
            settings.host,
            settings.port
        );
        let driver = tokio::spawn(drive_local_events(
            eventloop,
            client.clone(),
            subscriptions.clone(),
            incoming,
            announcement,
        ));

        Self {
            client,
            subscriptions,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), ConnectorError> {
        if let Ok(mut topics) = self.subscriptions.lock() {
            topics.insert(topic.to_string());
        }
        log::info!("Subscribing to local topic '{topic}'");
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(transport_error)
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(transport_error)
    }

    /// Flushes queued publishes and closes the connection.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        let driver = self.driver.lock().ok().and_then(|mut driver| driver.take());
        let Some(driver) = driver else {
            return Ok(());
        };

        Session {
            client: self.client.clone(),
            driver,
        }
        .close()
        .await
    }
}

pub fn local_mqtt_options(settings: &LocalBrokerSettings) -> MqttOptions {
    let client_id = if settings.client_id.is_empty() {
        format!("hubbridge-{}", std::process::id())
    } else {
        settings.client_id.clone()
    };

    let mut options = MqttOptions::new(client_id, &settings.host, settings.port);
    options.set_keep_alive(KEEP_ALIVE);
    if !settings.username.is_empty() {
        options.set_credentials(settings.username.as_str(), settings.password.as_str());
    }
    options
}

#[async_trait]
impl StatusPublisher for LocalMqttClient {
    async fn publish_status(&self, status: &ConnectionStatus) -> Result<(), ConnectorError> {
        log::info!(
            "Publishing hub connection status connected={} cause={:?}",
            status.connected,
            status.cause
        );
        self.publish(STATUS_TOPIC, status.to_payload()?).await
    }
}

#[async_trait]
impl MessageSink for LocalMqttClient {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError> {
        self.publish(topic, payload).await
    }
}

fn announce_params(client: &AsyncClient, payload: Vec<u8>) {
    if let Err(e) = client.try_publish(PARAMS_RESPONSE_TOPIC, QoS::AtMostOnce, false, payload) {
        log::warn!("Failed to publish gateway parameters: {e}");
    }
}

async fn drive_local_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    incoming: flume::Sender<Message>,
    announcement: Option<Vec<u8>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                forward_publish(&incoming, publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("Connected to local broker");
                resubscribe(&client, &subscriptions);
                if let Some(payload) = &announcement {
                    announce_params(&client, payload.clone());
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!(
                    "Local broker connection error: {e}, reconnecting in {}s",
                    LOCAL_RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(LOCAL_RECONNECT_DELAY).await;
            }
        }
    }

    log::debug!("Local broker event loop stopped");
}
