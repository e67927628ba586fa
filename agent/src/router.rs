use async_trait::async_trait;
use connector::common::ConnectorError;
use connector::routing::{
    GatewayParams, Message, PARAMS_REQUEST_TOPIC, PARAMS_RESPONSE_TOPIC, RoutingTable,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Destination of routed messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), ConnectorError>;
}

/// Moves messages between the local broker and the hub until shutdown.
pub struct Router {
    routes: RoutingTable,
    local: Arc<dyn MessageSink>,
    hub: Arc<dyn MessageSink>,
    params: Option<GatewayParams>,
}

impl Router {
    pub fn new(routes: RoutingTable, local: Arc<dyn MessageSink>, hub: Arc<dyn MessageSink>) -> Self {
        Self {
            routes,
            local,
            hub,
            params: None,
        }
    }

    /// Answers gateway parameter requests from the local broker with `params`.
    pub fn with_gateway_params(mut self, params: GatewayParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Runs until `shutdown` fires or both inbound channels are closed.
    pub async fn run(
        self,
        from_local: flume::Receiver<Message>,
        from_hub: flume::Receiver<Message>,
        shutdown: CancellationToken,
    ) {
        let mut local_open = true;
        let mut hub_open = true;

        while local_open || hub_open {
            let forwarded = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = from_local.recv_async(), if local_open => match received {
                    Ok(message) => until_cancelled(&shutdown, self.forward_local(&message)).await,
                    Err(_) => {
                        local_open = false;
                        true
                    }
                },
                received = from_hub.recv_async(), if hub_open => match received {
                    Ok(message) => until_cancelled(&shutdown, self.forward_command(&message)).await,
                    Err(_) => {
                        hub_open = false;
                        true
                    }
                },
            };
            if !forwarded {
                log::debug!("Shutdown requested while forwarding a message");
                break;
            }
        }

        log::debug!("Message router stopped");
    }

    async fn forward_local(&self, message: &Message) {
        if message.topic == PARAMS_REQUEST_TOPIC {
            if let Some(params) = &self.params {
                self.answer_params_request(params).await;
            }
            return;
        }
        self.forward_telemetry(message).await;
    }

    async fn answer_params_request(&self, params: &GatewayParams) {
        let payload = match params.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Failed to encode gateway parameters: {e}");
                return;
            }
        };
        if let Err(e) = self.local.send(PARAMS_RESPONSE_TOPIC, payload).await {
            log::warn!("Failed to answer gateway parameters request: {e}");
        }
    }

    async fn forward_telemetry(&self, message: &Message) {
        for outgoing in self.routes.dispatch_telemetry(message) {
            if let Err(e) = self.hub.send(&outgoing.topic, outgoing.payload).await {
                log::warn!("Failed to forward telemetry from '{}' to the hub: {e}", message.topic);
            }
        }
    }

    async fn forward_command(&self, message: &Message) {
        for outgoing in self.routes.dispatch_command(message) {
            if let Err(e) = self.local.send(&outgoing.topic, outgoing.payload).await {
                log::warn!(
                    "Failed to forward command to local topic '{}': {e}",
                    outgoing.topic
                );
            }
        }
    }
}

/// Runs `task` unless `shutdown` fires first; `false` when it was cut short.
async fn until_cancelled(shutdown: &CancellationToken, task: impl Future<Output = ()>) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = task => true,
    }
}
