//! Message routing between the local broker and the hub.
//!
//! Handlers are registered explicitly by the composition root in a
//! [`HandlerRegistry`]. Once the connection identity is known the registry is
//! initialized into a [`RoutingTable`], which drops handlers that fail to
//! initialize and dispatches incoming messages by topic.

pub mod params;
pub mod passthrough;
pub mod status;
pub mod topics;

pub use params::{GatewayParams, PARAMS_REQUEST_TOPIC, PARAMS_RESPONSE_TOPIC};
pub use passthrough::{PassthroughCommandHandler, PassthroughTelemetryHandler};
pub use status::{ConnectionStatus, STATUS_TOPIC, StatusCause, StatusPublisher, send_status};
pub use topics::{command_subscription_topic, telemetry_topic, topic_matches};

use crate::auth::ConnectionIdentity;
use crate::common::ConnectorError;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message with a fresh random id.
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload,
        }
    }
}

/// A routing capability: consumes messages from a set of topics and produces the
/// messages to forward.
///
/// Telemetry handlers consume local topics and produce hub messages; command
/// handlers consume hub topics and produce local messages. A handler with a single
/// topic simply returns a one-element set.
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Topic filters the handler consumes. Only meaningful after [`init`](Self::init).
    fn topics(&self) -> BTreeSet<String>;

    fn init(&mut self, identity: &ConnectionIdentity) -> Result<(), ConnectorError>;

    fn handle(&self, message: &Message) -> Result<Vec<Message>, ConnectorError>;
}

/// Explicit list of the handlers the connector runs.
#[derive(Default)]
pub struct HandlerRegistry {
    telemetry: Vec<Box<dyn MessageHandler>>,
    command: Vec<Box<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telemetry_handler(mut self, handler: Box<dyn MessageHandler>) -> Self {
        self.telemetry.push(handler);
        self
    }

    pub fn with_command_handler(mut self, handler: Box<dyn MessageHandler>) -> Self {
        self.command.push(handler);
        self
    }

    /// Initializes every handler for the resolved identity.
    ///
    /// Handlers whose initialization fails are skipped, as are telemetry handlers
    /// without any topic.
    pub fn initialize(self, identity: &ConnectionIdentity) -> RoutingTable {
        let telemetry = self
            .telemetry
            .into_iter()
            .filter_map(|handler| init_handler(handler, identity, "telemetry"))
            .filter(|handler| {
                let has_topics = !handler.topics().is_empty();
                if !has_topics {
                    log::error!(
                        "Skipping telemetry handler '{}' without any topics",
                        handler.name()
                    );
                }
                has_topics
            })
            .collect();

        let command = self
            .command
            .into_iter()
            .filter_map(|handler| init_handler(handler, identity, "command"))
            .collect();

        RoutingTable { telemetry, command }
    }
}

fn init_handler(
    mut handler: Box<dyn MessageHandler>,
    identity: &ConnectionIdentity,
    kind: &str,
) -> Option<Box<dyn MessageHandler>> {
    match handler.init(identity) {
        Ok(()) => Some(handler),
        Err(e) => {
            log::error!(
                "Skipping {kind} handler '{}' that cannot be initialized: {e}",
                handler.name()
            );
            None
        }
    }
}

/// Initialized handlers, ready to dispatch messages.
pub struct RoutingTable {
    telemetry: Vec<Box<dyn MessageHandler>>,
    command: Vec<Box<dyn MessageHandler>>,
}

impl RoutingTable {
    pub fn telemetry_routes(&self) -> impl Iterator<Item = &dyn MessageHandler> {
        self.telemetry.iter().map(|handler| handler.as_ref())
    }

    pub fn command_routes(&self) -> impl Iterator<Item = &dyn MessageHandler> {
        self.command.iter().map(|handler| handler.as_ref())
    }

    /// Local broker topics to subscribe to.
    pub fn local_subscriptions(&self) -> BTreeSet<String> {
        self.telemetry.iter().flat_map(|h| h.topics()).collect()
    }

    /// Hub topics to subscribe to.
    pub fn hub_subscriptions(&self) -> BTreeSet<String> {
        self.command.iter().flat_map(|h| h.topics()).collect()
    }

    /// Runs a local message through every telemetry handler consuming its topic.
    pub fn dispatch_telemetry(&self, message: &Message) -> Vec<Message> {
        dispatch(&self.telemetry, message)
    }

    /// Runs a hub message through every command handler consuming its topic.
    pub fn dispatch_command(&self, message: &Message) -> Vec<Message> {
        dispatch(&self.command, message)
    }
}

fn dispatch(handlers: &[Box<dyn MessageHandler>], message: &Message) -> Vec<Message> {
    let mut outgoing = Vec::new();
    for handler in handlers {
        if !handler
            .topics()
            .iter()
            .any(|filter| topic_matches(filter, &message.topic))
        {
            continue;
        }
        match handler.handle(message) {
            Ok(messages) => outgoing.extend(messages),
            Err(e) => log::warn!(
                "Handler '{}' failed on message '{}' from '{}': {e}",
                handler.name(),
                message.id,
                message.topic
            ),
        }
    }
    outgoing
}
