use super::topics::{command_subscription_topic, telemetry_topic};
use super::{Message, MessageHandler};
use crate::auth::ConnectionIdentity;
use crate::common::ConnectorError;
use std::collections::BTreeSet;
use uuid::Uuid;

pub const TELEMETRY_HANDLER_NAME: &str = "passthrough_telemetry_handler";
pub const COMMAND_HANDLER_NAME: &str = "passthrough_command_handler";

/// Forwards local messages unchanged to the device-to-cloud hub topic.
pub struct PassthroughTelemetryHandler {
    topics: BTreeSet<String>,
    device_id: String,
}

impl PassthroughTelemetryHandler {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            device_id: String::new(),
        }
    }
}

impl MessageHandler for PassthroughTelemetryHandler {
    fn name(&self) -> &str {
        TELEMETRY_HANDLER_NAME
    }

    fn topics(&self) -> BTreeSet<String> {
        self.topics.clone()
    }

    fn init(&mut self, identity: &ConnectionIdentity) -> Result<(), ConnectorError> {
        self.device_id = identity.device_id.clone();
        Ok(())
    }

    fn handle(&self, message: &Message) -> Result<Vec<Message>, ConnectorError> {
        let id = Uuid::new_v4().to_string();
        let topic = telemetry_topic(&self.device_id, &id);
        Ok(vec![Message {
            id,
            topic,
            payload: message.payload.clone(),
        }])
    }
}

/// Forwards cloud-to-device messages unchanged to a local topic.
pub struct PassthroughCommandHandler {
    local_topic: String,
    subscription: String,
}

impl PassthroughCommandHandler {
    pub fn new(local_topic: impl Into<String>) -> Self {
        Self {
            local_topic: local_topic.into(),
            subscription: String::new(),
        }
    }
}

impl MessageHandler for PassthroughCommandHandler {
    fn name(&self) -> &str {
        COMMAND_HANDLER_NAME
    }

    fn topics(&self) -> BTreeSet<String> {
        if self.subscription.is_empty() {
            BTreeSet::new()
        } else {
            BTreeSet::from([self.subscription.clone()])
        }
    }

    fn init(&mut self, identity: &ConnectionIdentity) -> Result<(), ConnectorError> {
        if self.local_topic.is_empty() {
            return Err(ConnectorError::Configuration(
                "the passthrough command topic cannot be empty".to_string(),
            ));
        }
        self.subscription = command_subscription_topic(&identity.device_id);
        Ok(())
    }

    fn handle(&self, message: &Message) -> Result<Vec<Message>, ConnectorError> {
        Ok(vec![Message::new(
            self.local_topic.clone(),
            message.payload.clone(),
        )])
    }
}
