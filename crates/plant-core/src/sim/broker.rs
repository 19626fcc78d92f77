use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embassy_time::{Duration, Timer};
use log::info;

use crate::mqtt::{InboundMessage, MqQos, MqttClient};

/// How long an idle [`RecordingClient::poll_inbound`] waits.
const POLL_WINDOW: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    NotConnected,
    Refused,
    LinkDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: MqQos,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        core::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Broker client that logs and records every call.
///
/// Inbound messages are queued by hand; connection failures and link drops
/// can be scripted.
#[derive(Debug, Default)]
pub struct RecordingClient {
    published: Vec<PublishedMessage>,
    subscriptions: Vec<String>,
    inbound: VecDeque<InboundMessage>,
    connected: bool,
    refuse_connects: u32,
    drop_link: bool,
    connects: u32,
    disconnects: u32,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message to be delivered by the next polls.
    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        if let Some(message) = InboundMessage::new(topic, payload) {
            self.inbound.push_back(message);
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&mut self, count: u32) {
        self.refuse_connects = count;
    }

    /// Fail the next poll as if the broker went away.
    pub fn drop_link(&mut self) {
        self.drop_link = true;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connects(&self) -> u32 {
        self.connects
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects
    }

    pub fn published(&self) -> &[PublishedMessage] {
        &self.published
    }

    /// Payloads published to `topic`, oldest first.
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload_str().to_string())
            .collect()
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn clear_published(&mut self) {
        self.published.clear();
    }
}

impl MqttClient for RecordingClient {
    type Error = BrokerError;

    async fn connect(&mut self) -> Result<(), BrokerError> {
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            info!("mqtt(SIM): connection refused");
            return Err(BrokerError::Refused);
        }
        self.connected = true;
        self.drop_link = false;
        self.connects += 1;
        info!("mqtt(SIM): connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        self.connected = false;
        self.disconnects += 1;
        info!("mqtt(SIM): disconnected");
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        };
        info!(
            "mqtt(SIM): publishing to channel='{}' payload={} {:?} retain={}",
            topic,
            message.payload_str(),
            qos,
            retain
        );
        self.published.push(message);
        Ok(())
    }

    async fn subscribe(&mut self, topic_filter: &str, _qos: MqQos) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        info!("mqtt(SIM): subscribed to '{}'", topic_filter);
        self.subscriptions.push(topic_filter.to_string());
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        if self.drop_link {
            self.drop_link = false;
            self.connected = false;
            info!("mqtt(SIM): link dropped");
            return Err(BrokerError::LinkDown);
        }
        if let Some(message) = self.inbound.pop_front() {
            return Ok(Some(message));
        }
        Timer::after(POLL_WINDOW).await;
        Ok(None)
    }
}
