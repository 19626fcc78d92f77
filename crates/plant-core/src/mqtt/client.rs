//! Broker client abstraction.
//!
//! The session only needs a handful of operations, so it talks to the
//! transport through [`MqttClient`] instead of a specific client crate. The
//! firmware implements it on top of rust-mqtt; the simulator and tests use a
//! recording double.

use core::fmt::Debug;

/// Longest topic name accepted from the broker.
pub const TOPIC_CAPACITY: usize = 64;

/// Longest inbound payload accepted from the broker.
pub const PAYLOAD_CAPACITY: usize = 32;

/// MQTT QoS mapping for a minimal, crate-agnostic interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MqQos {
    /// QoS 0: at most once
    AtMostOnce,
    /// QoS 1: at least once
    AtLeastOnce,
}

/// A message received on one of the subscribed topics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: heapless::String<TOPIC_CAPACITY>,
    pub payload: heapless::Vec<u8, PAYLOAD_CAPACITY>,
}

impl InboundMessage {
    /// Copy topic and payload into a message, or `None` if either exceeds its capacity.
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut owned_topic = heapless::String::new();
        owned_topic.push_str(topic).ok()?;
        let owned_payload = heapless::Vec::from_slice(payload).ok()?;

        Some(Self {
            topic: owned_topic,
            payload: owned_payload,
        })
    }
}

/// Minimal MQTT client trait to decouple the session from a specific client crate.
///
/// The last-will message is part of the client's connect configuration.
#[allow(async_fn_in_trait)]
pub trait MqttClient {
    type Error: Debug;

    /// Open the connection to the broker.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the connection. Subsequent operations fail until [`connect`](Self::connect).
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Publish a binary payload to `topic` with the given QoS and retain flag.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), Self::Error>;

    async fn subscribe(&mut self, topic_filter: &str, qos: MqQos) -> Result<(), Self::Error>;

    /// Wait a bounded, implementation-defined window for an inbound message.
    ///
    /// `Ok(None)` means nothing arrived in the window; an error means the
    /// connection is gone.
    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, Self::Error>;
}
