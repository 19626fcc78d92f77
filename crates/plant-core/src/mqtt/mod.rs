//! Broker messaging: client abstraction, topic layout, the event-signal set
//! and the session state machine that ties them to the measurements.

pub mod client;
pub mod session;
pub mod signals;
pub mod topics;

// Re-exports for cleaner imports from crate::mqtt
pub use client::{InboundMessage, MqQos, MqttClient, PAYLOAD_CAPACITY, TOPIC_CAPACITY};
pub use session::{
    ConnectionState, DisconnectOutcome, FORCE_STOP_WINDOW, LightState, MqttSession,
    PUBLISH_INTERVAL, RECONNECT_BACKOFF, SessionError, ThresholdUpdate,
};
pub use signals::{EventSet, Events};
pub use topics::Metric;
