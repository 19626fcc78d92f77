//! Broker session state machine
//!
//! ```text
//! Idle -> Connecting -> Connected <-> Disconnected -> Reconnecting | ForceStopped
//! ```
//!
//! The session owns the broker client and bridges it to the rest of the
//! controller:
//!
//! - [`MqttSession::run_connection`] drives connect, subscribe, inbound
//!   polling and the disconnect decision (reconnect or stay stopped).
//! - [`MqttSession::run_publisher`] is the publisher activity. It is started
//!   on connect, cancelled on disconnect, publishes the light state and
//!   publishes sensor metrics only when they changed.
//! - Inbound threshold messages are parsed and queued as
//!   [`ThresholdUpdate`]s; [`MqttSession::apply_threshold_updates`] feeds
//!   them into the measurement setters.
//! - [`MqttSession::send_light_signal`] is how the controller requests a
//!   light transition.
//!
//! # Force-stop window
//!
//! After a disconnect the session waits [`FORCE_STOP_WINDOW`] for
//! [`Events::FORCE_STOP`]. A [`MqttSession::stop`] whose flag lands after the
//! window is read as an unexpected disconnect. The driver still takes the
//! flag after its back-off, so such a stop ends the session before the
//! reconnect attempt instead of being carried into the next connection.

use core::cell::Cell;
use core::convert::Infallible;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Timer, with_timeout};
use log::{debug, info, warn};
use thiserror_no_std::Error;

use super::client::{InboundMessage, MqQos, MqttClient};
use super::signals::{EventSet, Events};
use super::topics::{self, Metric};
use crate::controller::LightLink;
use crate::measurements::{MeasurementError, Measurements};
use crate::settings::SettingsStore;

/// How long the disconnect handler waits for a deliberate stop.
pub const FORCE_STOP_WINDOW: Duration = Duration::from_millis(100);

/// Delay between two publisher cycles.
pub const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// Delay before reconnecting after an unexpected disconnect.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

const UPDATE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("broker client failed to {operation}")]
    Client { operation: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    ForceStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    Unknown,
    Off,
    On,
}

/// What the disconnect handler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Reconnect,
    Stopped,
}

/// A threshold received from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdUpdate {
    Light(u16),
    Moisture(u16),
}

#[derive(Debug, Clone, Copy)]
struct SessionState {
    connection: ConnectionState,
    light: LightState,
    publisher_active: bool,
}

pub struct MqttSession<C> {
    client: Mutex<CriticalSectionRawMutex, C>,
    events: EventSet,
    state: BlockingMutex<CriticalSectionRawMutex, Cell<SessionState>>,
    updates: Channel<CriticalSectionRawMutex, ThresholdUpdate, UPDATE_QUEUE_DEPTH>,
}

impl<C: MqttClient> MqttSession<C> {
    pub const fn new(client: C) -> Self {
        Self {
            client: Mutex::new(client),
            events: EventSet::new(),
            state: BlockingMutex::new(Cell::new(SessionState {
                connection: ConnectionState::Idle,
                light: LightState::Unknown,
                publisher_active: false,
            })),
            updates: Channel::new(),
        }
    }

    pub fn client(&self) -> &Mutex<CriticalSectionRawMutex, C> {
        &self.client
    }

    pub fn events(&self) -> &EventSet {
        &self.events
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock(|s| s.get().connection)
    }

    pub fn light_state(&self) -> LightState {
        self.state.lock(|s| s.get().light)
    }

    fn update_state(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.lock(|cell| {
            let mut state = cell.get();
            f(&mut state);
            cell.set(state);
        });
    }

    /// Request a light transition from the publisher.
    pub fn send_light_signal(&self, on: bool) {
        self.events.set(if on {
            Events::TURN_LIGHT_ON
        } else {
            Events::TURN_LIGHT_OFF
        });
    }

    /// Connection established: flag it, start the publisher if it is not
    /// running and subscribe to the threshold topics.
    pub async fn on_connected(&self) -> Result<(), SessionError> {
        info!("Mqtt connected!");
        self.events.set(Events::CLIENT_CONNECTED);

        let mut start_publisher = false;
        self.update_state(|s| {
            s.connection = ConnectionState::Connected;
            start_publisher = !s.publisher_active;
            s.publisher_active = true;
        });
        if start_publisher {
            self.events.set(Events::PUBLISHER_START);
        }

        let mut client = self.client.lock().await;
        client
            .subscribe(topics::THRESHOLD_FILTER, MqQos::AtLeastOnce)
            .await
            .map_err(|e| {
                warn!("Subscribing to {} failed: {:?}", topics::THRESHOLD_FILTER, e);
                SessionError::Client {
                    operation: "subscribe",
                }
            })
    }

    /// Connection lost or closed: cancel the publisher and decide between
    /// reconnecting and staying stopped.
    pub async fn on_disconnected(&self) -> DisconnectOutcome {
        info!("Mqtt disconnected");
        self.events.clear(Events::CLIENT_CONNECTED);

        let mut cancel_publisher = false;
        self.update_state(|s| {
            s.connection = ConnectionState::Disconnected;
            cancel_publisher = s.publisher_active;
            s.publisher_active = false;
        });
        if cancel_publisher {
            self.events.set(Events::PUBLISHER_CANCEL);
        }

        match with_timeout(FORCE_STOP_WINDOW, self.events.wait_any(Events::FORCE_STOP)).await {
            Ok(_) => {
                info!("Force stopping mqtt client");
                self.events.clear(Events::FORCE_STOP);
                self.update_state(|s| s.connection = ConnectionState::ForceStopped);
                DisconnectOutcome::Stopped
            }
            Err(_) => {
                info!("Client unexpectedly disconnected, reconnecting");
                self.update_state(|s| s.connection = ConnectionState::Reconnecting);
                DisconnectOutcome::Reconnect
            }
        }
    }

    /// Handle an inbound message. Never blocks: a full update queue drops the
    /// update.
    pub fn on_message(&self, message: &InboundMessage) {
        let update = match message.topic.as_str() {
            topics::THRESHOLD_LIGHT => ThresholdUpdate::Light,
            topics::THRESHOLD_MOISTURE => ThresholdUpdate::Moisture,
            other => {
                debug!("Ignoring message on {}", other);
                return;
            }
        };

        let Some(value) = parse_threshold(&message.payload) else {
            warn!(
                "Rejecting threshold payload on {}: {:?}",
                message.topic.as_str(),
                core::str::from_utf8(&message.payload)
            );
            return;
        };

        info!("Received {:?}", update(value));
        if self.updates.try_send(update(value)).is_err() {
            warn!("Threshold update queue full, dropping {:?}", update(value));
        }
    }

    /// Next queued threshold update.
    pub async fn next_threshold_update(&self) -> ThresholdUpdate {
        self.updates.receive().await
    }

    /// Deliberately shut the session down.
    ///
    /// The flag is raised before disconnecting so the disconnect handler can
    /// tell this apart from a dropped link. Without a live connection the flag
    /// is left for the connection driver, which takes it before its next
    /// connect attempt. With no driver running the session is marked stopped
    /// right away.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.events.set(Events::FORCE_STOP);

        match self.connection_state() {
            ConnectionState::Connected => {}
            ConnectionState::Idle | ConnectionState::ForceStopped => {
                info!("Stop requested with no connection driver running");
                self.events.clear(Events::FORCE_STOP);
                self.update_state(|s| s.connection = ConnectionState::ForceStopped);
                return Ok(());
            }
            state => {
                info!("Stop requested while {:?}", state);
                return Ok(());
            }
        }

        let mut client = self.client.lock().await;
        client.disconnect().await.map_err(|e| {
            warn!("Disconnect failed: {:?}", e);
            SessionError::Client {
                operation: "disconnect",
            }
        })
    }

    /// Connection driver: connect, pump inbound messages until the link goes
    /// away, then reconnect after [`RECONNECT_BACKOFF`] or return when stopped.
    ///
    /// A stop requested during the back-off is honored before reconnecting.
    pub async fn run_connection(&self) {
        // A stop flag left over from before this driver started does not apply.
        self.events.clear(Events::FORCE_STOP);

        loop {
            self.update_state(|s| s.connection = ConnectionState::Connecting);
            let connected = self.client.lock().await.connect().await;

            match connected {
                // Stopped while connecting: close again and let the disconnect
                // handler take the flag.
                Ok(()) if self.events.any(Events::FORCE_STOP) => {
                    if let Err(e) = self.client.lock().await.disconnect().await {
                        warn!("Disconnect failed: {:?}", e);
                    }
                }
                Ok(()) => match self.on_connected().await {
                    Ok(()) => self.pump_inbound().await,
                    Err(e) => warn!("Session setup failed: {}", e),
                },
                Err(e) => warn!("Connecting to broker failed: {:?}", e),
            }

            match self.on_disconnected().await {
                DisconnectOutcome::Stopped => return,
                DisconnectOutcome::Reconnect => {
                    Timer::after(RECONNECT_BACKOFF).await;
                    if !self.events.take(Events::FORCE_STOP).is_empty() {
                        info!("Force stopping mqtt client before reconnecting");
                        self.update_state(|s| s.connection = ConnectionState::ForceStopped);
                        return;
                    }
                }
            }
        }
    }

    async fn pump_inbound(&self) {
        loop {
            let polled = self.client.lock().await.poll_inbound().await;
            match polled {
                Ok(Some(message)) => self.on_message(&message),
                // Let the publisher at the client between polls.
                Ok(None) => yield_now().await,
                Err(e) => {
                    info!("Broker link closed: {:?}", e);
                    return;
                }
            }
        }
    }

    /// Drain queued threshold updates into the measurement setters.
    ///
    /// Only returns if a threshold could not be persisted.
    pub async fn apply_threshold_updates<S: SettingsStore>(
        &self,
        measurements: &Measurements<S>,
    ) -> Result<Infallible, MeasurementError> {
        loop {
            match self.next_threshold_update().await {
                ThresholdUpdate::Light(value) => measurements.set_light_threshold(value).await?,
                ThresholdUpdate::Moisture(value) => {
                    measurements.set_moisture_threshold(value).await?
                }
            }
        }
    }

    /// The publisher activity.
    ///
    /// Idles until a connect starts it, then publishes until the next
    /// disconnect cancels it. Cancellation is only observed between cycles,
    /// so a publish is never cut in half.
    pub async fn run_publisher<S>(&self, measurements: &Measurements<S>) -> ! {
        loop {
            self.events.wait_any(Events::PUBLISHER_START).await;
            self.events.clear(Events::PUBLISHER_START);
            info!("Publisher started");

            self.publish(topics::STATUS, topics::STATUS_CONNECTED, true)
                .await;
            let mut last_published = [None; Metric::ALL.len()];

            loop {
                let events = self
                    .events
                    .wait_any(
                        Events::CLIENT_CONNECTED
                            | Events::TURN_LIGHT_ON
                            | Events::TURN_LIGHT_OFF
                            | Events::PUBLISHER_CANCEL,
                    )
                    .await;

                if events.contains(Events::PUBLISHER_CANCEL) {
                    self.events.clear(Events::PUBLISHER_CANCEL);
                    info!("Publisher cancelled");
                    break;
                }

                if events.contains(Events::CLIENT_CONNECTED) {
                    if self.light_state() == LightState::Unknown {
                        self.publish(topics::SOCKET_STATE, topics::STATE_OFF, true)
                            .await;
                        self.update_state(|s| s.light = LightState::Off);
                    }
                    self.publish_changed_metrics(measurements, &mut last_published)
                        .await;
                }

                if events.contains(Events::TURN_LIGHT_ON) {
                    if self.light_state() == LightState::Off {
                        self.publish(topics::SOCKET_STATE, topics::STATE_ON, true)
                            .await;
                    }
                    self.events.clear(Events::TURN_LIGHT_ON);
                    self.update_state(|s| s.light = LightState::On);
                }

                if events.contains(Events::TURN_LIGHT_OFF) {
                    if self.light_state() == LightState::On {
                        self.publish(topics::SOCKET_STATE, topics::STATE_OFF, true)
                            .await;
                    }
                    self.events.clear(Events::TURN_LIGHT_OFF);
                    self.update_state(|s| s.light = LightState::Off);
                }

                Timer::after(PUBLISH_INTERVAL).await;
            }
        }
    }

    /// Publish every metric whose value differs from the last one published.
    async fn publish_changed_metrics<S>(
        &self,
        measurements: &Measurements<S>,
        last_published: &mut [Option<i32>; Metric::ALL.len()],
    ) {
        let current = [
            measurements.temperature().await,
            measurements.humidity().await,
            measurements.soil_moisture().await,
            measurements.light_level().await,
        ];

        for ((metric, value), last) in Metric::ALL
            .iter()
            .zip(current)
            .zip(last_published.iter_mut())
        {
            if *last == Some(value) {
                continue;
            }
            let payload = metric.payload(value);
            if self.publish(metric.topic(), payload.as_bytes(), false).await {
                *last = Some(value);
            }
        }
    }

    /// Publish with QoS 1. Failures are logged; the connection driver notices
    /// a dead link on its own.
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> bool {
        let mut client = self.client.lock().await;
        match client
            .publish(topic, payload, MqQos::AtLeastOnce, retain)
            .await
        {
            Ok(()) => {
                debug!("Published {} bytes to {}", payload.len(), topic);
                true
            }
            Err(e) => {
                warn!("Publishing to {} failed: {:?}", topic, e);
                false
            }
        }
    }
}

impl<C: MqttClient> LightLink for MqttSession<C> {
    fn light_state(&self) -> LightState {
        MqttSession::light_state(self)
    }

    fn send_light_signal(&self, on: bool) {
        MqttSession::send_light_signal(self, on)
    }
}

/// Decimal `u16`, surrounding whitespace allowed.
fn parse_threshold(payload: &[u8]) -> Option<u16> {
    core::str::from_utf8(payload).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemoryStore, RecordingClient};
    use embassy_futures::block_on;

    fn session() -> MqttSession<RecordingClient> {
        MqttSession::new(RecordingClient::new())
    }

    fn message(topic: &str, payload: &[u8]) -> InboundMessage {
        InboundMessage::new(topic, payload).unwrap()
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold(b"500"), Some(500));
        assert_eq!(parse_threshold(b" 42\n"), Some(42));
        assert_eq!(parse_threshold(b"65535"), Some(65535));
        assert_eq!(parse_threshold(b"65536"), None);
        assert_eq!(parse_threshold(b"-1"), None);
        assert_eq!(parse_threshold(b"abc"), None);
        assert_eq!(parse_threshold(b""), None);
    }

    #[test]
    fn test_inbound_thresholds_are_queued() {
        let session = session();

        session.on_message(&message(topics::THRESHOLD_LIGHT, b"500"));
        session.on_message(&message(topics::THRESHOLD_MOISTURE, b"1200"));
        session.on_message(&message("plant/1/threshold/other", b"7"));
        session.on_message(&message(topics::THRESHOLD_LIGHT, b"bright"));

        assert_eq!(
            block_on(session.next_threshold_update()),
            ThresholdUpdate::Light(500)
        );
        assert_eq!(
            block_on(session.next_threshold_update()),
            ThresholdUpdate::Moisture(1200)
        );
        assert!(session.updates.try_receive().is_err());
    }

    #[test]
    fn test_topic_match_is_exact() {
        let session = session();

        session.on_message(&message("plant/1/threshold/lightning", b"5"));
        session.on_message(&message("plant/1/threshold/ligh", b"5"));

        assert!(session.updates.try_receive().is_err());
    }

    #[test]
    fn test_connect_subscribes_and_starts_publisher_once() {
        let session = session();
        block_on(async { session.client().lock().await.connect().await }).unwrap();

        block_on(session.on_connected()).unwrap();
        assert_eq!(session.connection_state(), ConnectionState::Connected);
        assert!(session.events().any(Events::CLIENT_CONNECTED));
        assert_eq!(session.events.take(Events::PUBLISHER_START), Events::PUBLISHER_START);

        // A second connect while the publisher runs does not restart it.
        block_on(session.on_connected()).unwrap();
        assert!(!session.events().any(Events::PUBLISHER_START));
        assert_eq!(
            block_on(session.client().lock()).subscriptions(),
            [topics::THRESHOLD_FILTER, topics::THRESHOLD_FILTER]
        );
    }

    #[test]
    fn test_unexpected_disconnect_reconnects() {
        let session = session();
        session.update_state(|s| s.publisher_active = true);
        session.events.set(Events::CLIENT_CONNECTED);

        assert_eq!(block_on(session.on_disconnected()), DisconnectOutcome::Reconnect);
        assert_eq!(session.connection_state(), ConnectionState::Reconnecting);
        assert!(!session.events().any(Events::CLIENT_CONNECTED));
        assert!(session.events().any(Events::PUBLISHER_CANCEL));
    }

    #[test]
    fn test_force_stop_is_consumed_by_disconnect() {
        let session = session();
        session.events.set(Events::FORCE_STOP);

        assert_eq!(block_on(session.on_disconnected()), DisconnectOutcome::Stopped);
        assert_eq!(session.connection_state(), ConnectionState::ForceStopped);
        assert!(!session.events().any(Events::FORCE_STOP));
    }

    #[test]
    fn test_flag_after_window_reads_as_unexpected_disconnect() {
        let session = session();

        let (outcome, ()) = block_on(embassy_futures::join::join(
            session.on_disconnected(),
            async {
                Timer::after(FORCE_STOP_WINDOW + Duration::from_millis(50)).await;
                session.events.set(Events::FORCE_STOP);
            },
        ));

        assert_eq!(outcome, DisconnectOutcome::Reconnect);
        assert_eq!(session.connection_state(), ConnectionState::Reconnecting);
        // Left for the connection driver to take after its back-off.
        assert!(session.events().any(Events::FORCE_STOP));
    }

    #[test]
    fn test_stop_without_driver_marks_session_stopped() {
        let session = session();

        assert_eq!(block_on(session.stop()), Ok(()));

        assert_eq!(session.connection_state(), ConnectionState::ForceStopped);
        assert!(!session.events().any(Events::FORCE_STOP));
        assert_eq!(block_on(session.client().lock()).disconnects(), 0);
    }

    #[test]
    fn test_stop_while_reconnecting_leaves_flag_for_driver() {
        let session = session();
        session.update_state(|s| s.connection = ConnectionState::Reconnecting);

        assert_eq!(block_on(session.stop()), Ok(()));

        assert!(session.events().any(Events::FORCE_STOP));
        assert_eq!(session.connection_state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_threshold_updates_reach_measurements() {
        let session = session();
        let measurements = Measurements::new(MemoryStore::new());
        session.on_message(&message(topics::THRESHOLD_MOISTURE, b"1750"));

        block_on(async {
            let applied = embassy_futures::select::select(
                session.apply_threshold_updates(&measurements),
                Timer::after(Duration::from_millis(50)),
            )
            .await;
            assert!(matches!(applied, embassy_futures::select::Either::Second(())));
        });

        assert_eq!(block_on(measurements.thresholds()).moisture, 1750);
    }

    #[test]
    fn test_unpersisted_update_stops_the_applier() {
        let session = session();
        let measurements = Measurements::new(MemoryStore::new());
        block_on(measurements.settings_store().lock()).fail_writes(true);
        session.on_message(&message(topics::THRESHOLD_LIGHT, b"10"));

        let result = block_on(session.apply_threshold_updates(&measurements));

        assert!(matches!(
            result,
            Err(MeasurementError::Persistence { key: "light_th" })
        ));
        assert_eq!(block_on(measurements.thresholds()).light, 0);
    }
}
