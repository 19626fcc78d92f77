//! rust-mqtt integration: the [`MqttClient`] the session drives on the device.
//!
//! Every [`connect`](MqttClient::connect) resolves the broker, opens a fresh
//! TCP socket and performs the MQTT v5 handshake with the last will set to
//! `"disconnected"` on the status topic. The socket and packet buffers are
//! allocated once and handed to each new connection after the previous one
//! has been dropped.

use core::ptr::NonNull;

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Ipv4Address, Stack};
use embassy_time::{Duration, Instant, with_timeout};
use log::{debug, error, info, warn};
use plant_core::config::MqttConfig;
use plant_core::mqtt::topics::{STATUS, STATUS_DISCONNECTED};
use plant_core::mqtt::{InboundMessage, MqQos, MqttClient};
use rust_mqtt::client::client::MqttClient as RustMqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use thiserror_no_std::Error;

const TCP_BUFFER_LEN: usize = 2048;
const MQTT_BUFFER_LEN: usize = 1024;
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long one [`poll_inbound`](MqttClient::poll_inbound) waits for a message.
pub const POLL_WINDOW: Duration = Duration::from_millis(100);

type Connection = RustMqttClient<'static, TcpSocket<'static>, 5, CountingRng>;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("broker address could not be resolved")]
    Resolve,
    #[error("TCP connect failed")]
    Tcp,
    #[error("broker returned {0:?}")]
    Broker(ReasonCode),
    #[error("not connected")]
    NotConnected,
}

/// Socket and packet buffers of one broker connection.
pub struct ConnectionBuffers {
    tcp_rx: [u8; TCP_BUFFER_LEN],
    tcp_tx: [u8; TCP_BUFFER_LEN],
    mqtt_rx: [u8; MQTT_BUFFER_LEN],
    mqtt_tx: [u8; MQTT_BUFFER_LEN],
}

impl ConnectionBuffers {
    pub const fn new() -> Self {
        Self {
            tcp_rx: [0; TCP_BUFFER_LEN],
            tcp_tx: [0; TCP_BUFFER_LEN],
            mqtt_rx: [0; MQTT_BUFFER_LEN],
            mqtt_tx: [0; MQTT_BUFFER_LEN],
        }
    }
}

impl Default for ConnectionBuffers {
    fn default() -> Self {
        Self::new()
    }
}

fn map_qos(qos: MqQos) -> QualityOfService {
    match qos {
        MqQos::AtMostOnce => QualityOfService::QoS0,
        MqQos::AtLeastOnce => QualityOfService::QoS1,
    }
}

/// Broker client over embassy-net TCP and rust-mqtt.
pub struct BrokerClient {
    stack: Stack<'static>,
    config: MqttConfig<'static>,
    buffers: NonNull<ConnectionBuffers>,
    connection: Option<Connection>,
    last_ping: Instant,
}

impl BrokerClient {
    pub fn new(
        stack: Stack<'static>,
        config: MqttConfig<'static>,
        buffers: &'static mut ConnectionBuffers,
    ) -> Self {
        Self {
            stack,
            config,
            buffers: NonNull::from(buffers),
            connection: None,
            last_ping: Instant::now(),
        }
    }

    async fn resolve(&self) -> Result<Ipv4Address, LinkError> {
        if let Ok(ip) = self.config.broker_host.parse::<Ipv4Address>() {
            return Ok(ip);
        }

        info!("mqtt: resolving broker hostname '{}'...", self.config.broker_host);
        let addrs = self
            .stack
            .dns_query(self.config.broker_host, embassy_net::dns::DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("mqtt: DNS resolution failed: {:?}", e);
                LinkError::Resolve
            })?;

        match addrs.first() {
            Some(IpAddress::Ipv4(ip)) => Ok(*ip),
            None => {
                error!("mqtt: DNS resolution returned no addresses");
                Err(LinkError::Resolve)
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Connection, LinkError> {
        self.connection.as_mut().ok_or(LinkError::NotConnected)
    }

    /// Keep the broker from timing the connection out while it is idle.
    async fn keep_alive(&mut self) -> Result<(), LinkError> {
        let interval = Duration::from_secs(u64::from(self.config.keep_alive_secs) / 2);
        if self.last_ping.elapsed() < interval {
            return Ok(());
        }
        self.last_ping = Instant::now();
        self.connection()?
            .send_ping()
            .await
            .map_err(LinkError::Broker)
    }

    fn drop_connection(&mut self) {
        self.connection = None;
    }
}

impl MqttClient for BrokerClient {
    type Error = LinkError;

    async fn connect(&mut self) -> Result<(), LinkError> {
        // The buffers below may only be handed out once the previous
        // connection no longer exists.
        self.drop_connection();

        let broker = self.resolve().await?;

        // SAFETY: `buffers` came from a `&'static mut` and its only other user,
        // the previous connection, was dropped above.
        let buffers: &'static mut ConnectionBuffers = unsafe { &mut *self.buffers.as_ptr() };

        let mut socket = TcpSocket::new(self.stack, &mut buffers.tcp_rx, &mut buffers.tcp_tx);
        socket.set_timeout(Some(TCP_TIMEOUT));

        info!(
            "mqtt: connecting TCP to {}:{}...",
            broker, self.config.broker_port
        );
        socket
            .connect((broker, self.config.broker_port))
            .await
            .map_err(|e| {
                error!("mqtt: TCP connection failed: {:?}", e);
                LinkError::Tcp
            })?;

        let mut client_config: ClientConfig<'static, 5, CountingRng> =
            ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        client_config.add_max_subscribe_qos(QualityOfService::QoS1);
        client_config.add_client_id(self.config.client_id);
        client_config.keep_alive = self.config.keep_alive_secs;
        client_config.max_packet_size = MQTT_BUFFER_LEN as u32;
        if !self.config.username.is_empty() {
            client_config.add_username(self.config.username);
            if !self.config.password.is_empty() {
                client_config.add_password(self.config.password);
            }
        }
        // LWT QoS is not configurable in rust-mqtt v0.3
        client_config.add_will(STATUS, STATUS_DISCONNECTED, true);

        let mut client = RustMqttClient::<_, 5, _>::new(
            socket,
            &mut buffers.mqtt_tx,
            MQTT_BUFFER_LEN,
            &mut buffers.mqtt_rx,
            MQTT_BUFFER_LEN,
            client_config,
        );

        client.connect_to_broker().await.map_err(|e| {
            error!("mqtt: MQTT connection failed: {:?}", e);
            LinkError::Broker(e)
        })?;

        info!("mqtt: connected successfully (MQTT v5)");
        self.connection = Some(client);
        self.last_ping = Instant::now();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        let result = self.connection()?.disconnect().await;
        self.drop_connection();
        info!("mqtt: disconnected");
        result.map_err(LinkError::Broker)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: MqQos,
        retain: bool,
    ) -> Result<(), LinkError> {
        debug!(
            "mqtt: publishing to channel='{}' len={} {:?} retain={}",
            topic,
            payload.len(),
            qos,
            retain
        );

        match self
            .connection()?
            .send_message(topic, payload, map_qos(qos), retain)
            .await
        {
            // Published, nobody listening yet
            Ok(()) | Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
            Err(e) => Err(LinkError::Broker(e)),
        }
    }

    async fn subscribe(&mut self, topic_filter: &str, _qos: MqQos) -> Result<(), LinkError> {
        // Subscription QoS is the client-wide maximum set at connect.
        self.connection()?
            .subscribe_to_topic(topic_filter)
            .await
            .map_err(LinkError::Broker)?;
        info!("mqtt: subscribed to '{}'", topic_filter);
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, LinkError> {
        self.keep_alive().await?;

        let received = with_timeout(POLL_WINDOW, self.connection()?.receive_message()).await;
        match received {
            Ok(Ok((topic, payload))) => {
                let message = InboundMessage::new(topic, payload);
                if message.is_none() {
                    warn!("mqtt: dropping oversized message on '{}'", topic);
                }
                Ok(message)
            }
            Ok(Err(e)) => {
                warn!("mqtt: receive failed: {:?}", e);
                self.drop_connection();
                Err(LinkError::Broker(e))
            }
            // Nothing arrived in the window
            Err(_) => Ok(None),
        }
    }
}
