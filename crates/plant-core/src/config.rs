//! Runtime configuration of the controller.
//!
//! Everything has a default; the firmware overrides fields from build-time
//! environment variables.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::remote_switch::{Device, Group, RemoteSwitchError, RemoteSwitchProfile};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config<'a> {
    #[serde(borrow)]
    pub mqtt: MqttConfig<'a>,
    pub remote_switch: RemoteSwitchConfig,
    pub controller: ControllerConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttConfig<'a> {
    pub broker_host: &'a str,
    pub broker_port: u16,
    pub client_id: &'a str,
    /// Empty means anonymous.
    pub username: &'a str,
    pub password: &'a str,
    pub keep_alive_secs: u16,
}

impl Default for MqttConfig<'_> {
    fn default() -> Self {
        Self {
            broker_host: "192.168.1.10",
            broker_port: 1883,
            client_id: "plant-1",
            username: "",
            password: "",
            keep_alive_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSwitchConfig {
    pub transmitter_id: u32,
    pub group: u8,
    /// `None` addresses every socket in the group.
    pub device: Option<u8>,
    /// `None` sends plain on/off frames.
    pub dim_level: Option<u8>,
    pub repeat: u8,
}

impl Default for RemoteSwitchConfig {
    fn default() -> Self {
        Self {
            transmitter_id: 123_456,
            group: 1,
            device: None,
            dim_level: None,
            repeat: 10,
        }
    }
}

impl RemoteSwitchConfig {
    pub fn profile(&self) -> Result<RemoteSwitchProfile, RemoteSwitchError> {
        let device = match self.device {
            Some(device) => Device::try_from(device)?,
            None => Device::All,
        };
        RemoteSwitchProfile::new(
            self.transmitter_id,
            Group::try_from(self.group)?,
            device,
            self.dim_level,
            self.repeat,
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Extra light, on top of the threshold, the lamp must add before it is
    /// considered pointless and switched off again.
    pub light_threshold_margin: u16,
    pub watering_ms: u32,
    pub watering_cooldown_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            light_threshold_margin: 100,
            watering_ms: 2_000,
            watering_cooldown_ms: 10_000,
        }
    }
}

impl ControllerConfig {
    pub fn watering(&self) -> Duration {
        Duration::from_millis(u64::from(self.watering_ms))
    }

    pub fn watering_cooldown(&self) -> Duration {
        Duration::from_millis(u64::from(self.watering_cooldown_ms))
    }
}
