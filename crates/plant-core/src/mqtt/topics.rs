//! Topic names and payload formats of the plant controller.

use core::fmt::Write;

pub const STATUS: &str = "plant/1/status";
pub const SOCKET_STATE: &str = "socket/1/state";
pub const THRESHOLD_FILTER: &str = "plant/1/threshold/+";
pub const THRESHOLD_LIGHT: &str = "plant/1/threshold/light";
pub const THRESHOLD_MOISTURE: &str = "plant/1/threshold/moisture";

// Payloads are JSON strings, quotes included.
pub const STATUS_CONNECTED: &[u8] = b"\"connected\"";
pub const STATUS_DISCONNECTED: &[u8] = b"\"disconnected\"";
pub const STATE_ON: &[u8] = b"\"on\"";
pub const STATE_OFF: &[u8] = b"\"off\"";

/// Capacity of a formatted metric payload.
pub const METRIC_PAYLOAD_CAPACITY: usize = 48;

/// A published sensor metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
    SoilMoisture,
    LightLevel,
}

impl Metric {
    /// Publish order.
    pub const ALL: [Metric; 4] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::SoilMoisture,
        Metric::LightLevel,
    ];

    pub const fn topic(self) -> &'static str {
        match self {
            Self::Temperature => "plant/1/temperature",
            Self::Humidity => "plant/1/humidity",
            Self::SoilMoisture => "plant/1/soil_moisture_level",
            Self::LightLevel => "plant/1/light_level",
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "celsius",
            Self::Humidity => "rh",
            Self::SoilMoisture | Self::LightLevel => "raw",
        }
    }

    /// `{"value":<value>,"unit":"<unit>"}`
    pub fn payload(self, value: i32) -> heapless::String<METRIC_PAYLOAD_CAPACITY> {
        let mut out = heapless::String::new();
        // Longest form is 41 bytes (i32::MIN with "celsius").
        let _ = write!(out, "{{\"value\":{},\"unit\":\"{}\"}}", value, self.unit());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_payload_format() {
        assert_eq!(
            Metric::Temperature.payload(23).as_str(),
            r#"{"value":23,"unit":"celsius"}"#
        );
        assert_eq!(Metric::Humidity.payload(-4).as_str(), r#"{"value":-4,"unit":"rh"}"#);
        assert_eq!(
            Metric::SoilMoisture.payload(4095).as_str(),
            r#"{"value":4095,"unit":"raw"}"#
        );
    }

    #[test]
    fn test_extreme_value_fits() {
        let payload = Metric::Temperature.payload(i32::MIN);
        assert!(payload.ends_with("\"celsius\"}"));
    }
}
