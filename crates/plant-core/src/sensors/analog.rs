use core::fmt::Debug;

use log::warn;

use super::{Sensor, SensorError, SensorReadings};

/// A single raw ADC channel.
pub trait AnalogInput {
    type Error: Debug;

    /// One-shot conversion, returning the raw 12-bit count.
    fn read_raw(&mut self) -> Result<u16, Self::Error>;
}

/// Raw reading of an analog channel (soil moisture probe, light-dependent resistor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogReading {
    pub raw: i32,
}

impl SensorReadings<1> for AnalogReading {
    fn to_array(self) -> [i32; 1] {
        [self.raw]
    }
}

/// Named analog sensor on top of an [`AnalogInput`].
pub struct AnalogSensor<A> {
    name: &'static str,
    input: A,
}

impl<A: AnalogInput> AnalogSensor<A> {
    pub const fn new(name: &'static str, input: A) -> Self {
        Self { name, input }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<A: AnalogInput> Sensor<1> for AnalogSensor<A> {
    type Readings = AnalogReading;

    async fn read(&mut self) -> Result<AnalogReading, SensorError> {
        let raw = self.input.read_raw().map_err(|e| {
            warn!("{} conversion failed: {:?}", self.name, e);
            SensorError::ReadFailed {
                sensor: self.name,
                details: "ADC conversion failed",
            }
        })?;

        Ok(AnalogReading {
            raw: i32::from(raw),
        })
    }
}
