//! Sensor framework and the concrete sensors of the plant controller
//!
//! Every sensor produces a fixed number of `i32` readings. An
//! [`IndexedSensor`] pins a sensor to a slot range of the sample array so the
//! sampling activity can write readings without knowing which sensor produced
//! what.

mod analog;
mod dht11;

use core::marker::PhantomData;
use thiserror_no_std::Error;

pub use analog::{AnalogInput, AnalogReading, AnalogSensor};
pub use dht11::{
    DHT11_WARMUP_MS, Dht11, Dht11Error, Dht11Readings, MIN_READ_INTERVAL_US, ReadStatus,
    SingleWirePin, checksum,
};

/// Number of values in one sensor sample.
pub const SAMPLE_VALUES: usize = 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} timed out")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: payload checksum mismatch")]
    ChecksumMismatch { sensor: &'static str },
    #[error("{sensor}: read failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        details: &'static str,
    },
}

/// Trait for sensor reading data structures.
/// Provides compile-time guarantees about the number of values and their conversion to arrays.
pub trait SensorReadings<const COUNT: usize> {
    /// Convert the readings into a fixed-size array.
    fn to_array(self) -> [i32; COUNT];
}

/// Trait for sensors that produce typed readings.
pub trait Sensor<const COUNT: usize> {
    /// The type of readings this sensor produces.
    type Readings: SensorReadings<COUNT>;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

// Type-level index markers
pub struct Idx<const N: usize>;

pub struct IndexedSensor<S, const START: usize, const COUNT: usize>
where
    S: Sensor<COUNT>,
{
    sensor: S,
    _marker: PhantomData<Idx<START>>,
}

impl<S, const START: usize, const COUNT: usize> From<S> for IndexedSensor<S, START, COUNT>
where
    S: Sensor<COUNT>,
{
    fn from(value: S) -> Self {
        Self::new(value)
    }
}

impl<S, const START: usize, const COUNT: usize> IndexedSensor<S, START, COUNT>
where
    S: Sensor<COUNT>,
{
    pub const fn new(sensor: S) -> Self {
        Self {
            sensor,
            _marker: PhantomData,
        }
    }

    /// Read and write to the values array at the correct indices.
    ///
    /// On failure the slots are left untouched, so the previous readings stay
    /// in place.
    pub async fn read_into(&mut self, values: &mut [i32; SAMPLE_VALUES]) -> Result<(), SensorError> {
        let readings = self.sensor.read().await?;
        let data = readings.to_array();
        values[START..START + COUNT].copy_from_slice(&data);
        Ok(())
    }

    /// Get the starting index where this sensor's data is stored.
    pub const fn start_index() -> usize {
        START
    }

    /// Get the number of values this sensor produces.
    pub const fn value_count() -> usize {
        COUNT
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

pub mod indices {
    use crate::sensors::IndexedSensor;

    // The climate sensor writes two consecutive slots, temperature first.
    // Keep HUMIDITY == TEMPERATURE + 1 or the readings land in the wrong place.
    pub type ClimateIndexed<S> = IndexedSensor<S, TEMPERATURE, 2>;
    pub type SoilMoistureIndexed<S> = IndexedSensor<S, SOIL_MOISTURE, 1>;
    pub type LightLevelIndexed<S> = IndexedSensor<S, LIGHT_LEVEL, 1>;

    pub const TEMPERATURE: usize = 0;
    pub const HUMIDITY: usize = 1;
    pub const SOIL_MOISTURE: usize = 2;
    pub const LIGHT_LEVEL: usize = 3;
}

pub use indices::*;

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    struct FixedPair(Result<[i32; 2], SensorError>);

    struct Pair([i32; 2]);

    impl SensorReadings<2> for Pair {
        fn to_array(self) -> [i32; 2] {
            self.0
        }
    }

    impl Sensor<2> for FixedPair {
        type Readings = Pair;

        async fn read(&mut self) -> Result<Pair, SensorError> {
            self.0.map(Pair)
        }
    }

    #[test]
    fn test_indexed_sensor_writes_its_slots() {
        let mut climate = ClimateIndexed::from(FixedPair(Ok([21, 55])));
        let mut values = [0, 0, 7, 9];

        block_on(climate.read_into(&mut values)).unwrap();

        assert_eq!(values, [21, 55, 7, 9]);
        assert_eq!(ClimateIndexed::<FixedPair>::start_index(), TEMPERATURE);
        assert_eq!(ClimateIndexed::<FixedPair>::value_count(), 2);
    }

    #[test]
    fn test_failed_read_keeps_previous_values() {
        let error = SensorError::ReadFailed {
            sensor: "test",
            details: "unplugged",
        };
        let mut climate = ClimateIndexed::from(FixedPair(Err(error)));
        let mut values = [18, 40, 1, 2];

        assert_eq!(block_on(climate.read_into(&mut values)), Err(error));
        assert_eq!(values, [18, 40, 1, 2]);
    }
}
