//! Bit-banged driver for the DHT11 humidity/temperature sensor
//!
//! The DHT11 speaks a single-wire request/response protocol with no hardware
//! assist: the host pulls the line low for at least 18 ms, releases it, and
//! the sensor answers with an 80 µs low / 80 µs high preamble followed by
//! 40 data bits. Every bit starts with a ~50 µs low phase; the length of the
//! following high phase encodes the value (~26 µs for `0`, ~70 µs for `1`).
//!
//! The five payload bytes are `[humidity, humidity_frac, temperature,
//! temperature_frac, checksum]`, MSB first. A read that times out or fails the
//! checksum leaves the last good values in place.

use embedded_hal::delay::DelayNs;
use log::warn;
use thiserror_no_std::Error;

use super::{Sensor, SensorError, SensorReadings};
use crate::timing::PreciseTimer;

/// Minimum spacing between two read attempts. The sensor needs ~2 s to
/// prepare a new measurement.
pub const MIN_READ_INTERVAL_US: u64 = 2_000_000;

/// Time the sensor needs after power-up before it answers reliably.
pub const DHT11_WARMUP_MS: u64 = 1_000;

const START_LOW_US: u32 = 20_000;
const START_RELEASE_US: u32 = 40;
const RESPONSE_PHASE_TIMEOUT_US: u32 = 80;
const BIT_LOW_TIMEOUT_US: u32 = 50;
const BIT_HIGH_TIMEOUT_US: u32 = 70;
/// High phases longer than this many 1 µs polls are a `1`.
const ONE_BIT_THRESHOLD_US: u32 = 28;
const FRAME_BITS: usize = 40;

/// Open-drain style GPIO that can be switched between driving and listening.
///
/// The line is driven low/high in output mode; in input mode the pull-up holds
/// it high unless the sensor pulls it down.
pub trait SingleWirePin {
    fn set_as_output(&mut self);
    fn set_as_input(&mut self);
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn is_high(&mut self) -> bool;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dht11Error {
    #[error("line did not change during {phase}")]
    Timeout { phase: &'static str },
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    Checksum { computed: u8, received: u8 },
}

impl From<Dht11Error> for SensorError {
    fn from(value: Dht11Error) -> Self {
        match value {
            Dht11Error::Timeout { phase } => SensorError::Timeout {
                sensor: "DHT11",
                operation: phase,
            },
            Dht11Error::Checksum { .. } => SensorError::ChecksumMismatch { sensor: "DHT11" },
        }
    }
}

/// Outcome of a successful call to [`Dht11::measure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// A new frame was received and the cached values were replaced.
    Updated,
    /// The previous attempt was less than [`MIN_READ_INTERVAL_US`] ago; the
    /// line was not touched.
    RateLimited,
}

/// Checksum of the first four payload bytes (sum mod 256).
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub struct Dht11<P, T> {
    pin: P,
    timer: T,
    last_read_us: Option<u64>,
    temperature: i32,
    humidity: i32,
}

impl<P: SingleWirePin, T: PreciseTimer> Dht11<P, T> {
    /// Take ownership of the data line and release it to the pull-up.
    ///
    /// The caller is responsible for waiting [`DHT11_WARMUP_MS`] after
    /// power-up before the first measurement.
    pub fn new(mut pin: P, timer: T) -> Self {
        pin.set_as_input();
        Self {
            pin,
            timer,
            last_read_us: None,
            temperature: 0,
            humidity: 0,
        }
    }

    /// Last successfully read temperature in °C.
    pub fn temperature(&self) -> i32 {
        self.temperature
    }

    /// Last successfully read relative humidity in %.
    pub fn humidity(&self) -> i32 {
        self.humidity
    }

    /// Timestamp of the last attempted read, successful or not.
    pub fn last_read_us(&self) -> Option<u64> {
        self.last_read_us
    }

    /// Run one request/response exchange with the sensor.
    ///
    /// Calls made less than two seconds after the previous attempt return
    /// [`ReadStatus::RateLimited`] without touching the line. Any failure
    /// keeps the previous temperature and humidity.
    pub fn measure(&mut self) -> Result<ReadStatus, Dht11Error> {
        let now = self.timer.now_micros();
        if let Some(last) = self.last_read_us {
            if now.saturating_sub(last) < MIN_READ_INTERVAL_US {
                return Ok(ReadStatus::RateLimited);
            }
        }
        self.last_read_us = Some(now);

        self.send_start_signal();
        self.check_response()?;
        let frame = self.read_frame()?;

        let computed = checksum(&frame[..4]);
        if computed != frame[4] {
            return Err(Dht11Error::Checksum {
                computed,
                received: frame[4],
            });
        }

        self.humidity = i32::from(frame[0]);
        self.temperature = i32::from(frame[2]);
        Ok(ReadStatus::Updated)
    }

    fn send_start_signal(&mut self) {
        self.pin.set_as_output();
        self.pin.set_low();
        self.timer.delay_us(START_LOW_US);
        self.pin.set_high();
        self.timer.delay_us(START_RELEASE_US);
        self.pin.set_as_input();
    }

    fn check_response(&mut self) -> Result<(), Dht11Error> {
        self.wait_while(false, RESPONSE_PHASE_TIMEOUT_US, "response low phase")?;
        self.wait_while(true, RESPONSE_PHASE_TIMEOUT_US, "response high phase")?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<[u8; 5], Dht11Error> {
        let mut frame = [0u8; 5];
        for i in 0..FRAME_BITS {
            self.wait_while(false, BIT_LOW_TIMEOUT_US, "bit low phase")?;
            let high_us = self.wait_while(true, BIT_HIGH_TIMEOUT_US, "bit high phase")?;
            if high_us > ONE_BIT_THRESHOLD_US {
                frame[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        Ok(frame)
    }

    /// Poll the line in 1 µs steps while it sits at `level_high`.
    ///
    /// Returns the number of polls spent at that level.
    fn wait_while(
        &mut self,
        level_high: bool,
        timeout_us: u32,
        phase: &'static str,
    ) -> Result<u32, Dht11Error> {
        let mut ticks = 0u32;
        while self.pin.is_high() == level_high {
            if ticks > timeout_us {
                return Err(Dht11Error::Timeout { phase });
            }
            ticks += 1;
            self.timer.delay_us(1);
        }
        Ok(ticks)
    }
}

/// Typed readings from the DHT11 sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dht11Readings {
    pub temperature_celsius: i32,
    pub humidity_percent: i32,
}

impl SensorReadings<2> for Dht11Readings {
    fn to_array(self) -> [i32; 2] {
        [self.temperature_celsius, self.humidity_percent]
    }
}

impl<P: SingleWirePin, T: PreciseTimer> Sensor<2> for Dht11<P, T> {
    type Readings = Dht11Readings;

    async fn read(&mut self) -> Result<Dht11Readings, SensorError> {
        self.measure().map_err(|e| {
            warn!("DHT11 read failed: {}", e);
            SensorError::from(e)
        })?;

        Ok(Dht11Readings {
            temperature_celsius: self.temperature,
            humidity_percent: self.humidity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DhtBehaviour, SimulatedDht11Line, VirtualClock};

    fn sensor_with(behaviour: DhtBehaviour) -> (Dht11<SimulatedDht11Line, VirtualClock>, SimulatedDht11Line, VirtualClock) {
        let clock = VirtualClock::new();
        let line = SimulatedDht11Line::new(clock.clone(), behaviour);
        let dht = Dht11::new(line.clone(), clock.clone());
        (dht, line, clock)
    }

    fn frame(h: u8, hf: u8, t: u8, tf: u8, c: u8) -> [u8; 5] {
        [h, hf, t, tf, c]
    }

    #[test]
    fn test_reads_valid_frame() {
        let (mut dht, _line, _clock) = sensor_with(DhtBehaviour::Frame(frame(55, 0, 23, 0, 78)));

        assert_eq!(dht.measure(), Ok(ReadStatus::Updated));
        assert_eq!(dht.humidity(), 55);
        assert_eq!(dht.temperature(), 23);
    }

    #[test]
    fn test_checksum_is_sum_mod_256() {
        assert_eq!(checksum(&[55, 0, 23, 0]), 78);
        assert_eq!(checksum(&[200, 100, 10, 0]), 54);
        assert_eq!(checksum(&[255, 255, 255, 255]), 252);
    }

    #[test]
    fn test_checksum_accepts_and_rejects() {
        let payloads = [[0u8, 0, 0, 0], [90, 3, 31, 7], [200, 100, 10, 0], [255, 255, 255, 255]];

        for payload in payloads {
            let c = checksum(&payload);

            let (mut dht, _line, _clock) = sensor_with(DhtBehaviour::Frame(frame(
                payload[0], payload[1], payload[2], payload[3], c,
            )));
            assert_eq!(dht.measure(), Ok(ReadStatus::Updated));
            assert_eq!(dht.humidity(), i32::from(payload[0]));
            assert_eq!(dht.temperature(), i32::from(payload[2]));

            // Seed a known good value, then feed a corrupted checksum.
            let (mut dht, line, clock) = sensor_with(DhtBehaviour::Frame(frame(40, 0, 20, 0, 60)));
            assert_eq!(dht.measure(), Ok(ReadStatus::Updated));
            clock.advance_us(MIN_READ_INTERVAL_US);
            line.set_behaviour(DhtBehaviour::Frame(frame(
                payload[0],
                payload[1],
                payload[2],
                payload[3],
                c.wrapping_add(1),
            )));

            assert!(matches!(dht.measure(), Err(Dht11Error::Checksum { .. })));
            assert_eq!(dht.humidity(), 40);
            assert_eq!(dht.temperature(), 20);
        }
    }

    #[test]
    fn test_rate_limit_leaves_state_and_line_untouched() {
        let (mut dht, line, clock) = sensor_with(DhtBehaviour::Frame(frame(50, 0, 22, 0, 72)));
        assert_eq!(dht.measure(), Ok(ReadStatus::Updated));

        let before = (dht.last_read_us(), dht.temperature(), dht.humidity());
        let start_signals = line.start_signals();
        line.set_behaviour(DhtBehaviour::Frame(frame(60, 0, 30, 0, 90)));
        let last = dht.last_read_us().unwrap();
        clock.set_now_us(last + MIN_READ_INTERVAL_US - 1);

        assert_eq!(dht.measure(), Ok(ReadStatus::RateLimited));
        assert_eq!((dht.last_read_us(), dht.temperature(), dht.humidity()), before);
        assert_eq!(line.start_signals(), start_signals);

        clock.set_now_us(last + MIN_READ_INTERVAL_US);
        assert_eq!(dht.measure(), Ok(ReadStatus::Updated));
        assert_eq!(dht.temperature(), 30);
    }

    #[test]
    fn test_missing_sensor_times_out() {
        let (mut dht, _line, _clock) = sensor_with(DhtBehaviour::Silent);

        assert_eq!(
            dht.measure(),
            Err(Dht11Error::Timeout {
                phase: "response high phase"
            })
        );
        assert_eq!(dht.temperature(), 0);
        // The failed attempt still counts for rate limiting.
        assert!(dht.last_read_us().is_some());
    }

    #[test]
    fn test_stuck_low_line_times_out() {
        let (mut dht, _line, _clock) = sensor_with(DhtBehaviour::StuckLow);

        assert_eq!(
            dht.measure(),
            Err(Dht11Error::Timeout {
                phase: "response low phase"
            })
        );
    }

    #[test]
    fn test_sensor_trait_maps_errors() {
        let (mut dht, _line, _clock) = sensor_with(DhtBehaviour::Frame(frame(50, 0, 22, 0, 0)));

        let result = embassy_futures::block_on(Sensor::read(&mut dht));
        assert_eq!(result, Err(SensorError::ChecksumMismatch { sensor: "DHT11" }));
    }
}
