//! Measurement and threshold engine
//!
//! [`Measurements`] owns the two pieces of shared mutable state of the
//! controller: the latest sensor sample and the threshold configuration. Each
//! sits behind its own async mutex. Two periodic activities use them:
//!
//! - sampling ([`Sampler::run`]) writes a fresh sample every
//!   [`SAMPLING_PERIOD`], skipping the cycle if the sample lock is busy;
//! - evaluation ([`Measurements::run_evaluation`]) compares light and soil
//!   moisture against the thresholds every [`EVALUATION_PERIOD`] and calls a
//!   [`ThresholdListener`].
//!
//! Readers only ever wait [`SAMPLE_LOCK_TIMEOUT`] for a lock and fall back to
//! stale data. Threshold setters persist first and then wait for the
//! threshold lock without a bound.

use core::sync::atomic::{AtomicI32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Ticker, with_timeout};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::sensors::{
    ClimateIndexed, HUMIDITY, LIGHT_LEVEL, LightLevelIndexed, SAMPLE_VALUES, SOIL_MOISTURE,
    Sensor, SoilMoistureIndexed, TEMPERATURE,
};
use crate::settings::{LIGHT_THRESHOLD_KEY, MOISTURE_THRESHOLD_KEY, SettingsStore};

pub const SAMPLING_PERIOD: Duration = Duration::from_millis(100);
pub const EVALUATION_PERIOD: Duration = Duration::from_millis(100);

/// Bounded wait for the sample lock (sampling and accessors).
pub const SAMPLE_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Bounded wait for the threshold lock during evaluation.
pub const THRESHOLD_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementError {
    #[error("failed to persist {key}")]
    Persistence { key: &'static str },
}

/// One consistent set of sensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorSample {
    pub temperature: i32,
    pub humidity: i32,
    pub soil_moisture: i32,
    pub light_level: i32,
}

impl From<[i32; SAMPLE_VALUES]> for SensorSample {
    fn from(values: [i32; SAMPLE_VALUES]) -> Self {
        Self {
            temperature: values[TEMPERATURE],
            humidity: values[HUMIDITY],
            soil_moisture: values[SOIL_MOISTURE],
            light_level: values[LIGHT_LEVEL],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Thresholds {
    pub light: u16,
    pub moisture: u16,
}

/// Receives the outcome of every evaluation cycle.
///
/// Exactly one of the light callbacks runs per cycle; the moisture callback
/// only runs when soil moisture is below its threshold. The evaluation loop
/// waits for each callback to finish.
#[allow(async_fn_in_trait)]
pub trait ThresholdListener {
    async fn reached_light_threshold(&mut self, value: i32, threshold: u16);
    async fn above_light_threshold(&mut self, value: i32, threshold: u16);
    async fn reached_moisture_threshold(&mut self, value: i32, threshold: u16);
}

pub struct Measurements<S> {
    samples: Mutex<CriticalSectionRawMutex, [i32; SAMPLE_VALUES]>,
    thresholds: Mutex<CriticalSectionRawMutex, Thresholds>,
    store: Mutex<CriticalSectionRawMutex, S>,
    // Value each accessor returned last, indexed like the sample.
    last_returned: [AtomicI32; SAMPLE_VALUES],
}

impl<S> Measurements<S> {
    pub const fn new(store: S) -> Self {
        Self {
            samples: Mutex::new([0; SAMPLE_VALUES]),
            thresholds: Mutex::new(Thresholds {
                light: 0,
                moisture: 0,
            }),
            store: Mutex::new(store),
            last_returned: [const { AtomicI32::new(0) }; SAMPLE_VALUES],
        }
    }

    pub async fn temperature(&self) -> i32 {
        self.read_slot(TEMPERATURE).await
    }

    pub async fn humidity(&self) -> i32 {
        self.read_slot(HUMIDITY).await
    }

    pub async fn soil_moisture(&self) -> i32 {
        self.read_slot(SOIL_MOISTURE).await
    }

    pub async fn light_level(&self) -> i32 {
        self.read_slot(LIGHT_LEVEL).await
    }

    /// Read one slot with a bounded wait.
    ///
    /// On contention this returns whatever this accessor returned last time
    /// (zero before the first successful read), not the latest sample.
    async fn read_slot(&self, slot: usize) -> i32 {
        match with_timeout(SAMPLE_LOCK_TIMEOUT, self.samples.lock()).await {
            Ok(samples) => {
                let value = samples[slot];
                self.last_returned[slot].store(value, Ordering::Relaxed);
                value
            }
            Err(_) => self.last_returned[slot].load(Ordering::Relaxed),
        }
    }

    /// All four values from a single lock acquisition, or `None` on contention.
    pub async fn snapshot(&self) -> Option<SensorSample> {
        let samples = with_timeout(SAMPLE_LOCK_TIMEOUT, self.samples.lock())
            .await
            .ok()?;
        Some(SensorSample::from(*samples))
    }

    /// Current thresholds, waiting for the lock as long as needed.
    pub async fn thresholds(&self) -> Thresholds {
        *self.thresholds.lock().await
    }

    pub fn settings_store(&self) -> &Mutex<CriticalSectionRawMutex, S> {
        &self.store
    }

    /// One evaluation cycle.
    ///
    /// `cached` holds the thresholds used last cycle and is refreshed when the
    /// threshold lock can be taken within [`THRESHOLD_LOCK_TIMEOUT`].
    pub async fn evaluation_cycle<L: ThresholdListener>(
        &self,
        cached: &mut Thresholds,
        listener: &mut L,
    ) {
        if let Ok(current) = with_timeout(THRESHOLD_LOCK_TIMEOUT, self.thresholds.lock()).await {
            *cached = *current;
        }

        let light = self.light_level().await;
        let moisture = self.soil_moisture().await;

        if light < i32::from(cached.light) {
            listener.reached_light_threshold(light, cached.light).await;
        } else {
            listener.above_light_threshold(light, cached.light).await;
        }

        if moisture < i32::from(cached.moisture) {
            listener.reached_moisture_threshold(moisture, cached.moisture).await;
        }
    }
}

impl<S: SettingsStore> Measurements<S> {
    /// Load both thresholds from storage into memory.
    ///
    /// Missing or unreadable keys count as zero.
    pub async fn load_thresholds(&self) -> Thresholds {
        let loaded = {
            let mut store = self.store.lock().await;
            Thresholds {
                light: load_key(&mut *store, LIGHT_THRESHOLD_KEY),
                moisture: load_key(&mut *store, MOISTURE_THRESHOLD_KEY),
            }
        };

        *self.thresholds.lock().await = loaded;
        info!("Light threshold loaded from storage: {}", loaded.light);
        info!("Moisture threshold loaded from storage: {}", loaded.moisture);
        loaded
    }

    /// Load the thresholds, then evaluate every [`EVALUATION_PERIOD`] forever.
    pub async fn run_evaluation<L: ThresholdListener>(&self, listener: &mut L) -> ! {
        let mut cached = self.load_thresholds().await;
        let mut ticker = Ticker::every(EVALUATION_PERIOD);
        loop {
            self.evaluation_cycle(&mut cached, listener).await;
            ticker.next().await;
        }
    }

    /// Persist and apply a new light threshold.
    ///
    /// Nothing changes in memory if persisting fails.
    pub async fn set_light_threshold(&self, value: u16) -> Result<(), MeasurementError> {
        self.persist(LIGHT_THRESHOLD_KEY, value).await?;
        self.thresholds.lock().await.light = value;
        info!("Light threshold set to {}", value);
        Ok(())
    }

    /// Persist and apply a new moisture threshold.
    ///
    /// Nothing changes in memory if persisting fails.
    pub async fn set_moisture_threshold(&self, value: u16) -> Result<(), MeasurementError> {
        self.persist(MOISTURE_THRESHOLD_KEY, value).await?;
        self.thresholds.lock().await.moisture = value;
        info!("Moisture threshold set to {}", value);
        Ok(())
    }

    async fn persist(&self, key: &'static str, value: u16) -> Result<(), MeasurementError> {
        self.store.lock().await.set_u16(key, value).map_err(|e| {
            error!("Failed to persist {} = {}: {:?}", key, value, e);
            MeasurementError::Persistence { key }
        })
    }
}

fn load_key<S: SettingsStore>(store: &mut S, key: &str) -> u16 {
    match store.get_u16(key) {
        Ok(value) => value.unwrap_or(0),
        Err(e) => {
            warn!("Failed to read {} from storage: {:?}", key, e);
            0
        }
    }
}

/// The sampling activity: all sensors of the controller, each bound to its
/// slots in the sample.
pub struct Sampler<C, M, L>
where
    C: Sensor<2>,
    M: Sensor<1>,
    L: Sensor<1>,
{
    climate: ClimateIndexed<C>,
    soil_moisture: SoilMoistureIndexed<M>,
    light_level: LightLevelIndexed<L>,
}

impl<C, M, L> Sampler<C, M, L>
where
    C: Sensor<2>,
    M: Sensor<1>,
    L: Sensor<1>,
{
    pub fn new(climate: C, soil_moisture: M, light_level: L) -> Self {
        Self {
            climate: ClimateIndexed::new(climate),
            soil_moisture: SoilMoistureIndexed::new(soil_moisture),
            light_level: LightLevelIndexed::new(light_level),
        }
    }

    pub fn climate(&self) -> &C {
        self.climate.sensor()
    }

    /// Take one sample. Returns `false` if the cycle was skipped because the
    /// sample lock was busy.
    ///
    /// A failing sensor keeps its previous values; the others still update.
    pub async fn sampling_cycle<S>(&mut self, measurements: &Measurements<S>) -> bool {
        let Ok(mut samples) = with_timeout(SAMPLE_LOCK_TIMEOUT, measurements.samples.lock()).await
        else {
            debug!("Sample lock busy, skipping sampling cycle");
            return false;
        };

        if let Err(e) = self.soil_moisture.read_into(&mut samples).await {
            debug!("Soil moisture kept previous value: {}", e);
        }
        if let Err(e) = self.light_level.read_into(&mut samples).await {
            debug!("Light level kept previous value: {}", e);
        }
        if let Err(e) = self.climate.read_into(&mut samples).await {
            debug!("Climate kept previous values: {}", e);
        }
        true
    }

    /// Sample every [`SAMPLING_PERIOD`] forever.
    pub async fn run<S>(&mut self, measurements: &Measurements<S>) -> ! {
        let mut ticker = Ticker::every(SAMPLING_PERIOD);
        loop {
            self.sampling_cycle(measurements).await;
            ticker.next().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{AnalogSensor, Dht11};
    use crate::sim::{DhtBehaviour, MemoryStore, SharedAnalog, SimulatedDht11Line, VirtualClock};
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};
    use embassy_time::Timer;

    extern crate std;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(&'static str, i32, u16)>,
    }

    impl ThresholdListener for Recorder {
        async fn reached_light_threshold(&mut self, value: i32, threshold: u16) {
            self.calls.push(("reached_light", value, threshold));
        }

        async fn above_light_threshold(&mut self, value: i32, threshold: u16) {
            self.calls.push(("above_light", value, threshold));
        }

        async fn reached_moisture_threshold(&mut self, value: i32, threshold: u16) {
            self.calls.push(("reached_moisture", value, threshold));
        }
    }

    type SimSampler = Sampler<
        Dht11<SimulatedDht11Line, VirtualClock>,
        AnalogSensor<SharedAnalog>,
        AnalogSensor<SharedAnalog>,
    >;

    struct Rig {
        sampler: SimSampler,
        soil: SharedAnalog,
        light: SharedAnalog,
        line: SimulatedDht11Line,
        clock: VirtualClock,
    }

    fn rig(soil: u16, light: u16) -> Rig {
        let clock = VirtualClock::new();
        let line = SimulatedDht11Line::new(clock.clone(), DhtBehaviour::Frame([48, 0, 21, 0, 69]));
        let soil = SharedAnalog::new(soil);
        let light = SharedAnalog::new(light);
        let sampler = Sampler::new(
            Dht11::new(line.clone(), clock.clone()),
            AnalogSensor::new("soil moisture", soil.clone()),
            AnalogSensor::new("light level", light.clone()),
        );
        Rig {
            sampler,
            soil,
            light,
            line,
            clock,
        }
    }

    #[test]
    fn test_sampling_cycle_fills_every_slot() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(1800, 950);

        assert!(block_on(rig.sampler.sampling_cycle(&measurements)));

        assert_eq!(
            block_on(measurements.snapshot()),
            Some(SensorSample {
                temperature: 21,
                humidity: 48,
                soil_moisture: 1800,
                light_level: 950,
            })
        );
    }

    #[test]
    fn test_failed_sensor_keeps_its_previous_value() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(1800, 950);
        block_on(rig.sampler.sampling_cycle(&measurements));

        rig.soil.fail();
        rig.light.set(400);
        rig.line.set_behaviour(DhtBehaviour::Silent);
        rig.clock.advance_us(crate::sensors::MIN_READ_INTERVAL_US);
        block_on(rig.sampler.sampling_cycle(&measurements));

        let sample = block_on(measurements.snapshot()).unwrap();
        assert_eq!(sample.soil_moisture, 1800);
        assert_eq!(sample.light_level, 400);
        assert_eq!((sample.temperature, sample.humidity), (21, 48));
    }

    #[test]
    fn test_sampling_skips_when_lock_is_held() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(1800, 950);

        block_on(async {
            let _held = measurements.samples.lock().await;
            assert!(!rig.sampler.sampling_cycle(&measurements).await);
        });
        assert_eq!(block_on(measurements.soil_moisture()), 0);
    }

    #[test]
    fn test_accessor_falls_back_to_its_own_last_value() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(1800, 950);
        block_on(rig.sampler.sampling_cycle(&measurements));
        assert_eq!(block_on(measurements.light_level()), 950);

        rig.light.set(10);
        block_on(rig.sampler.sampling_cycle(&measurements));

        block_on(async {
            let _held = measurements.samples.lock().await;
            // Light was read before and returns its stale value; soil was
            // never read through its accessor and returns zero.
            assert_eq!(measurements.light_level().await, 950);
            assert_eq!(measurements.soil_moisture().await, 0);
            assert_eq!(measurements.snapshot().await, None);
        });

        assert_eq!(block_on(measurements.light_level()), 10);
    }

    #[test]
    fn test_threshold_setter_persists_before_applying() {
        let measurements = Measurements::new(MemoryStore::new());

        block_on(measurements.set_light_threshold(500)).unwrap();
        block_on(measurements.set_moisture_threshold(1500)).unwrap();

        let store = block_on(measurements.settings_store().lock());
        assert_eq!(store.value(LIGHT_THRESHOLD_KEY), Some(500));
        assert_eq!(store.value(MOISTURE_THRESHOLD_KEY), Some(1500));
        drop(store);
        assert_eq!(
            block_on(measurements.thresholds()),
            Thresholds {
                light: 500,
                moisture: 1500
            }
        );
    }

    #[test]
    fn test_persistence_failure_leaves_memory_untouched() {
        let measurements = Measurements::new(MemoryStore::new());
        block_on(measurements.set_light_threshold(300)).unwrap();
        block_on(measurements.settings_store().lock()).fail_writes(true);

        assert_eq!(
            block_on(measurements.set_light_threshold(900)),
            Err(MeasurementError::Persistence {
                key: LIGHT_THRESHOLD_KEY
            })
        );
        assert_eq!(block_on(measurements.thresholds()).light, 300);
    }

    #[test]
    fn test_load_thresholds_defaults_missing_keys() {
        let store = MemoryStore::new().with_value(MOISTURE_THRESHOLD_KEY, 2100);
        let measurements = Measurements::new(store);

        let loaded = block_on(measurements.load_thresholds());

        assert_eq!(
            loaded,
            Thresholds {
                light: 0,
                moisture: 2100
            }
        );
        assert_eq!(block_on(measurements.thresholds()), loaded);
    }

    #[test]
    fn test_evaluation_picks_exactly_one_light_callback() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(2000, 400);
        block_on(rig.sampler.sampling_cycle(&measurements));
        block_on(measurements.set_light_threshold(500)).unwrap();
        block_on(measurements.set_moisture_threshold(1000)).unwrap();

        let mut recorder = Recorder::default();
        let mut cached = Thresholds::default();
        block_on(measurements.evaluation_cycle(&mut cached, &mut recorder));
        assert_eq!(recorder.calls, [("reached_light", 400, 500)]);

        // Equal to the threshold counts as above; moisture below fires.
        rig.light.set(500);
        rig.soil.set(999);
        block_on(rig.sampler.sampling_cycle(&measurements));
        recorder.calls.clear();
        block_on(measurements.evaluation_cycle(&mut cached, &mut recorder));
        assert_eq!(
            recorder.calls,
            [("above_light", 500, 500), ("reached_moisture", 999, 1000)]
        );
    }

    #[test]
    fn test_evaluation_uses_cached_thresholds_on_contention() {
        let measurements = Measurements::new(MemoryStore::new());
        let mut rig = rig(2000, 400);
        block_on(rig.sampler.sampling_cycle(&measurements));
        block_on(measurements.set_light_threshold(100)).unwrap();

        let mut recorder = Recorder::default();
        let mut cached = Thresholds {
            light: 450,
            moisture: 0,
        };
        block_on(async {
            let _held = measurements.thresholds.lock().await;
            measurements.evaluation_cycle(&mut cached, &mut recorder).await;
        });

        assert_eq!(recorder.calls, [("reached_light", 400, 450)]);
        assert_eq!(cached.light, 450);
    }

    #[test]
    fn test_run_evaluation_loads_then_ticks() {
        let store = MemoryStore::new().with_value(LIGHT_THRESHOLD_KEY, 800);
        let measurements = Measurements::new(store);
        let mut rig = rig(2000, 400);
        block_on(rig.sampler.sampling_cycle(&measurements));

        let mut recorder = Recorder::default();
        let outcome = block_on(select(
            measurements.run_evaluation(&mut recorder),
            Timer::after(EVALUATION_PERIOD * 2 + Duration::from_millis(50)),
        ));
        assert!(matches!(outcome, Either::Second(())));

        assert!(recorder.calls.len() >= 2);
        assert!(
            recorder
                .calls
                .iter()
                .all(|call| *call == ("reached_light", 400, 800))
        );
    }
}
