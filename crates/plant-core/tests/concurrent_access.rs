//! Sampling and readers on separate threads must never see a half-written
//! sample.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use embassy_futures::block_on;
use plant_core::measurements::{Measurements, Sampler};
use plant_core::sensors::{AnalogReading, Dht11Readings, Sensor, SensorError};
use plant_core::sim::MemoryStore;

const CYCLES: i32 = 2_000;

/// Climate sensor reporting the current cycle number for both values.
struct CycleClimate(Arc<AtomicI32>);

impl Sensor<2> for CycleClimate {
    type Readings = Dht11Readings;

    async fn read(&mut self) -> Result<Dht11Readings, SensorError> {
        let cycle = self.0.load(Ordering::SeqCst);
        Ok(Dht11Readings {
            temperature_celsius: cycle,
            humidity_percent: cycle,
        })
    }
}

struct CycleAnalog(Arc<AtomicI32>);

impl Sensor<1> for CycleAnalog {
    type Readings = AnalogReading;

    async fn read(&mut self) -> Result<AnalogReading, SensorError> {
        Ok(AnalogReading {
            raw: self.0.load(Ordering::SeqCst),
        })
    }
}

#[test]
fn test_concurrent_readers_never_see_torn_samples() {
    let measurements = Measurements::new(MemoryStore::new());
    let cycle = Arc::new(AtomicI32::new(0));
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut sampler = Sampler::new(
                CycleClimate(cycle.clone()),
                CycleAnalog(cycle.clone()),
                CycleAnalog(cycle.clone()),
            );
            for n in 1..=CYCLES {
                cycle.store(n, Ordering::SeqCst);
                while !block_on(sampler.sampling_cycle(&measurements)) {}
            }
            done.store(true, Ordering::SeqCst);
        });

        for _ in 0..2 {
            scope.spawn(|| {
                let mut last_seen = 0;
                let mut last_light = 0;
                while !done.load(Ordering::SeqCst) {
                    if let Some(sample) = block_on(measurements.snapshot()) {
                        assert_eq!(sample.temperature, sample.humidity, "{sample:?}");
                        assert_eq!(sample.temperature, sample.soil_moisture, "{sample:?}");
                        assert_eq!(sample.temperature, sample.light_level, "{sample:?}");
                        assert!(sample.temperature >= last_seen);
                        last_seen = sample.temperature;
                    }

                    let light = block_on(measurements.light_level());
                    assert!(light >= last_light, "light went back from {last_light} to {light}");
                    last_light = light;
                }
            });
        }
    });

    let final_sample = block_on(measurements.snapshot()).unwrap();
    assert_eq!(final_sample.temperature, CYCLES);
    assert_eq!(final_sample.light_level, CYCLES);
}
