#![allow(dead_code)]

use plant_core::measurements::{Measurements, Sampler};
use plant_core::sensors::{AnalogSensor, Dht11};
use plant_core::sim::{DhtBehaviour, MemoryStore, SharedAnalog, SimulatedDht11Line, VirtualClock};

pub type SimSampler = Sampler<
    Dht11<SimulatedDht11Line, VirtualClock>,
    AnalogSensor<SharedAnalog>,
    AnalogSensor<SharedAnalog>,
>;

/// Simulated sensors plus handles to change what they report.
pub struct Sensors {
    pub sampler: SimSampler,
    pub soil: SharedAnalog,
    pub light: SharedAnalog,
    pub clock: VirtualClock,
    pub line: SimulatedDht11Line,
}

/// Sensors reporting 22 °C, 45 %RH and the given analog values.
pub fn sensors(soil: u16, light: u16) -> Sensors {
    let clock = VirtualClock::new();
    let line = SimulatedDht11Line::new(clock.clone(), DhtBehaviour::Frame([45, 0, 22, 0, 67]));
    let soil = SharedAnalog::new(soil);
    let light = SharedAnalog::new(light);
    let sampler = Sampler::new(
        Dht11::new(line.clone(), clock.clone()),
        AnalogSensor::new("soil moisture", soil.clone()),
        AnalogSensor::new("light level", light.clone()),
    );

    Sensors {
        sampler,
        soil,
        light,
        clock,
        line,
    }
}

pub fn measurements() -> Measurements<MemoryStore> {
    Measurements::new(MemoryStore::new())
}
