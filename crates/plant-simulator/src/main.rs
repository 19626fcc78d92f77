//! Desktop simulator for the plant-care controller.
//!
//! Runs the real plant-core activities (sampling, threshold evaluation with
//! the plant controller, the broker session and its publisher) on the host
//! against simulated hardware and a recording broker client. Light and soil
//! moisture follow slow sine waves so the thresholds are crossed in both
//! directions; a scripted scenario pushes threshold updates, drops the broker
//! link once and finally stops the session.
//!
//! Set `RUST_LOG=debug` to see every publish.

use embassy_futures::block_on;
use embassy_futures::join::{join3, join4};
use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Ticker, Timer};
use log::{error, info};

use plant_core::config::Config;
use plant_core::controller::PlantController;
use plant_core::measurements::{Measurements, Sampler};
use plant_core::mqtt::topics;
use plant_core::mqtt::{LightState, MqttSession};
use plant_core::remote_switch::RemoteSwitch;
use plant_core::sensors::{AnalogSensor, DHT11_WARMUP_MS, Dht11, checksum};
use plant_core::settings::{LIGHT_THRESHOLD_KEY, MOISTURE_THRESHOLD_KEY};
use plant_core::sim::{
    DhtBehaviour, MemoryStore, RecordingClient, RecordingPin, SharedAnalog, SimulatedDht11Line,
    VirtualClock,
};

// ---------------------------------------------------------------------------
// Signal constants
// ---------------------------------------------------------------------------

/// Interval between synthetic signal updates.
const SIGNAL_INTERVAL: Duration = Duration::from_millis(100);

/// Light the lamp adds to the light sensor while it is on.
const LAMP_LIGHT: f64 = 350.0;

// ---------------------------------------------------------------------------
// Mock signal generation
// ---------------------------------------------------------------------------

/// Drives the simulated sensors with values that vary over time.
struct MockSignalGenerator {
    elapsed_secs: f64,
    soil: SharedAnalog,
    light: SharedAnalog,
    line: SimulatedDht11Line,
    clock: VirtualClock,
}

impl MockSignalGenerator {
    /// Advance by `dt_secs` and update every simulated sensor.
    fn step(&mut self, dt_secs: f64, lamp_on: bool) {
        self.elapsed_secs += dt_secs;
        let t = self.elapsed_secs;
        // The codec clock only moves when someone waits on it.
        self.clock.advance_us((dt_secs * 1_000_000.0) as u64);

        // Daylight: 100–1500 raw over a 40 s "day"
        let mut light = 800.0 + 700.0 * (t / 40.0 * core::f64::consts::TAU).sin();
        if lamp_on {
            light += LAMP_LIGHT;
        }
        self.light.set(light.clamp(0.0, 4095.0) as u16);

        // Soil dries out slowly and is topped up by the sine
        let soil = 1500.0 + 700.0 * (t / 90.0 * core::f64::consts::TAU).cos();
        self.soil.set(soil as u16);

        // Climate: 19–25 °C, 40–60 %RH
        let temperature = (22.0 + 3.0 * (t / 120.0).sin()) as u8;
        let humidity = (50.0 + 10.0 * (t / 180.0).cos()) as u8;
        let payload = [humidity, 0, temperature, 0];
        self.line.set_behaviour(DhtBehaviour::Frame([
            payload[0],
            payload[1],
            payload[2],
            payload[3],
            checksum(&payload),
        ]));
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting plant-care simulator");

    let config = Config::default();
    let profile = match config.remote_switch.profile() {
        Ok(profile) => profile,
        Err(e) => {
            error!("Invalid remote switch config: {}", e);
            return;
        }
    };

    // Simulated hardware
    let clock = VirtualClock::new();
    let soil = SharedAnalog::new(1500);
    let light = SharedAnalog::new(800);
    let line = SimulatedDht11Line::new(clock.clone(), DhtBehaviour::Silent);
    let relay = RecordingPin::new(clock.clone());
    let radio = RecordingPin::new(clock.clone());

    let mut signals = MockSignalGenerator {
        elapsed_secs: 0.0,
        soil: soil.clone(),
        light: light.clone(),
        line: line.clone(),
        clock: clock.clone(),
    };
    signals.step(0.0, false);

    // Core
    let store = MemoryStore::new()
        .with_value(LIGHT_THRESHOLD_KEY, 500)
        .with_value(MOISTURE_THRESHOLD_KEY, 900);
    let measurements = Measurements::new(store);
    let session = MqttSession::new(RecordingClient::new());
    let mut sampler = Sampler::new(
        Dht11::new(line, clock.clone()),
        AnalogSensor::new("soil moisture", soil),
        AnalogSensor::new("light level", light),
    );
    let mut controller = PlantController::new(
        relay,
        RemoteSwitch::new(radio, clock, profile),
        &session,
        config.controller,
    );

    let signal_task = async {
        let mut ticker = Ticker::every(SIGNAL_INTERVAL);
        loop {
            let lamp_on = session.light_state() == LightState::On;
            signals.step(SIGNAL_INTERVAL.as_millis() as f64 / 1000.0, lamp_on);
            ticker.next().await;
        }
    };

    let scenario = async {
        let started = Instant::now();

        Timer::after(Duration::from_secs(3)).await;
        info!("Scenario: broker sends light threshold 600");
        session
            .client()
            .lock()
            .await
            .push_inbound(topics::THRESHOLD_LIGHT, b"600");

        Timer::after(Duration::from_secs(2)).await;
        info!("Scenario: broker sends moisture threshold 1000");
        session
            .client()
            .lock()
            .await
            .push_inbound(topics::THRESHOLD_MOISTURE, b"1000");

        Timer::after(Duration::from_secs(25)).await;
        info!("Scenario: broker link drops");
        session.client().lock().await.drop_link();

        Timer::after(Duration::from_secs(15)).await;
        info!("Scenario: stopping session");
        if let Err(e) = session.stop().await {
            error!("Stop failed: {}", e);
        }
        info!("Scenario finished after {} s", started.elapsed().as_secs());
    };

    let activities = async {
        Timer::after(Duration::from_millis(DHT11_WARMUP_MS)).await;
        join4(
            sampler.run(&measurements),
            measurements.run_evaluation(&mut controller),
            session.run_publisher(&measurements),
            async {
                if let Err(e) = session.apply_threshold_updates(&measurements).await {
                    error!("Threshold update lost: {}", e);
                }
            },
        )
        .await;
    };

    block_on(select(
        join3(activities, signal_task, scenario),
        session.run_connection(),
    ));

    let client = block_on(session.client().lock());
    info!(
        "Simulator exiting: {} connects, {} messages published",
        client.connects(),
        client.published().len()
    );
}
