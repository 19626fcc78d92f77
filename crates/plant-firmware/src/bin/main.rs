#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_net::{Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_time::{Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Flex, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::peripherals::{GPIO4, GPIO5};
use esp_hal::rng::Rng;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::Controller;
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use log::{error, info, warn};

use plant_core::config::{Config, MqttConfig};
use plant_core::controller::PlantController;
use plant_core::measurements::{Measurements, Sampler};
use plant_core::mqtt::MqttSession;
use plant_core::remote_switch::RemoteSwitch;
use plant_core::sensors::{AnalogSensor, DHT11_WARMUP_MS, Dht11};
use plant_firmware::analog::{AdcInput, SharedAdc};
use plant_firmware::broker::{BrokerClient, ConnectionBuffers};
use plant_firmware::sd_settings::{FixedTime, SdSettingsStore};
use plant_firmware::single_wire::SingleWireLine;
use plant_firmware::timer::EspTimer;

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASSWORD: &str = match option_env!("WIFI_PASSWORD") {
    Some(password) => password,
    None => "",
};
const WIFI_RETRY: Duration = Duration::from_secs(5);

type DhtPin = SingleWireLine<21>;
type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
type SettingsStorage = SdSettingsStore<SdSpi, Delay, FixedTime>;
type PlantMeasurements = Measurements<SettingsStorage>;
type PlantSession = MqttSession<BrokerClient>;
type PlantSampler = Sampler<
    Dht11<DhtPin, EspTimer>,
    AnalogSensor<AdcInput<GPIO4<'static>>>,
    AnalogSensor<AdcInput<GPIO5<'static>>>,
>;
type PlantActuators =
    PlantController<'static, Output<'static>, Output<'static>, EspTimer, PlantSession>;

/// Broker settings from the build environment, falling back to the defaults.
fn mqtt_config() -> MqttConfig<'static> {
    let defaults = MqttConfig::default();
    MqttConfig {
        broker_host: option_env!("MQTT_BROKER_HOST").unwrap_or(defaults.broker_host),
        broker_port: option_env!("MQTT_BROKER_PORT")
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.broker_port),
        client_id: option_env!("MQTT_CLIENT_ID").unwrap_or(defaults.client_id),
        username: option_env!("MQTT_USERNAME").unwrap_or(defaults.username),
        password: option_env!("MQTT_PASSWORD").unwrap_or(defaults.password),
        keep_alive_secs: defaults.keep_alive_secs,
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    let config = Config {
        mqtt: mqtt_config(),
        ..Config::default()
    };

    // Actuators
    let relay = Output::new(peripherals.GPIO15, Level::Low, OutputConfig::default());
    let radio = Output::new(peripherals.GPIO16, Level::Low, OutputConfig::default());
    let profile = config
        .remote_switch
        .profile()
        .expect("Invalid remote switch configuration");

    // Single-wire climate sensor
    let mut dht_pad = Flex::new(peripherals.GPIO21);
    dht_pad.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
    dht_pad.set_input_enable(true);
    let climate = Dht11::new(SingleWireLine::<21>::new(dht_pad), EspTimer::new());

    // Analog sensors, both on ADC1
    let mut adc_config = AdcConfig::new();
    let soil_pin = adc_config.enable_pin(peripherals.GPIO4, Attenuation::_11dB);
    let light_pin = adc_config.enable_pin(peripherals.GPIO5, Attenuation::_11dB);
    let adc = &*mk_static!(
        SharedAdc,
        BlockingMutex::new(RefCell::new(Adc::new(peripherals.ADC1, adc_config)))
    );
    let soil = AnalogSensor::new("soil moisture", AdcInput::new(adc, soil_pin));
    let light = AnalogSensor::new("light level", AdcInput::new(adc, light_pin));

    // Settings storage on the SD card
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to initialize SPI bus")
    .with_sck(peripherals.GPIO36)
    .with_mosi(peripherals.GPIO37)
    .with_miso(peripherals.GPIO35);
    let sd_cs = Output::new(peripherals.GPIO14, Level::High, OutputConfig::default());
    let sd_spi = ExclusiveDevice::new(spi_bus, sd_cs, Delay::new())
        .expect("Failed to create SD card SPI device");
    let store = SdSettingsStore::new(SdCard::new(sd_spi, Delay::new()), FixedTime);

    // Network
    let radio_init = &*mk_static!(
        Controller<'static>,
        esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller")
    );
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        mk_static!(StackResources<3>, StackResources::<3>::new()),
        seed,
    );

    // Core
    let measurements = &*mk_static!(PlantMeasurements, Measurements::new(store));
    let buffers = mk_static!(ConnectionBuffers, ConnectionBuffers::new());
    let session = &*mk_static!(
        PlantSession,
        MqttSession::new(BrokerClient::new(stack, config.mqtt, buffers))
    );

    let sampler = Sampler::new(climate, soil, light);
    let controller = PlantController::new(
        relay,
        RemoteSwitch::new(radio, EspTimer::new(), profile),
        session,
        config.controller,
    );

    spawner
        .spawn(wifi_task(wifi_controller, session))
        .expect("Failed to spawn wifi task");
    spawner
        .spawn(net_task(runner))
        .expect("Failed to spawn net task");
    spawner
        .spawn(sampling_task(sampler, measurements))
        .expect("Failed to spawn sampling task");
    spawner
        .spawn(evaluation_task(controller, measurements))
        .expect("Failed to spawn evaluation task");
    spawner
        .spawn(publisher_task(session, measurements))
        .expect("Failed to spawn publisher task");
    spawner
        .spawn(threshold_task(session, measurements))
        .expect("Failed to spawn threshold task");
    spawner
        .spawn(connection_task(session, stack))
        .expect("Failed to spawn connection task");

    info!("All tasks spawned");

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}

#[embassy_executor::task]
async fn wifi_task(mut controller: WifiController<'static>, session: &'static PlantSession) {
    info!("wifi: connecting to '{}'", WIFI_SSID);
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            // wait until we're no longer connected
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("wifi: disconnected, stopping mqtt session");
            if let Err(e) = session.stop().await {
                warn!("mqtt: stop failed: {}", e);
            }
            Timer::after(WIFI_RETRY).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(WIFI_SSID.into())
                    .with_password(WIFI_PASSWORD.into()),
            );

            if let Err(e) = controller.set_config(&client_config) {
                error!("wifi: set_config failed: {:?}", e);
                Timer::after(WIFI_RETRY).await;
                continue;
            }

            if let Err(e) = controller.start_async().await {
                error!("wifi: start failed: {:?}", e);
                Timer::after(WIFI_RETRY).await;
                continue;
            }
            info!("wifi: started STA mode");
        }

        match controller.connect_async().await {
            Ok(()) => info!("wifi: connected!"),
            Err(e) => {
                error!("wifi: connect failed: {:?}", e);
                Timer::after(WIFI_RETRY).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn sampling_task(
    mut sampler: PlantSampler,
    measurements: &'static PlantMeasurements,
) -> ! {
    Timer::after(Duration::from_millis(DHT11_WARMUP_MS)).await;
    sampler.run(measurements).await
}

#[embassy_executor::task]
async fn evaluation_task(
    mut controller: PlantActuators,
    measurements: &'static PlantMeasurements,
) -> ! {
    measurements.run_evaluation(&mut controller).await
}

#[embassy_executor::task]
async fn publisher_task(
    session: &'static PlantSession,
    measurements: &'static PlantMeasurements,
) -> ! {
    session.run_publisher(measurements).await
}

#[embassy_executor::task]
async fn threshold_task(
    session: &'static PlantSession,
    measurements: &'static PlantMeasurements,
) {
    // A threshold that cannot be persisted must not silently diverge from storage.
    let Err(e) = session.apply_threshold_updates(measurements).await;
    panic!("Threshold update failed: {}", e);
}

#[embassy_executor::task]
async fn connection_task(session: &'static PlantSession, stack: Stack<'static>) -> ! {
    loop {
        info!("network: waiting for DHCP IP assignment...");
        stack.wait_config_up().await;
        if let Some(config) = stack.config_v4() {
            info!("network: DHCP assigned IP: {}", config.address);
        }

        session.run_connection().await;
        info!("mqtt: session stopped");

        // Stopped because Wi-Fi went away; start over once it is back.
        Timer::after(WIFI_RETRY).await;
    }
}
