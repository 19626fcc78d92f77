//! Exports the device settings from `.env` as compile-time environment
//! variables, read in `main` with `option_env!`.

const KEYS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "MQTT_BROKER_HOST",
    "MQTT_BROKER_PORT",
    "MQTT_CLIENT_ID",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    for key in KEYS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    // A missing .env is fine; the process environment and the defaults still apply.
    let _ = dotenvy::dotenv();

    for key in KEYS {
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }
}
