//! ESP32-S3 firmware-specific modules for the plant-care controller
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: GPIO register manipulation for the single-wire sensor line, ADC
//! and busy-wait timer adapters, the SD-card settings store and the rust-mqtt
//! broker client.

#![no_std]

extern crate alloc;

pub mod analog;
pub mod broker;
pub mod sd_settings;
pub mod single_wire;
pub mod timer;
