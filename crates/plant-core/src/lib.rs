//! Hardware-independent core library for the plant-care controller
//!
//! This crate contains all platform-agnostic logic of the controller: the
//! single-wire climate sensor codec, the radio remote-switch transmitter codec,
//! the measurement/threshold engine, the plant controller that reacts to
//! threshold crossings, and the broker session state machine.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).
//! Hardware is reached only through `embedded-hal` traits and the small
//! capability traits declared here, so every codec can be driven by a virtual
//! clock on the host.

#![no_std]

extern crate alloc;

pub mod config;
pub mod controller;
pub mod measurements;
pub mod mqtt;
pub mod remote_switch;
pub mod sensors;
pub mod settings;
pub mod timing;

#[cfg(any(test, feature = "sim"))]
pub mod sim;
