//! Busy-wait delays and the microsecond clock for the bit-banged codecs.

use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use esp_hal::delay::Delay;
use plant_core::timing::MicrosClock;

/// Blocking delay that never yields to the executor, paired with the
/// embassy time base as the clock.
#[derive(Clone, Copy)]
pub struct EspTimer {
    delay: Delay,
}

impl EspTimer {
    pub fn new() -> Self {
        Self {
            delay: Delay::new(),
        }
    }
}

impl Default for EspTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayNs for EspTimer {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

impl MicrosClock for EspTimer {
    fn now_micros(&self) -> u64 {
        Instant::now().as_micros()
    }
}
