use alloc::rc::Rc;
use core::cell::Cell;

use embedded_hal::delay::DelayNs;

use crate::timing::MicrosClock;

/// Nanosecond counter that only moves when someone delays on it.
///
/// Clones share the same counter.
#[derive(Clone, Default)]
pub struct VirtualClock {
    now_ns: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.now_ns.get() / 1_000
    }

    pub fn advance_us(&self, us: u64) {
        self.now_ns.set(self.now_ns.get() + us * 1_000);
    }

    pub fn set_now_us(&self, us: u64) {
        self.now_ns.set(us * 1_000);
    }
}

impl DelayNs for VirtualClock {
    fn delay_ns(&mut self, ns: u32) {
        self.now_ns.set(self.now_ns.get() + u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.advance_us(u64::from(us));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance_us(u64::from(ms) * 1_000);
    }
}

impl MicrosClock for VirtualClock {
    fn now_micros(&self) -> u64 {
        self.now_us()
    }
}
