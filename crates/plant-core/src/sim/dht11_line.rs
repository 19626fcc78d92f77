use alloc::rc::Rc;
use core::cell::RefCell;

use super::VirtualClock;
use crate::sensors::SingleWirePin;

const RESPONSE_LOW_US: u64 = 78;
const RESPONSE_HIGH_US: u64 = 78;
const BIT_LOW_US: u64 = 48;
const ZERO_HIGH_US: u64 = 26;
const ONE_HIGH_US: u64 = 68;

/// How the simulated sensor answers a start signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtBehaviour {
    /// Answer with these five bytes, checksum included as given.
    Frame([u8; 5]),
    /// No sensor on the line; the pull-up keeps it high.
    Silent,
    /// Line shorted to ground.
    StuckLow,
}

struct LineState {
    behaviour: DhtBehaviour,
    output: bool,
    driven_high: bool,
    released_at_us: Option<u64>,
    start_signals: u32,
}

/// Data line of a simulated DHT11 sensor.
///
/// The sensor's answer is computed from the time elapsed since the host
/// released the line, so the driver sees the real waveform timing. Clones
/// share the same line.
#[derive(Clone)]
pub struct SimulatedDht11Line {
    clock: VirtualClock,
    state: Rc<RefCell<LineState>>,
}

impl SimulatedDht11Line {
    pub fn new(clock: VirtualClock, behaviour: DhtBehaviour) -> Self {
        Self {
            clock,
            state: Rc::new(RefCell::new(LineState {
                behaviour,
                output: false,
                driven_high: true,
                released_at_us: None,
                start_signals: 0,
            })),
        }
    }

    pub fn set_behaviour(&self, behaviour: DhtBehaviour) {
        self.state.borrow_mut().behaviour = behaviour;
    }

    /// Number of times the host pulled the line low to request a reading.
    pub fn start_signals(&self) -> u32 {
        self.state.borrow().start_signals
    }
}

/// Level of the sensor's answer `elapsed` µs after the host released the line.
fn frame_level(frame: &[u8; 5], elapsed: u64) -> bool {
    if elapsed < RESPONSE_LOW_US {
        return false;
    }
    let mut t = RESPONSE_LOW_US;
    if elapsed < t + RESPONSE_HIGH_US {
        return true;
    }
    t += RESPONSE_HIGH_US;

    for i in 0..40 {
        if elapsed < t + BIT_LOW_US {
            return false;
        }
        t += BIT_LOW_US;

        let bit = frame[i / 8] & (1 << (7 - (i % 8))) != 0;
        let high = if bit { ONE_HIGH_US } else { ZERO_HIGH_US };
        if elapsed < t + high {
            return true;
        }
        t += high;
    }

    // End-of-frame low, then the sensor lets go.
    elapsed >= t + BIT_LOW_US
}

impl SingleWirePin for SimulatedDht11Line {
    fn set_as_output(&mut self) {
        let mut state = self.state.borrow_mut();
        state.output = true;
        state.released_at_us = None;
    }

    fn set_as_input(&mut self) {
        let mut state = self.state.borrow_mut();
        state.output = false;
        state.released_at_us = Some(self.clock.now_us());
    }

    fn set_high(&mut self) {
        self.state.borrow_mut().driven_high = true;
    }

    fn set_low(&mut self) {
        let mut state = self.state.borrow_mut();
        state.driven_high = false;
        if state.output {
            state.start_signals += 1;
        }
    }

    fn is_high(&mut self) -> bool {
        let state = self.state.borrow();
        if state.output {
            return state.driven_high;
        }

        match (state.behaviour, state.released_at_us) {
            (_, None) | (DhtBehaviour::Silent, _) => true,
            (DhtBehaviour::StuckLow, _) => false,
            (DhtBehaviour::Frame(frame), Some(released)) => {
                frame_level(&frame, self.clock.now_us().saturating_sub(released))
            }
        }
    }
}
