use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use super::VirtualClock;
use crate::sensors::AnalogInput;

/// One `set_high`/`set_low` call on a [`RecordingPin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub high: bool,
    pub at_us: u64,
}

/// Output pin that timestamps every level it is set to.
///
/// Clones share the same event log.
#[derive(Clone)]
pub struct RecordingPin {
    clock: VirtualClock,
    events: Rc<RefCell<Vec<PinEvent>>>,
}

impl RecordingPin {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<PinEvent> {
        self.events.borrow().clone()
    }

    /// Levels in the order they were set, timestamps dropped.
    pub fn levels(&self) -> Vec<bool> {
        self.events.borrow().iter().map(|e| e.high).collect()
    }

    pub fn is_high(&self) -> bool {
        self.events.borrow().last().is_some_and(|e| e.high)
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn record(&self, high: bool) {
        self.events.borrow_mut().push(PinEvent {
            high,
            at_us: self.clock.now_us(),
        });
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(true);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcFault;

/// ADC channel whose value is set from outside. Clones share the value.
#[derive(Clone)]
pub struct SharedAnalog {
    value: Rc<Cell<Option<u16>>>,
}

impl SharedAnalog {
    pub fn new(value: u16) -> Self {
        Self {
            value: Rc::new(Cell::new(Some(value))),
        }
    }

    pub fn set(&self, value: u16) {
        self.value.set(Some(value));
    }

    /// Make every following conversion fail until [`set`](Self::set) is called.
    pub fn fail(&self) {
        self.value.set(None);
    }
}

impl AnalogInput for SharedAnalog {
    type Error = AdcFault;

    fn read_raw(&mut self) -> Result<u16, AdcFault> {
        self.value.get().ok_or(AdcFault)
    }
}
