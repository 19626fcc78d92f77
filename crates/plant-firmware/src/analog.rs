//! ADC1 channels for the soil-moisture and light sensors.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcChannel, AdcPin};
use esp_hal::peripherals::ADC1;
use plant_core::sensors::AnalogInput;
use thiserror_no_std::Error;

/// Polls of a started one-shot conversion before giving up.
const CONVERSION_POLLS: u32 = 10_000;

/// ADC1 driver shared by every channel on it.
pub type SharedAdc = Mutex<CriticalSectionRawMutex, RefCell<Adc<'static, ADC1<'static>, Blocking>>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcError {
    #[error("ADC conversion did not complete")]
    ConversionTimeout,
}

/// One ADC1 input pin.
pub struct AdcInput<P> {
    adc: &'static SharedAdc,
    pin: AdcPin<P, ADC1<'static>>,
}

impl<P: AdcChannel> AdcInput<P> {
    pub fn new(adc: &'static SharedAdc, pin: AdcPin<P, ADC1<'static>>) -> Self {
        Self { adc, pin }
    }
}

impl<P: AdcChannel> AnalogInput for AdcInput<P> {
    type Error = AdcError;

    fn read_raw(&mut self) -> Result<u16, AdcError> {
        let pin = &mut self.pin;
        self.adc.lock(|adc| {
            let mut adc = adc.borrow_mut();
            // The first call starts the conversion and reports "would block"
            // until it finishes.
            for _ in 0..CONVERSION_POLLS {
                if let Ok(raw) = adc.read_oneshot(pin) {
                    return Ok(raw);
                }
            }
            Err(AdcError::ConversionTimeout)
        })
    }
}
