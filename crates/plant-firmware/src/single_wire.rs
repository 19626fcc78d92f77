//! Single-wire GPIO line for the DHT11 on ESP32-S3
//!
//! The DHT11 protocol turns the same pin around between driving and listening
//! many times per frame, with microsecond deadlines. This module switches the
//! direction and samples the level through the GPIO registers directly, which
//! keeps every operation to a single volatile access.
//!
//! The pad itself (GPIO matrix function, input enable, pull-up) is configured
//! once through esp-hal's [`Flex`] driver, which the line keeps so nothing else
//! can claim the pin.

use core::ptr::{read_volatile, write_volatile};

use esp_hal::gpio::Flex;
use plant_core::sensors::SingleWirePin;

// ESP32-S3 GPIO register addresses for GPIO 0-31 (low bank)
const GPIO_OUT_W1TS_REG: u32 = 0x6000_4008; // Set output bits
const GPIO_OUT_W1TC_REG: u32 = 0x6000_400C; // Clear output bits
const GPIO_ENABLE_W1TS_REG: u32 = 0x6000_4020; // Enable output mode
const GPIO_ENABLE_W1TC_REG: u32 = 0x6000_4024; // Disable output mode (enable input)
const GPIO_IN_REG: u32 = 0x6000_403C; // Input levels

// ESP32-S3 GPIO register addresses for GPIO 32-48 (high bank)
const GPIO_OUT1_W1TS_REG: u32 = 0x6000_4014;
const GPIO_OUT1_W1TC_REG: u32 = 0x6000_4018;
const GPIO_ENABLE1_W1TS_REG: u32 = 0x6000_4030;
const GPIO_ENABLE1_W1TC_REG: u32 = 0x6000_4034;
const GPIO_IN1_REG: u32 = 0x6000_4040;

struct Registers {
    out_set: u32,
    out_clr: u32,
    enable_set: u32,
    enable_clr: u32,
    input: u32,
    bit: u32,
}

/// The DHT11 data line on GPIO `PIN`.
pub struct SingleWireLine<const PIN: u8> {
    _pad: Flex<'static>,
}

impl<const PIN: u8> SingleWireLine<PIN> {
    /// Take over a pad that was configured with input enabled and a pull-up.
    ///
    /// The line starts released (input mode), which is the idle state of the
    /// bus.
    pub fn new(pad: Flex<'static>) -> Self {
        let mut line = Self { _pad: pad };
        line.set_as_input();
        line
    }

    #[inline]
    const fn registers() -> Registers {
        if PIN < 32 {
            Registers {
                out_set: GPIO_OUT_W1TS_REG,
                out_clr: GPIO_OUT_W1TC_REG,
                enable_set: GPIO_ENABLE_W1TS_REG,
                enable_clr: GPIO_ENABLE_W1TC_REG,
                input: GPIO_IN_REG,
                bit: 1u32 << PIN,
            }
        } else {
            Registers {
                out_set: GPIO_OUT1_W1TS_REG,
                out_clr: GPIO_OUT1_W1TC_REG,
                enable_set: GPIO_ENABLE1_W1TS_REG,
                enable_clr: GPIO_ENABLE1_W1TC_REG,
                input: GPIO_IN1_REG,
                bit: 1u32 << (PIN - 32),
            }
        }
    }
}

// The W1TS/W1TC registers only touch the written bit, so no read-modify-write
// and no critical section is needed.
impl<const PIN: u8> SingleWirePin for SingleWireLine<PIN> {
    fn set_as_output(&mut self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.enable_set as *mut u32, regs.bit) };
    }

    fn set_as_input(&mut self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.enable_clr as *mut u32, regs.bit) };
    }

    fn set_high(&mut self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.out_set as *mut u32, regs.bit) };
    }

    fn set_low(&mut self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.out_clr as *mut u32, regs.bit) };
    }

    fn is_high(&mut self) -> bool {
        let regs = Self::registers();
        let levels = unsafe { read_volatile(regs.input as *const u32) };
        levels & regs.bit != 0
    }
}
