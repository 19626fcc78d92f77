//! Transmitter for self-learning 433 MHz remote-controlled sockets
//!
//! The sockets listen for an addressed on/off (or dim) command sent as a
//! fixed-period pulse train. There is no hardware protocol assist: every edge
//! is placed by busy-waiting on a microsecond delay, so a frame must not be
//! preempted once it has started.
//!
//! ## Frame layout
//!
//! A standard frame is a sync pattern, a 32-bit address word sent MSB first,
//! and one trailing high pulse:
//!
//! ```text
//! word = (id << 6) | device_selector | (state << 4) | ((group - 1) << 2)
//! ```
//!
//! `device_selector` is `device - 1` for a single socket or `0b100000` for
//! every socket in the group. The dim variant sends 26 id bits followed by a
//! 10-bit code where bit 8 is replaced by a third "dim sentinel" symbol.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::debug;
use thiserror_no_std::Error;

/// Base period of every pulse in the train.
pub const PERIOD_US: u32 = 230;

/// Largest transmitter id the protocol can address.
pub const MAX_TRANSMITTER_ID: u32 = 4_194_303;

/// Highest dim level; `None` sends a plain on/off frame.
pub const MAX_DIM_LEVEL: u8 = 15;

const DEVICE_ALL_SELECTOR: u32 = 0b10_0000;
const DIM_SENTINEL_BIT: u8 = 8;
const FRAME_SYMBOLS: usize = 38;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteSwitchError {
    #[error("transmitter id {0} exceeds {MAX_TRANSMITTER_ID}")]
    TransmitterId(u32),
    #[error("group {0} is not between 1 and 4")]
    Group(u8),
    #[error("device {0} is not between 1 and 4")]
    Device(u8),
    #[error("dim level {0} exceeds {MAX_DIM_LEVEL}")]
    DimLevel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl Group {
    const fn index(self) -> u32 {
        self as u32 - 1
    }
}

impl TryFrom<u8> for Group {
    type Error = RemoteSwitchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(RemoteSwitchError::Group(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    One,
    Two,
    Three,
    Four,
    /// Every socket paired to the group.
    All,
}

impl Device {
    const fn selector(self) -> u32 {
        match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Three => 2,
            Self::Four => 3,
            Self::All => DEVICE_ALL_SELECTOR,
        }
    }
}

impl TryFrom<u8> for Device {
    type Error = RemoteSwitchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(RemoteSwitchError::Device(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Off = 0,
    On = 1,
}

impl SwitchState {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

/// Address and repeat settings of the socket this transmitter controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSwitchProfile {
    transmitter_id: u32,
    group: Group,
    device: Device,
    dim_level: Option<u8>,
    repeat: u8,
}

impl RemoteSwitchProfile {
    pub fn new(
        transmitter_id: u32,
        group: Group,
        device: Device,
        dim_level: Option<u8>,
        repeat: u8,
    ) -> Result<Self, RemoteSwitchError> {
        if transmitter_id > MAX_TRANSMITTER_ID {
            return Err(RemoteSwitchError::TransmitterId(transmitter_id));
        }
        if let Some(level) = dim_level {
            if level > MAX_DIM_LEVEL {
                return Err(RemoteSwitchError::DimLevel(level));
            }
        }

        Ok(Self {
            transmitter_id,
            group,
            device,
            dim_level,
            repeat,
        })
    }

    pub const fn transmitter_id(&self) -> u32 {
        self.transmitter_id
    }

    pub const fn repeat(&self) -> u8 {
        self.repeat
    }
}

/// One transmittable symbol of the pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Sync,
    Bit(bool),
    DimSentinel,
    Trailer,
}

/// A level held for a duration. A zero duration only sets the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub high: bool,
    pub duration_us: u32,
}

const fn high(duration_us: u32) -> Pulse {
    Pulse {
        high: true,
        duration_us,
    }
}

const fn low(duration_us: u32) -> Pulse {
    Pulse {
        high: false,
        duration_us,
    }
}

impl Symbol {
    /// Pulse sequence of this symbol for the given base period.
    pub fn pulses(self, period_us: u32) -> heapless::Vec<Pulse, 4> {
        let short = period_us * 14 / 10;
        let long = period_us * 6;
        let pulses: &[Pulse] = match self {
            Self::Sync => &[low(47 * period_us), high(period_us), low(12 * period_us)],
            Self::Bit(false) => &[high(period_us), low(short), high(period_us), low(long)],
            Self::Bit(true) => &[high(period_us), low(long), high(period_us), low(short)],
            Self::DimSentinel => &[high(period_us), low(short), high(period_us), low(short)],
            Self::Trailer => &[high(period_us), low(0)],
        };

        let mut out = heapless::Vec::new();
        // At most four pulses per symbol, always fits.
        let _ = out.extend_from_slice(pulses);
        out
    }
}

/// Encoded address word ready for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Standard(u32),
    Dimmed { id: u32, code: u16 },
}

impl Frame {
    pub fn encode(profile: &RemoteSwitchProfile, state: SwitchState) -> Self {
        let device = profile.device.selector();
        let state = state as u32;
        let group = profile.group.index();

        match profile.dim_level {
            None => Self::Standard(
                ((profile.transmitter_id << 6) | device) | (state << 4) | (group << 2),
            ),
            Some(level) => Self::Dimmed {
                id: profile.transmitter_id,
                code: ((device << 4) | (state << 8) | (group << 6) | u32::from(level)) as u16,
            },
        }
    }

    /// Symbols of one repeat, in transmission order.
    pub fn symbols(&self) -> heapless::Vec<Symbol, FRAME_SYMBOLS> {
        let mut symbols = heapless::Vec::new();
        // Longest frame (dim variant) is exactly FRAME_SYMBOLS long.
        let _ = symbols.push(Symbol::Sync);
        match *self {
            Self::Standard(word) => {
                for bit in (0..32).rev() {
                    let _ = symbols.push(Symbol::Bit(word & (1 << bit) != 0));
                }
            }
            Self::Dimmed { id, code } => {
                for bit in (0..26).rev() {
                    let _ = symbols.push(Symbol::Bit(id & (1 << bit) != 0));
                }
                for bit in (0..10u8).rev() {
                    let symbol = if bit == DIM_SENTINEL_BIT {
                        Symbol::DimSentinel
                    } else {
                        Symbol::Bit(code & (1 << bit) != 0)
                    };
                    let _ = symbols.push(symbol);
                }
            }
        }
        let _ = symbols.push(Symbol::Trailer);
        symbols
    }
}

/// Transmitter driving the radio module's data pin.
///
/// The socket state is tracked here and flips on every [`transmit`]: callers
/// toggle the socket, they cannot set it.
///
/// [`transmit`]: RemoteSwitch::transmit
pub struct RemoteSwitch<P, D> {
    pin: P,
    delay: D,
    profile: RemoteSwitchProfile,
    state: SwitchState,
}

impl<P: OutputPin, D: DelayNs> RemoteSwitch<P, D> {
    pub fn new(mut pin: P, delay: D, profile: RemoteSwitchProfile) -> Self {
        let _ = pin.set_low();
        Self {
            pin,
            delay,
            profile,
            state: SwitchState::Off,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn profile(&self) -> &RemoteSwitchProfile {
        &self.profile
    }

    /// Toggle the socket and send the new state `repeat` times.
    ///
    /// Each repeat runs inside its own critical section so no interrupt or
    /// task switch can stretch a pulse. Frames start and end with the line
    /// low, so a pause between two repeats only lengthens the next sync low,
    /// which receivers tolerate. Interrupts are therefore serviced between
    /// repeats instead of being held off for the whole burst. Always runs to
    /// completion.
    pub fn transmit(&mut self) {
        self.state = self.state.toggled();
        let frame = Frame::encode(&self.profile, self.state);
        let symbols = frame.symbols();
        debug!(
            "Remote switch {:?}: sending {:?} x{}",
            self.state, frame, self.profile.repeat
        );

        for _ in 0..self.profile.repeat {
            critical_section::with(|_| {
                for symbol in symbols.iter() {
                    for pulse in symbol.pulses(PERIOD_US) {
                        let _ = if pulse.high {
                            self.pin.set_high()
                        } else {
                            self.pin.set_low()
                        };
                        if pulse.duration_us > 0 {
                            self.delay.delay_us(pulse.duration_us);
                        }
                    }
                }
            });
        }
    }
}
