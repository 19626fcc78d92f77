//! Precise timing capability for the bit-banged device codecs
//!
//! Both the single-wire sensor protocol and the remote-switch pulse train need
//! microsecond delays that must never yield to the executor. The platform
//! supplies them as a blocking [`DelayNs`] plus a monotonic microsecond clock,
//! which keeps the codecs themselves free of any target-specific timer code.

use embedded_hal::delay::DelayNs;

/// Monotonic microsecond clock.
pub trait MicrosClock {
    /// Microseconds since an arbitrary, fixed origin (usually boot).
    fn now_micros(&self) -> u64;
}

/// A busy-wait delay source that can also tell the time.
///
/// Blanket-implemented for anything that is both [`DelayNs`] and [`MicrosClock`].
pub trait PreciseTimer: DelayNs + MicrosClock {}

impl<T: DelayNs + MicrosClock> PreciseTimer for T {}
