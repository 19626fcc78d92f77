//! Plant controller: reacts to threshold crossings by switching the lamp
//! socket and watering the plant.

use embassy_time::{Duration, Timer};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::info;

use crate::config::ControllerConfig;
use crate::measurements::ThresholdListener;
use crate::mqtt::LightState;
use crate::remote_switch::{RemoteSwitch, SwitchState};

/// How long [`PlantController::switch_radio_outlet`] leaves the socket toggled.
pub const OUTLET_PULSE: Duration = Duration::from_secs(10);

/// The controller's view of the messaging session: the published light state
/// and a way to request a change of it.
pub trait LightLink {
    fn light_state(&self) -> LightState;
    fn send_light_signal(&self, on: bool);
}

pub struct PlantController<'a, R, P, D, L> {
    relay: R,
    socket: RemoteSwitch<P, D>,
    link: &'a L,
    config: ControllerConfig,
    // Light level right before the lamp was switched on.
    light_before: i32,
}

impl<'a, R, P, D, L> PlantController<'a, R, P, D, L>
where
    R: OutputPin,
    P: OutputPin,
    D: DelayNs,
    L: LightLink,
{
    pub fn new(mut relay: R, socket: RemoteSwitch<P, D>, link: &'a L, config: ControllerConfig) -> Self {
        let _ = relay.set_low();
        Self {
            relay,
            socket,
            link,
            config,
            light_before: 0,
        }
    }

    pub fn socket(&self) -> &RemoteSwitch<P, D> {
        &self.socket
    }

    pub fn light_before(&self) -> i32 {
        self.light_before
    }

    /// Toggle the socket, leave it for [`OUTLET_PULSE`], toggle it back.
    pub async fn switch_radio_outlet(&mut self) {
        self.socket.transmit();
        Timer::after(OUTLET_PULSE).await;
        self.socket.transmit();
    }

    fn switch_socket(&mut self, target: SwitchState) {
        if self.socket.state() != target {
            self.socket.transmit();
        }
    }
}

impl<R, P, D, L> ThresholdListener for PlantController<'_, R, P, D, L>
where
    R: OutputPin,
    P: OutputPin,
    D: DelayNs,
    L: LightLink,
{
    async fn reached_light_threshold(&mut self, value: i32, _threshold: u16) {
        // Only act once the session knows the light state, and only measure
        // the reference level while the lamp is still off.
        if self.link.light_state() == LightState::Off {
            self.light_before = value;
            self.link.send_light_signal(true);
            self.switch_socket(SwitchState::On);
        }
    }

    async fn above_light_threshold(&mut self, value: i32, threshold: u16) {
        if self.link.light_state() != LightState::On {
            return;
        }

        let difference = value - self.light_before;
        info!("difference: {}", difference);
        if difference > i32::from(threshold) + i32::from(self.config.light_threshold_margin) {
            self.link.send_light_signal(false);
            self.switch_socket(SwitchState::Off);
        }
    }

    async fn reached_moisture_threshold(&mut self, value: i32, threshold: u16) {
        info!("Watering... (moisture {} < {})", value, threshold);
        let _ = self.relay.set_high();
        Timer::after(self.config.watering()).await;
        let _ = self.relay.set_low();
        Timer::after(self.config.watering_cooldown()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_switch::{Device, Group, RemoteSwitchProfile};
    use crate::sim::{RecordingPin, VirtualClock};
    use core::cell::Cell;
    use embassy_futures::block_on;
    use embassy_time::Instant;

    extern crate std;
    use std::vec::Vec;

    struct FakeLink {
        state: Cell<LightState>,
        signals: core::cell::RefCell<Vec<bool>>,
    }

    impl FakeLink {
        fn new(state: LightState) -> Self {
            Self {
                state: Cell::new(state),
                signals: Default::default(),
            }
        }
    }

    impl LightLink for FakeLink {
        fn light_state(&self) -> LightState {
            self.state.get()
        }

        fn send_light_signal(&self, on: bool) {
            self.signals.borrow_mut().push(on);
        }
    }

    fn controller<'a>(
        link: &'a FakeLink,
        config: ControllerConfig,
    ) -> (
        PlantController<'a, RecordingPin, RecordingPin, VirtualClock, FakeLink>,
        RecordingPin,
    ) {
        let clock = VirtualClock::new();
        let relay = RecordingPin::new(clock.clone());
        let profile = RemoteSwitchProfile::new(123_456, Group::One, Device::All, None, 1).unwrap();
        let socket = RemoteSwitch::new(RecordingPin::new(clock.clone()), clock, profile);
        (PlantController::new(relay.clone(), socket, link, config), relay)
    }

    #[test]
    fn test_light_is_ignored_until_state_is_known() {
        let link = FakeLink::new(LightState::Unknown);
        let (mut controller, _) = controller(&link, ControllerConfig::default());

        block_on(controller.reached_light_threshold(100, 500));
        block_on(controller.above_light_threshold(2000, 500));

        assert!(link.signals.borrow().is_empty());
        assert_eq!(controller.socket().state(), SwitchState::Off);
    }

    #[test]
    fn test_dark_turns_lamp_on_once() {
        let link = FakeLink::new(LightState::Off);
        let (mut controller, _) = controller(&link, ControllerConfig::default());

        block_on(controller.reached_light_threshold(320, 500));
        assert_eq!(*link.signals.borrow(), [true]);
        assert_eq!(controller.light_before(), 320);
        assert_eq!(controller.socket().state(), SwitchState::On);

        // Session reports on now; staying dark changes nothing.
        link.state.set(LightState::On);
        block_on(controller.reached_light_threshold(250, 500));
        assert_eq!(*link.signals.borrow(), [true]);
        assert_eq!(controller.light_before(), 320);
        assert_eq!(controller.socket().state(), SwitchState::On);
    }

    #[test]
    fn test_lamp_turns_off_when_daylight_dominates() {
        let link = FakeLink::new(LightState::Off);
        let (mut controller, _) = controller(&link, ControllerConfig::default());
        block_on(controller.reached_light_threshold(300, 500));
        link.state.set(LightState::On);

        // 300 + 500 + 100 = 900 is the boundary.
        block_on(controller.above_light_threshold(900, 500));
        assert_eq!(*link.signals.borrow(), [true]);
        assert_eq!(controller.socket().state(), SwitchState::On);

        block_on(controller.above_light_threshold(901, 500));
        assert_eq!(*link.signals.borrow(), [true, false]);
        assert_eq!(controller.socket().state(), SwitchState::Off);
    }

    #[test]
    fn test_watering_pulses_the_relay() {
        let link = FakeLink::new(LightState::Off);
        let config = ControllerConfig {
            watering_ms: 30,
            watering_cooldown_ms: 20,
            ..ControllerConfig::default()
        };
        let (mut controller, relay) = controller(&link, config);

        let started = Instant::now();
        block_on(controller.reached_moisture_threshold(800, 1000));

        assert!(started.elapsed() >= Duration::from_millis(50));
        // Low from construction, then the pulse.
        assert_eq!(relay.levels(), [false, true, false]);
    }
}
