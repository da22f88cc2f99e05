//! Zero-cross synchronised TRIAC firing.
//!
//! Every mains half-cycle starts with a zero-cross interrupt. When power is
//! non-zero the controller loads the firing delay into a one-shot timer; on
//! expiry it raises the gate and reloads the timer with the gating width, and
//! on the second expiry it drops the gate and stops the timer. The gate always
//! falls at least [`SAFETY_TICKS_TO_ZERO`] before the next zero crossing.

#![allow(clippy::module_name_repetitions)]

mod shared;

pub use shared::{PhaseControl, SharedPhase};

use crate::hardware::{GateOutput, RelayOutput, TimerSink};

/// Firing timer clock after the prescaler (60 MHz / 8).
pub const TIMER_TICK_HZ: u32 = 7_500_000;

/// One 60 Hz half-cycle in timer ticks (8.333 ms).
pub const HALF_CYCLE_TICKS: u16 = 62_500;

/// Minimum gap between the gate falling and the next zero crossing (300 µs).
pub const SAFETY_TICKS_TO_ZERO: u16 = 2_250;

/// Shortest gate pulse that reliably latches the TRIAC (100 µs).
pub const MIN_GATING_TICKS: u16 = 750;

/// Largest firing delay that still leaves room for a full gate pulse.
pub const MAX_DELAY_TICKS: u16 = HALF_CYCLE_TICKS - (MIN_GATING_TICKS + SAFETY_TICKS_TO_ZERO);

pub const POWER_PERCENT_MIN: u8 = 0;
pub const POWER_PERCENT_MAX: u8 = 100;

/// Firing delay for `percent`, clamped into `[0, MAX_DELAY_TICKS]`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn delay_ticks_for(percent: u8) -> u16 {
    let percent = if percent > POWER_PERCENT_MAX {
        POWER_PERCENT_MAX
    } else {
        percent
    };
    let delay = (POWER_PERCENT_MAX - percent) as u32 * HALF_CYCLE_TICKS as u32
        / POWER_PERCENT_MAX as u32;
    if delay > MAX_DELAY_TICKS as u32 {
        MAX_DELAY_TICKS
    } else {
        // Bounded by MAX_DELAY_TICKS above.
        delay as u16
    }
}

/// Gate pulse width that follows a firing delay of `delay_ticks`.
#[must_use]
pub const fn gate_ticks_for(delay_ticks: u16) -> u16 {
    if delay_ticks >= HALF_CYCLE_TICKS {
        return MIN_GATING_TICKS;
    }
    let remaining = (HALF_CYCLE_TICKS - delay_ticks).saturating_sub(SAFETY_TICKS_TO_ZERO);
    if remaining < MIN_GATING_TICKS {
        MIN_GATING_TICKS
    } else {
        remaining
    }
}

/// Requested output power and the firing delay derived from it.
///
/// Both fields change together; nothing outside this type writes them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerSetting {
    percent: u8,
    delay_ticks: u16,
}

impl PowerSetting {
    pub const OFF: Self = Self::from_percent(POWER_PERCENT_MIN);

    #[must_use]
    pub const fn from_percent(percent: u8) -> Self {
        let percent = if percent > POWER_PERCENT_MAX {
            POWER_PERCENT_MAX
        } else {
            percent
        };
        Self {
            percent,
            delay_ticks: delay_ticks_for(percent),
        }
    }

    #[must_use]
    pub const fn percent(self) -> u8 {
        self.percent
    }

    #[must_use]
    pub const fn delay_ticks(self) -> u16 {
        self.delay_ticks
    }

    #[must_use]
    pub const fn gate_ticks(self) -> u16 {
        gate_ticks_for(self.delay_ticks)
    }

    #[must_use]
    pub const fn is_off(self) -> bool {
        self.percent == 0
    }
}

/// Where the controller is within the current half-cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FiringState {
    Idle,
    WaitDelay,
    GateOn,
}

/// Owns the gate, firing timer and relay while a test is armed.
pub struct PhaseController<G, T, R> {
    gate: G,
    timer: T,
    relay: R,
    power: PowerSetting,
    state: FiringState,
    recoveries: u32,
}

impl<G, T, R> PhaseController<G, T, R>
where
    G: GateOutput,
    T: TimerSink,
    R: RelayOutput,
{
    /// Takes ownership of the outputs and drives them to the idle state.
    #[must_use]
    pub fn new(gate: G, timer: T, relay: R) -> Self {
        let mut controller = Self {
            gate,
            timer,
            relay,
            power: PowerSetting::OFF,
            state: FiringState::Idle,
            recoveries: 0,
        };
        controller.initialize();
        controller
    }

    /// Gate low, timer stopped, power zero.
    pub fn initialize(&mut self) {
        self.gate.release_gate();
        self.timer.halt();
        self.state = FiringState::Idle;
        self.power = PowerSetting::OFF;
    }

    /// Replaces the power setting; takes effect on the next zero crossing.
    pub fn set_power_percent(&mut self, percent: u8) {
        self.power = PowerSetting::from_percent(percent);
    }

    /// Stops firing immediately and leaves the gate low.
    pub fn shut_down(&mut self) {
        self.power = PowerSetting::OFF;
        self.gate.release_gate();
        self.timer.halt();
        self.state = FiringState::Idle;
    }

    pub fn on_zero_cross(&mut self) {
        if self.power.is_off() {
            self.gate.release_gate();
            self.state = FiringState::Idle;
            self.timer.halt();
            return;
        }

        self.state = FiringState::WaitDelay;
        self.timer.start(self.power.delay_ticks());
    }

    pub fn on_timer_expired(&mut self) {
        match self.state {
            FiringState::WaitDelay => {
                self.gate.assert_gate();
                self.timer.reload(self.power.gate_ticks());
                self.state = FiringState::GateOn;
            }
            FiringState::GateOn => {
                self.gate.release_gate();
                self.timer.halt();
                self.state = FiringState::Idle;
            }
            FiringState::Idle => self.recover(),
        }
    }

    fn recover(&mut self) {
        self.gate.release_gate();
        self.relay.de_energize();
        self.timer.halt();
        self.state = FiringState::Idle;
        self.recoveries = self.recoveries.wrapping_add(1);
    }

    #[must_use]
    pub fn power(&self) -> PowerSetting {
        self.power
    }

    #[must_use]
    pub fn state(&self) -> FiringState {
        self.state
    }

    /// Number of times an unexpected timer expiry forced the safe state.
    #[must_use]
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    #[must_use]
    pub fn gate(&self) -> &G {
        &self.gate
    }

    #[must_use]
    pub fn timer(&self) -> &T {
        &self.timer
    }

    #[must_use]
    pub fn relay(&self) -> &R {
        &self.relay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_eats_into_gate_and_safety_margin() {
        for percent in 0..=u8::MAX {
            let delay = delay_ticks_for(percent);
            assert!(
                delay <= HALF_CYCLE_TICKS - (MIN_GATING_TICKS + SAFETY_TICKS_TO_ZERO),
                "percent {percent} produced delay {delay}"
            );
        }
    }

    #[test]
    fn full_power_fires_immediately() {
        assert_eq!(delay_ticks_for(100), 0);
        assert_eq!(delay_ticks_for(250), 0);
        assert_eq!(PowerSetting::from_percent(250).percent(), 100);
    }

    #[test]
    fn delay_scales_with_remaining_power() {
        assert_eq!(delay_ticks_for(50), 31_250);
        assert_eq!(delay_ticks_for(80), 12_500);
        assert_eq!(delay_ticks_for(20), 50_000);
        // 1 % would wait 61_875 ticks; clamped.
        assert_eq!(delay_ticks_for(1), MAX_DELAY_TICKS);
        assert_eq!(PowerSetting::OFF.delay_ticks(), MAX_DELAY_TICKS);
    }

    #[test]
    fn gate_width_fills_the_rest_of_the_half_cycle() {
        assert_eq!(gate_ticks_for(0), HALF_CYCLE_TICKS - SAFETY_TICKS_TO_ZERO);
        assert_eq!(gate_ticks_for(50_000), 10_250);
        assert_eq!(gate_ticks_for(MAX_DELAY_TICKS), MIN_GATING_TICKS);
        assert_eq!(gate_ticks_for(60_000), MIN_GATING_TICKS);
        assert_eq!(gate_ticks_for(HALF_CYCLE_TICKS), MIN_GATING_TICKS);
        assert_eq!(gate_ticks_for(u16::MAX), MIN_GATING_TICKS);
    }

    #[test]
    fn gate_width_matches_formula_when_above_minimum() {
        for percent in 0..=100 {
            let setting = PowerSetting::from_percent(percent);
            let expected =
                HALF_CYCLE_TICKS - setting.delay_ticks() - SAFETY_TICKS_TO_ZERO;
            assert_eq!(setting.gate_ticks(), expected.max(MIN_GATING_TICKS));
        }
    }
}
