//! Ground-bond test session lifecycle.
//!
//! A [`TestSession`] walks `Idle → Arming → Running → TearingDown → Idle`.
//! Arming brings the relay, multiplexer, phase controller and sampling timer
//! up in a fixed order; running publishes the latest reading on every refresh
//! until the wall-clock deadline passes; teardown puts every output back in
//! its safe state. Teardown also runs when the session is dropped early.

#![allow(clippy::module_name_repetitions)]

mod slot;

pub use slot::{SessionHandle, SessionSlot};

use core::ops::Add;
use core::time::Duration;

use crate::display::DisplaySink;
use crate::hardware::MuxPath;
use crate::measurement::MeasurementResult;
use crate::phase::PhaseControl;
use crate::sampling::SamplingControl;

/// Timing and power parameters for one session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub duration: Duration,
    pub refresh_period: Duration,
    pub initial_power_percent: u8,
}

impl SessionConfig {
    pub const GROUND_BOND: Self = Self {
        duration: Duration::from_secs(5),
        refresh_period: Duration::from_millis(100),
        initial_power_percent: 20,
    };
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::GROUND_BOND
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    Idle,
    Arming,
    Running,
    TearingDown,
}

/// Monotonic timestamp supplied by the caller.
pub trait SessionInstant: Copy + Ord + Add<Duration, Output = Self> {}

impl<T> SessionInstant for T where T: Copy + Ord + Add<Duration, Output = T> {}

/// Session-side peripherals outside the phase controller and sampling ISR.
pub trait TestRig {
    fn energize_relay(&mut self);
    fn de_energize_relay(&mut self);
    fn select_path(&mut self, path: MuxPath);
    fn enable_zero_cross(&mut self);
    fn disable_zero_cross(&mut self);
    /// Kicks the first ADC conversion so the sampling ISR finds a result.
    fn start_conversion(&mut self);
    /// Short blocking delay before the sampling timer starts.
    fn settle(&mut self);
    fn start_sampling(&mut self);
    /// Stops and disables the sampling timer and detaches its interrupt.
    fn stop_sampling(&mut self);
}

impl<T: TestRig + ?Sized> TestRig for &mut T {
    fn energize_relay(&mut self) {
        (**self).energize_relay();
    }

    fn de_energize_relay(&mut self) {
        (**self).de_energize_relay();
    }

    fn select_path(&mut self, path: MuxPath) {
        (**self).select_path(path);
    }

    fn enable_zero_cross(&mut self) {
        (**self).enable_zero_cross();
    }

    fn disable_zero_cross(&mut self) {
        (**self).disable_zero_cross();
    }

    fn start_conversion(&mut self) {
        (**self).start_conversion();
    }

    fn settle(&mut self) {
        (**self).settle();
    }

    fn start_sampling(&mut self) {
        (**self).start_sampling();
    }

    fn stop_sampling(&mut self) {
        (**self).stop_sampling();
    }
}

/// What the caller should do after [`TestSession::poll`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionPoll {
    /// Sleep this long, then poll again.
    Sleep(Duration),
    /// The session has been torn down.
    Finished(SessionReport),
}

/// Summary of a completed session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionReport {
    /// Display refreshes performed while running.
    pub refreshes: u32,
    pub last_reading: MeasurementResult,
    /// Highest finite resistance from a closed window.
    pub max_resistance_milliohm: Option<u32>,
    /// A closed window reported the open-circuit sentinel.
    pub open_circuit_seen: bool,
    /// Phase controller safety recoveries during the run.
    pub phase_recoveries: u32,
}

impl SessionReport {
    const EMPTY: Self = Self {
        refreshes: 0,
        last_reading: MeasurementResult::EMPTY,
        max_resistance_milliohm: None,
        open_circuit_seen: false,
        phase_recoveries: 0,
    };

    fn record(&mut self, reading: MeasurementResult) {
        match reading.resistance() {
            Some(milliohm) => {
                let max = self.max_resistance_milliohm.unwrap_or(0).max(milliohm);
                self.max_resistance_milliohm = Some(max);
            }
            None => self.open_circuit_seen = true,
        }
    }
}

/// One ground-bond test run.
pub struct TestSession<'a, P, S, R, D, I>
where
    P: PhaseControl,
    S: SamplingControl,
    R: TestRig,
    D: DisplaySink,
    I: SessionInstant,
{
    phase: P,
    sampling: S,
    rig: R,
    display: D,
    config: SessionConfig,
    state: SessionPhase,
    handle: Option<SessionHandle<'a>>,
    deadline: Option<I>,
    armed_generation: u32,
    armed_recoveries: u32,
    report: SessionReport,
}

impl<'a, P, S, R, D, I> TestSession<'a, P, S, R, D, I>
where
    P: PhaseControl,
    S: SamplingControl,
    R: TestRig,
    D: DisplaySink,
    I: SessionInstant,
{
    /// Builds an idle session. Holding `handle` keeps every other start out.
    #[must_use]
    pub fn new(
        handle: SessionHandle<'a>,
        phase: P,
        sampling: S,
        rig: R,
        display: D,
        config: SessionConfig,
    ) -> Self {
        Self {
            phase,
            sampling,
            rig,
            display,
            config,
            state: SessionPhase::Idle,
            handle: Some(handle),
            deadline: None,
            armed_generation: 0,
            armed_recoveries: 0,
            report: SessionReport::EMPTY,
        }
    }

    /// Brings the hardware up and starts the run clock at `now`.
    ///
    /// Does nothing unless the session is idle and still holds its handle.
    pub fn arm(&mut self, now: I) {
        if self.state != SessionPhase::Idle || self.handle.is_none() {
            return;
        }
        self.state = SessionPhase::Arming;

        self.sampling.reset();
        self.armed_generation = self.sampling.generation();
        self.armed_recoveries = self.phase.recoveries();

        self.rig.energize_relay();
        self.rig.select_path(MuxPath::GroundBond);
        self.phase.initialize();
        self.phase.set_power_percent(self.config.initial_power_percent);
        self.rig.enable_zero_cross();
        self.rig.start_conversion();
        self.rig.settle();
        self.rig.start_sampling();

        self.deadline = Some(now + self.config.duration);
        self.state = SessionPhase::Running;
    }

    /// Publishes the latest reading, or tears down once the deadline passed.
    pub fn poll(&mut self, now: I) -> SessionPoll {
        let Some(deadline) = self.deadline.filter(|_| self.state == SessionPhase::Running) else {
            return SessionPoll::Finished(self.tear_down());
        };

        if now >= deadline {
            return SessionPoll::Finished(self.tear_down());
        }

        let reading = self.sampling.latest();
        if self.sampling.generation() != self.armed_generation {
            self.report.record(reading);
        }
        self.report.last_reading = reading;
        self.report.refreshes = self.report.refreshes.saturating_add(1);
        self.display.show_reading(&reading);

        SessionPoll::Sleep(self.config.refresh_period)
    }

    /// Returns every output to the safe state and releases the handle.
    ///
    /// Safe to call repeatedly; only the first call touches the hardware.
    pub fn tear_down(&mut self) -> SessionReport {
        if self.handle.is_none() {
            return self.report;
        }
        self.state = SessionPhase::TearingDown;

        self.phase.shut_down();
        self.rig.disable_zero_cross();
        self.rig.select_path(MuxPath::Idle);
        self.rig.de_energize_relay();
        self.rig.stop_sampling();
        self.display.show_idle();

        self.report.phase_recoveries = self
            .phase
            .recoveries()
            .wrapping_sub(self.armed_recoveries);
        self.deadline = None;
        self.handle = None;
        self.state = SessionPhase::Idle;
        self.report
    }

    #[must_use]
    pub fn state(&self) -> SessionPhase {
        self.state
    }

    #[must_use]
    pub fn deadline(&self) -> Option<I> {
        self.deadline
    }

    /// Report so far; final once the session has been torn down.
    #[must_use]
    pub fn report(&self) -> SessionReport {
        self.report
    }

    #[must_use]
    pub fn holds_handle(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn rig(&self) -> &R {
        &self.rig
    }

    #[must_use]
    pub fn display(&self) -> &D {
        &self.display
    }
}

impl<P, S, R, D, I> Drop for TestSession<'_, P, S, R, D, I>
where
    P: PhaseControl,
    S: SamplingControl,
    R: TestRig,
    D: DisplaySink,
    I: SessionInstant,
{
    fn drop(&mut self) {
        self.tear_down();
    }
}
