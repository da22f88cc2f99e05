use core::cell::RefCell;

use critical_section::Mutex;

use super::PhaseController;
use crate::hardware::{GateOutput, RelayOutput, TimerSink};

/// Task-side view of the phase controller.
///
/// Every call runs inside a critical section so it never interleaves with the
/// zero-cross or firing-timer interrupts.
pub trait PhaseControl {
    fn initialize(&self);
    fn set_power_percent(&self, percent: u8);
    fn shut_down(&self);
    fn recoveries(&self) -> u32;
}

impl<T: PhaseControl + ?Sized> PhaseControl for &T {
    fn initialize(&self) {
        (**self).initialize();
    }

    fn set_power_percent(&self, percent: u8) {
        (**self).set_power_percent(percent);
    }

    fn shut_down(&self) {
        (**self).shut_down();
    }

    fn recoveries(&self) -> u32 {
        (**self).recoveries()
    }
}

/// Interrupt-safe home for the single [`PhaseController`] instance.
///
/// Calls made before [`SharedPhase::install`] are ignored.
pub struct SharedPhase<G, T, R> {
    inner: Mutex<RefCell<Option<PhaseController<G, T, R>>>>,
}

impl<G, T, R> SharedPhase<G, T, R>
where
    G: GateOutput,
    T: TimerSink,
    R: RelayOutput,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Places the controller; any previously installed one is dropped.
    pub fn install(&self, controller: PhaseController<G, T, R>) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(controller);
        });
    }

    /// Runs `f` against the controller inside a critical section.
    pub fn with<F, Ret>(&self, f: F) -> Option<Ret>
    where
        F: FnOnce(&mut PhaseController<G, T, R>) -> Ret,
    {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).as_mut().map(f))
    }

    /// Zero-cross interrupt entry point.
    pub fn on_zero_cross(&self) {
        self.with(PhaseController::on_zero_cross);
    }

    /// Firing-timer interrupt entry point.
    pub fn on_timer_expired(&self) {
        self.with(PhaseController::on_timer_expired);
    }
}

impl<G, T, R> Default for SharedPhase<G, T, R>
where
    G: GateOutput,
    T: TimerSink,
    R: RelayOutput,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<G, T, R> PhaseControl for SharedPhase<G, T, R>
where
    G: GateOutput,
    T: TimerSink,
    R: RelayOutput,
{
    fn initialize(&self) {
        self.with(PhaseController::initialize);
    }

    fn set_power_percent(&self, percent: u8) {
        self.with(|controller| controller.set_power_percent(percent));
    }

    fn shut_down(&self) {
        self.with(PhaseController::shut_down);
    }

    fn recoveries(&self) -> u32 {
        self.with(|controller| controller.recoveries()).unwrap_or(0)
    }
}
