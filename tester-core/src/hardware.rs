//! Hardware seams driven by the engine.
//!
//! The firmware implements these traits on top of the STM32 peripherals; the
//! emulator and the unit tests substitute fakes. Interrupt-side traits
//! ([`GateOutput`], [`TimerSink`], [`RelayOutput`], [`AdcSink`]) must never
//! block.

/// TRIAC gate driver output.
pub trait GateOutput {
    /// Drives the gate so the TRIAC fires.
    fn assert_gate(&mut self);

    /// Returns the gate to its de-asserted level.
    fn release_gate(&mut self);
}

/// One-shot firing timer counting in phase-control ticks.
pub trait TimerSink {
    /// Resets the counter, loads `ticks`, enables the expiry interrupt and
    /// starts counting.
    fn start(&mut self, ticks: u16);

    /// Resets the counter and loads a new period while the timer keeps running.
    fn reload(&mut self, ticks: u16);

    /// Stops the counter and disables the expiry interrupt.
    fn halt(&mut self);
}

/// Test relay that connects the ground-bond transformer to the output.
pub trait RelayOutput {
    fn energize(&mut self);
    fn de_energize(&mut self);
}

/// Raw readings from one sampling period.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SamplePair {
    pub voltage: u16,
    pub current: u16,
}

impl SamplePair {
    #[must_use]
    pub const fn new(voltage: u16, current: u16) -> Self {
        Self { voltage, current }
    }
}

/// Two-channel ADC scanned once per sampling period.
pub trait AdcSink {
    /// Returns the result of the conversion started on the previous period,
    /// or `None` if that sequence has not finished yet.
    fn read(&mut self) -> Option<SamplePair>;

    /// Starts the next conversion of both channels.
    fn start_conversion(&mut self);
}

/// Analog multiplexer routing the measurement front end.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MuxPath {
    /// Nothing selected; the state outside a test.
    Idle,
    /// Ground-bond voltage/current path.
    GroundBond,
}

impl MuxPath {
    /// Levels for the `(A, B)` select lines.
    #[must_use]
    pub const fn select_lines(self) -> (bool, bool) {
        match self {
            MuxPath::Idle => (false, false),
            MuxPath::GroundBond => (true, false),
        }
    }
}

impl<T: GateOutput + ?Sized> GateOutput for &mut T {
    fn assert_gate(&mut self) {
        (**self).assert_gate();
    }

    fn release_gate(&mut self) {
        (**self).release_gate();
    }
}

impl<T: TimerSink + ?Sized> TimerSink for &mut T {
    fn start(&mut self, ticks: u16) {
        (**self).start(ticks);
    }

    fn reload(&mut self, ticks: u16) {
        (**self).reload(ticks);
    }

    fn halt(&mut self) {
        (**self).halt();
    }
}

impl<T: RelayOutput + ?Sized> RelayOutput for &mut T {
    fn energize(&mut self) {
        (**self).energize();
    }

    fn de_energize(&mut self) {
        (**self).de_energize();
    }
}

impl<T: AdcSink + ?Sized> AdcSink for &mut T {
    fn read(&mut self) -> Option<SamplePair> {
        (**self).read()
    }

    fn start_conversion(&mut self) {
        (**self).start_conversion();
    }
}
