//! Simulated bench for the ground-bond tester.
//!
//! Mains zero crossings, the firing timer and the sampling timer are replayed
//! as discrete events on a virtual nanosecond clock. Each event calls the same
//! `tester-core` entry points the firmware interrupt handlers call, so the
//! phase controller, sampling pipeline and session run unmodified.

use core::f64::consts::PI;
use core::ops::Add;
use core::time::Duration;
use std::cell::RefCell;
use std::rc::Rc;

use tester_core::display::DisplaySink;
use tester_core::hardware::{
    AdcSink, GateOutput, MuxPath, RelayOutput, SamplePair, TimerSink,
};
use tester_core::measurement::MeasurementResult;
use tester_core::phase::{PhaseController, SharedPhase};
use tester_core::sampling::{ADC_MAX, SAMPLING_PERIOD, SamplingPipeline, SharedSampling};
use tester_core::session::{
    SessionConfig, SessionPoll, SessionReport, SessionSlot, TestRig, TestSession,
};

/// 60 Hz mains half cycle.
pub const HALF_CYCLE_NS: u64 = 8_333_333;

/// Peak voltage of the test transformer secondary.
const SOURCE_PEAK_VOLTS: f64 = 8.5;
/// Transformer and wiring resistance in series with the bond.
const SOURCE_OHMS: f64 = 0.1;
const VOLTAGE_COUNTS_PER_VOLT: f64 = 434.8;
const CURRENT_COUNTS_PER_AMP: f64 = 72.56;

/// Firing timer ticks to nanoseconds at 7.5 MHz.
fn ticks_to_ns(ticks: u16) -> u64 {
    u64::from(ticks) * 400 / 3
}

fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Point on the simulated clock.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(u64);

impl SimInstant {
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_ns(rhs)))
    }
}

/// What is clamped between the test leads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Load {
    Resistive { milliohm: u32 },
    Open,
}

#[derive(Debug)]
struct FiringTimerState {
    deadline_ns: u64,
    period: u16,
}

#[derive(Debug)]
struct Hardware {
    now_ns: u64,
    load: Load,
    relay: bool,
    mux: MuxPath,
    gate: bool,
    /// TRIAC latched on since the last gate pulse.
    conducting: bool,
    zero_cross_enabled: bool,
    firing_timer: Option<FiringTimerState>,
    next_sample_ns: Option<u64>,
    next_zero_cross_ns: u64,
    gate_pulses: u32,
    conversions: u32,
}

impl Hardware {
    fn new() -> Self {
        Self {
            now_ns: 0,
            load: Load::Open,
            relay: false,
            mux: MuxPath::Idle,
            gate: false,
            conducting: false,
            zero_cross_enabled: false,
            firing_timer: None,
            next_sample_ns: None,
            next_zero_cross_ns: HALF_CYCLE_NS,
            gate_pulses: 0,
            conversions: 0,
        }
    }

    /// Instantaneous voltage and current seen by the ADC front end.
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> SamplePair {
        if !self.relay || self.mux != MuxPath::GroundBond || !self.conducting {
            return SamplePair::new(0, 0);
        }

        let angle = (self.now_ns % HALF_CYCLE_NS) as f64 / HALF_CYCLE_NS as f64;
        let source = SOURCE_PEAK_VOLTS * (PI * angle).sin();

        match self.load {
            Load::Open => SamplePair::new(to_counts(source * VOLTAGE_COUNTS_PER_VOLT), 0),
            Load::Resistive { milliohm } => {
                let ohms = f64::from(milliohm) / 1000.0;
                let amps = source / (SOURCE_OHMS + ohms);
                SamplePair::new(
                    to_counts(amps * ohms * VOLTAGE_COUNTS_PER_VOLT),
                    to_counts(amps * CURRENT_COUNTS_PER_AMP),
                )
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_counts(value: f64) -> u16 {
    value.abs().min(f64::from(ADC_MAX)) as u16
}

type Bench = Rc<RefCell<Hardware>>;

struct SimGate(Bench);

impl GateOutput for SimGate {
    fn assert_gate(&mut self) {
        let mut hw = self.0.borrow_mut();
        hw.gate = true;
        hw.gate_pulses = hw.gate_pulses.saturating_add(1);
        if hw.relay {
            hw.conducting = true;
        }
    }

    fn release_gate(&mut self) {
        self.0.borrow_mut().gate = false;
    }
}

/// Auto-reloading timer; `start` and `reload` both restart the count.
struct SimTimer(Bench);

impl SimTimer {
    fn load(&self, ticks: u16) {
        let mut hw = self.0.borrow_mut();
        let period = ticks.max(1);
        hw.firing_timer = Some(FiringTimerState {
            deadline_ns: hw.now_ns + ticks_to_ns(period),
            period,
        });
    }
}

impl TimerSink for SimTimer {
    fn start(&mut self, ticks: u16) {
        self.load(ticks);
    }

    fn reload(&mut self, ticks: u16) {
        self.load(ticks);
    }

    fn halt(&mut self) {
        self.0.borrow_mut().firing_timer = None;
    }
}

struct SimRelay(Bench);

impl RelayOutput for SimRelay {
    fn energize(&mut self) {
        self.0.borrow_mut().relay = true;
    }

    fn de_energize(&mut self) {
        let mut hw = self.0.borrow_mut();
        hw.relay = false;
        hw.conducting = false;
    }
}

struct SimAdc(Bench);

impl AdcSink for SimAdc {
    fn read(&mut self) -> Option<SamplePair> {
        Some(self.0.borrow().sample())
    }

    fn start_conversion(&mut self) {
        let mut hw = self.0.borrow_mut();
        hw.conversions = hw.conversions.wrapping_add(1);
    }
}

struct SimRig {
    bench: Bench,
    relay: SimRelay,
}

impl TestRig for SimRig {
    fn energize_relay(&mut self) {
        self.relay.energize();
    }

    fn de_energize_relay(&mut self) {
        self.relay.de_energize();
    }

    fn select_path(&mut self, path: MuxPath) {
        self.bench.borrow_mut().mux = path;
    }

    fn enable_zero_cross(&mut self) {
        self.bench.borrow_mut().zero_cross_enabled = true;
    }

    fn disable_zero_cross(&mut self) {
        self.bench.borrow_mut().zero_cross_enabled = false;
    }

    fn start_conversion(&mut self) {
        let mut hw = self.bench.borrow_mut();
        hw.conversions = hw.conversions.wrapping_add(1);
    }

    fn settle(&mut self) {}

    fn start_sampling(&mut self) {
        let mut hw = self.bench.borrow_mut();
        hw.next_sample_ns = Some(hw.now_ns + duration_to_ns(SAMPLING_PERIOD));
    }

    fn stop_sampling(&mut self) {
        self.bench.borrow_mut().next_sample_ns = None;
    }
}

/// What the tester's screen currently shows. `None` is the idle screen.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayState {
    pub reading: Option<MeasurementResult>,
    pub refreshes: u32,
}

struct SimDisplay(Rc<RefCell<DisplayState>>);

impl DisplaySink for SimDisplay {
    fn show_reading(&mut self, reading: &MeasurementResult) {
        let mut state = self.0.borrow_mut();
        state.reading = Some(*reading);
        state.refreshes = state.refreshes.wrapping_add(1);
    }

    fn show_idle(&mut self) {
        self.0.borrow_mut().reading = None;
    }
}

type SimPhase = SharedPhase<SimGate, SimTimer, SimRelay>;
type SimSampling = SharedSampling<SimAdc>;
type SimSession =
    TestSession<'static, &'static SimPhase, &'static SimSampling, SimRig, SimDisplay, SimInstant>;

/// Interrupt-shared state, leaked so a running session can borrow it for
/// the life of the process.
struct Engine {
    phase: SimPhase,
    sampling: SimSampling,
    slot: SessionSlot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Armed,
    AlreadyRunning,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BenchSnapshot {
    pub elapsed: Duration,
    pub load: Load,
    pub relay_energized: bool,
    pub mux: MuxPath,
    pub sampling: bool,
    pub session_active: bool,
    pub gate_high: bool,
    pub gate_pulses: u32,
    pub conversions: u32,
    pub display: DisplayState,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Event {
    ZeroCross,
    FiringTimer,
    Sample,
    Refresh,
}

pub struct Simulator {
    engine: &'static Engine,
    bench: Bench,
    display: Rc<RefCell<DisplayState>>,
    session: Option<SimSession>,
    next_refresh_ns: Option<u64>,
    last_report: Option<SessionReport>,
}

impl Simulator {
    #[must_use]
    pub fn new() -> Self {
        let bench: Bench = Rc::new(RefCell::new(Hardware::new()));
        let engine: &'static Engine = Box::leak(Box::new(Engine {
            phase: SharedPhase::new(),
            sampling: SharedSampling::new(),
            slot: SessionSlot::new(),
        }));

        engine.phase.install(PhaseController::new(
            SimGate(Rc::clone(&bench)),
            SimTimer(Rc::clone(&bench)),
            SimRelay(Rc::clone(&bench)),
        ));
        engine
            .sampling
            .install(SamplingPipeline::new(), SimAdc(Rc::clone(&bench)));

        Self {
            engine,
            bench,
            display: Rc::new(RefCell::new(DisplayState::default())),
            session: None,
            next_refresh_ns: None,
            last_report: None,
        }
    }

    pub fn set_load(&mut self, load: Load) {
        self.bench.borrow_mut().load = load;
    }

    /// Presses START.
    pub fn start(&mut self) -> StartOutcome {
        let Some(handle) = self.engine.slot.try_acquire() else {
            return StartOutcome::AlreadyRunning;
        };

        let rig = SimRig {
            bench: Rc::clone(&self.bench),
            relay: SimRelay(Rc::clone(&self.bench)),
        };
        let mut session = TestSession::new(
            handle,
            &self.engine.phase,
            &self.engine.sampling,
            rig,
            SimDisplay(Rc::clone(&self.display)),
            SessionConfig::GROUND_BOND,
        );

        let now = self.now();
        session.arm(now);
        self.session = Some(session);
        self.next_refresh_ns = Some(now.as_nanos());
        StartOutcome::Armed
    }

    /// Advances the clock, returning the report of a session that finished
    /// along the way.
    pub fn run_for(&mut self, duration: Duration) -> Option<SessionReport> {
        let end = self.now().as_nanos().saturating_add(duration_to_ns(duration));
        let mut finished = None;

        loop {
            let (at, event) = self.next_event();
            if at > end {
                break;
            }
            self.bench.borrow_mut().now_ns = at;

            match event {
                Event::ZeroCross => self.zero_cross(),
                Event::FiringTimer => self.firing_timer(),
                Event::Sample => self.sample_tick(),
                Event::Refresh => {
                    if let Some(report) = self.refresh() {
                        finished = Some(report);
                    }
                }
            }
        }

        self.bench.borrow_mut().now_ns = end;
        finished
    }

    #[must_use]
    pub fn snapshot(&self) -> BenchSnapshot {
        let hw = self.bench.borrow();
        BenchSnapshot {
            elapsed: Duration::from_nanos(hw.now_ns),
            load: hw.load,
            relay_energized: hw.relay,
            mux: hw.mux,
            sampling: hw.next_sample_ns.is_some(),
            session_active: self.engine.slot.is_active(),
            gate_high: hw.gate,
            gate_pulses: hw.gate_pulses,
            conversions: hw.conversions,
            display: *self.display.borrow(),
        }
    }

    #[must_use]
    pub fn last_report(&self) -> Option<SessionReport> {
        self.last_report
    }

    fn now(&self) -> SimInstant {
        SimInstant::from_nanos(self.bench.borrow().now_ns)
    }

    fn next_event(&self) -> (u64, Event) {
        let hw = self.bench.borrow();
        let candidates = [
            hw.firing_timer
                .as_ref()
                .map(|timer| (timer.deadline_ns, Event::FiringTimer)),
            hw.next_sample_ns.map(|at| (at, Event::Sample)),
            self.next_refresh_ns.map(|at| (at, Event::Refresh)),
        ];

        candidates
            .into_iter()
            .flatten()
            .fold((hw.next_zero_cross_ns, Event::ZeroCross), |best, candidate| {
                if candidate.0 < best.0 { candidate } else { best }
            })
    }

    fn zero_cross(&self) {
        let enabled = {
            let mut hw = self.bench.borrow_mut();
            hw.next_zero_cross_ns += HALF_CYCLE_NS;
            hw.conducting = false;
            hw.zero_cross_enabled
        };
        if enabled {
            self.engine.phase.on_zero_cross();
        }
    }

    fn firing_timer(&self) {
        {
            let mut hw = self.bench.borrow_mut();
            if let Some(timer) = hw.firing_timer.as_mut() {
                timer.deadline_ns += ticks_to_ns(timer.period);
            }
        }
        self.engine.phase.on_timer_expired();
    }

    fn sample_tick(&self) {
        {
            let mut hw = self.bench.borrow_mut();
            let period = duration_to_ns(SAMPLING_PERIOD);
            hw.next_sample_ns = hw.next_sample_ns.map(|at| at + period);
        }
        self.engine.sampling.on_tick();
    }

    fn refresh(&mut self) -> Option<SessionReport> {
        let now = self.now();
        let Some(session) = self.session.as_mut() else {
            self.next_refresh_ns = None;
            return None;
        };

        match session.poll(now) {
            SessionPoll::Sleep(period) => {
                self.next_refresh_ns = Some((now + period).as_nanos());
                None
            }
            SessionPoll::Finished(report) => {
                self.session = None;
                self.next_refresh_ns = None;
                self.last_report = Some(report);
                Some(report)
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tester_core::sampling::OPEN_CIRCUIT;

    use super::*;

    const TEST_LENGTH: Duration = Duration::from_secs(5);

    #[test]
    fn nothing_fires_before_start() {
        let mut sim = Simulator::new();
        sim.set_load(Load::Resistive { milliohm: 100 });

        assert_eq!(sim.run_for(Duration::from_millis(200)), None);

        let snapshot = sim.snapshot();
        assert_eq!(snapshot.gate_pulses, 0);
        assert!(!snapshot.gate_high);
        assert!(!snapshot.relay_energized);
        assert_eq!(snapshot.mux, MuxPath::Idle);
        assert_eq!(snapshot.display.reading, None);
    }

    #[test]
    fn resistive_load_reads_close_to_its_value() {
        let mut sim = Simulator::new();
        sim.set_load(Load::Resistive { milliohm: 100 });
        assert_eq!(sim.start(), StartOutcome::Armed);

        sim.run_for(Duration::from_secs(1));
        let snapshot = sim.snapshot();
        assert!(snapshot.relay_energized);
        assert_eq!(snapshot.mux, MuxPath::GroundBond);
        assert!(snapshot.gate_pulses > 0);
        assert!(snapshot.conversions > 0);

        let reading = snapshot.display.reading.expect("session shows readings");
        let milliohm = reading.resistance().expect("closed circuit");
        assert!((90..=110).contains(&milliohm), "read {milliohm} mOhm");
        assert!(reading.current_deci_amp > 0);
    }

    #[test]
    fn open_load_reads_open_circuit() {
        let mut sim = Simulator::new();
        sim.start();

        let report = sim.run_for(TEST_LENGTH).expect("session finished");
        assert_eq!(report.last_reading.resistance_milliohm, OPEN_CIRCUIT);
        assert_eq!(report.last_reading.current_deci_amp, 0);
        assert_eq!(report.max_resistance_milliohm, None);
        assert!(report.open_circuit_seen);
    }

    #[test]
    fn session_tears_down_after_five_seconds() {
        let mut sim = Simulator::new();
        sim.set_load(Load::Resistive { milliohm: 100 });
        sim.start();

        assert_eq!(sim.run_for(Duration::from_millis(4_900)), None);
        assert!(sim.snapshot().session_active);

        let report = sim
            .run_for(Duration::from_millis(200))
            .expect("session finished at the deadline");
        assert_eq!(report.refreshes, 50);
        assert_eq!(report.phase_recoveries, 0);
        assert_eq!(sim.last_report(), Some(report));

        let snapshot = sim.snapshot();
        assert!(!snapshot.session_active);
        assert!(!snapshot.relay_energized);
        assert!(!snapshot.sampling);
        assert_eq!(snapshot.mux, MuxPath::Idle);
        assert_eq!(snapshot.display.reading, None);
        assert_eq!(snapshot.display.refreshes, 50);

        let pulses = snapshot.gate_pulses;
        sim.run_for(Duration::from_millis(200));
        assert_eq!(sim.snapshot().gate_pulses, pulses);
    }

    #[test]
    fn start_while_running_is_ignored() {
        let mut sim = Simulator::new();
        assert_eq!(sim.start(), StartOutcome::Armed);
        sim.run_for(Duration::from_millis(500));
        assert_eq!(sim.start(), StartOutcome::AlreadyRunning);

        sim.run_for(TEST_LENGTH).expect("first session finished");
        assert_eq!(sim.start(), StartOutcome::Armed);
        assert!(sim.snapshot().session_active);
    }

    #[test]
    fn sim_instant_adds_durations() {
        let start = SimInstant::from_nanos(1_000);
        assert_eq!((start + Duration::from_micros(2)).as_nanos(), 3_000);
        assert_eq!(
            SimInstant::from_nanos(u64::MAX) + Duration::from_secs(1),
            SimInstant::from_nanos(u64::MAX)
        );
    }
}
