//! Windowed true-RMS measurement of the ground-bond path.
//!
//! A periodic timer interrupt reads one voltage/current sample pair, folds the
//! squares into an [`AccumulatorWindow`] and re-triggers the ADC. Every
//! [`WINDOW_SAMPLES`] samples the window yields RMS values, which are scaled
//! into a [`MeasurementResult`] and published to a [`MeasurementCell`].

#![allow(clippy::module_name_repetitions)]

mod shared;

pub use shared::{SamplingControl, SharedSampling};

use core::time::Duration;

use crate::fixed_point::rms_from_sum_of_squares;
use crate::hardware::{AdcSink, SamplePair};
use crate::measurement::{MeasurementCell, MeasurementResult};

/// Samples per accumulator window.
pub const WINDOW_SAMPLES: u32 = 127;

/// Interval between sampling interrupts.
pub const SAMPLING_PERIOD: Duration = Duration::from_nanos(130_200);

/// ADC full scale; samples are masked to 12 bits.
pub const ADC_MAX: u16 = 0x0FFF;

pub const CURRENT_SCALE: u32 = 1129;
pub const CURRENT_SHIFT: u32 = 13;
pub const RESISTANCE_SCALE: u32 = 1335;
pub const RESISTANCE_SHIFT: u32 = 3;

/// Resistance reported when no current flows.
pub const OPEN_CIRCUIT: u32 = 0xFFFF_FFFF;

/// Scales a current RMS in ADC counts to tenths of an ampere.
#[must_use]
pub const fn current_deci_amp(current_rms: u32) -> u32 {
    current_rms.saturating_mul(CURRENT_SCALE) >> CURRENT_SHIFT
}

/// Resistance in milliohms from voltage and current RMS in ADC counts.
///
/// Returns [`OPEN_CIRCUIT`] when `current_rms` is zero.
#[must_use]
pub const fn resistance_milliohm(voltage_rms: u32, current_rms: u32) -> u32 {
    if current_rms == 0 {
        return OPEN_CIRCUIT;
    }
    (voltage_rms.saturating_mul(RESISTANCE_SCALE) / current_rms) >> RESISTANCE_SHIFT
}

/// RMS pair produced when a window closes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RmsPair {
    pub voltage: u32,
    pub current: u32,
}

impl MeasurementResult {
    /// Derives the published reading from one window's RMS values.
    #[must_use]
    pub const fn from_rms(rms: RmsPair) -> Self {
        Self {
            resistance_milliohm: resistance_milliohm(rms.voltage, rms.current),
            current_deci_amp: current_deci_amp(rms.current),
            voltage_raw: rms.voltage,
        }
    }
}

/// Running sums of squared samples.
///
/// 127 samples of a full-scale 12-bit reading stay below `u32::MAX`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccumulatorWindow {
    sum_sq_voltage: u32,
    sum_sq_current: u32,
    count: u32,
}

impl AccumulatorWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sum_sq_voltage: 0,
            sum_sq_current: 0,
            count: 0,
        }
    }

    /// Adds one sample; returns the RMS pair when this sample closes the window.
    pub fn push(&mut self, sample: SamplePair) -> Option<RmsPair> {
        let voltage = u32::from(sample.voltage & ADC_MAX);
        let current = u32::from(sample.current & ADC_MAX);

        self.sum_sq_voltage = self.sum_sq_voltage.wrapping_add(voltage * voltage);
        self.sum_sq_current = self.sum_sq_current.wrapping_add(current * current);
        self.count += 1;

        if self.count < WINDOW_SAMPLES {
            return None;
        }

        let rms = RmsPair {
            voltage: rms_from_sum_of_squares(self.sum_sq_voltage),
            current: rms_from_sum_of_squares(self.sum_sq_current),
        };
        self.reset();
        Some(rms)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Samples accumulated in the open window.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Sampling interrupt state: the open window plus counts of closed windows
/// and of ticks that found no finished conversion.
#[derive(Clone, Debug, Default)]
pub struct SamplingPipeline {
    window: AccumulatorWindow,
    windows_closed: u32,
    missed_samples: u32,
}

impl SamplingPipeline {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            window: AccumulatorWindow::new(),
            windows_closed: 0,
            missed_samples: 0,
        }
    }

    /// Folds in one sample and returns the reading if a window closed.
    pub fn on_sample(&mut self, sample: SamplePair) -> Option<MeasurementResult> {
        let rms = self.window.push(sample)?;
        self.windows_closed = self.windows_closed.wrapping_add(1);
        Some(MeasurementResult::from_rms(rms))
    }

    /// Periodic interrupt body: read, accumulate, publish, re-trigger.
    ///
    /// A tick whose conversion is still pending is counted and skipped; the
    /// ADC is re-triggered either way.
    pub fn on_tick<A: AdcSink>(&mut self, adc: &mut A, cell: &MeasurementCell) {
        match adc.read() {
            Some(sample) => {
                if let Some(result) = self.on_sample(sample) {
                    cell.publish(result);
                }
            }
            None => self.missed_samples = self.missed_samples.wrapping_add(1),
        }
        adc.start_conversion();
    }

    /// Discards the open window.
    pub fn reset(&mut self) {
        self.window.reset();
        self.windows_closed = 0;
        self.missed_samples = 0;
    }

    #[must_use]
    pub fn window(&self) -> &AccumulatorWindow {
        &self.window
    }

    #[must_use]
    pub fn windows_closed(&self) -> u32 {
        self.windows_closed
    }

    /// Ticks that found the previous conversion unfinished.
    #[must_use]
    pub fn missed_samples(&self) -> u32 {
        self.missed_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ADC fake that replays a fixed script of read results.
    struct ScriptedAdc {
        script: &'static [Option<SamplePair>],
        reads: usize,
        conversions: u32,
    }

    impl ScriptedAdc {
        fn new(script: &'static [Option<SamplePair>]) -> Self {
            Self {
                script,
                reads: 0,
                conversions: 0,
            }
        }
    }

    impl AdcSink for ScriptedAdc {
        fn read(&mut self) -> Option<SamplePair> {
            let result = self.script[self.reads % self.script.len()];
            self.reads += 1;
            result
        }

        fn start_conversion(&mut self) {
            self.conversions += 1;
        }
    }

    fn fill(window: &mut AccumulatorWindow, sample: SamplePair, count: u32) -> Option<RmsPair> {
        let mut closed = None;
        for _ in 0..count {
            closed = window.push(sample);
        }
        closed
    }

    #[test]
    fn open_circuit_when_no_current() {
        assert_eq!(resistance_milliohm(1_000, 0), OPEN_CIRCUIT);
        assert_eq!(resistance_milliohm(0, 0), OPEN_CIRCUIT);
    }

    #[test]
    fn zero_voltage_is_zero_resistance() {
        assert_eq!(resistance_milliohm(0, 1), 0);
        assert_eq!(resistance_milliohm(0, 4_095), 0);
    }

    #[test]
    fn scales_rms_values() {
        assert_eq!(resistance_milliohm(496, 84), 985);
        assert_eq!(current_deci_amp(84), 11);
        assert_eq!(current_deci_amp(0), 0);
        assert_eq!(current_deci_amp(4_095), 564);
    }

    #[test]
    fn window_closes_after_exactly_127_samples() {
        let mut window = AccumulatorWindow::new();
        let sample = SamplePair::new(498, 85);

        assert_eq!(fill(&mut window, sample, WINDOW_SAMPLES - 1), None);
        assert_eq!(window.len(), WINDOW_SAMPLES - 1);

        let rms = window.push(sample).expect("window should close");
        assert_eq!(rms, RmsPair { voltage: 496, current: 84 });
        assert!(window.is_empty());

        // The 128th sample opens a fresh window.
        assert_eq!(window.push(sample), None);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn full_scale_window_does_not_overflow() {
        let mut window = AccumulatorWindow::new();
        let rms = fill(&mut window, SamplePair::new(ADC_MAX, ADC_MAX), WINDOW_SAMPLES)
            .expect("window should close");
        // sqrt(127 * 4095^2 / 128) rounds down to 4078.
        assert_eq!(rms.voltage, 4_078);
        assert_eq!(rms.current, 4_078);
    }

    #[test]
    fn samples_are_masked_to_twelve_bits() {
        let mut masked = AccumulatorWindow::new();
        let mut plain = AccumulatorWindow::new();
        let a = fill(&mut masked, SamplePair::new(0xF000 | 498, 0xF000 | 85), WINDOW_SAMPLES);
        let b = fill(&mut plain, SamplePair::new(498, 85), WINDOW_SAMPLES);
        assert_eq!(a, b);
    }

    #[test]
    fn pipeline_produces_measurement_on_close() {
        let mut pipeline = SamplingPipeline::new();
        let sample = SamplePair::new(498, 85);
        for _ in 0..WINDOW_SAMPLES - 1 {
            assert_eq!(pipeline.on_sample(sample), None);
        }
        let result = pipeline.on_sample(sample).expect("window should close");
        assert_eq!(
            result,
            MeasurementResult {
                resistance_milliohm: 985,
                current_deci_amp: 11,
                voltage_raw: 496,
            }
        );
        assert_eq!(pipeline.windows_closed(), 1);
    }

    #[test]
    fn zero_current_window_publishes_sentinel() {
        let mut pipeline = SamplingPipeline::new();
        let mut last = None;
        for _ in 0..WINDOW_SAMPLES {
            last = pipeline.on_sample(SamplePair::new(2_000, 0));
        }
        let result = last.expect("window should close");
        assert!(result.is_open_circuit());
        assert_eq!(result.current_deci_amp, 0);
    }

    #[test]
    fn reset_discards_partial_window() {
        let mut pipeline = SamplingPipeline::new();
        for _ in 0..50 {
            pipeline.on_sample(SamplePair::new(4_000, 4_000));
        }
        pipeline.reset();
        assert!(pipeline.window().is_empty());

        let mut last = None;
        for _ in 0..WINDOW_SAMPLES {
            last = pipeline.on_sample(SamplePair::new(498, 85));
        }
        assert_eq!(last.map(|r| r.resistance_milliohm), Some(985));
    }

    #[test]
    fn tick_without_result_still_retriggers_adc() {
        let cell = MeasurementCell::new();
        let mut adc = ScriptedAdc::new(&[None]);
        let mut pipeline = SamplingPipeline::new();

        for _ in 0..3 * WINDOW_SAMPLES {
            pipeline.on_tick(&mut adc, &cell);
        }

        assert_eq!(adc.conversions, 3 * WINDOW_SAMPLES);
        assert_eq!(pipeline.missed_samples(), 3 * WINDOW_SAMPLES);
        assert!(pipeline.window().is_empty());
        assert_eq!(pipeline.windows_closed(), 0);
        assert_eq!(cell.generation(), 0);
    }

    #[test]
    fn missed_ticks_do_not_count_toward_the_window() {
        const SAMPLE: Option<SamplePair> = Some(SamplePair::new(498, 85));
        let cell = MeasurementCell::new();
        let mut adc = ScriptedAdc::new(&[SAMPLE, None]);
        let mut pipeline = SamplingPipeline::new();

        for _ in 0..2 * WINDOW_SAMPLES - 1 {
            pipeline.on_tick(&mut adc, &cell);
        }

        assert_eq!(adc.conversions, 2 * WINDOW_SAMPLES - 1);
        assert_eq!(pipeline.missed_samples(), WINDOW_SAMPLES - 1);
        assert_eq!(cell.generation(), 1);
        assert_eq!(cell.latest().resistance_milliohm, 985);
    }
}
