use core::cell::RefCell;

use critical_section::Mutex;

use super::SamplingPipeline;
use crate::hardware::AdcSink;
use crate::measurement::{MeasurementCell, MeasurementResult};

/// Task-side view of the sampling pipeline.
pub trait SamplingControl {
    /// Drops any partial window and clears the published reading.
    fn reset(&self);

    /// Most recent reading; may lag the interrupt by one window.
    fn latest(&self) -> MeasurementResult;

    /// Number of readings published since start-up.
    fn generation(&self) -> u32;
}

impl<T: SamplingControl + ?Sized> SamplingControl for &T {
    fn reset(&self) {
        (**self).reset();
    }

    fn latest(&self) -> MeasurementResult {
        (**self).latest()
    }

    fn generation(&self) -> u32 {
        (**self).generation()
    }
}

struct Sampler<A> {
    pipeline: SamplingPipeline,
    adc: A,
}

/// Pipeline and ADC owned by the sampling interrupt, plus the published cell.
///
/// Readers go through the lock-free [`MeasurementCell`] and never block the
/// interrupt.
pub struct SharedSampling<A> {
    sampler: Mutex<RefCell<Option<Sampler<A>>>>,
    cell: MeasurementCell,
}

impl<A: AdcSink> SharedSampling<A> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sampler: Mutex::new(RefCell::new(None)),
            cell: MeasurementCell::new(),
        }
    }

    pub fn install(&self, pipeline: SamplingPipeline, adc: A) {
        critical_section::with(|cs| {
            self.sampler
                .borrow_ref_mut(cs)
                .replace(Sampler { pipeline, adc });
        });
    }

    /// Sampling interrupt entry point.
    pub fn on_tick(&self) {
        critical_section::with(|cs| {
            if let Some(sampler) = self.sampler.borrow_ref_mut(cs).as_mut() {
                sampler.pipeline.on_tick(&mut sampler.adc, &self.cell);
            }
        });
    }

    #[must_use]
    pub fn cell(&self) -> &MeasurementCell {
        &self.cell
    }
}

impl<A: AdcSink> Default for SharedSampling<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AdcSink> SamplingControl for SharedSampling<A> {
    fn reset(&self) {
        critical_section::with(|cs| {
            if let Some(sampler) = self.sampler.borrow_ref_mut(cs).as_mut() {
                sampler.pipeline.reset();
            }
            // The interrupt is the cell's only other writer.
            self.cell.clear();
        });
    }

    fn latest(&self) -> MeasurementResult {
        self.cell.latest()
    }

    fn generation(&self) -> u32 {
        self.cell.generation()
    }
}
