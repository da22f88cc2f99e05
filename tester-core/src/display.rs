//! Display collaborator interface and reading formatting.
//!
//! The character LCD is 20 columns wide. [`ReadingView`] renders a
//! [`MeasurementResult`] into fixed-width lines; the open-circuit sentinel is
//! shown as `OPEN`, never as a number.

use core::fmt::{self, Write};

use heapless::String;

use crate::measurement::MeasurementResult;

/// Characters per display row.
pub const LINE_WIDTH: usize = 20;

pub type DisplayLine = String<LINE_WIDTH>;

/// Receiver of session display updates. Calls must not block.
pub trait DisplaySink {
    /// Refreshes the running-test screen with a new reading.
    fn show_reading(&mut self, reading: &MeasurementResult);

    /// Returns the display to its idle menu.
    fn show_idle(&mut self);
}

impl<T: DisplaySink + ?Sized> DisplaySink for &mut T {
    fn show_reading(&mut self, reading: &MeasurementResult) {
        (**self).show_reading(reading);
    }

    fn show_idle(&mut self) {
        (**self).show_idle();
    }
}

/// Text rendering of one reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReadingView {
    reading: MeasurementResult,
}

impl ReadingView {
    #[must_use]
    pub const fn new(reading: MeasurementResult) -> Self {
        Self { reading }
    }

    /// `R: 985 mOhm`, or `R: OPEN` for an open circuit.
    #[must_use]
    pub fn resistance_line(&self) -> DisplayLine {
        match self.reading.resistance() {
            Some(milliohm) => render(format_args!("R: {milliohm} mOhm")),
            None => render(format_args!("R: OPEN")),
        }
    }

    /// `I: 1.1 A`
    #[must_use]
    pub fn current_line(&self) -> DisplayLine {
        let deci = self.reading.current_deci_amp;
        render(format_args!("I: {}.{} A", deci / 10, deci % 10))
    }

    /// Voltage RMS in raw ADC counts.
    #[must_use]
    pub fn voltage_line(&self) -> DisplayLine {
        render(format_args!("V: {} raw", self.reading.voltage_raw))
    }
}

/// Formats into a display line, truncating anything past the last column.
fn render(args: fmt::Arguments<'_>) -> DisplayLine {
    let mut writer = Truncating(String::new());
    // Truncating never reports an error.
    let _ = writer.write_fmt(args);
    writer.0
}

struct Truncating(DisplayLine);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.0.push(ch).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::OPEN_CIRCUIT;

    fn reading(resistance_milliohm: u32, current_deci_amp: u32, voltage_raw: u32) -> ReadingView {
        ReadingView::new(MeasurementResult {
            resistance_milliohm,
            current_deci_amp,
            voltage_raw,
        })
    }

    #[test]
    fn renders_bond_reading() {
        let view = reading(985, 11, 496);
        assert_eq!(view.resistance_line().as_str(), "R: 985 mOhm");
        assert_eq!(view.current_line().as_str(), "I: 1.1 A");
        assert_eq!(view.voltage_line().as_str(), "V: 496 raw");
    }

    #[test]
    fn sentinel_renders_as_open() {
        let view = reading(OPEN_CIRCUIT, 0, 3_100);
        assert_eq!(view.resistance_line().as_str(), "R: OPEN");
        assert_eq!(view.current_line().as_str(), "I: 0.0 A");
    }

    #[test]
    fn largest_values_fit_the_row() {
        let view = reading(OPEN_CIRCUIT - 1, u32::MAX, u32::MAX);
        assert_eq!(view.resistance_line().as_str(), "R: 4294967294 mOhm");
        assert_eq!(view.current_line().as_str(), "I: 429496729.5 A");
        assert!(view.voltage_line().len() <= LINE_WIDTH);
    }
}
