//! Latest-reading snapshot shared between the sampling interrupt and tasks.

use core::sync::atomic::{Ordering, fence};

use portable_atomic::AtomicU32;

use crate::sampling::OPEN_CIRCUIT;

/// Readings derived from one closed accumulator window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeasurementResult {
    /// Bond resistance, or [`OPEN_CIRCUIT`] when no current flowed.
    pub resistance_milliohm: u32,
    pub current_deci_amp: u32,
    /// Voltage RMS in ADC counts.
    pub voltage_raw: u32,
}

impl MeasurementResult {
    /// Reading reported before the first window closes.
    pub const EMPTY: Self = Self {
        resistance_milliohm: 0,
        current_deci_amp: 0,
        voltage_raw: 0,
    };

    #[must_use]
    pub const fn is_open_circuit(&self) -> bool {
        self.resistance_milliohm == OPEN_CIRCUIT
    }

    /// Resistance in milliohms, or `None` for an open circuit.
    #[must_use]
    pub const fn resistance(&self) -> Option<u32> {
        if self.is_open_circuit() {
            None
        } else {
            Some(self.resistance_milliohm)
        }
    }
}

impl Default for MeasurementResult {
    fn default() -> Self {
        Self::EMPTY
    }
}

const READ_ATTEMPTS: usize = 4;

/// Single-producer/single-consumer snapshot cell.
///
/// The producer is the sampling interrupt; it never waits. Readers retry a
/// bounded number of times when they race a publish and then settle for the
/// last consistent copy they saw, so a reading can be one window stale.
pub struct MeasurementCell {
    sequence: AtomicU32,
    resistance_milliohm: AtomicU32,
    current_deci_amp: AtomicU32,
    voltage_raw: AtomicU32,
}

impl MeasurementCell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            resistance_milliohm: AtomicU32::new(0),
            current_deci_amp: AtomicU32::new(0),
            voltage_raw: AtomicU32::new(0),
        }
    }

    /// Stores a new reading. Must only be called from the single producer.
    pub fn publish(&self, result: MeasurementResult) {
        let start = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.resistance_milliohm
            .store(result.resistance_milliohm, Ordering::Relaxed);
        self.current_deci_amp
            .store(result.current_deci_amp, Ordering::Relaxed);
        self.voltage_raw.store(result.voltage_raw, Ordering::Relaxed);

        self.sequence.store(start.wrapping_add(2), Ordering::Release);
    }

    /// Resets the cell to [`MeasurementResult::EMPTY`] and bumps the generation.
    pub fn clear(&self) {
        self.publish(MeasurementResult::EMPTY);
    }

    /// Returns the most recent consistent reading.
    #[must_use]
    pub fn latest(&self) -> MeasurementResult {
        let mut snapshot = self.load_fields();
        for _ in 0..READ_ATTEMPTS {
            let before = self.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                continue;
            }
            let candidate = self.load_fields();
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return candidate;
            }
            snapshot = candidate;
        }
        snapshot
    }

    /// Number of completed publishes, so readers can detect a fresh window.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    fn load_fields(&self) -> MeasurementResult {
        MeasurementResult {
            resistance_milliohm: self.resistance_milliohm.load(Ordering::Relaxed),
            current_deci_amp: self.current_deci_amp.load(Ordering::Relaxed),
            voltage_raw: self.voltage_raw.load(Ordering::Relaxed),
        }
    }
}

impl Default for MeasurementCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let cell = MeasurementCell::new();
        assert_eq!(cell.latest(), MeasurementResult::EMPTY);
        assert_eq!(cell.generation(), 0);
    }

    #[test]
    fn latest_returns_last_publish() {
        let cell = MeasurementCell::new();
        let first = MeasurementResult {
            resistance_milliohm: 985,
            current_deci_amp: 11,
            voltage_raw: 496,
        };
        cell.publish(first);
        assert_eq!(cell.latest(), first);
        assert_eq!(cell.generation(), 1);

        let second = MeasurementResult {
            resistance_milliohm: OPEN_CIRCUIT,
            current_deci_amp: 0,
            voltage_raw: 3_000,
        };
        cell.publish(second);
        assert_eq!(cell.latest(), second);
        assert!(cell.latest().is_open_circuit());
        assert_eq!(cell.generation(), 2);
    }

    #[test]
    fn clear_counts_as_a_publish() {
        let cell = MeasurementCell::new();
        cell.publish(MeasurementResult {
            resistance_milliohm: 12,
            current_deci_amp: 250,
            voltage_raw: 40,
        });
        cell.clear();
        assert_eq!(cell.latest(), MeasurementResult::EMPTY);
        assert_eq!(cell.generation(), 2);
    }

    #[test]
    fn sentinel_has_no_resistance() {
        let open = MeasurementResult {
            resistance_milliohm: OPEN_CIRCUIT,
            ..MeasurementResult::EMPTY
        };
        assert_eq!(open.resistance(), None);
        assert_eq!(MeasurementResult::EMPTY.resistance(), Some(0));
    }
}
