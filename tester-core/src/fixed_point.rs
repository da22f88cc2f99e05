//! Integer square root and RMS helpers.
//!
//! Everything here is `const` and allocation free so it can run inside the
//! sampling interrupt without touching floating point.

/// Right shift applied to a window's sum of squares before the square root.
///
/// The window holds 127 samples; dividing by 128 keeps the mean a shift.
pub const RMS_WINDOW_SHIFT: u32 = 7;

/// Digit-by-digit integer square root, floored, over the full `u32` domain.
#[must_use]
pub const fn isqrt32(n: u32) -> u32 {
    let mut remainder = n;
    let mut root = 0u32;
    let mut place = 1u32 << 30;

    while place > remainder {
        place >>= 2;
    }

    while place != 0 {
        if remainder >= root + place {
            remainder -= root + place;
            root = (root >> 1) + place;
        } else {
            root >>= 1;
        }
        place >>= 2;
    }

    root
}

/// Converts a window's sum of squared samples into an RMS value.
#[must_use]
pub const fn rms_from_sum_of_squares(sum_of_squares: u32) -> u32 {
    let mean = sum_of_squares >> RMS_WINDOW_SHIFT;
    if mean == 0 { 0 } else { isqrt32(mean) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_floor_root(n: u32) {
        let root = u64::from(isqrt32(n));
        let n = u64::from(n);
        assert!(root * root <= n, "isqrt32({n}) = {root} is too large");
        assert!((root + 1) * (root + 1) > n, "isqrt32({n}) = {root} is too small");
    }

    #[test]
    fn known_values() {
        assert_eq!(isqrt32(0), 0);
        assert_eq!(isqrt32(1), 1);
        assert_eq!(isqrt32(3), 1);
        assert_eq!(isqrt32(4), 2);
        assert_eq!(isqrt32(144), 12);
        assert_eq!(isqrt32(u32::MAX), 65_535);
    }

    #[test]
    fn exact_for_perfect_squares() {
        for root in (0u32..=65_535).step_by(97) {
            assert_eq!(isqrt32(root * root), root);
        }
        assert_eq!(isqrt32(65_535 * 65_535), 65_535);
    }

    #[test]
    fn floors_between_squares() {
        let mut n: u32 = 1;
        while n < u32::MAX / 4 {
            assert_floor_root(n);
            assert_floor_root(n - 1);
            assert_floor_root(n + 1);
            n = n * 3 + 7;
        }
        assert_floor_root(u32::MAX);
        assert_floor_root(u32::MAX - 1);
        assert_floor_root(1 << 31);
    }

    #[test]
    fn rms_divides_by_window_before_root() {
        assert_eq!(rms_from_sum_of_squares(0), 0);
        assert_eq!(rms_from_sum_of_squares(127), 0);
        // 127 samples of 498 counts.
        assert_eq!(rms_from_sum_of_squares(127 * 498 * 498), 496);
        // 127 samples of 85 counts.
        assert_eq!(rms_from_sum_of_squares(127 * 85 * 85), 84);
    }
}
