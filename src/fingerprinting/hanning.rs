//! Hanning window multipliers applied to the 2048-sample excerpt before
//! each FFT pass.

use once_cell::sync::Lazy;
use std::f64::consts::PI;

/// `H[i] = 0.5 * (1 - cos(2*PI*(i+1) / 2049))` for `i` in `0..2048` - the
/// standard 2050-length symmetric Hanning window with its two end zeroes
/// removed.
pub static HANNING_WINDOW_2048_MULTIPLIERS: Lazy<Vec<f64>> = Lazy::new(|| {
    (0..2048)
        .map(|i| 0.5 * (1.0 - ((2.0 * PI * (i as f64 + 1.0)) / 2049.0).cos()))
        .collect()
});
