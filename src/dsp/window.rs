//! Taper windows.

use serde::{Deserialize, Serialize};

/// Which end(s) of the record a taper is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaperSide {
    Left,
    Right,
    Both,
}

impl Default for TaperSide {
    fn default() -> Self {
        TaperSide::Both
    }
}

/// Apply a Hann taper in place.
///
/// `max_percentage` is the decimal fraction of the trace length tapered at
/// ONE end (0.0 to 0.5), matching the convention of the processing config.
pub fn hann_taper(data: &mut [f64], max_percentage: f64, side: TaperSide) {
    let n = data.len();
    if n < 2 || max_percentage <= 0.0 {
        return;
    }
    let wlen = ((n as f64 * max_percentage).round() as usize).min(n / 2);
    if wlen == 0 {
        return;
    }
    // Half-cosine ramp over wlen samples
    let ramp: Vec<f64> = (0..wlen)
        .map(|i| 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / wlen as f64).cos()))
        .collect();

    if matches!(side, TaperSide::Left | TaperSide::Both) {
        for i in 0..wlen {
            data[i] *= ramp[i];
        }
    }
    if matches!(side, TaperSide::Right | TaperSide::Both) {
        for i in 0..wlen {
            data[n - 1 - i] *= ramp[i];
        }
    }
}

/// Cosine taper in the frequency domain over the band [f1, f2, f3, f4].
///
/// Unity between f2 and f3, cosine ramps on [f1, f2] and [f3, f4], zero
/// outside [f1, f4]. Used as the deconvolution pre-filter.
pub fn cosine_sac_taper(freqs: &[f64], f1: f64, f2: f64, f3: f64, f4: f64) -> Vec<f64> {
    freqs
        .iter()
        .map(|&f| {
            if f <= f1 || f >= f4 {
                0.0
            } else if f >= f2 && f <= f3 {
                1.0
            } else if f < f2 {
                0.5 * (1.0 + (std::f64::consts::PI * (f1 - f) / (f2 - f1)).cos())
            } else {
                0.5 * (1.0 + (std::f64::consts::PI * (f4 - f) / (f4 - f3)).cos())
            }
        })
        .collect()
}
