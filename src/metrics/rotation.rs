//! Horizontal-component rotation for orientation-independent metrics.

use ndarray::Array2;

/// Rotate two orthogonal horizontals through [0, 180) degrees in steps of
/// `delta_deg`, combining them as `h1 cos(theta) + h2 sin(theta)`.
///
/// Returns a matrix with one rotation per row.
pub fn rotate_combine(h1: &[f64], h2: &[f64], delta_deg: f64) -> Array2<f64> {
    let n = h1.len().min(h2.len());
    let n_rot = (180.0 / delta_deg).round() as usize;
    let mut out = Array2::zeros((n_rot, n));
    for (row, mut out_row) in out.outer_iter_mut().enumerate() {
        let theta = (row as f64 * delta_deg).to_radians();
        let (c, s) = (theta.cos(), theta.sin());
        for i in 0..n {
            out_row[i] = h1[i] * c + h2[i] * s;
        }
    }
    out
}

/// Percentile with linear interpolation between order statistics.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
