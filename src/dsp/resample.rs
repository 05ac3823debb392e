//! Lanczos (windowed-sinc) interpolation for resampling.

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Lanczos kernel with window half-width `a` (in samples).
fn lanczos_kernel(x: f64, a: f64) -> f64 {
    if x.abs() >= a {
        0.0
    } else {
        sinc(x) * sinc(x / a)
    }
}

/// Interpolate the series at an arbitrary fractional sample position.
fn interpolate_at(data: &[f64], pos: f64, a: usize) -> f64 {
    let n = data.len();
    let k0 = (pos.floor() as isize - a as isize + 1).max(0) as usize;
    let k1 = ((pos.floor() as isize + a as isize) as usize).min(n - 1);
    let mut acc = 0.0;
    for k in k0..=k1 {
        acc += data[k] * lanczos_kernel(pos - k as f64, a as f64);
    }
    acc
}

/// Resample a series from `old_rate` to `new_rate` (Hz).
///
/// The output covers the same time span; `a` is the kernel half-width in
/// samples of the input series.
pub fn lanczos_resample_to_rate(data: &[f64], old_rate: f64, new_rate: f64, a: usize) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let duration = (data.len() - 1) as f64 / old_rate;
    let n_out = (duration * new_rate).floor() as usize + 1;
    (0..n_out)
        .map(|i| interpolate_at(data, i as f64 / new_rate * old_rate, a))
        .collect()
}

/// Upsample by an integer factor, keeping the original span.
pub fn lanczos_upsample(data: &[f64], factor: usize, a: usize) -> Vec<f64> {
    if factor <= 1 {
        return data.to_vec();
    }
    let n_out = data.len() * factor;
    // New sampling positions spread over the original span
    let old_span = (data.len() - 1) as f64;
    let step = old_span / (n_out - 1) as f64;
    (0..n_out)
        .map(|i| interpolate_at(data, i as f64 * step, a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_at_sample_points() {
        let data: Vec<f64> = (0..100).map(|i| (i as f64 * 0.2).sin()).collect();
        for (i, &v) in data.iter().enumerate() {
            assert_relative_eq!(interpolate_at(&data, i as f64, 10), v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_upsample_preserves_band_limited_signal() {
        // A slow sine is reproduced accurately between samples
        let n = 200;
        let data: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let up = lanczos_upsample(&data, 4, 10);
        assert_eq!(up.len(), n * 4);
        let step = (n - 1) as f64 / (up.len() - 1) as f64;
        for (i, &v) in up.iter().enumerate().skip(60).take(600) {
            let t = i as f64 * step;
            assert_relative_eq!(v, (t * 0.1).sin(), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_resample_rate_change() {
        let data: Vec<f64> = (0..101).map(|i| i as f64).collect();
        // 100 Hz -> 50 Hz over 1 s: expect 51 points
        let out = lanczos_resample_to_rate(&data, 100.0, 50.0, 10);
        assert_eq!(out.len(), 51);
    }
}
