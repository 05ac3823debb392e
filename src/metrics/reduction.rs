//! Scalar reductions of acceleration records: Arias intensity, cumulative
//! absolute velocity, significant durations, and the Fourier amplitude
//! spectrum.
//!
//! Input acceleration is in cm/s^2 throughout.

use crate::dsp::fft::{amplitude_spectrum, next_pow_2};
use crate::dsp::integrate::cumtrapz;
use crate::dsp::smoothing::{konno_ohmachi_smooth, log_spaced};

/// Standard gravity (m/s^2)
const G_M_S2: f64 = 9.80665;

/// Arias intensity time series (cm/s): (pi / 2g) * cumulative integral of
/// the squared acceleration.
pub fn arias_series(acc_cm: &[f64], dt: f64) -> Vec<f64> {
    let acc2_m: Vec<f64> = acc_cm.iter().map(|&a| (a * 0.01) * (a * 0.01)).collect();
    let integral = cumtrapz(&acc2_m, dt, 0.0);
    integral
        .iter()
        .map(|&v| v * std::f64::consts::PI / (2.0 * G_M_S2) * 100.0)
        .collect()
}

/// Peak Arias intensity (cm/s).
pub fn arias_intensity(acc_cm: &[f64], dt: f64) -> f64 {
    arias_series(acc_cm, dt)
        .last()
        .copied()
        .unwrap_or(0.0)
        .abs()
}

/// Cumulative absolute velocity (cm/s), optionally thresholded: samples
/// with |a| below the threshold (cm/s^2) do not accumulate.
pub fn cav(acc_cm: &[f64], dt: f64, threshold: f64) -> f64 {
    let gated: Vec<f64> = acc_cm
        .iter()
        .map(|&a| if a.abs() >= threshold { a.abs() } else { 0.0 })
        .collect();
    cumtrapz(&gated, dt, 0.0).last().copied().unwrap_or(0.0)
}

/// Significant duration (s): time between the accumulation of `p1` and
/// `p2` percent of the total Arias intensity.
pub fn significant_duration(acc_cm: &[f64], dt: f64, p1: f64, p2: f64) -> f64 {
    let series = arias_series(acc_cm, dt);
    let total = match series.last() {
        Some(&t) if t > 0.0 => t,
        _ => return 0.0,
    };
    let t1 = time_of_fraction(&series, total, p1 / 100.0, dt);
    let t2 = time_of_fraction(&series, total, p2 / 100.0, dt);
    (t2 - t1).abs()
}

/// Equivalent duration computed on the samples sorted by amplitude: the
/// shortest total time over which the record could accumulate the same
/// Arias fraction.
pub fn sorted_duration(acc_cm: &[f64], dt: f64, p1: f64, p2: f64) -> f64 {
    let mut acc2: Vec<f64> = acc_cm.iter().map(|&a| a * a).collect();
    acc2.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = acc2.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let lo = p1 / 100.0 * total;
    let hi = p2 / 100.0 * total;
    let mut cum = 0.0;
    let mut count = 0usize;
    for &v in &acc2 {
        if cum >= hi {
            break;
        }
        cum += v;
        if cum > lo {
            count += 1;
        }
    }
    count as f64 * dt
}

fn time_of_fraction(series: &[f64], total: f64, fraction: f64, dt: f64) -> f64 {
    let target = fraction * total;
    let idx = series
        .iter()
        .enumerate()
        .min_by(|a, b| {
            (a.1 - target)
                .abs()
                .partial_cmp(&(b.1 - target).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    idx as f64 * dt
}

/// Konno-Ohmachi-smoothed Fourier amplitude spectrum (cm/s) evaluated on a
/// log-spaced frequency grid.
pub fn fourier_amplitude_spectrum(
    acc_cm: &[f64],
    dt: f64,
    smoothing_parameter: f64,
    f_start: f64,
    f_stop: f64,
    count: usize,
) -> (Vec<f64>, Vec<f64>) {
    let nfft = next_pow_2(acc_cm.len());
    let (spec, freqs) = amplitude_spectrum(acc_cm, nfft, dt);
    let nyquist = 0.5 / dt;
    let centers = log_spaced(f_start.max(freqs[1]), f_stop.min(nyquist), count);
    let smooth = konno_ohmachi_smooth(&spec, &freqs, &centers, smoothing_parameter);
    (centers, smooth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_arias_constant_acceleration() {
        // a = 100 cm/s^2 = 1 m/s^2 for 10 s:
        // AI = pi/(2g) * 1 * 10 = 1.602 m/s = 160.2 cm/s
        let acc = vec![100.0; 1001];
        let ai = arias_intensity(&acc, 0.01);
        let expected = std::f64::consts::PI / (2.0 * G_M_S2) * 10.0 * 100.0;
        assert_relative_eq!(ai, expected, max_relative = 1e-3);
    }

    #[test]
    fn test_cav_constant() {
        let acc = vec![100.0; 1001];
        assert_relative_eq!(cav(&acc, 0.01, 0.0), 1000.0, max_relative = 1e-3);
        // Threshold above the amplitude gates everything out
        assert_relative_eq!(cav(&acc, 0.01, 200.0), 0.0);
    }

    #[test]
    fn test_duration_uniform_energy() {
        // Uniform energy: the 5-95 window spans 90% of the record
        let acc = vec![50.0; 10001];
        let d = significant_duration(&acc, 0.01, 5.0, 95.0);
        assert_relative_eq!(d, 90.0, epsilon = 0.2);
    }

    #[test]
    fn test_sorted_duration_shorter_than_significant() {
        // For a record with a concentrated burst, sorting concentrates the
        // energy into fewer samples
        let mut acc = vec![1.0f64; 10000];
        for v in acc.iter_mut().skip(4000).take(500) {
            *v = 100.0;
        }
        let sd = sorted_duration(&acc, 0.01, 5.0, 95.0);
        let d = significant_duration(&acc, 0.01, 5.0, 95.0);
        assert!(sd <= d + 1e-9);
        assert!(sd > 0.0);
    }

    #[test]
    fn test_fas_sine_peak() {
        // A pure sine concentrates spectral amplitude near its frequency
        let dt = 0.01;
        let n = 8192;
        let acc: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 * dt).sin())
            .collect();
        let (freqs, fas) = fourier_amplitude_spectrum(&acc, dt, 188.5, 0.1, 20.0, 101);
        let peak_idx = fas
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!((freqs[peak_idx] - 2.0).abs() < 0.3, "peak at {}", freqs[peak_idx]);
    }
}
