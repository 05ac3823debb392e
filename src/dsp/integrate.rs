//! Integration and differentiation kernels.
//!
//! Frequency-domain integration divides the spectrum by `2 pi i f` with the
//! DC bin left untouched (frequency replaced by 1.0), then shifts the result
//! so the first sample equals the requested initial value. This matches the
//! convention of the time-domain variant, which seeds the cumulative
//! trapezoid with `initial`.

use num_complex::Complex64;

use super::fft::{irfft, rfft, rfft_freqs};

/// Cumulative trapezoidal integration. Output has the same length as the
/// input; the first element is `initial`.
pub fn cumtrapz(data: &[f64], dx: f64, initial: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    let mut acc = initial;
    out.push(acc);
    for pair in data.windows(2) {
        acc += 0.5 * (pair[0] + pair[1]) * dx;
        out.push(acc);
    }
    out
}

/// Integrate in the frequency domain.
pub fn integrate_frequency(data: &[f64], dt: f64, initial: f64) -> Vec<f64> {
    let n = data.len();
    let spec = rfft(data, n);
    let mut freqs = rfft_freqs(n, dt);
    // Leave DC unchanged by the division
    freqs[0] = 1.0;
    let spec_out: Vec<Complex64> = spec
        .iter()
        .zip(freqs.iter())
        .map(|(s, &f)| s / Complex64::new(0.0, 2.0 * std::f64::consts::PI * f))
        .collect();
    let mut out = irfft(&spec_out, n);
    let shift = out[0] - initial;
    for v in &mut out {
        *v -= shift;
    }
    out
}

/// Differentiate in the frequency domain (spectrum times `2 pi i f`).
pub fn differentiate_frequency(data: &[f64], dt: f64) -> Vec<f64> {
    let n = data.len();
    let spec = rfft(data, n);
    let freqs = rfft_freqs(n, dt);
    let spec_out: Vec<Complex64> = spec
        .iter()
        .zip(freqs.iter())
        .map(|(s, &f)| s * Complex64::new(0.0, 2.0 * std::f64::consts::PI * f))
        .collect();
    irfft(&spec_out, n)
}

/// Central-difference gradient (forward/backward at the ends).
pub fn differentiate_gradient(data: &[f64], dt: f64) -> Vec<f64> {
    let n = data.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push((data[1] - data[0]) / dt);
    for i in 1..n - 1 {
        out.push((data[i + 1] - data[i - 1]) / (2.0 * dt));
    }
    out.push((data[n - 1] - data[n - 2]) / dt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cumtrapz_constant() {
        // Integral of a constant 2.0 sampled at dx=0.5
        let data = vec![2.0; 5];
        let out = cumtrapz(&data, 0.5, 0.0);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[4], 4.0);
    }

    #[test]
    fn test_gradient_of_line() {
        let data: Vec<f64> = (0..50).map(|i| 3.0 * i as f64 * 0.1).collect();
        let d = differentiate_gradient(&data, 0.1);
        for v in d {
            assert_relative_eq!(v, 3.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_frequency_integration_of_sine() {
        // Whole number of cycles so the periodic transform is exact:
        // integrating sin(wt) recovers -cos(wt)/w.
        let n = 1000;
        let dt = 0.01;
        let w = 2.0 * std::f64::consts::PI * 5.0;
        let data: Vec<f64> = (0..n).map(|i| (w * i as f64 * dt).sin()).collect();
        let integ = integrate_frequency(&data, dt, -1.0 / w);
        for (i, v) in integ.iter().enumerate() {
            let expected = -(w * i as f64 * dt).cos() / w;
            assert_relative_eq!(*v, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_frequency_differentiation_of_sine() {
        let n = 1000;
        let dt = 0.01;
        let w = 2.0 * std::f64::consts::PI * 5.0;
        let data: Vec<f64> = (0..n).map(|i| (w * i as f64 * dt).sin()).collect();
        let diff = differentiate_frequency(&data, dt);
        for (i, v) in diff.iter().enumerate() {
            let expected = w * (w * i as f64 * dt).cos();
            assert_relative_eq!(*v, expected, epsilon = 1e-4 * w);
        }
    }
}
