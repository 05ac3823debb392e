//! Real-valued FFT helpers built on rustfft.
//!
//! The spectral convention throughout the crate is the one-sided transform
//! scaled by the sampling interval, `|rfft(x)| * dt`, so that spectral
//! amplitude has units of (input units) * s.

use num_complex::Complex64;
use rustfft::FftPlanner;

/// Next power of two >= n
pub fn next_pow_2(n: usize) -> usize {
    let mut p = 1usize;
    while p < n {
        p <<= 1;
    }
    p
}

/// One-sided FFT of a real series, zero-padded to `nfft` points.
///
/// Returns `nfft / 2 + 1` complex bins (DC through Nyquist).
pub fn rfft(data: &[f64], nfft: usize) -> Vec<Complex64> {
    let mut buf: Vec<Complex64> = Vec::with_capacity(nfft);
    for &x in data.iter().take(nfft) {
        buf.push(Complex64::new(x, 0.0));
    }
    buf.resize(nfft, Complex64::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);
    fft.process(&mut buf);

    buf.truncate(nfft / 2 + 1);
    buf
}

/// Inverse of [`rfft`]: reconstruct `nfft` real samples from one-sided bins.
pub fn irfft(spec: &[Complex64], nfft: usize) -> Vec<f64> {
    let nbins = nfft / 2 + 1;
    let mut full: Vec<Complex64> = Vec::with_capacity(nfft);
    for k in 0..nfft {
        if k < nbins {
            full.push(spec[k]);
        } else {
            // Hermitian symmetry for the negative frequencies
            full.push(spec[nfft - k].conj());
        }
    }

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(nfft);
    ifft.process(&mut full);

    let scale = 1.0 / nfft as f64;
    full.iter().map(|c| c.re * scale).collect()
}

/// Frequencies (Hz) corresponding to the one-sided bins of an `nfft`-point
/// transform of data sampled at interval `dt`.
pub fn rfft_freqs(nfft: usize, dt: f64) -> Vec<f64> {
    let df = 1.0 / (nfft as f64 * dt);
    (0..nfft / 2 + 1).map(|i| i as f64 * df).collect()
}

/// One-sided amplitude spectrum, `|rfft(x)| * dt`, with its frequencies.
pub fn amplitude_spectrum(data: &[f64], nfft: usize, dt: f64) -> (Vec<f64>, Vec<f64>) {
    let spec = rfft(data, nfft);
    let amps = spec.iter().map(|c| c.norm() * dt).collect();
    (amps, rfft_freqs(nfft, dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_next_pow_2() {
        assert_eq!(next_pow_2(1), 1);
        assert_eq!(next_pow_2(5), 8);
        assert_eq!(next_pow_2(1024), 1024);
        assert_eq!(next_pow_2(1025), 2048);
    }

    #[test]
    fn test_round_trip() {
        let data: Vec<f64> = (0..64).map(|i| ((i as f64) * 0.37).sin()).collect();
        let spec = rfft(&data, 64);
        let back = irfft(&spec, 64);
        for (a, b) in data.iter().zip(back.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_parseval() {
        // Time-domain energy must equal frequency-domain energy for the
        // two-sided transform with the 1/N inverse convention.
        let n = 256;
        let data: Vec<f64> = (0..n)
            .map(|i| (i as f64 * 0.11).sin() + 0.3 * (i as f64 * 0.41).cos())
            .collect();
        let spec = rfft(&data, n);
        let e_time: f64 = data.iter().map(|x| x * x).sum();
        // One-sided: double every bin except DC and Nyquist
        let mut e_freq = 0.0;
        for (k, c) in spec.iter().enumerate() {
            let w = if k == 0 || k == n / 2 { 1.0 } else { 2.0 };
            e_freq += w * c.norm_sqr();
        }
        e_freq /= n as f64;
        assert_relative_eq!(e_time, e_freq, max_relative = 1e-8);
    }

    #[test]
    fn test_freqs() {
        let freqs = rfft_freqs(100, 0.01);
        assert_eq!(freqs.len(), 51);
        assert_relative_eq!(freqs[0], 0.0);
        assert_relative_eq!(freqs[50], 50.0, epsilon = 1e-12);
    }
}
