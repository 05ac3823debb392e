//! Konno-Ohmachi spectral smoothing.
//!
//! The smoothing window is
//! `w(f, fc) = [sin(b log10(f/fc)) / (b log10(f/fc))]^4`
//! which is symmetric on a logarithmic frequency axis. `b` controls the
//! bandwidth; larger values give narrower windows.

/// Maximum number of smoothing center frequencies
const MAX_CENTER_FREQS: usize = 301;

/// Logarithmically spaced values from `start` to `stop` inclusive.
pub fn log_spaced(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let l0 = start.log10();
    let l1 = stop.log10();
    let step = (l1 - l0) / (n - 1) as f64;
    (0..n).map(|i| 10f64.powf(l0 + step * i as f64)).collect()
}

/// Default center-frequency grid for smoothing an FFT spectrum: log-spaced
/// between the first nonzero frequency and Nyquist, at most 301 points.
pub fn smoothing_center_frequencies(freqs: &[f64], nfft: usize) -> Vec<f64> {
    let n = nfft.min(MAX_CENTER_FREQS + 1) - 1;
    log_spaced(freqs[1], freqs[freqs.len() - 1], n)
}

fn ko_weight(f: f64, fc: f64, bandwidth: f64) -> f64 {
    if f <= 0.0 {
        return 0.0;
    }
    if (f - fc).abs() < f64::EPSILON * fc.abs().max(1.0) {
        return 1.0;
    }
    let x = bandwidth * (f / fc).log10();
    let s = x.sin() / x;
    s * s * s * s
}

/// Smooth `spec` (defined at `freqs`) onto the `centers` grid.
///
/// Non-finite input values are skipped; if no finite value contributes to a
/// center frequency the output there is NaN.
pub fn konno_ohmachi_smooth(
    spec: &[f64],
    freqs: &[f64],
    centers: &[f64],
    bandwidth: f64,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(centers.len());
    for &fc in centers {
        let mut num = 0.0;
        let mut den = 0.0;
        for (&f, &s) in freqs.iter().zip(spec.iter()) {
            if !s.is_finite() {
                continue;
            }
            let w = ko_weight(f, fc, bandwidth);
            num += w * s;
            den += w;
        }
        out.push(if den > 0.0 { num / den } else { f64::NAN });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_spaced() {
        let v = log_spaced(0.1, 10.0, 3);
        assert_relative_eq!(v[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[2], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weight_limits() {
        assert_relative_eq!(ko_weight(1.0, 1.0, 188.5), 1.0);
        assert_eq!(ko_weight(0.0, 1.0, 188.5), 0.0);
        // Far from the center the weight decays to ~0
        assert!(ko_weight(10.0, 1.0, 188.5) < 1e-6);
    }

    #[test]
    fn test_flat_spectrum_is_preserved() {
        let freqs: Vec<f64> = (1..200).map(|i| i as f64 * 0.1).collect();
        let spec = vec![3.5; freqs.len()];
        let centers = log_spaced(0.5, 15.0, 20);
        let smooth = konno_ohmachi_smooth(&spec, &freqs, &centers, 20.0);
        for s in smooth {
            assert_relative_eq!(s, 3.5, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_nan_handling() {
        let freqs = vec![0.5, 1.0, 2.0];
        let spec = vec![f64::NAN, 2.0, 2.0];
        let smooth = konno_ohmachi_smooth(&spec, &freqs, &[1.0], 20.0);
        assert_relative_eq!(smooth[0], 2.0, max_relative = 1e-10);
    }
}
