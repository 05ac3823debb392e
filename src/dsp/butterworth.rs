//! Butterworth filter design.
//!
//! Designs are carried out on the analog prototype in zero-pole-gain form,
//! transformed to the target band, discretized with the bilinear transform,
//! and finally paired into second-order sections for time-domain use.
//! The analytic magnitude responses are used directly for frequency-domain
//! filtering.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::types::{GmError, GmResult};

use super::sosfilt::Biquad;

/// Filter band specification; corner frequencies in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterBand {
    Lowpass { fc: f64 },
    Highpass { fc: f64 },
    Bandpass { low: f64, high: f64 },
    Bandstop { low: f64, high: f64 },
}

/// Analog Butterworth prototype poles (unit cutoff, left half plane).
fn prototype_poles(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = std::f64::consts::PI * (2 * k + 1) as f64 / (2 * order) as f64
                + std::f64::consts::FRAC_PI_2;
            Complex64::new(theta.cos(), theta.sin())
        })
        .collect()
}

fn validate_corner(f: f64, fs: f64) -> GmResult<()> {
    if !(f > 0.0 && f < 0.5 * fs) {
        return Err(GmError::Processing(format!(
            "filter corner {f} Hz outside (0, {}) for fs = {fs}",
            0.5 * fs
        )));
    }
    Ok(())
}

/// Design a digital Butterworth filter as second-order sections.
pub fn butter_sos(order: usize, band: FilterBand, fs: f64) -> GmResult<Vec<Biquad>> {
    if order == 0 {
        return Err(GmError::Processing("filter order must be > 0".to_string()));
    }
    let fs2 = 2.0 * fs;
    let warp = |f: f64| fs2 * (std::f64::consts::PI * f / fs).tan();

    let proto = prototype_poles(order);
    let mut zeros: Vec<Complex64> = Vec::new();
    let mut poles: Vec<Complex64> = Vec::new();
    let mut gain: f64 = 1.0;

    match band {
        FilterBand::Lowpass { fc } => {
            validate_corner(fc, fs)?;
            let w0 = warp(fc);
            poles = proto.iter().map(|p| *p * w0).collect();
            gain = w0.powi(order as i32);
        }
        FilterBand::Highpass { fc } => {
            validate_corner(fc, fs)?;
            let w0 = warp(fc);
            poles = proto.iter().map(|p| Complex64::new(w0, 0.0) / *p).collect();
            zeros = vec![Complex64::new(0.0, 0.0); order];
            // Butterworth polynomial has unit constant term, so the
            // highpass gain stays 1
        }
        FilterBand::Bandpass { low, high } => {
            validate_corner(low, fs)?;
            validate_corner(high, fs)?;
            if low >= high {
                return Err(GmError::Processing(
                    "bandpass corners out of order".to_string(),
                ));
            }
            let (wl, wh) = (warp(low), warp(high));
            let w0 = (wl * wh).sqrt();
            let bw = wh - wl;
            for p in &proto {
                let half = *p * (bw * 0.5);
                let disc = (half * half - w0 * w0).sqrt();
                poles.push(half + disc);
                poles.push(half - disc);
            }
            zeros = vec![Complex64::new(0.0, 0.0); order];
            gain = bw.powi(order as i32);
        }
        FilterBand::Bandstop { low, high } => {
            validate_corner(low, fs)?;
            validate_corner(high, fs)?;
            if low >= high {
                return Err(GmError::Processing(
                    "bandstop corners out of order".to_string(),
                ));
            }
            let (wl, wh) = (warp(low), warp(high));
            let w0 = (wl * wh).sqrt();
            let bw = wh - wl;
            for p in &proto {
                let half = Complex64::new(bw * 0.5, 0.0) / *p;
                let disc = (half * half - w0 * w0).sqrt();
                poles.push(half + disc);
                poles.push(half - disc);
            }
            for _ in 0..order {
                zeros.push(Complex64::new(0.0, w0));
                zeros.push(Complex64::new(0.0, -w0));
            }
        }
    }

    // Bilinear transform
    let mut num = Complex64::new(1.0, 0.0);
    let mut den = Complex64::new(1.0, 0.0);
    for z in &zeros {
        num *= Complex64::new(fs2, 0.0) - *z;
    }
    for p in &poles {
        den *= Complex64::new(fs2, 0.0) - *p;
    }
    let k_digital = gain * (num / den).re;

    let digital_zeros: Vec<Complex64> = zeros
        .iter()
        .map(|z| (Complex64::new(fs2, 0.0) + *z) / (Complex64::new(fs2, 0.0) - *z))
        .collect();
    let digital_poles: Vec<Complex64> = poles
        .iter()
        .map(|p| (Complex64::new(fs2, 0.0) + *p) / (Complex64::new(fs2, 0.0) - *p))
        .collect();

    // Degree mismatch maps to zeros at z = -1
    let mut digital_zeros = digital_zeros;
    while digital_zeros.len() < digital_poles.len() {
        digital_zeros.push(Complex64::new(-1.0, 0.0));
    }

    Ok(zpk_to_sos(&digital_zeros, &digital_poles, k_digital))
}

/// Pair digital poles and zeros into normalized second-order sections.
fn zpk_to_sos(zeros: &[Complex64], poles: &[Complex64], gain: f64) -> Vec<Biquad> {
    let (mut zpairs, mut zreal) = split_conjugates(zeros);
    let (mut ppairs, mut preal) = split_conjugates(poles);

    let mut sections: Vec<Biquad> = Vec::new();

    // Complex pole pairs first; they are matched with whatever zeros remain
    while let Some(p) = ppairs.pop() {
        let a1 = -2.0 * p.re;
        let a2 = p.norm_sqr();
        let (b0, b1, b2) = if let Some(z) = zpairs.pop() {
            (1.0, -2.0 * z.re, z.norm_sqr())
        } else if zreal.len() >= 2 {
            let z1 = zreal.pop().unwrap();
            let z2 = zreal.pop().unwrap();
            (1.0, -(z1 + z2), z1 * z2)
        } else if let Some(z1) = zreal.pop() {
            (1.0, -z1, 0.0)
        } else {
            (1.0, 0.0, 0.0)
        };
        sections.push(Biquad { b0, b1, b2, a1, a2 });
    }

    // Remaining real poles, two at a time
    while !preal.is_empty() {
        let p1 = preal.pop().unwrap();
        let (a1, a2) = if let Some(p2) = preal.pop() {
            (-(p1 + p2), p1 * p2)
        } else {
            (-p1, 0.0)
        };
        let (b0, b1, b2) = if zreal.len() >= 2 {
            let z1 = zreal.pop().unwrap();
            let z2 = zreal.pop().unwrap();
            (1.0, -(z1 + z2), z1 * z2)
        } else if let Some(z1) = zreal.pop() {
            (1.0, -z1, 0.0)
        } else if let Some(z) = zpairs.pop() {
            (1.0, -2.0 * z.re, z.norm_sqr())
        } else {
            (1.0, 0.0, 0.0)
        };
        sections.push(Biquad { b0, b1, b2, a1, a2 });
    }

    // Fold the overall gain into the first section
    if let Some(first) = sections.first_mut() {
        first.b0 *= gain;
        first.b1 *= gain;
        first.b2 *= gain;
    }
    sections
}

/// Split roots into (upper-half-plane conjugate representatives, reals).
fn split_conjugates(roots: &[Complex64]) -> (Vec<Complex64>, Vec<f64>) {
    let mut pairs = Vec::new();
    let mut reals = Vec::new();
    for r in roots {
        if r.im.abs() < 1e-10 * r.re.abs().max(1.0) {
            reals.push(r.re);
        } else if r.im > 0.0 {
            pairs.push(*r);
        }
        // Lower-half-plane conjugates are implied by their partners
    }
    (pairs, reals)
}

/// Analytic Butterworth magnitude response |H(f)| evaluated on `freqs`.
///
/// This is what the frequency-domain filter steps multiply the spectrum by.
/// At f = 0 the highpass and bandpass responses are exactly zero.
pub fn magnitude_response(band: FilterBand, order: usize, freqs: &[f64]) -> Vec<f64> {
    let n2 = 2.0 * order as f64;
    freqs
        .iter()
        .map(|&f| match band {
            FilterBand::Lowpass { fc } => 1.0 / (1.0 + (f / fc).powf(n2)).sqrt(),
            FilterBand::Highpass { fc } => {
                if f <= 0.0 {
                    0.0
                } else {
                    1.0 / (1.0 + (fc / f).powf(n2)).sqrt()
                }
            }
            FilterBand::Bandpass { low, high } => {
                if f <= 0.0 {
                    0.0
                } else {
                    let f0sq = low * high;
                    let bw = high - low;
                    let x = (f0sq - f * f) / (bw * f);
                    1.0 / (1.0 + x.powf(n2).abs()).sqrt()
                }
            }
            FilterBand::Bandstop { low, high } => {
                let f0sq = low * high;
                let bw = high - low;
                if (f0sq - f * f).abs() < f64::EPSILON {
                    return 0.0;
                }
                let x = (bw * f) / (f0sq - f * f);
                1.0 / (1.0 + x.powf(n2).abs()).sqrt()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cascade_gain_at(sections: &[Biquad], z: Complex64) -> f64 {
        let mut h = Complex64::new(1.0, 0.0);
        for s in sections {
            let num = Complex64::new(s.b0, 0.0) + s.b1 / z + s.b2 / (z * z);
            let den = Complex64::new(1.0, 0.0) + s.a1 / z + s.a2 / (z * z);
            h *= num / den;
        }
        h.norm()
    }

    fn gain_at_freq(sections: &[Biquad], f: f64, fs: f64) -> f64 {
        let w = 2.0 * std::f64::consts::PI * f / fs;
        cascade_gain_at(sections, Complex64::new(w.cos(), w.sin()))
    }

    #[test]
    fn test_lowpass_gains() {
        let sos = butter_sos(5, FilterBand::Lowpass { fc: 10.0 }, 100.0).unwrap();
        assert_relative_eq!(gain_at_freq(&sos, 0.0, 100.0), 1.0, epsilon = 1e-9);
        // Half-power at the corner
        assert_relative_eq!(
            gain_at_freq(&sos, 10.0, 100.0),
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-6
        );
        assert!(gain_at_freq(&sos, 40.0, 100.0) < 1e-4);
    }

    #[test]
    fn test_highpass_gains() {
        let sos = butter_sos(5, FilterBand::Highpass { fc: 0.5 }, 100.0).unwrap();
        assert!(gain_at_freq(&sos, 0.01, 100.0) < 1e-6);
        assert_relative_eq!(
            gain_at_freq(&sos, 0.5, 100.0),
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-6
        );
        assert_relative_eq!(gain_at_freq(&sos, 45.0, 100.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bandpass_gains() {
        let sos = butter_sos(
            3,
            FilterBand::Bandpass {
                low: 1.0,
                high: 10.0,
            },
            100.0,
        )
        .unwrap();
        let f0 = (1.0f64 * 10.0).sqrt();
        assert_relative_eq!(gain_at_freq(&sos, f0, 100.0), 1.0, epsilon = 1e-3);
        assert!(gain_at_freq(&sos, 0.05, 100.0) < 1e-3);
        assert!(gain_at_freq(&sos, 45.0, 100.0) < 1e-3);
    }

    #[test]
    fn test_magnitude_response_corner() {
        let mags = magnitude_response(FilterBand::Highpass { fc: 0.3 }, 5, &[0.0, 0.3, 30.0]);
        assert_eq!(mags[0], 0.0);
        assert_relative_eq!(mags[1], std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(mags[2], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_corner_rejected() {
        assert!(butter_sos(4, FilterBand::Lowpass { fc: 60.0 }, 100.0).is_err());
        assert!(butter_sos(0, FilterBand::Lowpass { fc: 10.0 }, 100.0).is_err());
    }
}
