//! Spectral signal-to-noise computation and the SNR QA check.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::{CachedArray, Trace, TraceParam};
use crate::dsp::fft::{amplitude_spectrum, next_pow_2};
use crate::dsp::smoothing::{konno_ohmachi_smooth, smoothing_center_frequencies};
use crate::dsp::window::{hann_taper, TaperSide};
use crate::processing::spectrum::{brune_f0, moment_from_magnitude};
use crate::processing::windows::duration_from_magnitude;
use crate::types::{FailureKind, GmResult};

const TAPER_WIDTH: f64 = 0.05;
const MIN_POINTS_IN_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSnrParams {
    /// Konno-Ohmachi smoothing bandwidth
    pub bandwidth: f64,
}

impl Default for ComputeSnrParams {
    fn default() -> Self {
        Self { bandwidth: 20.0 }
    }
}

/// Compute and cache the smoothed spectrum of a window of the trace.
///
/// Amplitudes below the lowest usable frequency of the full record are
/// replaced with NaN so they never contribute to smoothing or checks.
fn compute_and_smooth_spectrum(
    tr: &mut Trace,
    bandwidth: f64,
    section: &str,
    window: &[f64],
    nfft: usize,
) {
    let dt = tr.stats.delta;
    let lowest_usable_freq = 1.0 / (dt * tr.stats.npts as f64);
    let (mut spec, freqs) = amplitude_spectrum(window, nfft, dt);
    for (s, f) in spec.iter_mut().zip(freqs.iter()) {
        if *f < lowest_usable_freq {
            *s = f64::NAN;
        }
    }
    let centers = smoothing_center_frequencies(&freqs, nfft);
    let mut smooth = konno_ohmachi_smooth(&spec, &freqs, &centers, bandwidth);
    for (s, f) in smooth.iter_mut().zip(centers.iter()) {
        if *f < lowest_usable_freq {
            *s = f64::NAN;
        }
    }

    tr.set_cached(
        &format!("{section}_spectrum"),
        CachedArray {
            values: spec,
            freqs,
        },
    );
    tr.set_cached(
        &format!("smooth_{section}_spectrum"),
        CachedArray {
            values: smooth,
            freqs: centers,
        },
    );
}

/// Compute the SNR spectrum of one trace.
///
/// The noise spectrum of the event window is estimated by scaling the
/// pre-event noise spectrum with sqrt(duration), assuming stationary noise.
pub fn compute_snr_trace(tr: &mut Trace, event_magnitude: f64, bandwidth: f64) {
    let split_time = match tr.signal_split_time() {
        Some(t) => t,
        None => {
            // No split estimate: only the whole-record spectrum is available
            let data = tr.data.to_vec();
            let nfft = next_pow_2(data.len().max(2));
            compute_and_smooth_spectrum(tr, bandwidth, "event", &data, nfft);
            return;
        }
    };

    let split_idx = tr.index_of(split_time);
    let data = tr.data.to_vec();
    let (noise_raw, event_raw) = data.split_at(split_idx.min(data.len()));
    let mut noise = noise_raw.to_vec();
    let mut event_window = event_raw.to_vec();

    tr.set_cached(
        "preevent_noise_trace",
        CachedArray {
            values: noise.clone(),
            freqs: Vec::new(),
        },
    );

    // Demean and taper both windows
    for window in [&mut noise, &mut event_window] {
        let mean = window.iter().sum::<f64>() / window.len().max(1) as f64;
        for v in window.iter_mut() {
            *v -= mean;
        }
        hann_taper(window, TAPER_WIDTH, TaperSide::Both);
    }

    if noise.len() < MIN_POINTS_IN_WINDOW {
        if tr.passed() {
            tr.fail(
                "compute_snr",
                FailureKind::QaCheck,
                "SNR check; Not enough points in noise window",
            );
        }
        let nfft = next_pow_2(event_window.len().max(2));
        compute_and_smooth_spectrum(tr, bandwidth, "event", &event_window, nfft);
        return;
    }
    if event_window.len() < MIN_POINTS_IN_WINDOW {
        if tr.passed() {
            tr.fail(
                "compute_snr",
                FailureKind::QaCheck,
                "SNR check; Not enough points in event window",
            );
        }
        let nfft = next_pow_2(event_window.len().max(2));
        compute_and_smooth_spectrum(tr, bandwidth, "event", &event_window, nfft);
        return;
    }

    let nfft = next_pow_2(event_window.len()).max(next_pow_2(noise.len()));
    compute_and_smooth_spectrum(tr, bandwidth, "noise", &noise, nfft);
    compute_and_smooth_spectrum(tr, bandwidth, "event", &event_window, nfft);

    let dt = tr.stats.delta;
    let dur_noise = (noise.len().saturating_sub(1)) as f64 * dt;
    let dur_event = (event_window.len().saturating_sub(1)) as f64 * dt;
    let dur_shaking = duration_from_magnitude(event_magnitude).max(dt);

    // Noise is stationary, so noise amplitude scales as sqrt(duration)
    let scale = (dur_event / dur_noise).sqrt();
    let smooth_noise = tr.get_cached("smooth_noise_spectrum").cloned();
    let smooth_event = tr.get_cached("smooth_event_spectrum").cloned();
    let (smooth_noise, smooth_event) = match (smooth_noise, smooth_event) {
        (Some(n), Some(e)) => (n, e),
        _ => return,
    };

    let event_noise: Vec<f64> = smooth_noise.values.iter().map(|&v| v * scale).collect();
    let signal: Vec<f64> = smooth_event
        .values
        .iter()
        .zip(event_noise.iter())
        .map(|(&e, &n)| e - n)
        .collect();

    let snr: Vec<f64> = signal
        .iter()
        .zip(event_noise.iter())
        .map(|(&s, &n)| {
            let signal_norm = s / dur_shaking.sqrt();
            let noise_norm = n / dur_event.sqrt();
            if noise_norm > 0.0 {
                signal_norm / noise_norm
            } else {
                f64::NAN
            }
        })
        .collect();

    tr.set_cached(
        "smooth_signal_spectrum",
        CachedArray {
            values: signal,
            freqs: smooth_event.freqs.clone(),
        },
    );
    tr.set_parameter(
        "snr",
        TraceParam::Snr {
            snr,
            freq: smooth_event.freqs,
        },
    );
}

/// Processing step: compute SNR spectra for every trace.
pub fn compute_snr(
    stream: &mut Stream,
    event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    let params: ComputeSnrParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        compute_snr_trace(tr, event.magnitude, params.bandwidth);
    }
    Ok(())
}

/// Minimum frequency of the SNR check: a number, or "f0" for the Brune
/// corner frequency clamped to a configured range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinFreqSpec {
    Value(f64),
    Named(String),
}

impl Default for MinFreqSpec {
    fn default() -> Self {
        MinFreqSpec::Named("f0".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct F0Options {
    pub stress_drop: f64,
    pub shear_vel: f64,
    pub ceiling: f64,
    pub floor: f64,
}

impl Default for F0Options {
    fn default() -> Self {
        Self {
            stress_drop: 10.0,
            shear_vel: 3.7,
            ceiling: 2.0,
            floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnrCheckParams {
    pub threshold: f64,
    pub min_freq: MinFreqSpec,
    pub max_freq: f64,
    pub f0_options: F0Options,
}

impl Default for SnrCheckParams {
    fn default() -> Self {
        Self {
            threshold: 2.0,
            min_freq: MinFreqSpec::default(),
            max_freq: 5.0,
            f0_options: F0Options::default(),
        }
    }
}

/// Processing step: fail traces whose SNR drops below the threshold
/// anywhere in the check band.
pub fn snr_check(
    stream: &mut Stream,
    event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    let params: SnrCheckParams = parse_args(args)?;

    let min_freq = match &params.min_freq {
        MinFreqSpec::Value(v) => *v,
        MinFreqSpec::Named(name) if name == "f0" => {
            let f0 = brune_f0(
                moment_from_magnitude(event.magnitude),
                params.f0_options.stress_drop,
                params.f0_options.shear_vel,
            );
            f0.clamp(params.f0_options.floor, params.f0_options.ceiling)
        }
        MinFreqSpec::Named(other) => {
            return Err(crate::types::GmError::Config(format!(
                "snr_check: unknown min_freq '{other}'"
            )));
        }
    };

    for tr in stream.iter_mut() {
        if let Some(TraceParam::Snr { snr, freq }) = tr.get_parameter("snr").cloned() {
            let mut min_snr = f64::INFINITY;
            let mut any = false;
            for (&s, &f) in snr.iter().zip(freq.iter()) {
                if f >= min_freq && f <= params.max_freq && s.is_finite() {
                    any = true;
                    min_snr = min_snr.min(s);
                }
            }
            if !any {
                min_snr = 0.0;
            }
            if min_snr < params.threshold {
                tr.fail(
                    "snr_check",
                    FailureKind::QaCheck,
                    &format!("SNR check: SNR {min_snr:.2} < {:.2}", params.threshold),
                );
            }
        }
        tr.set_parameter(
            "snr_conf",
            TraceParam::SnrConf {
                threshold: params.threshold,
                min_freq,
                max_freq: params.max_freq,
            },
        );
    }
    Ok(())
}
