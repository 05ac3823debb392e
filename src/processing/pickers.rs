//! P-wave arrival pickers.
//!
//! Five candidate pickers are provided: a travel-time estimate from a 1-D
//! two-layer earth model, a power picker (STA/LTA on the signal envelope
//! with AIC refinement), an AR-AIC style picker on the vertical component,
//! a Baer-Kradolfer characteristic-function picker, and the Kalkan (2016)
//! P-phase picker based on the damping energy of a short-period oscillator.
//!
//! All picks are reported in seconds from the start of the trace/stream.

use crate::config::{
    ArPickerConfig, BaerPickerConfig, KalkanPickerConfig, PowerPickerConfig, TravelTimeConfig,
};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::Trace;
use crate::dsp::butterworth::{butter_sos, FilterBand};
use crate::dsp::polyfit::{polyfit, polyval};
use crate::dsp::resample::lanczos_resample_to_rate;
use crate::dsp::sosfilt::{sosfilt, sosfiltfilt};
use crate::metrics::oscillator::sdof_response;
use crate::types::{seconds_between, GmError, GmResult};

use num_complex::Complex64;
use rustfft::FftPlanner;

/// Sampling rate the power picker decimates to before picking
const POWER_PICKER_RATE: f64 = 20.0;

/// Classic STA/LTA ratio of the squared signal.
///
/// Both windows end at the current sample; the first `nlta` samples have a
/// ratio of zero.
pub fn classic_sta_lta(data: &[f64], nsta: usize, nlta: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![0.0f64; n];
    if nsta == 0 || nlta == 0 || n < nlta {
        return out;
    }
    // Cumulative sum of energy for O(1) window sums
    let mut csum = Vec::with_capacity(n + 1);
    csum.push(0.0);
    for &x in data {
        let last = *csum.last().unwrap_or(&0.0);
        csum.push(last + x * x);
    }
    for i in nlta - 1..n {
        let lta = (csum[i + 1] - csum[i + 1 - nlta]) / nlta as f64;
        let sta = (csum[i + 1] - csum[i + 1 - nsta.min(i + 1)]) / nsta as f64;
        if lta > 1e-30 {
            out[i] = sta / lta;
        }
    }
    out
}

/// P travel time (s) through a two-layer 1-D model: the earlier of the
/// direct crustal ray and the Moho head wave.
pub fn model_travel_time(epi_km: f64, depth_km: f64, config: &TravelTimeConfig) -> f64 {
    let depth = depth_km.max(0.0);
    let vc = config.crustal_velocity;
    let vm = config.mantle_velocity;

    let direct = (epi_km * epi_km + depth * depth).sqrt() / vc;
    let mut travel_time = direct;
    if vm > vc && depth < config.moho_depth {
        let slowness = (1.0 / (vc * vc) - 1.0 / (vm * vm)).sqrt();
        let head = epi_km / vm + (2.0 * config.moho_depth - depth) * slowness;
        // Head wave only exists beyond the crossover distance
        if head < direct {
            travel_time = head;
        }
    }
    travel_time
}

/// Travel-time pick for a stream.
///
/// Returns seconds from the start of the stream, or None when the predicted
/// arrival falls outside the record.
pub fn pick_travel_time(
    stream: &Stream,
    event: &ScalarEvent,
    config: &TravelTimeConfig,
) -> Option<f64> {
    let first = stream.traces.first()?;
    let epi = event.epicentral_distance_km(
        first.stats.coordinates.latitude,
        first.stats.coordinates.longitude,
    );
    let travel_time = model_travel_time(epi, event.depth_km, config);
    let offset = seconds_between(event.time, first.stats.start_time) + travel_time;
    if offset > 0.0 && offset < first.duration() {
        Some(offset)
    } else {
        None
    }
}

/// Signal envelope via the analytic signal (Hilbert transform).
fn envelope(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    let mut buf: Vec<Complex64> = data.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buf);
    // Analytic signal: double positive frequencies, zero negative ones
    for (k, v) in buf.iter_mut().enumerate() {
        if k == 0 || (n % 2 == 0 && k == n / 2) {
            // DC and Nyquist stay
        } else if k < (n + 1) / 2 {
            *v *= 2.0;
        } else {
            *v = Complex64::new(0.0, 0.0);
        }
    }
    planner.plan_fft_inverse(n).process(&mut buf);
    buf.iter().map(|c| c.norm() / n as f64).collect()
}

/// Moving-average convolution with a Hann window, same-length output.
fn hann_smooth(data: &[f64], wlen: usize) -> Vec<f64> {
    if wlen < 2 {
        return data.to_vec();
    }
    let window: Vec<f64> = (0..wlen)
        .map(|i| {
            0.5 * (1.0
                - (2.0 * std::f64::consts::PI * i as f64 / (wlen - 1) as f64).cos())
        })
        .collect();
    let n = data.len();
    let half = wlen / 2;
    let mut out = vec![0.0f64; n];
    for i in 0..n {
        let mut acc = 0.0;
        for (j, &w) in window.iter().enumerate() {
            let idx = i as isize + j as isize - half as isize;
            if idx >= 0 && (idx as usize) < n {
                acc += w * data[idx as usize];
            }
        }
        out[i] = acc;
    }
    out
}

fn median(values: &mut Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Refine trigger indices with the Akaike Information Criterion: within a
/// window around each trigger, the AIC minimum marks the onset.
fn aic_refine(data: &[f64], triggers: &[usize], search_window: f64, sps: f64) -> Vec<usize> {
    let med = {
        let mut v = data.to_vec();
        median(&mut v)
    };
    let demedianed: Vec<f64> = data.iter().map(|&x| x - med).collect();
    let wpts = (sps * search_window) as usize;

    let mut refined = Vec::new();
    for &trig in triggers {
        if trig < 2 * wpts || trig + wpts >= demedianed.len() {
            continue;
        }
        let select = &demedianed[trig - 2 * wpts..trig + wpts];
        let m = select.len();
        let mut aic = vec![f64::INFINITY; m];
        for k in 5..m.saturating_sub(5) {
            let s1 = variance(&select[0..k]);
            let s2 = variance(&select[k + 1..m - 1]);
            let l1 = if s1 > 0.0 { s1.ln() } else { 0.0 };
            let l2 = if s2 > 0.0 { s2.ln() } else { 0.0 };
            aic[k] = k as f64 * l1 + (m - k + 1) as f64 * l2;
        }
        let argmin = aic
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        // Offset back to absolute samples
        let onset = trig as isize + (argmin as isize + 1 - 2 * wpts as isize);
        if onset > 0 {
            refined.push(onset as usize);
        }
    }
    refined
}

fn variance(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    data.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64
}

/// Envelope STA/LTA trigger detector with two short-term windows.
#[allow(clippy::too_many_arguments)]
fn stalta_earle(
    filtered: &[f64],
    sps: f64,
    sta_w: f64,
    sta_w2: f64,
    lta_w: f64,
    hanning: f64,
    threshold: f64,
    threshold2: f64,
    threshdrop: f64,
) -> Vec<usize> {
    let env = hann_smooth(&envelope(filtered), (hanning * sps) as usize);

    let sta_samples = (sta_w * sps) as usize;
    let sta_samples2 = (sta_w2 * sps) as usize;
    let lta_samples = (lta_w * sps) as usize;
    let n = env.len();
    if n <= lta_samples + sta_samples.max(sta_samples2) + 1 {
        return Vec::new();
    }

    let mut ratio = vec![0.0f64; n];
    let mut ratio2 = vec![0.0f64; n];
    for i in 0..n - lta_samples - 1 {
        let idx = i + lta_samples + 1;
        let lta: f64 = env[i..i + lta_samples].iter().sum::<f64>() / lta_samples as f64;
        let lta = lta.max(0.00001);
        if idx + sta_samples <= n {
            let sta: f64 = env[idx..idx + sta_samples].iter().sum::<f64>() / sta_samples as f64;
            ratio[idx] = sta / lta;
        }
        if idx + sta_samples2 <= n {
            let sta2: f64 =
                env[idx..idx + sta_samples2].iter().sum::<f64>() / sta_samples2 as f64;
            ratio2[idx] = sta2 / lta;
        }
    }

    let mut triggers_on = Vec::new();
    let mut on = false;
    for i in 0..n - 1 {
        if !on && ratio[i] >= threshold && ratio2[i] >= threshold2 && ratio[i] > ratio[i + 1] {
            triggers_on.push(i);
            on = true;
        } else if on && ratio[i] <= threshdrop {
            on = false;
        }
    }
    aic_refine(filtered, &triggers_on, 4.0, sps)
}

/// Detrend a copy of the data with a least-squares line.
fn detrend_linear(data: &[f64]) -> Vec<f64> {
    let x: Vec<f64> = (0..data.len()).map(|i| i as f64).collect();
    match polyfit(&x, data, 1) {
        Ok(coeffs) => data
            .iter()
            .enumerate()
            .map(|(i, &y)| y - polyval(&coeffs, i as f64))
            .collect(),
        Err(_) => data.to_vec(),
    }
}

/// Power picker: decimate, band-pass, envelope STA/LTA, AIC refine.
pub fn pick_power(trace: &Trace, config: &PowerPickerConfig) -> GmResult<f64> {
    let data = trace.data.to_vec();
    let sps = trace.sampling_rate();
    let decimated = if sps > POWER_PICKER_RATE {
        lanczos_resample_to_rate(&data, sps, POWER_PICKER_RATE, 10)
    } else {
        data
    };
    let rate = sps.min(POWER_PICKER_RATE);
    let detrended = detrend_linear(&decimated);

    let sos = butter_sos(
        config.order,
        FilterBand::Bandpass {
            low: config.highpass,
            high: config.lowpass.min(0.45 * rate),
        },
        rate,
    )?;
    let filtered = sosfilt(&sos, &detrended);

    let triggers = stalta_earle(
        &filtered,
        rate,
        config.sta,
        config.sta2,
        config.lta,
        config.hanning_window,
        config.thresh_detect,
        config.thresh_detect2,
        config.thresh_restart,
    );
    match triggers.first() {
        Some(&idx) => Ok(idx as f64 / rate),
        None => Err(GmError::Processing("power picker found no trigger".to_string())),
    }
}

/// AR-AIC style pick on the vertical component: STA/LTA trigger on the
/// band-passed vertical, then AIC onset refinement.
pub fn pick_ar(stream: &Stream, config: &ArPickerConfig) -> GmResult<f64> {
    let vertical = stream
        .traces
        .iter()
        .find(|tr| !tr.is_horizontal())
        .ok_or_else(|| GmError::Processing("AR picker requires a vertical component".to_string()))?;
    let sps = vertical.sampling_rate();
    let data = detrend_linear(&vertical.data.to_vec());

    let sos = butter_sos(
        4,
        FilterBand::Bandpass {
            low: config.f1,
            high: config.f2.min(0.45 * sps),
        },
        sps,
    )?;
    let filtered = sosfiltfilt(&sos, &data);

    let nsta = (config.sta_p * sps).max(1.0) as usize;
    let nlta = (config.lta_p * sps).max(2.0) as usize;
    let ratio = classic_sta_lta(&filtered, nsta, nlta);
    let trigger = ratio
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .ok_or_else(|| GmError::Processing("AR picker found no trigger".to_string()))?;

    let refined = aic_refine(&filtered, &[trigger], config.lta_p.max(1.0), sps);
    match refined.first() {
        Some(&idx) => Ok(idx as f64 / sps),
        None => Ok(trigger as f64 / sps),
    }
}

/// Baer-Kradolfer picker on the squared characteristic function.
pub fn pick_baer(trace: &Trace, config: &BaerPickerConfig) -> GmResult<f64> {
    let data = detrend_linear(&trace.data.to_vec());
    let sps = trace.sampling_rate();
    let n = data.len();
    if n < 3 {
        return Err(GmError::Processing("record too short for Baer picker".to_string()));
    }

    // Characteristic function: amplitude plus weighted derivative energy
    let deriv: Vec<f64> = (0..n)
        .map(|i| {
            if i == 0 {
                (data[1] - data[0]) * sps
            } else {
                (data[i] - data[i - 1]) * sps
            }
        })
        .collect();
    let e_y: f64 = data.iter().map(|&v| v * v).sum();
    let e_d: f64 = deriv.iter().map(|&v| v * v).sum::<f64>().max(1e-30);
    let weight = e_y / e_d;
    let cf: Vec<f64> = data
        .iter()
        .zip(deriv.iter())
        .map(|(&y, &d)| {
            let e = y * y + weight * d * d;
            e * e
        })
        .collect();

    let mean = cf.iter().sum::<f64>() / n as f64;
    let std = variance(&cf).sqrt().max(1e-30);
    let standardized: Vec<f64> = cf.iter().map(|&e| (e - mean) / std).collect();

    // Trigger when the standardized CF exceeds thr1; confirm either by a
    // stronger thr2 excursion or by the CF staying up through the horizon
    let mut i = 0;
    while i < n {
        if standardized[i] > config.thr1 {
            let mut below = 0usize;
            let mut sustained = true;
            let mut strong = false;
            let horizon = (i + config.tupevent).min(n);
            for &s in standardized.iter().take(horizon).skip(i) {
                if s > config.thr2 {
                    strong = true;
                }
                if s < config.thr1 {
                    below += 1;
                    if below > config.tdownmax {
                        sustained = false;
                        break;
                    }
                } else {
                    below = 0;
                }
            }
            if strong || sustained {
                return Ok(i as f64 / sps);
            }
        }
        i += 1;
    }
    Err(GmError::Processing("Baer picker found no onset".to_string()))
}

/// Kalkan (2016) P-phase picker: histogram state level on the damping
/// energy of a short-period oscillator, onset at the last zero crossing
/// before the energy threshold is first exceeded.
pub fn pick_kalkan(trace: &Trace, config: &KalkanPickerConfig) -> GmResult<f64> {
    let sps = trace.sampling_rate();
    let dt = trace.stats.delta;
    let period = config
        .period
        .unwrap_or(if sps >= 100.0 { 0.01 } else { 0.1 });
    let nbins = config.nbins.unwrap_or((2.0 / dt) as usize).max(2);

    // Normalize and band-pass
    let max_abs = trace.max_abs();
    if max_abs <= 0.0 {
        return Err(GmError::Processing("flat trace, cannot pick".to_string()));
    }
    let normalized: Vec<f64> = trace.data.iter().map(|&v| v / max_abs).collect();
    let sos = butter_sos(
        4,
        FilterBand::Bandpass {
            low: 0.1,
            high: 20.0f64.min(0.45 * sps),
        },
        sps,
    )?;
    let filtered = detrend_linear(&sosfiltfilt(&sos, &normalized));

    // Damping energy of the oscillator response
    let damping = config.damping;
    let wn = 2.0 * std::f64::consts::PI / period;
    let response = sdof_response(&filtered, dt, period, damping);
    let edi: Vec<f64> = response.vel.iter().map(|&v| 2.0 * damping * wn * v * v).collect();

    for bins in [nbins, nbins / 2] {
        if bins < 2 {
            continue;
        }
        if let Some(level) = lower_state_level(&edi, bins) {
            if let Some(first) = edi.iter().position(|&e| e > level) {
                // Last zero crossing of the filtered record before onset
                let mut pick = None;
                for i in (0..first.saturating_sub(1)).rev() {
                    if filtered[i] * filtered[i + 1] < 0.0 {
                        pick = Some((i + 1) as f64 * dt);
                        break;
                    }
                }
                if let Some(p) = pick {
                    return Ok(p);
                }
            }
        }
    }
    Err(GmError::Processing("Kalkan picker found no onset".to_string()))
}

/// Histogram state level of the lower-amplitude population.
fn lower_state_level(y: &[f64], nbins: usize) -> Option<f64> {
    let ymax = y.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let ymin = y.iter().cloned().fold(f64::INFINITY, f64::min);
    if !(ymax > ymin) {
        return None;
    }
    let dy = (ymax - ymin) / nbins as f64;
    let mut histogram = vec![0usize; nbins];
    for &v in y {
        let idx = (((v - ymin) / dy).floor() as usize).min(nbins - 1);
        histogram[idx] += 1;
    }
    let occupied: Vec<usize> = histogram
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > 0)
        .map(|(i, _)| i)
        .collect();
    let (lo, hi) = (*occupied.first()?, *occupied.last()?);
    let mid = lo + (hi - lo) / 2;
    // Mode of the lower half of the occupied range, skipping the first bin
    let lower = &histogram[lo..=mid];
    let imax = lower
        .iter()
        .enumerate()
        .skip(1)
        .max_by_key(|(_, &c)| c)
        .map(|(i, _)| i)
        .unwrap_or(0);
    Some(ymin + dy * (lo + imax) as f64 + 0.5 * dy)
}

/// Aggregate candidate picks within `window` seconds of the travel-time
/// estimate (or all candidates when no travel-time estimate exists).
///
/// `combine` selects the aggregation: "median" (default) or "mean".
/// Returns the combined pick and the spread of the in-window candidates.
pub fn combine_picks(
    candidates: &[(String, f64)],
    travel_time: Option<f64>,
    window: f64,
    combine: &str,
) -> Option<(f64, f64)> {
    let mut in_window: Vec<f64> = candidates
        .iter()
        .map(|(_, t)| *t)
        .filter(|&t| match travel_time {
            Some(tt) => (t - tt).abs() <= window,
            None => true,
        })
        .collect();
    if in_window.is_empty() {
        return None;
    }
    let spread = in_window
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max)
        - in_window.iter().cloned().fold(f64::INFINITY, f64::min);
    let pick = match combine {
        "mean" => in_window.iter().sum::<f64>() / in_window.len() as f64,
        _ => median(&mut in_window),
    };
    Some((pick, spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::synthetic_record;

    #[test]
    fn test_classic_sta_lta_spike() {
        let mut data = vec![0.01f64; 400];
        for v in data.iter_mut().skip(200).take(50) {
            *v = 1.0;
        }
        let ratio = classic_sta_lta(&data, 5, 100);
        let peak_idx = ratio
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!((200..260).contains(&peak_idx));
    }

    #[test]
    fn test_kalkan_pick_on_synthetic_onset() {
        let tr = synthetic_record("HNZ", 12000, 0.01, 30.0, 10.0);
        let pick = pick_kalkan(&tr, &KalkanPickerConfig::default()).unwrap();
        assert!((pick - 30.0).abs() < 3.0, "pick at {pick}, expected ~30");
    }

    #[test]
    fn test_baer_pick_on_synthetic_onset() {
        let tr = synthetic_record("HNZ", 12000, 0.01, 30.0, 10.0);
        let pick = pick_baer(&tr, &BaerPickerConfig::default()).unwrap();
        assert!((pick - 30.0).abs() < 6.0, "pick at {pick}, expected ~30");
    }

    #[test]
    fn test_combine_picks_median() {
        let candidates = vec![
            ("a".to_string(), 10.0),
            ("b".to_string(), 10.4),
            ("c".to_string(), 11.0),
            ("d".to_string(), 55.0),
        ];
        let (pick, spread) = combine_picks(&candidates, Some(10.5), 5.0, "median").unwrap();
        assert!((pick - 10.4).abs() < 1e-12);
        assert!(spread < 1.1);

        let (mean_pick, _) = combine_picks(&candidates, Some(10.5), 5.0, "mean").unwrap();
        assert!((mean_pick - 10.466666666666667).abs() < 1e-9);
    }

    #[test]
    fn test_combine_picks_empty_window() {
        let candidates = vec![("a".to_string(), 50.0)];
        assert!(combine_picks(&candidates, Some(10.0), 5.0, "median").is_none());
    }
}
