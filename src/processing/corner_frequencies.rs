//! Corner-frequency selection.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::TraceParam;
use crate::processing::snr::compute_snr_trace;
use crate::types::{seconds_between, FailureKind, GmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantMethodParams {
    pub highpass: f64,
    pub lowpass: f64,
}

impl Default for ConstantMethodParams {
    fn default() -> Self {
        Self {
            highpass: 0.08,
            lowpass: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnrMethodParams {
    /// Use the more conservative corners across both horizontals
    pub same_horiz: bool,
    pub bandwidth: f64,
}

impl Default for SnrMethodParams {
    fn default() -> Self {
        Self {
            same_horiz: true,
            bandwidth: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnitudeMethodParams {
    /// Lower magnitude edges of the table rows
    pub minmag: Vec<f64>,
    pub highpass: Vec<f64>,
    pub lowpass: Vec<f64>,
}

impl Default for MagnitudeMethodParams {
    fn default() -> Self {
        Self {
            minmag: vec![-999.0, 3.5, 5.5],
            highpass: vec![0.5, 0.3, 0.1],
            lowpass: vec![25.0, 35.0, 40.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerFrequencyParams {
    /// "snr", "constant", or "magnitude"
    pub method: String,
    pub constant: ConstantMethodParams,
    pub snr: SnrMethodParams,
    pub magnitude: MagnitudeMethodParams,
}

impl Default for CornerFrequencyParams {
    fn default() -> Self {
        Self {
            method: "snr".to_string(),
            constant: ConstantMethodParams::default(),
            snr: SnrMethodParams::default(),
            magnitude: MagnitudeMethodParams::default(),
        }
    }
}

/// Processing step: select per-record highpass and lowpass corners.
///
/// Only the selection happens here; the filters are applied by the
/// dedicated filter steps and may be further capped by
/// `lowpass_max_frequency`.
pub fn get_corner_frequencies(
    stream: &mut Stream,
    event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    let params: CornerFrequencyParams = parse_args(args)?;
    log::debug!("Setting corner frequencies...");

    match params.method.as_str() {
        "constant" => from_constant(stream, &params.constant),
        "magnitude" => from_magnitude(stream, event, &params.magnitude),
        "snr" => {
            from_snr(stream, event, &params.snr);
            if params.snr.same_horiz && stream.passed() && stream.num_horizontal() > 1 {
                harmonize_horizontals(stream);
            }
        }
        other => {
            return Err(crate::types::GmError::Config(format!(
                "Corner frequency 'method' must be one of: 'constant', 'magnitude', or 'snr' (got '{other}')"
            )));
        }
    }

    // Manual review overrides beat any automatic pick
    for tr in stream.iter_mut() {
        if let Some(TraceParam::Review {
            corner_highpass,
            corner_lowpass,
            ..
        }) = tr.get_parameter("review").cloned()
        {
            if corner_highpass.is_some() || corner_lowpass.is_some() {
                let (hp, lp) = tr.corner_frequencies().unwrap_or((0.08, 20.0));
                tr.set_parameter(
                    "corner_frequencies",
                    TraceParam::CornerFrequencies {
                        method: "reviewed".to_string(),
                        highpass: corner_highpass.unwrap_or(hp),
                        lowpass: corner_lowpass.unwrap_or(lp),
                    },
                );
            }
        }
    }
    Ok(())
}

fn from_constant(stream: &mut Stream, params: &ConstantMethodParams) {
    for tr in stream.iter_mut() {
        tr.set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "constant".to_string(),
                highpass: params.highpass,
                lowpass: params.lowpass,
            },
        );
    }
}

fn from_magnitude(stream: &mut Stream, event: &ScalarEvent, params: &MagnitudeMethodParams) {
    let mut row = 0usize;
    for (i, &edge) in params.minmag.iter().enumerate() {
        if event.magnitude > edge {
            row = i;
        }
    }
    let highpass = params.highpass.get(row).copied().unwrap_or(0.1);
    let lowpass = params.lowpass.get(row).copied().unwrap_or(40.0);
    for tr in stream.iter_mut() {
        tr.set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "magnitude".to_string(),
                highpass,
                lowpass,
            },
        );
    }
}

/// Pick corners from the SNR spectrum: the widest threshold-crossing
/// bracket that covers the required check band.
fn from_snr(stream: &mut Stream, event: &ScalarEvent, params: &SnrMethodParams) {
    for tr in stream.iter_mut() {
        if !tr.has_parameter("snr") {
            compute_snr_trace(tr, event.magnitude, params.bandwidth);
        }
        if !tr.passed() {
            continue;
        }

        let (threshold, min_freq, max_freq) = match tr.get_parameter("snr_conf") {
            Some(TraceParam::SnrConf {
                threshold,
                min_freq,
                max_freq,
            }) => (*threshold, *min_freq, *max_freq),
            _ => {
                tr.fail(
                    "get_corner_frequencies",
                    FailureKind::MissingPrereq,
                    "Cannot pick corners from SNR: snr_check has not been run.",
                );
                continue;
            }
        };
        let (snr, freq) = match tr.get_parameter("snr").cloned() {
            Some(TraceParam::Snr { snr, freq }) => (snr, freq),
            _ => {
                tr.fail(
                    "get_corner_frequencies",
                    FailureKind::MissingPrereq,
                    "Cannot use SNR to pick corners because SNR could not be calculated.",
                );
                continue;
            }
        };

        // Threshold crossings of the SNR curve
        let mut lows: Vec<f64> = Vec::new();
        let mut highs: Vec<f64> = Vec::new();
        let mut prev_sign: Option<f64> = None;
        for (i, (&s, &f)) in snr.iter().zip(freq.iter()).enumerate() {
            if !s.is_finite() {
                continue;
            }
            let sign = (s - threshold).signum();
            if let Some(p) = prev_sign {
                if sign > p {
                    lows.push(f);
                } else if sign < p {
                    // Crossing downward: the last frequency above threshold
                    highs.push(freq[i.saturating_sub(1)]);
                }
            } else if sign > 0.0 {
                // Above threshold from the first usable frequency
                lows.push(f);
            }
            prev_sign = Some(sign);
        }

        if lows.is_empty() {
            tr.fail(
                "get_corner_frequencies",
                FailureKind::QaCheck,
                "SNR not greater than required threshold.",
            );
            continue;
        }
        if lows.len() > highs.len() {
            highs.push(freq.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        }

        // The bracket must cover [min_freq, max_freq]
        let mut selected: Option<(f64, f64)> = None;
        for (low, high) in lows.iter().zip(highs.iter()) {
            if *low <= min_freq && *high > max_freq {
                selected = Some((*low, *high));
            }
        }
        let (mut low_corner, high_corner) = match selected {
            Some(pair) => pair,
            None => {
                tr.fail(
                    "get_corner_frequencies",
                    FailureKind::QaCheck,
                    "SNR not met within the required bandwidth.",
                );
                continue;
            }
        };

        // The highpass corner cannot resolve periods longer than the signal
        // window or the noise window
        if let Some(end_time) = tr.signal_end_time() {
            let duration = seconds_between(end_time, tr.stats.start_time);
            if duration > 0.0 {
                low_corner = low_corner.max(1.0 / duration);
            }
        }
        if let Some(noise) = tr.get_cached("preevent_noise_trace") {
            if !noise.values.is_empty() {
                let min_freq_noise = 1.0 / (noise.values.len() as f64 * tr.stats.delta);
                low_corner = low_corner.max(min_freq_noise);
            }
        }

        tr.set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "snr".to_string(),
                highpass: low_corner,
                lowpass: high_corner,
            },
        );
    }
}

/// Apply the more conservative horizontal corners to both horizontals.
pub fn harmonize_horizontals(stream: &mut Stream) {
    let mut hps: Vec<f64> = Vec::new();
    let mut lps: Vec<f64> = Vec::new();
    for tr in stream.iter() {
        if tr.is_horizontal() {
            if let Some((hp, lp)) = tr.corner_frequencies() {
                hps.push(hp);
                lps.push(lp);
            }
        }
    }
    if hps.len() < 2 {
        return;
    }
    let hp = hps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lp = lps.iter().cloned().fold(f64::INFINITY, f64::min);
    for tr in stream.iter_mut() {
        if tr.is_horizontal() {
            if let Some(TraceParam::CornerFrequencies { method, .. }) =
                tr.get_parameter("corner_frequencies").cloned()
            {
                tr.set_parameter(
                    "corner_frequencies",
                    TraceParam::CornerFrequencies {
                        method,
                        highpass: hp,
                        lowpass: lp,
                    },
                );
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LowpassMaxParams {
    /// Nyquist fraction cap
    pub fn_fac: f64,
    /// Absolute cap (Hz)
    pub lp_max: f64,
}

impl Default for LowpassMaxParams {
    fn default() -> Self {
        Self {
            fn_fac: 0.75,
            lp_max: 40.0,
        }
    }
}

/// Processing step: cap the lowpass corner at a fraction of Nyquist and an
/// absolute maximum.
pub fn lowpass_max_frequency(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    let params: LowpassMaxParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        if let Some(TraceParam::CornerFrequencies {
            method,
            highpass,
            lowpass,
        }) = tr.get_parameter("corner_frequencies").cloned()
        {
            if method == "reviewed" {
                log::warn!(
                    "Not applying lowpass_max_frequency for {} because the lowpass filter \
                     corner was set by manual review.",
                    tr.id()
                );
                continue;
            }
            let fn_max = params.fn_fac * 0.5 * tr.sampling_rate();
            let capped = lowpass.min(fn_max).min(params.lp_max);
            if capped < lowpass {
                tr.set_parameter(
                    "corner_frequencies",
                    TraceParam::CornerFrequencies {
                        method,
                        highpass,
                        lowpass: capped,
                    },
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::flat_trace;
    use chrono::{TimeZone, Utc};

    fn event() -> ScalarEvent {
        ScalarEvent::new(
            "test",
            Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 53).unwrap(),
            35.77,
            -117.6,
            8.0,
            6.4,
            None,
        )
    }

    #[test]
    fn test_constant_method() {
        let mut st = Stream::new(vec![flat_trace("HNE", 100, 0.01, 1.0)]);
        let args: serde_yaml::Value =
            serde_yaml::from_str("method: constant\nconstant:\n  highpass: 0.1\n  lowpass: 30.0")
                .unwrap();
        get_corner_frequencies(&mut st, &event(), &args, &Config::default()).unwrap();
        assert_eq!(st.traces[0].corner_frequencies(), Some((0.1, 30.0)));
    }

    #[test]
    fn test_magnitude_method_row_selection() {
        let mut st = Stream::new(vec![flat_trace("HNE", 100, 0.01, 1.0)]);
        let args: serde_yaml::Value = serde_yaml::from_str("method: magnitude").unwrap();
        // M6.4 is above the last edge (5.5): highpass 0.1, lowpass 40
        get_corner_frequencies(&mut st, &event(), &args, &Config::default()).unwrap();
        assert_eq!(st.traces[0].corner_frequencies(), Some((0.1, 40.0)));
    }

    #[test]
    fn test_lowpass_cap() {
        let mut st = Stream::new(vec![flat_trace("HNE", 100, 0.01, 1.0)]);
        st.traces[0].set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "constant".to_string(),
                highpass: 0.1,
                lowpass: 45.0,
            },
        );
        lowpass_max_frequency(
            &mut st,
            &event(),
            &serde_yaml::Value::Null,
            &Config::default(),
        )
        .unwrap();
        // 100 Hz sampling: cap is 0.75 * 50 = 37.5
        let (_, lp) = st.traces[0].corner_frequencies().unwrap();
        assert!((lp - 37.5).abs() < 1e-12);
    }

    #[test]
    fn test_harmonize_horizontals() {
        let mut st = Stream::new(vec![
            flat_trace("HNE", 100, 0.01, 1.0),
            flat_trace("HNN", 100, 0.01, 1.0),
        ]);
        for (i, corners) in [(0usize, (0.1, 30.0)), (1usize, (0.3, 20.0))] {
            st.traces[i].set_parameter(
                "corner_frequencies",
                TraceParam::CornerFrequencies {
                    method: "snr".to_string(),
                    highpass: corners.0,
                    lowpass: corners.1,
                },
            );
        }
        harmonize_horizontals(&mut st);
        // Most conservative: widest highpass, narrowest lowpass
        assert_eq!(st.traces[0].corner_frequencies(), Some((0.3, 20.0)));
        assert_eq!(st.traces[1].corner_frequencies(), Some((0.3, 20.0)));
    }
}
