//! Butterworth filter processing steps.
//!
//! Filters can run in the frequency domain (spectrum times the analytic
//! magnitude response, squared for two passes) or the time domain (cascaded
//! biquad sections, forward-reverse for two passes). Corner frequencies come
//! from the `corner_frequencies` trace parameter set by the selection steps.

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::Trace;
use crate::dsp::butterworth::{butter_sos, magnitude_response, FilterBand};
use crate::dsp::fft::{irfft, rfft, rfft_freqs};
use crate::dsp::sosfilt::{sosfilt, sosfiltfilt};
use crate::types::{FailureKind, GmResult, UnitsType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub frequency_domain: bool,
    pub filter_order: usize,
    pub number_of_passes: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            frequency_domain: true,
            filter_order: 5,
            number_of_passes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FilterKind {
    Highpass,
    Lowpass,
    Bandpass,
    Bandstop,
}

impl FilterKind {
    fn activity(&self) -> &'static str {
        match self {
            FilterKind::Highpass => "highpass_filter",
            FilterKind::Lowpass => "lowpass_filter",
            FilterKind::Bandpass => "bandpass_filter",
            FilterKind::Bandstop => "bandstop_filter",
        }
    }

    fn band(&self, highpass: f64, lowpass: f64) -> FilterBand {
        match self {
            FilterKind::Highpass => FilterBand::Highpass { fc: highpass },
            FilterKind::Lowpass => FilterBand::Lowpass { fc: lowpass },
            FilterKind::Bandpass => FilterBand::Bandpass {
                low: highpass,
                high: lowpass,
            },
            FilterKind::Bandstop => FilterBand::Bandstop {
                low: highpass,
                high: lowpass,
            },
        }
    }
}

fn apply_filter(
    tr: &mut Trace,
    kind: FilterKind,
    params: &FilterParams,
) -> GmResult<()> {
    if params.number_of_passes != 1 && params.number_of_passes != 2 {
        return Err(crate::types::GmError::Config(
            "number_of_passes must be 1 or 2".to_string(),
        ));
    }
    let (highpass, lowpass) = match tr.corner_frequencies() {
        Some(corners) => corners,
        None => {
            tr.fail(
                kind.activity(),
                FailureKind::MissingPrereq,
                "Corner frequencies are not set; run get_corner_frequencies first.",
            );
            return Ok(());
        }
    };
    let band = kind.band(highpass, lowpass);
    let fs = tr.sampling_rate();

    let filtered: Vec<f64> = if params.frequency_domain {
        let n = tr.stats.npts;
        let mut spec = rfft(&tr.data.to_vec(), n);
        let freqs = rfft_freqs(n, tr.stats.delta);
        let mags = magnitude_response(band, params.filter_order, &freqs);
        for (s, &m) in spec.iter_mut().zip(mags.iter()) {
            // Two passes square the magnitude response (acausal)
            let gain = if params.number_of_passes == 2 { m * m } else { m };
            *s *= gain;
        }
        irfft(&spec, n)
    } else {
        let sos = match butter_sos(params.filter_order, band, fs) {
            Ok(sos) => sos,
            Err(err) => {
                tr.fail(kind.activity(), FailureKind::Processing, &err.to_string());
                return Ok(());
            }
        };
        if params.number_of_passes == 2 {
            sosfiltfilt(&sos, &tr.data.to_vec())
        } else {
            sosfilt(&sos, &tr.data.to_vec())
        }
    };

    if !filtered.iter().all(|v| v.is_finite()) {
        tr.fail(
            kind.activity(),
            FailureKind::Processing,
            "Non-finite values encountered after filtering.",
        );
        return Ok(());
    }
    tr.data = Array1::from(filtered);

    let mut attrs = BTreeMap::new();
    attrs.insert(
        "filter_type".to_string(),
        json!(if params.frequency_domain {
            "Butterworth frequency domain"
        } else {
            "Butterworth time domain"
        }),
    );
    attrs.insert("filter_order".to_string(), json!(params.filter_order));
    attrs.insert(
        "number_of_passes".to_string(),
        json!(params.number_of_passes),
    );
    match kind {
        FilterKind::Highpass => {
            attrs.insert("corner_frequency".to_string(), json!(highpass));
        }
        FilterKind::Lowpass => {
            attrs.insert("corner_frequency".to_string(), json!(lowpass));
        }
        FilterKind::Bandpass | FilterKind::Bandstop => {
            attrs.insert("lower_corner_frequency".to_string(), json!(highpass));
            attrs.insert("upper_corner_frequency".to_string(), json!(lowpass));
        }
    }
    tr.set_provenance(kind.activity(), attrs);
    Ok(())
}

fn filter_stream(
    stream: &mut Stream,
    kind: FilterKind,
    args: &serde_yaml::Value,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: FilterParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if tr.stats.standard.units_type != UnitsType::Acc {
            tr.fail(
                kind.activity(),
                FailureKind::QaCheck,
                &format!(
                    "Unit type must be acc to apply {} filter.",
                    kind.activity().trim_end_matches("_filter")
                ),
            );
            continue;
        }
        if tr.passed() {
            apply_filter(tr, kind, &params)?;
        }
    }
    Ok(())
}

/// Processing step: Butterworth highpass at the selected corner.
pub fn highpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    filter_stream(stream, FilterKind::Highpass, args)
}

/// Processing step: Butterworth lowpass at the selected corner.
pub fn lowpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    filter_stream(stream, FilterKind::Lowpass, args)
}

/// Processing step: Butterworth bandpass between the selected corners.
pub fn bandpass_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    filter_stream(stream, FilterKind::Bandpass, args)
}

/// Processing step: Butterworth bandstop between the selected corners.
pub fn bandstop_filter(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    filter_stream(stream, FilterKind::Bandstop, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{flat_trace, test_event};
    use crate::core::trace::TraceParam;

    fn acc_stream_with_corners() -> Stream {
        let mut tr = flat_trace("HNE", 2048, 0.01, 0.0);
        tr.stats.standard.units_type = UnitsType::Acc;
        tr.stats.standard.units = "cm/s^2".to_string();
        tr.data = Array1::from(
            (0..2048)
                .map(|i| {
                    let t = i as f64 * 0.01;
                    (2.0 * std::f64::consts::PI * 0.05 * t).sin()
                        + (2.0 * std::f64::consts::PI * 5.0 * t).sin()
                })
                .collect::<Vec<f64>>(),
        );
        tr.set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "constant".to_string(),
                highpass: 0.5,
                lowpass: 20.0,
            },
        );
        Stream::new(vec![tr])
    }

    #[test]
    fn test_highpass_removes_low_frequency() {
        let mut st = acc_stream_with_corners();
        highpass_filter(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(st.passed());
        // The 0.05 Hz component (amplitude 1) is strongly attenuated, the
        // 5 Hz component survives: peak stays near 1, not 2
        let max = st.traces[0].max_abs();
        assert!(max < 1.6, "max after highpass: {max}");
        assert!(max > 0.7);
        assert!(st.traces[0].has_provenance("highpass_filter"));
    }

    #[test]
    fn test_counts_units_rejected() {
        let mut st = Stream::new(vec![flat_trace("HNE", 512, 0.01, 1.0)]);
        st.traces[0].set_parameter(
            "corner_frequencies",
            TraceParam::CornerFrequencies {
                method: "constant".to_string(),
                highpass: 0.5,
                lowpass: 20.0,
            },
        );
        lowpass_filter(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_missing_corners_is_prereq_failure() {
        let mut tr = flat_trace("HNE", 512, 0.01, 1.0);
        tr.stats.standard.units_type = UnitsType::Acc;
        let mut st = Stream::new(vec![tr]);
        highpass_filter(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        let failure = st.first_failure().unwrap();
        assert_eq!(failure.kind, crate::types::FailureKind::MissingPrereq);
    }

    #[test]
    fn test_time_domain_two_passes() {
        let mut st = acc_stream_with_corners();
        let args: serde_yaml::Value = serde_yaml::from_str(
            "frequency_domain: false\nfilter_order: 4\nnumber_of_passes: 2",
        )
        .unwrap();
        lowpass_filter(&mut st, &test_event(), &args, &Config::default()).unwrap();
        assert!(st.passed());
    }

    #[test]
    fn test_invalid_passes_is_config_error() {
        let mut st = acc_stream_with_corners();
        let args: serde_yaml::Value = serde_yaml::from_str("number_of_passes: 3").unwrap();
        assert!(highpass_filter(&mut st, &test_event(), &args, &Config::default()).is_err());
    }
}
