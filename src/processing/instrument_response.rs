//! Instrument-response correction.
//!
//! Seismometers with usable pole-zero stages are deconvolved to velocity
//! with a cosine pre-filter band and water-level regularization, then
//! differentiated to acceleration. Accelerometers are deconvolved directly
//! to acceleration, or corrected by the overall sensitivity when no usable
//! stages exist. Output is always acceleration in cm/s^2.

use std::collections::BTreeMap;

use ndarray::Array1;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::Trace;
use crate::dsp::fft::{irfft, next_pow_2, rfft, rfft_freqs};
use crate::dsp::window::cosine_sac_taper;
use crate::types::{
    FailureKind, GmResult, InstrumentResponse, InstrumentType, ProcessLevel, UnitsType, M_TO_CM,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveResponseParams {
    /// Maximum percent difference between the stage-gain product and the
    /// overall sensitivity
    pub sensitivity_threshold: f64,
    /// Apply the cosine pre-filter band before deconvolution
    pub pre_filt: bool,
    pub f1: f64,
    pub f2: f64,
    /// Defaults to 0.9 * Nyquist when unset
    pub f3: Option<f64>,
    /// Defaults to Nyquist when unset
    pub f4: Option<f64>,
    /// Water level (dB below the peak response)
    pub water_level: Option<f64>,
}

impl Default for RemoveResponseParams {
    fn default() -> Self {
        Self {
            sensitivity_threshold: 10.0,
            pre_filt: true,
            f1: 0.001,
            f2: 0.005,
            f3: None,
            f4: None,
            water_level: Some(60.0),
        }
    }
}

fn units_are_acceleration(units: &str) -> bool {
    matches!(
        units.to_lowercase().replace("**", "^").as_str(),
        "m/s^2" | "m/s/s" | "m/s2"
    )
}

fn units_are_velocity(units: &str) -> bool {
    matches!(units.to_lowercase().as_str(), "m/s")
}

/// Relative (percent) difference between the stage-gain product and the
/// reported overall sensitivity.
fn sensitivity_mismatch_pct(response: &InstrumentResponse) -> f64 {
    let product = response.stage_gain_product();
    let overall = response.sensitivity;
    if overall + product == 0.0 {
        return f64::INFINITY;
    }
    200.0 * (overall - product).abs() / (overall + product).abs()
}

/// Combined pole-zero transfer function of all stages at the given
/// frequencies, scaled by the overall sensitivity.
fn paz_frequency_response(
    response: &InstrumentResponse,
    freqs: &[f64],
) -> Vec<Complex64> {
    freqs
        .iter()
        .map(|&f| {
            let s = Complex64::new(0.0, 2.0 * std::f64::consts::PI * f);
            let mut h = Complex64::new(response.sensitivity, 0.0);
            for stage in &response.stages {
                if stage.poles.is_empty() && stage.zeros.is_empty() {
                    continue;
                }
                let mut num = Complex64::new(stage.normalization, 0.0);
                for &(zr, zi) in &stage.zeros {
                    num *= s - Complex64::new(zr, zi);
                }
                let mut den = Complex64::new(1.0, 0.0);
                for &(pr, pi) in &stage.poles {
                    den *= s - Complex64::new(pr, pi);
                }
                h *= num / den;
            }
            h
        })
        .collect()
}

/// Divide the spectrum by the response with water-level regularization:
/// response values more than `water_level` dB below the peak are raised to
/// the water level, keeping their phase.
fn invert_with_water_level(
    spec: &mut [Complex64],
    response: &[Complex64],
    water_level: f64,
) {
    let max_amp = response.iter().map(|h| h.norm()).fold(0.0f64, f64::max);
    let floor = max_amp * 10f64.powf(-water_level / 20.0);
    for (s, h) in spec.iter_mut().zip(response.iter()) {
        let amp = h.norm();
        if amp > floor {
            *s /= *h;
        } else if amp > 0.0 {
            *s /= *h / amp * floor;
        } else {
            *s = Complex64::new(0.0, 0.0);
        }
    }
}

struct ResponseRemover<'a> {
    params: &'a RemoveResponseParams,
    differentiation_frequency: bool,
}

impl<'a> ResponseRemover<'a> {
    fn remove(&self, tr: &mut Trace) {
        if tr.has_provenance("remove_response") {
            return;
        }
        if !tr.passed() {
            return;
        }

        let instrument = tr.instrument_type();
        if instrument == InstrumentType::Unsupported {
            tr.fail(
                "remove_response",
                FailureKind::ResponseMetadata,
                "This instrument type is not supported. The instrument code must be either \
                 H (high gain seismometer) or N (accelerometer).",
            );
            return;
        }
        let response = match tr.stats.response.clone() {
            Some(r) => r,
            None => {
                tr.fail(
                    "remove_response",
                    FailureKind::ResponseMetadata,
                    "bad_response_metadata: no instrument response attached to trace",
                );
                return;
            }
        };

        // Stage gains must agree with the reported overall sensitivity
        if !response.stages.is_empty() {
            let pct_diff = sensitivity_mismatch_pct(&response);
            if pct_diff > self.params.sensitivity_threshold {
                tr.fail(
                    "remove_response",
                    FailureKind::ResponseMetadata,
                    &format!(
                        "sensitivity_mismatch: stage gain product differs from overall \
                         sensitivity by {pct_diff:.1}%"
                    ),
                );
                return;
            }
        }

        // Input units of the chain must match the instrument type
        let units_ok = match instrument {
            InstrumentType::Accelerometer => units_are_acceleration(&response.sensitivity_units),
            InstrumentType::Seismometer => units_are_velocity(&response.sensitivity_units),
            InstrumentType::Unsupported => false,
        };
        let stage_units_ok = match response.stages.first() {
            Some(stage) => match instrument {
                InstrumentType::Accelerometer => units_are_acceleration(&stage.input_units),
                InstrumentType::Seismometer => units_are_velocity(&stage.input_units),
                InstrumentType::Unsupported => false,
            },
            None => true,
        };
        if !units_ok || !stage_units_ok {
            tr.fail(
                "remove_response",
                FailureKind::ResponseMetadata,
                "bad_response_metadata: response units are inconsistent with the instrument type",
            );
            return;
        }

        if instrument == InstrumentType::Seismometer && !response.has_paz() {
            tr.fail(
                "remove_response",
                FailureKind::ResponseMetadata,
                "Instrument is a seismometer and does not have poles and zeros for response.",
            );
            return;
        }

        if response.has_paz() && self.params.water_level.is_some() {
            self.deconvolve(tr, &response, instrument);
        } else if instrument == InstrumentType::Accelerometer && response.sensitivity > 0.0 {
            self.remove_sensitivity(tr, &response);
        } else {
            tr.fail(
                "remove_response",
                FailureKind::ResponseMetadata,
                "bad_response_metadata: no usable correction strategy for this response",
            );
        }
    }

    fn deconvolve(
        &self,
        tr: &mut Trace,
        response: &InstrumentResponse,
        instrument: InstrumentType,
    ) {
        let water_level = match self.params.water_level {
            Some(wl) => wl,
            None => return,
        };
        let n = tr.stats.npts;
        let nfft = next_pow_2(2 * n);
        let f_n = 0.5 * tr.sampling_rate();
        let f3 = self.params.f3.unwrap_or(0.9 * f_n);
        let f4 = self.params.f4.unwrap_or(f_n);

        // zero mean before transforming
        let mean = tr.data.mean().unwrap_or(0.0);
        let data: Vec<f64> = tr.data.iter().map(|&v| v - mean).collect();
        let mut spec = rfft(&data, nfft);
        let freqs = rfft_freqs(nfft, tr.stats.delta);

        if self.params.pre_filt {
            let taper = cosine_sac_taper(&freqs, self.params.f1, self.params.f2, f3, f4);
            for (s, &t) in spec.iter_mut().zip(taper.iter()) {
                *s *= t;
            }
        }

        let h = paz_frequency_response(response, &freqs);
        invert_with_water_level(&mut spec, &h, water_level);

        let mut corrected = irfft(&spec, nfft);
        corrected.truncate(n);
        tr.data = Array1::from(corrected);

        // Seismometers come out in velocity and still need differentiation
        if instrument == InstrumentType::Seismometer {
            tr.stats.standard.units_type = UnitsType::Vel;
            tr.stats.standard.units = "m/s".to_string();
            tr.differentiate(self.differentiation_frequency);
        }

        tr.data.mapv_inplace(|v| v * M_TO_CM);
        tr.stats.standard.units = "cm/s^2".to_string();
        tr.stats.standard.units_type = UnitsType::Acc;
        tr.stats.standard.process_level = ProcessLevel::V1;

        let mut attrs = BTreeMap::new();
        attrs.insert("method".to_string(), json!("remove_response"));
        attrs.insert("input_units".to_string(), json!("counts"));
        attrs.insert("output_units".to_string(), json!("cm/s^2"));
        attrs.insert("water_level".to_string(), json!(water_level));
        attrs.insert(
            "pre_filt_freqs".to_string(),
            json!(format!("({}, {}, {}, {})", self.params.f1, self.params.f2, f3, f4)),
        );
        tr.set_provenance("remove_response", attrs);

        if !tr.is_finite() {
            tr.fail(
                "remove_response",
                FailureKind::Processing,
                "Non-finite values encountered after removing instrument response.",
            );
        }
    }

    fn remove_sensitivity(&self, tr: &mut Trace, response: &InstrumentResponse) {
        let sensitivity = response.sensitivity;
        tr.data.mapv_inplace(|v| v / sensitivity * M_TO_CM);
        tr.stats.standard.units = "cm/s^2".to_string();
        tr.stats.standard.units_type = UnitsType::Acc;
        tr.stats.standard.process_level = ProcessLevel::V1;

        let mut attrs = BTreeMap::new();
        attrs.insert("method".to_string(), json!("remove_sensitivity"));
        attrs.insert("input_units".to_string(), json!("counts"));
        attrs.insert("output_units".to_string(), json!("cm/s^2"));
        attrs.insert("sensitivity".to_string(), json!(sensitivity));
        tr.set_provenance("remove_response", attrs);
    }
}

/// Processing step: correct every trace for its instrument response.
pub fn remove_response(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    config: &Config,
) -> GmResult<()> {
    let params: RemoveResponseParams = parse_args(args)?;
    let remover = ResponseRemover {
        params: &params,
        differentiation_frequency: config.differentiation.frequency,
    };
    for tr in stream.iter_mut() {
        remover.remove(tr);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{flat_trace, test_event};
    use crate::types::ResponseStage;

    fn accel_response(sensitivity: f64, gain_product_factor: f64) -> InstrumentResponse {
        InstrumentResponse {
            stages: vec![
                ResponseStage {
                    gain: 100.0 * gain_product_factor,
                    gain_frequency: 1.0,
                    input_units: "m/s^2".to_string(),
                    output_units: "V".to_string(),
                    poles: vec![],
                    zeros: vec![],
                    normalization: 1.0,
                },
                ResponseStage {
                    gain: sensitivity / 100.0,
                    gain_frequency: 1.0,
                    input_units: "V".to_string(),
                    output_units: "counts".to_string(),
                    poles: vec![],
                    zeros: vec![],
                    normalization: 1.0,
                },
            ],
            sensitivity,
            sensitivity_units: "m/s^2".to_string(),
            sensitivity_frequency: 1.0,
        }
    }

    #[test]
    fn test_sensitivity_round_trip() {
        // counts = acc * sensitivity; removal recovers acc in cm/s^2
        let sensitivity = 2.5e5;
        let acc_m = 0.02;
        let mut tr = flat_trace("HNE", 1000, 0.01, acc_m * sensitivity);
        tr.stats.response = Some(accel_response(sensitivity, 1.0));
        let mut st = Stream::new(vec![tr]);
        remove_response(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(st.passed(), "{:?}", st.first_failure());
        let expected_cm = acc_m * 100.0;
        assert!((st.traces[0].data[500] - expected_cm).abs() < 1e-9 * expected_cm.abs());
        assert_eq!(st.traces[0].stats.standard.units_type, UnitsType::Acc);
        assert!(st.traces[0].has_provenance("remove_response"));
    }

    #[test]
    fn test_sensitivity_mismatch_fails() {
        // Stage gain product disagrees with overall sensitivity by 30%
        let mut tr = flat_trace("HNE", 1000, 0.01, 1000.0);
        tr.stats.response = Some(accel_response(2.5e5, 1.3));
        let mut st = Stream::new(vec![tr]);
        remove_response(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
        let failure = st.first_failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ResponseMetadata);
        assert!(failure.reason.contains("sensitivity_mismatch"));
    }

    #[test]
    fn test_wrong_units_fail() {
        let mut tr = flat_trace("HNE", 1000, 0.01, 1000.0);
        let mut resp = accel_response(2.5e5, 1.0);
        resp.sensitivity_units = "m/s".to_string();
        tr.stats.response = Some(resp);
        let mut st = Stream::new(vec![tr]);
        remove_response(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_seismometer_without_paz_fails() {
        let mut tr = flat_trace("HHZ", 1000, 0.01, 1000.0);
        let mut resp = accel_response(2.5e5, 1.0);
        resp.sensitivity_units = "m/s".to_string();
        for stage in &mut resp.stages {
            stage.input_units = "m/s".to_string();
        }
        tr.stats.response = Some(resp);
        let mut st = Stream::new(vec![tr]);
        remove_response(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
        assert!(st
            .first_failure()
            .unwrap()
            .reason
            .contains("poles and zeros"));
    }

    #[test]
    fn test_paz_deconvolution_flat_band() {
        // A single pole far above the band gives a flat in-band response;
        // deconvolution then reduces to the sensitivity correction.
        let sensitivity = 1.0e5;
        let pole = -2.0 * std::f64::consts::PI * 1000.0;
        let mut tr = flat_trace("HNE", 2000, 0.01, 0.0);
        tr.data = Array1::from(
            (0..2000)
                .map(|i| {
                    let t = i as f64 * 0.01;
                    0.05 * sensitivity * (2.0 * std::f64::consts::PI * 1.0 * t).sin()
                })
                .collect::<Vec<f64>>(),
        );
        tr.stats.response = Some(InstrumentResponse {
            stages: vec![ResponseStage {
                gain: sensitivity,
                gain_frequency: 1.0,
                input_units: "m/s^2".to_string(),
                output_units: "counts".to_string(),
                poles: vec![(pole, 0.0)],
                zeros: vec![],
                normalization: -pole,
            }],
            sensitivity,
            sensitivity_units: "m/s^2".to_string(),
            sensitivity_frequency: 1.0,
        });
        let mut st = Stream::new(vec![tr]);
        remove_response(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(st.passed(), "{:?}", st.first_failure());
        // Mid-record amplitude ~ 0.05 m/s^2 = 5 cm/s^2
        let mid = st.traces[0]
            .data
            .iter()
            .skip(800)
            .take(400)
            .fold(0.0f64, |m, &v| m.max(v.abs()));
        assert!((mid - 5.0).abs() < 0.5, "mid-band amplitude {mid}");
    }
}
