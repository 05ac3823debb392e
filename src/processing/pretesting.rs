//! QA check steps: instrument/channel sanity, amplitude range, STA/LTA,
//! zero-crossing rate, and the signal-tail check.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::TraceParam;
use crate::processing::pickers::classic_sta_lta;
use crate::types::{FailureKind, GmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinSampleRateParams {
    pub min_sps: f64,
}

impl Default for MinSampleRateParams {
    fn default() -> Self {
        Self { min_sps: 20.0 }
    }
}

/// Processing step: require a minimum sampling rate.
pub fn min_sample_rate(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: MinSampleRateParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if tr.passed() && tr.sampling_rate() < params.min_sps {
            tr.fail(
                "min_sample_rate",
                FailureKind::QaCheck,
                &format!("Minimum sample rate of {} not exceeded.", params.min_sps),
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckInstrumentParams {
    pub n_max: usize,
    pub n_min: usize,
    pub require_two_horiz: bool,
}

impl Default for CheckInstrumentParams {
    fn default() -> Self {
        Self {
            n_max: 3,
            n_min: 2,
            require_two_horiz: true,
        }
    }
}

/// Processing step: check the channel configuration of the stream.
pub fn check_instrument(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckInstrumentParams = parse_args(args)?;
    log::debug!("Starting check_instrument; len(st) = {}", stream.len());

    let checks: [(bool, String); 3] = [
        (
            stream.len() > params.n_max,
            format!("More than {} traces in stream.", params.n_max),
        ),
        (
            stream.len() < params.n_min,
            format!("Less than {} traces in stream.", params.n_min),
        ),
        (
            params.require_two_horiz && stream.num_horizontal() != 2,
            "Not two horizontal components".to_string(),
        ),
    ];
    for (failed, message) in checks {
        if failed {
            stream.fail_all("check_instrument", FailureKind::QaCheck, &message);
            break;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckFreeFieldParams {
    pub reject_non_free_field: bool,
}

impl Default for CheckFreeFieldParams {
    fn default() -> Self {
        Self {
            reject_non_free_field: true,
        }
    }
}

/// Processing step: fail sensors that are not free-field installations.
pub fn check_free_field(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckFreeFieldParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if tr.passed() && !tr.free_field() && params.reject_non_free_field {
            tr.fail(
                "check_free_field",
                FailureKind::QaCheck,
                "Failed free field sensor check.",
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckStaLtaParams {
    /// STA window (s)
    pub sta_length: f64,
    /// LTA window (s)
    pub lta_length: f64,
    /// Minimum acceptable peak STA/LTA ratio
    pub threshold: f64,
}

impl Default for CheckStaLtaParams {
    fn default() -> Self {
        Self {
            sta_length: 1.0,
            lta_length: 20.0,
            threshold: 5.0,
        }
    }
}

/// Processing step: require an impulsive STA/LTA peak.
pub fn check_sta_lta(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckStaLtaParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let sr = tr.sampling_rate();
        let nlta = (params.lta_length * sr) as usize + 1;
        if tr.stats.npts < nlta {
            tr.fail(
                "check_sta_lta",
                FailureKind::QaCheck,
                "Failed sta/lta check because record length is shorter than lta length.",
            );
            continue;
        }
        let nsta = (params.sta_length * sr) as usize + 1;
        let ratio = classic_sta_lta(&tr.data.to_vec(), nsta, nlta);
        let max_ratio = ratio.iter().cloned().fold(0.0f64, f64::max);
        if max_ratio < params.threshold {
            tr.fail(
                "check_sta_lta",
                FailureKind::QaCheck,
                "Failed sta/lta check because threshold sta/lta is not exceeded.",
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckMaxAmplitudeParams {
    pub min: f64,
    pub max: f64,
}

impl Default for CheckMaxAmplitudeParams {
    fn default() -> Self {
        Self { min: 5.0, max: 2e6 }
    }
}

/// Processing step: screen raw-count amplitudes for dead or clipped
/// channels. Skipped after response removal.
pub fn check_max_amplitude(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckMaxAmplitudeParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if tr.passed() && !tr.has_provenance("remove_response") {
            let amp = tr.max_abs();
            if amp < params.min || amp > params.max {
                tr.fail(
                    "check_max_amplitude",
                    FailureKind::QaCheck,
                    "Failed max amplitude check.",
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxTracesParams {
    pub n_max: usize,
}

impl Default for MaxTracesParams {
    fn default() -> Self {
        Self { n_max: 3 }
    }
}

/// Processing step: reject streams with too many traces (structural or
/// downhole arrays).
pub fn max_traces(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: MaxTracesParams = parse_args(args)?;
    if stream.len() > params.n_max {
        let message = format!("More than {} traces in stream.", params.n_max);
        stream.fail_all("max_traces", FailureKind::QaCheck, &message);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckZeroCrossingsParams {
    /// Minimum zero crossings per second
    pub min_crossings: f64,
}

impl Default for CheckZeroCrossingsParams {
    fn default() -> Self {
        Self { min_crossings: 1.0 }
    }
}

/// Processing step: screen out instrumental failures via the density of
/// zero crossings.
pub fn check_zero_crossings(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckZeroCrossingsParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        let dur = tr.duration();
        if dur <= 0.0 {
            continue;
        }
        let crossings = tr
            .data
            .iter()
            .zip(tr.data.iter().skip(1))
            .filter(|(&a, &b)| a * b < 0.0)
            .count();
        let rate = crossings as f64 / dur;
        tr.set_parameter(
            "zero_crossing_rate",
            TraceParam::ZeroCrossingRate {
                crossing_rate: rate,
            },
        );
        if rate <= params.min_crossings {
            tr.fail(
                "check_zero_crossings",
                FailureKind::QaCheck,
                "Zero crossing rate too low.",
            );
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckTailParams {
    /// Length of the tail window (s)
    pub duration: f64,
    pub max_vel_ratio: f64,
    pub max_dis_ratio: f64,
}

impl Default for CheckTailParams {
    fn default() -> Self {
        Self {
            duration: 5.0,
            max_vel_ratio: 0.3,
            max_dis_ratio: 0.9,
        }
    }
}

/// Processing step: detect late transients and baseline problems via the
/// ratio of tail velocity/displacement to the record peak.
pub fn check_tail(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckTailParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let n_tail = (params.duration / tr.stats.delta) as usize;
        if n_tail == 0 || n_tail >= tr.stats.npts {
            continue;
        }

        // Velocity and displacement on scratch copies
        let mut vel = tr.clone();
        vel.integrate(
            config.integration.frequency,
            config.integration.initial,
            config.integration.demean,
        );
        let mut dis = vel.clone();
        dis.integrate(
            config.integration.frequency,
            config.integration.initial,
            config.integration.demean,
        );

        let ratio = |data: &crate::types::Waveform| {
            let total = data.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
            let tail = data
                .iter()
                .skip(data.len() - n_tail)
                .fold(0.0f64, |m, &v| m.max(v.abs()));
            if total > 0.0 {
                tail / total
            } else {
                0.0
            }
        };
        let vel_ratio = ratio(&vel.data);
        let dis_ratio = ratio(&dis.data);

        if vel_ratio > params.max_vel_ratio {
            tr.fail(
                "check_tail",
                FailureKind::QaCheck,
                &format!(
                    "max_vel_ratio_exceeded: tail velocity ratio {vel_ratio:.2} > {:.2}",
                    params.max_vel_ratio
                ),
            );
            continue;
        }
        if dis_ratio > params.max_dis_ratio {
            tr.fail(
                "check_tail",
                FailureKind::QaCheck,
                &format!(
                    "max_dis_ratio_exceeded: tail displacement ratio {dis_ratio:.2} > {:.2}",
                    params.max_dis_ratio
                ),
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{flat_trace, synthetic_record, test_event};
    use ndarray::Array1;

    #[test]
    fn test_min_sample_rate() {
        let mut st = Stream::new(vec![flat_trace("HNE", 100, 0.1, 1.0)]);
        min_sample_rate(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_check_instrument_requires_two_horizontals() {
        let mut st = Stream::new(vec![
            synthetic_record("HNE", 1000, 0.01, 3.0, 1.0),
            synthetic_record("HNZ", 1000, 0.01, 3.0, 1.0),
        ]);
        check_instrument(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
        assert_eq!(
            st.first_failure().unwrap().reason,
            "Not two horizontal components"
        );
    }

    #[test]
    fn test_check_free_field() {
        let mut tr = flat_trace("HNE", 100, 0.01, 1.0);
        tr.stats.standard.structure_type = "Building roof".to_string();
        let mut st = Stream::new(vec![tr]);
        check_free_field(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_sta_lta_flat_record_fails() {
        let mut st = Stream::new(vec![flat_trace("HNE", 5000, 0.01, 1.0)]);
        check_sta_lta(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_sta_lta_impulsive_record_passes() {
        let mut st = Stream::new(vec![synthetic_record("HNE", 12000, 0.01, 40.0, 100.0)]);
        check_sta_lta(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(st.passed(), "{:?}", st.first_failure());
    }

    #[test]
    fn test_max_amplitude_dead_channel() {
        let mut st = Stream::new(vec![flat_trace("HNE", 100, 0.01, 1.0)]);
        check_max_amplitude(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.passed());
    }

    #[test]
    fn test_zero_crossings_sets_parameter() {
        let mut st = Stream::new(vec![synthetic_record("HNE", 6000, 0.01, 5.0, 10.0)]);
        check_zero_crossings(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(st.traces[0].has_parameter("zero_crossing_rate"));
        assert!(st.passed());
    }

    #[test]
    fn test_check_tail_flags_late_transient() {
        // Late transient in the last 5 s produces a large tail velocity
        let mut tr = synthetic_record("HNE", 12000, 0.01, 10.0, 1.0);
        tr.stats.standard.units_type = crate::types::UnitsType::Acc;
        let n = tr.stats.npts;
        let mut data = tr.data.to_vec();
        for (i, v) in data.iter_mut().enumerate().skip(n - 300) {
            let t = (i - (n - 300)) as f64 * 0.01;
            *v += 50.0 * (2.0 * std::f64::consts::PI * 1.0 * t).sin();
        }
        tr.data = Array1::from(data);
        let mut st = Stream::new(vec![tr]);
        check_tail(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default()).unwrap();
        assert!(!st.passed());
        assert!(st
            .first_failure()
            .unwrap()
            .reason
            .contains("max_vel_ratio_exceeded"));
    }

    #[test]
    fn test_qa_steps_idempotent() {
        let mut st = Stream::new(vec![synthetic_record("HNE", 12000, 0.01, 40.0, 100.0)]);
        let ev = test_event();
        let null = serde_yaml::Value::Null;
        let config = Config::default();
        check_sta_lta(&mut st, &ev, &null, &config).unwrap();
        let first = st.passed();
        check_sta_lta(&mut st, &ev, &null, &config).unwrap();
        assert_eq!(first, st.passed());
    }
}
