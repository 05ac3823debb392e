//! Shared fixtures for the end-to-end tests.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use groundmotion::core::trace::{StandardMetadata, TraceStats};
use groundmotion::core::{ScalarEvent, Stream, Trace};
use groundmotion::types::{Coordinates, ProcessLevel, UnitsType};
use ndarray::Array1;

/// M6.4 event roughly 60 km from the test station.
pub fn test_event() -> ScalarEvent {
    ScalarEvent::new(
        "ci38457511",
        Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 53).unwrap(),
        35.77,
        -117.6,
        8.0,
        6.4,
        Some("Mw"),
    )
}

pub fn station_stats(channel: &str, npts: usize, delta: f64) -> TraceStats {
    TraceStats {
        network: "CI".to_string(),
        station: "TST".to_string(),
        location: "--".to_string(),
        channel: channel.to_string(),
        start_time: Utc.with_ymd_and_hms(2019, 7, 6, 3, 20, 0).unwrap(),
        delta,
        npts,
        azimuth: match channel.chars().last() {
            Some('N') | Some('1') => 0.0,
            Some('E') | Some('2') => 90.0,
            _ => 0.0,
        },
        dip: if channel.ends_with('Z') { -90.0 } else { 0.0 },
        coordinates: Coordinates {
            latitude: 35.3,
            longitude: -117.2,
            elevation: 600.0,
        },
        standard: StandardMetadata::default(),
        format_specific: BTreeMap::new(),
        response: None,
    }
}

/// Deterministic pseudo-noise in [-0.5, 0.5].
pub fn noise_sample(i: usize) -> f64 {
    ((i as f64 * 12.9898).sin() * 43758.5453).fract()
}

/// Strong-motion record: low noise before `onset` seconds, then a decaying
/// multi-frequency wave packet. Units are cm/s^2 (acceleration).
pub fn strong_motion_trace(channel: &str, npts: usize, delta: f64, onset: f64, amp: f64) -> Trace {
    let onset_idx = (onset / delta) as usize;
    // Slight azimuthal variation so the horizontals are not identical
    let phase = if channel.ends_with('E') { 0.6 } else { 0.0 };
    let data: Vec<f64> = (0..npts)
        .map(|i| {
            let noise = 1e-3 * amp * noise_sample(i);
            if i < onset_idx {
                noise
            } else {
                let t = (i - onset_idx) as f64 * delta;
                let envelope = (t / 2.0).min(1.0) * (-t / 20.0).exp();
                let carrier = (2.0 * std::f64::consts::PI * 2.5 * t + phase).sin()
                    + 0.4 * (2.0 * std::f64::consts::PI * 0.8 * t).sin()
                    + 0.2 * (2.0 * std::f64::consts::PI * 7.0 * t + phase).cos();
                noise + amp * envelope * carrier
            }
        })
        .collect();
    let mut stats = station_stats(channel, npts, delta);
    // Record starts 20 s before the origin-time-plus-travel-time arrival
    // for a station ~60 km out, so picker and travel-time estimates agree
    stats.start_time = Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 33).unwrap();
    stats.standard.units_type = UnitsType::Acc;
    stats.standard.units = "cm/s^2".to_string();
    stats.standard.process_level = ProcessLevel::V1;
    Trace::new(stats, Array1::from(data)).unwrap()
}

/// Three-component stream: 120 s at 100 Hz, P onset 30 s in.
pub fn strong_motion_stream() -> Stream {
    Stream::new(vec![
        strong_motion_trace("HNE", 12000, 0.01, 30.0, 50.0),
        strong_motion_trace("HNN", 12000, 0.01, 30.0, 40.0),
        strong_motion_trace("HNZ", 12000, 0.01, 30.0, 30.0),
    ])
}

/// Processing program used by the pipeline scenarios: the standard chain
/// minus response removal (the synthetic records are already acceleration).
pub const SCENARIO_PROGRAM: &str = r#"
processing:
  - check_free_field:
      reject_non_free_field: true
  - check_instrument:
      n_max: 3
      n_min: 2
      require_two_horiz: true
  - min_sample_rate:
      min_sps: 20.0
  - check_sta_lta:
      sta_length: 1.0
      lta_length: 20.0
      threshold: 3.0
  - check_zero_crossings:
      min_crossings: 0.5
  - detrend:
      detrending_method: linear
  - detrend:
      detrending_method: demean
  - compute_snr:
      bandwidth: 20.0
  - snr_check:
      threshold: 1.5
      min_freq: 0.5
      max_freq: 2.0
  - get_corner_frequencies:
      method: snr
  - lowpass_max_frequency:
      fn_fac: 0.75
      lp_max: 40.0
  - cut:
      sec_before_split: 2.0
  - detrend:
      detrending_method: pre
  - taper:
      width: 0.05
      side: both
  - highpass_filter:
      frequency_domain: true
      filter_order: 5
      number_of_passes: 1
  - lowpass_filter:
      frequency_domain: true
      filter_order: 5
      number_of_passes: 1
  - detrend:
      detrending_method: baseline_sixth_order
  - check_tail:
      duration: 5.0
      max_vel_ratio: 0.7
      max_dis_ratio: 0.95
metrics:
  component_parameters:
    rotd_percentiles: [0.0, 50.0, 100.0]
"#;
