//! Shared builders for unit tests.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use ndarray::Array1;

use crate::core::event::ScalarEvent;
use crate::core::trace::{StandardMetadata, Trace, TraceStats};
use crate::types::Coordinates;

/// M6.4 event ~60 km from the test station.
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

pub fn test_stats(channel: &str, npts: usize, delta: f64) -> TraceStats {
    TraceStats {
        network: "CI".to_string(),
        station: "TST".to_string(),
        location: "--".to_string(),
        channel: channel.to_string(),
        start_time: Utc.with_ymd_and_hms(2019, 7, 6, 3, 19, 33).unwrap(),
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

/// Constant-valued trace for structural tests.
pub fn flat_trace(channel: &str, npts: usize, delta: f64, value: f64) -> Trace {
    Trace::new(test_stats(channel, npts, delta), Array1::from(vec![value; npts])).unwrap()
}

/// Trace containing a decaying sinusoid after `onset` seconds of low noise.
pub fn synthetic_record(channel: &str, npts: usize, delta: f64, onset: f64, amp: f64) -> Trace {
    let onset_idx = (onset / delta) as usize;
    let data: Vec<f64> = (0..npts)
        .map(|i| {
            // Deterministic pseudo-noise floor
            let noise = 1e-3 * amp * ((i as f64 * 12.9898).sin() * 43758.5453).fract();
            if i < onset_idx {
                noise
            } else {
                let t = (i - onset_idx) as f64 * delta;
                let envelope = (t / 2.0).min(1.0) * (-t / 20.0).exp();
                noise + amp * envelope * (2.0 * std::f64::consts::PI * 2.5 * t).sin()
            }
        })
        .collect();
    Trace::new(test_stats(channel, npts, delta), Array1::from(data)).unwrap()
}
