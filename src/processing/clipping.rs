//! Clipping detection.
//!
//! The clip probability is a logistic combination of amplitude-saturation
//! and flat-run features of the horizontal components. Records whose
//! probability reaches the threshold are failed.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::types::{FailureKind, GmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckClippingParams {
    /// Clip-probability threshold at which the trace is failed
    pub threshold: f64,
}

impl Default for CheckClippingParams {
    fn default() -> Self {
        Self { threshold: 0.2 }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Clip probability of one record.
pub fn clip_probability(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 10 {
        return 0.0;
    }
    let max_abs = data.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
    if max_abs <= 0.0 {
        return 0.0;
    }

    // Fraction of samples pinned near the extreme amplitude
    let saturated = data.iter().filter(|&&v| v.abs() > 0.97 * max_abs).count();
    let sat_frac = saturated as f64 / n as f64;

    // Longest run of repeated values at high amplitude
    let mut longest_run = 0usize;
    let mut run = 0usize;
    for pair in data.windows(2) {
        if (pair[0] - pair[1]).abs() < 1e-12 * max_abs && pair[0].abs() > 0.5 * max_abs {
            run += 1;
            longest_run = longest_run.max(run);
        } else {
            run = 0;
        }
    }
    let flat_frac = longest_run as f64 / n as f64;

    sigmoid(-6.0 + 600.0 * sat_frac + 2000.0 * flat_frac)
}

/// Processing step: fail horizontal traces whose clip probability reaches
/// the threshold.
pub fn check_clipping(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CheckClippingParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if !tr.passed() || !tr.is_horizontal() {
            continue;
        }
        let probability = clip_probability(&tr.data.to_vec());
        if probability >= params.threshold {
            tr.fail(
                "check_clipping",
                FailureKind::QaCheck,
                &format!(
                    "Failed clipping check: clip probability {probability:.2} >= {:.2}",
                    params.threshold
                ),
            );
        }
    }
    Ok(())
}
