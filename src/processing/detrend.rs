//! Detrending processing step, including the pre-event-mean and
//! sixth-order-polynomial baseline corrections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::Trace;
use crate::dsp::integrate::cumtrapz;
use crate::dsp::polyfit::{polyfit, polyval};
use crate::types::{FailureKind, GmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetrendParams {
    pub detrending_method: String,
    /// Polynomial order for the "polynomial" method
    pub order: usize,
    /// Knot spacing in samples for the "spline" method
    pub dspline: usize,
}

impl Default for DetrendParams {
    fn default() -> Self {
        Self {
            detrending_method: "linear".to_string(),
            order: 3,
            dspline: 1000,
        }
    }
}

/// Processing step: remove a trend from every passing trace.
pub fn detrend(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: DetrendParams = parse_args(args)?;

    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let result = match params.detrending_method.as_str() {
            "demean" | "constant" => {
                tr.detrend_demean();
                Ok(())
            }
            "linear" => detrend_polynomial(tr, 1, "linear"),
            "simple" => detrend_simple(tr),
            "polynomial" => detrend_polynomial(tr, params.order, "polynomial"),
            "spline" => detrend_spline(tr, params.order, params.dspline),
            "pre" => detrend_pre_event_mean(tr),
            "baseline_sixth_order" => correct_baseline(tr),
            other => Err(crate::types::GmError::Config(format!(
                "unknown detrending method '{other}'"
            ))),
        };
        if let Err(err) = result {
            match err {
                crate::types::GmError::Config(_) => return Err(err),
                crate::types::GmError::MissingPrereq(msg) => {
                    tr.fail("detrend", FailureKind::MissingPrereq, &msg)
                }
                other => tr.fail("detrend", FailureKind::Processing, &other.to_string()),
            }
        }
    }
    Ok(())
}

fn provenance(tr: &mut Trace, method: &str) {
    let mut attrs = BTreeMap::new();
    attrs.insert("detrending_method".to_string(), json!(method));
    tr.set_provenance("detrend", attrs);
}

/// Least-squares polynomial removal; order 1 is the "linear" method.
fn detrend_polynomial(tr: &mut Trace, order: usize, method: &str) -> GmResult<()> {
    let x: Vec<f64> = (0..tr.stats.npts).map(|i| i as f64 * tr.stats.delta).collect();
    let y = tr.data.to_vec();
    let coeffs = polyfit(&x, &y, order)?;
    for (v, &xi) in tr.data.iter_mut().zip(x.iter()) {
        *v -= polyval(&coeffs, xi);
    }
    provenance(tr, method);
    Ok(())
}

/// Subtract the line through the first and last samples.
fn detrend_simple(tr: &mut Trace) -> GmResult<()> {
    let n = tr.stats.npts;
    if n < 2 {
        return Ok(());
    }
    let first = tr.data[0];
    let last = tr.data[n - 1];
    let slope = (last - first) / (n - 1) as f64;
    for (i, v) in tr.data.iter_mut().enumerate() {
        *v -= first + slope * i as f64;
    }
    provenance(tr, "simple");
    Ok(())
}

/// Spline-style detrend: a polynomial fitted to knots every `dspline`
/// samples.
fn detrend_spline(tr: &mut Trace, order: usize, dspline: usize) -> GmResult<()> {
    let step = dspline.max(1);
    let xs: Vec<f64> = (0..tr.stats.npts)
        .step_by(step)
        .map(|i| i as f64 * tr.stats.delta)
        .collect();
    let ys: Vec<f64> = (0..tr.stats.npts)
        .step_by(step)
        .map(|i| tr.data[i])
        .collect();
    let order = order.min(xs.len().saturating_sub(1)).max(1);
    let coeffs = polyfit(&xs, &ys, order)?;
    let dt = tr.stats.delta;
    for (i, v) in tr.data.iter_mut().enumerate() {
        *v -= polyval(&coeffs, i as f64 * dt);
    }
    provenance(tr, "spline");
    Ok(())
}

/// Subtract the mean of the pre-event noise window from the whole trace.
fn detrend_pre_event_mean(tr: &mut Trace) -> GmResult<()> {
    let split_time = tr.signal_split_time().ok_or_else(|| {
        crate::types::GmError::MissingPrereq(
            "Cannot detrend using pre-event window: no split time available.".to_string(),
        )
    })?;
    let split_idx = tr.index_of(split_time);
    let noise_mean = if split_idx > 0 {
        tr.data.iter().take(split_idx).sum::<f64>() / split_idx as f64
    } else {
        0.0
    };
    tr.data.mapv_inplace(|v| v - noise_mean);
    provenance(tr, "pre");
    Ok(())
}

/// Sixth-order-polynomial baseline correction.
///
/// Integrate acceleration to displacement (cumulative trapezoid), fit a
/// sixth-order polynomial, zero its constant and linear terms, and subtract
/// the second derivative of the remaining polynomial from the acceleration.
pub fn correct_baseline(tr: &mut Trace) -> GmResult<()> {
    let dt = tr.stats.delta;
    let acc = tr.data.to_vec();
    let vel = cumtrapz(&acc, dt, 0.0);
    let disp = cumtrapz(&vel, dt, 0.0);

    let time: Vec<f64> = (0..disp.len()).map(|i| i as f64 * dt).collect();
    let mut coeffs = polyfit(&time, &disp, 6)?;
    // Zero the constant and linear terms so the correction cannot move the
    // record as a whole
    coeffs[0] = 0.0;
    coeffs[1] = 0.0;

    // Second derivative of the fit polynomial
    let mut d2: Vec<f64> = vec![0.0; coeffs.len().saturating_sub(2)];
    for (k, c) in coeffs.iter().enumerate().skip(2) {
        d2[k - 2] = (k * (k - 1)) as f64 * c;
    }

    for (v, &t) in tr.data.iter_mut().zip(time.iter()) {
        *v -= polyval(&d2, t);
    }
    provenance(tr, "baseline_sixth_order");
    Ok(())
}
