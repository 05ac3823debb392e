//! Highpass-corner refinement with Ridder's method.
//!
//! Searches for the smallest highpass corner such that the ratio of the
//! peak of a sixth-order polynomial fit of the displacement record to the
//! peak displacement stays at the target level. The search runs in log
//! frequency space; the residual is evaluated on displacement obtained by
//! double integration of the filtered acceleration.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::TraceParam;
use crate::dsp::fft::{irfft, rfft, rfft_freqs};
use crate::dsp::integrate::cumtrapz;
use crate::dsp::polyfit::{polyfit, polyval};
use crate::dsp::window::{hann_taper, TaperSide};
use crate::processing::corner_frequencies::harmonize_horizontals;
use crate::types::{FailureKind, GmResult, UnitsType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RidderFchpParams {
    /// Target ratio of polynomial-fit peak to displacement peak
    pub target: f64,
    /// Tolerance on the residual
    pub tol: f64,
    pub maxiter: usize,
    /// Upper end of the corner search range (Hz)
    pub maxfc: f64,
    /// Lower end of the corner search range (Hz)
    pub fc_init: f64,
    /// Order of the displacement polynomial fit
    pub poly_order: usize,
    /// Butterworth order of the search filter
    pub filter_order: usize,
    /// "frequency_domain", "time_domain_zero_init", or "time_domain_zero_mean"
    pub int_method: String,
    /// Impose the same refined corner on both horizontals
    pub same_horiz: bool,
}

impl Default for RidderFchpParams {
    fn default() -> Self {
        Self {
            target: 0.02,
            tol: 0.001,
            maxiter: 30,
            maxfc: 0.5,
            fc_init: 0.001,
            poly_order: 6,
            filter_order: 5,
            int_method: "frequency_domain".to_string(),
            same_horiz: true,
        }
    }
}

/// Displacement from the (filtered) acceleration spectrum.
fn displacement(
    spec: &[Complex64],
    freqs: &[f64],
    n: usize,
    dt: f64,
    int_method: &str,
) -> GmResult<Vec<f64>> {
    match int_method {
        "frequency_domain" => {
            let fdisp: Vec<Complex64> = spec
                .iter()
                .zip(freqs.iter())
                .map(|(s, &f)| {
                    if f == 0.0 {
                        Complex64::new(0.0, 0.0)
                    } else {
                        let iw = Complex64::new(0.0, 2.0 * std::f64::consts::PI * f);
                        s / (iw * iw)
                    }
                })
                .collect();
            Ok(irfft(&fdisp, n))
        }
        "time_domain_zero_init" | "time_domain_zero_mean" => {
            let acc = irfft(spec, n);
            let mut vel = cumtrapz(&acc, dt, 0.0);
            if int_method == "time_domain_zero_mean" {
                let mean = vel.iter().sum::<f64>() / vel.len().max(1) as f64;
                for v in &mut vel {
                    *v -= mean;
                }
            }
            let mut disp = cumtrapz(&vel, dt, 0.0);
            if int_method == "time_domain_zero_mean" {
                let mean = disp.iter().sum::<f64>() / disp.len().max(1) as f64;
                for v in &mut disp {
                    *v -= mean;
                }
            }
            Ok(disp)
        }
        other => Err(crate::types::GmError::Config(format!(
            "ridder_fchp: unknown int_method '{other}'"
        ))),
    }
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |m, &v| m.max(v.abs()))
}

/// Residual of the highpass criterion at corner `fc`.
fn residual(
    spec: &[Complex64],
    freqs: &[f64],
    time: &[f64],
    n: usize,
    dt: f64,
    fc: f64,
    params: &RidderFchpParams,
) -> GmResult<f64> {
    // One-pass Butterworth highpass magnitude applied in the frequency domain
    let filtered: Vec<Complex64> = spec
        .iter()
        .zip(freqs.iter())
        .map(|(s, &f)| {
            if f == 0.0 {
                Complex64::new(0.0, 0.0)
            } else {
                s / (1.0 + (fc / f).powf(2.0 * params.filter_order as f64)).sqrt()
            }
        })
        .collect();
    let disp = displacement(&filtered, freqs, n, dt, &params.int_method)?;
    let disp_max = max_abs(&disp);
    if disp_max <= 0.0 {
        return Ok(-params.target);
    }
    let coeffs = polyfit(time, &disp, params.poly_order)?;
    let fit_max = time
        .iter()
        .map(|&t| polyval(&coeffs, t).abs())
        .fold(0.0f64, f64::max);
    Ok(fit_max / disp_max - params.target)
}

/// Run the log-space Ridder search for one trace. Returns the converged
/// corner, or None when no corner in the bracket satisfies the criterion.
fn ridder_search(
    acc: &[f64],
    dt: f64,
    params: &RidderFchpParams,
) -> GmResult<Option<f64>> {
    let n = acc.len();
    let mut data = acc.to_vec();
    let mean = data.iter().sum::<f64>() / n.max(1) as f64;
    for v in &mut data {
        *v -= mean;
    }
    hann_taper(&mut data, 0.05, TaperSide::Both);

    let spec = rfft(&data, n);
    let freqs = rfft_freqs(n, dt);
    let time: Vec<f64> = (0..n).map(|i| i as f64 * dt).collect();

    let mut fc0 = params.fc_init;
    let mut fc2 = params.maxfc;
    let mut r0 = residual(&spec, &freqs, &time, n, dt, fc0, params)?;
    let mut r2 = residual(&spec, &freqs, &time, n, dt, fc2, params)?;

    if r0 < 0.0 && r2 < 0.0 {
        // Criterion already met at the lower bound
        return Ok(Some(fc0));
    }
    if r0 > 0.0 && r2 > 0.0 {
        // No bracket below maxfc
        return Ok(None);
    }

    for _ in 0..params.maxiter {
        let fc1 = (0.5 * (fc0.ln() + fc2.ln())).exp();
        let r1 = residual(&spec, &freqs, &time, n, dt, fc1, params)?;
        let denom = (r1 * r1 - r0 * r2).sqrt();
        if denom == 0.0 || !denom.is_finite() {
            return Ok(Some(fc1));
        }
        let fc3 = (fc1.ln() + (fc1.ln() - fc0.ln()) * r0.signum() * r1 / denom).exp();
        let fc3 = fc3.min(params.maxfc);
        let r3 = residual(&spec, &freqs, &time, n, dt, fc3, params)?;
        if r3.abs() <= params.tol {
            return Ok(Some(fc3));
        }
        if r1 * r3 < 0.0 {
            fc0 = fc1;
            fc2 = fc3;
            r0 = r1;
            r2 = r3;
        } else if r2.signum() != r3.signum() {
            fc0 = fc2;
            fc2 = fc3;
            r0 = r2;
            r2 = r3;
        } else {
            fc2 = fc3;
            r2 = r3;
        }
    }
    // Iterations exhausted: accept the final estimate
    Ok(Some(fc2))
}

/// Processing step: refine the highpass corner with Ridder's method.
pub fn ridder_fchp(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: RidderFchpParams = parse_args(args)?;

    let mut adjusted_horizontal = false;
    for tr in stream.iter_mut() {
        if tr.stats.standard.units_type != UnitsType::Acc {
            tr.fail(
                "ridder_fchp",
                FailureKind::MissingPrereq,
                "Unit type must be acc to apply Ridder fchp method.",
            );
            continue;
        }
        if !tr.passed() {
            continue;
        }
        let (method, initial_hp, lowpass) = match tr.get_parameter("corner_frequencies") {
            Some(TraceParam::CornerFrequencies {
                method,
                highpass,
                lowpass,
            }) => (method.clone(), *highpass, *lowpass),
            _ => {
                tr.fail(
                    "ridder_fchp",
                    FailureKind::MissingPrereq,
                    "Cannot apply Ridder fchp method because initial corner frequencies are not set.",
                );
                continue;
            }
        };
        if method == "reviewed" {
            continue;
        }

        let acc = tr.data.to_vec();
        let new_hp = match ridder_search(&acc, tr.stats.delta, &params) {
            Ok(Some(fc)) => fc,
            Ok(None) => {
                tr.fail(
                    "ridder_fchp",
                    FailureKind::Processing,
                    "auto_fchp did not find an acceptable f_hp.",
                );
                continue;
            }
            Err(err) => return Err(err),
        };

        // Reaching maxfc means the search did not converge
        if (params.maxfc - new_hp) < 1e-9 {
            tr.fail(
                "ridder_fchp",
                FailureKind::Processing,
                "auto_fchp did not find an acceptable f_hp.",
            );
            continue;
        }

        if new_hp > initial_hp {
            if tr.is_horizontal() {
                adjusted_horizontal = true;
            }
            tr.set_parameter(
                "corner_frequencies",
                TraceParam::CornerFrequencies {
                    method: "snr_polyfit".to_string(),
                    highpass: new_hp,
                    lowpass,
                },
            );
        }
    }

    if adjusted_horizontal && params.same_horiz && stream.passed() && stream.num_horizontal() > 1 {
        harmonize_horizontals(stream);
    }
    Ok(())
}
