//! Signal/noise windowing: split time, signal end, window checks, and the
//! cut step. The split anchors every downstream step.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config, SignalEndConfig};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::TraceParam;
use crate::processing::pickers;
use crate::processing::spectrum::{brune_f0, moment_from_magnitude};
use crate::types::{add_seconds, FailureKind, GmResult};

/// Shaking duration (s) from magnitude: duration in minutes is half the
/// magnitude, minus the 30 s pre-event window.
pub fn duration_from_magnitude(magnitude: f64) -> f64 {
    magnitude / 2.0 * 60.0 - 30.0
}

/// Built-in 5-95% significant-duration model: source duration from the
/// Brune corner frequency plus a linear distance term.
///
/// Returns (ln of the median duration, ln-standard deviation).
fn duration_model(magnitude: f64, rrup_km: f64, stress_drop: f64) -> (f64, f64) {
    let f0 = brune_f0(moment_from_magnitude(magnitude), stress_drop, 3.7);
    let median = 1.0 / f0 + 0.15 * rrup_km;
    (median.ln(), 0.55)
}

/// Estimate the noise/signal boundary for every trace in the stream.
///
/// Candidate picks from the configured pickers that land within the
/// configured window of the travel-time estimate are combined by median.
/// With no valid candidate the stream fails.
pub fn signal_split(stream: &mut Stream, event: &ScalarEvent, config: &Config) {
    if stream.is_empty() {
        return;
    }
    let start_time = stream.traces[0].stats.start_time;

    if config.windows.no_noise {
        for tr in stream.iter_mut() {
            tr.set_parameter(
                "signal_split",
                TraceParam::SignalSplit {
                    split_time: start_time,
                    method: "no noise window".to_string(),
                    picker_type: "none".to_string(),
                },
            );
        }
        return;
    }

    let picker_config = &config.pickers;
    let travel_time = pickers::pick_travel_time(stream, event, &picker_config.travel_time);

    let mut candidates: Vec<(String, f64)> = Vec::new();
    if let Some(tt) = travel_time {
        candidates.push(("travel_time".to_string(), tt));
    }
    for method in &picker_config.methods {
        let result = match method.as_str() {
            "ar" => pickers::pick_ar(stream, &picker_config.ar).map(Some),
            "baer" => Ok(earliest_trace_pick(stream, |tr| {
                pickers::pick_baer(tr, &picker_config.baer)
            })),
            "power" => Ok(earliest_trace_pick(stream, |tr| {
                pickers::pick_power(tr, &picker_config.power)
            })),
            "kalkan" => Ok(earliest_trace_pick(stream, |tr| {
                pickers::pick_kalkan(tr, &picker_config.kalkan)
            })),
            "travel_time" => Ok(None),
            other => {
                log::warn!("Unknown picker method '{other}', skipping");
                Ok(None)
            }
        };
        match result {
            Ok(Some(loc)) if loc > 0.0 => candidates.push((method.clone(), loc)),
            Ok(_) => {}
            Err(err) => log::debug!("Picker {method} failed on {}: {err}", stream.get_id()),
        }
    }

    let combined = pickers::combine_picks(
        &candidates,
        travel_time,
        picker_config.window,
        &picker_config.combine,
    );
    let (mut split_offset, spread) = match combined {
        Some(v) => v,
        None => {
            stream.fail_all("signal_split", FailureKind::Processing, "no_valid_pick");
            return;
        }
    };

    if spread > picker_config.pick_travel_time_warning {
        let msg = format!(
            "picker candidates spread {spread:.1} s exceeds warning threshold; keeping median"
        );
        for tr in stream.iter_mut() {
            tr.warn("signal_split", &msg);
        }
    }

    // Optional user shift of the noise/signal boundary
    let shift = picker_config.p_arrival_shift;
    if split_offset + shift >= 0.0 {
        split_offset += shift;
    }

    let split_time = add_seconds(start_time, split_offset);
    for tr in stream.iter_mut() {
        tr.set_parameter(
            "signal_split",
            TraceParam::SignalSplit {
                split_time,
                method: "p_arrival".to_string(),
                picker_type: "median_combine".to_string(),
            },
        );
    }
}

fn earliest_trace_pick<F>(stream: &Stream, picker: F) -> Option<f64>
where
    F: Fn(&crate::core::trace::Trace) -> GmResult<f64>,
{
    let mut best: Option<f64> = None;
    for tr in stream.iter() {
        if let Ok(loc) = picker(tr) {
            if loc >= 0.0 {
                best = Some(match best {
                    Some(b) => b.min(loc),
                    None => loc,
                });
            }
        }
    }
    best
}

/// Estimate the end of the signal window for every trace.
pub fn signal_end(
    stream: &mut Stream,
    event: &ScalarEvent,
    end_config: &SignalEndConfig,
) {
    for tr in stream.iter_mut() {
        let split_time = match tr.signal_split_time() {
            Some(t) => t,
            None => {
                log::warn!("No signal split in trace, cannot set signal end.");
                continue;
            }
        };
        let epi_dist = event.epicentral_distance_km(
            tr.stats.coordinates.latitude,
            tr.stats.coordinates.longitude,
        );

        let end_time = match end_config.method.as_str() {
            "velocity" => {
                let dur = (epi_dist / end_config.vmin).max(end_config.floor);
                add_seconds(event.time, dur)
            }
            "model" => {
                let rrup = event.hypocentral_distance_km(
                    tr.stats.coordinates.latitude,
                    tr.stats.coordinates.longitude,
                );
                let (lnmu, lnstd) = duration_model(event.magnitude, rrup, end_config.stress_drop);
                let duration = (lnmu + end_config.epsilon * lnstd).exp();
                add_seconds(split_time, duration)
            }
            "source_path" => {
                let f0 = brune_f0(
                    moment_from_magnitude(event.magnitude),
                    end_config.stress_drop,
                    3.7,
                );
                let duration = 1.0 / f0 + end_config.dur0 + end_config.dur1 * epi_dist;
                add_seconds(split_time, duration)
            }
            "magnitude" => add_seconds(event.time, duration_from_magnitude(event.magnitude)),
            "none" => tr.end_time(),
            other => {
                log::warn!("Unknown signal_end method '{other}', using record end");
                tr.end_time()
            }
        };

        // Never beyond the end of the record
        let end_time = end_time.min(tr.end_time());
        tr.set_parameter(
            "signal_end",
            TraceParam::SignalEnd {
                end_time,
                method: end_config.method.clone(),
            },
        );
    }
}

/// Fail traces whose noise or signal windows are too short.
pub fn window_checks(
    stream: &mut Stream,
    min_noise_duration: f64,
    min_signal_duration: f64,
) {
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let split_time = match tr.signal_split_time() {
            Some(t) => t,
            None => {
                tr.fail(
                    "window_checks",
                    FailureKind::MissingPrereq,
                    "Cannot check window because no split time available.",
                );
                continue;
            }
        };
        let end_time = tr.signal_end_time().unwrap_or_else(|| tr.end_time());
        let noise_duration = crate::types::seconds_between(split_time, tr.stats.start_time);
        let signal_duration = crate::types::seconds_between(end_time, split_time);
        if noise_duration < min_noise_duration {
            tr.fail(
                "window_checks",
                FailureKind::QaCheck,
                &format!(
                    "Failed noise window duration check ({noise_duration:.2} s < {min_noise_duration:.2} s)."
                ),
            );
        }
        if signal_duration < min_signal_duration {
            tr.fail(
                "window_checks",
                FailureKind::QaCheck,
                &format!(
                    "Failed signal window duration check ({signal_duration:.2} s < {min_signal_duration:.2} s)."
                ),
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CutParams {
    /// Seconds of noise kept before the split; None leaves the start alone
    pub sec_before_split: Option<f64>,
}

impl Default for CutParams {
    fn default() -> Self {
        Self {
            sec_before_split: Some(2.0),
        }
    }
}

/// Cut step: trim every trace to the signal window.
///
/// For cross-trace consistency all traces of the stream are clipped to the
/// same window, including already-failed ones.
pub fn cut(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: CutParams = parse_args(args)?;

    for tr in stream.iter_mut() {
        let end_time = match tr.signal_end_time() {
            Some(t) => t,
            None => {
                tr.fail(
                    "cut",
                    FailureKind::MissingPrereq,
                    "Cannot cut, no signal end estimate available.",
                );
                continue;
            }
        };
        if let Err(err) = tr.trim(None, Some(end_time), false) {
            tr.fail("cut", FailureKind::Processing, &err.to_string());
            continue;
        }
        if let Some(sec_before) = params.sec_before_split {
            let split_time = match tr.signal_split_time() {
                Some(t) => t,
                None => {
                    tr.fail(
                        "cut",
                        FailureKind::MissingPrereq,
                        "Cannot cut before split, no split time available.",
                    );
                    continue;
                }
            };
            let start_time = add_seconds(split_time, -sec_before);
            if start_time < end_time {
                // A start before the record simply leaves the record start
                // untouched (degenerate no-noise records included)
                if let Err(err) = tr.trim(Some(start_time), None, false) {
                    tr.fail("cut", FailureKind::Processing, &err.to_string());
                }
            } else {
                tr.fail(
                    "cut",
                    FailureKind::Processing,
                    "The 'cut' processing step resulted in incompatible start and end times.",
                );
            }
        }
    }
    Ok(())
}
