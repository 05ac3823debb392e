//! Multi-event window handling.
//!
//! When another catalog event's P arrival lands inside the signal window,
//! the record is either rejected (arrival early in the window) or trimmed
//! so that it ends just before the contaminating arrival. The scheduler
//! injects the event catalog into the step arguments.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::core::trace::TraceParam;
use crate::processing::pickers::model_travel_time;
use crate::types::{add_seconds, seconds_between, FailureKind, GmResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimMultipleEventsParams {
    /// Fraction of the signal window within which a foreign arrival
    /// rejects the record outright
    pub pct_window_reject: f64,
    /// Other catalog events (injected by the scheduler)
    pub catalog: Vec<ScalarEvent>,
}

/// Processing step: reject or trim records contaminated by other events.
pub fn trim_multiple_events(
    stream: &mut Stream,
    event: &ScalarEvent,
    args: &serde_yaml::Value,
    config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: TrimMultipleEventsParams = parse_args(args)?;
    let pct = if params.pct_window_reject > 0.0 {
        params.pct_window_reject
    } else {
        0.9
    };
    let travel_config = &config.pickers.travel_time;

    // First pass: earliest contaminating arrival across the stream
    let mut earliest: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut reject = false;
    for tr in stream.iter() {
        let split = match tr.signal_split_time() {
            Some(t) => t,
            None => continue,
        };
        let end = match tr.signal_end_time() {
            Some(t) => t,
            None => continue,
        };
        let signal_duration = seconds_between(end, split);
        if signal_duration <= 0.0 {
            continue;
        }
        let reject_horizon = add_seconds(split, pct * signal_duration);

        for other in &params.catalog {
            if other.id == event.id {
                continue;
            }
            let epi = other.epicentral_distance_km(
                tr.stats.coordinates.latitude,
                tr.stats.coordinates.longitude,
            );
            let arrival = add_seconds(
                other.time,
                model_travel_time(epi, other.depth_km, travel_config),
            );
            if arrival > split && arrival < end {
                if arrival <= reject_horizon {
                    reject = true;
                } else {
                    earliest = Some(match earliest {
                        Some(e) => e.min(arrival),
                        None => arrival,
                    });
                }
            }
        }
    }

    if reject {
        stream.fail_all(
            "trim_multiple_events",
            FailureKind::QaCheck,
            "Arrival from another event within the signal window.",
        );
        return Ok(());
    }

    if let Some(arrival) = earliest {
        // Trim just before the contaminating arrival
        let new_end = add_seconds(arrival, -1.0);
        for tr in stream.iter_mut() {
            tr.set_parameter(
                "signal_end",
                TraceParam::SignalEnd {
                    end_time: new_end,
                    method: "trim_multiple_events".to_string(),
                },
            );
            if let Err(err) = tr.trim(None, Some(new_end), false) {
                tr.fail("trim_multiple_events", FailureKind::Processing, &err.to_string());
            }
        }
    }
    Ok(())
}
