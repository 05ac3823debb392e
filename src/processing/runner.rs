//! Pipeline scheduler.
//!
//! Runs the configured processing program against every stream of a
//! collection. Streams are independent and processed in parallel on a
//! rayon pool; within a stream, steps run strictly in program order so the
//! provenance log reflects the program. Cancellation is cooperative at
//! step boundaries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::config::Config;
use crate::core::collection::StreamCollection;
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::processing::step::StepRegistry;
use crate::processing::windows;
use crate::types::{GmError, GmResult, ProcessLevel};

/// Options for one processing run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Tectonic region used to select signal-end overrides
    pub region: Option<String>,
    /// Catalog of other events for `trim_multiple_events`
    pub catalog: Vec<ScalarEvent>,
}

/// Counters reduced across workers at the end of a run.
#[derive(Debug, Default)]
pub struct ProcessingSummary {
    pub streams_processed: usize,
    pub streams_passed: usize,
    pub streams_failed: usize,
    pub steps_executed: usize,
}

/// Run the full processing program over the collection.
///
/// Configuration errors (unknown step names, malformed entries, invalid
/// argument types) surface before any stream is touched; everything else is
/// recorded on the traces.
pub fn process_streams(
    collection: &mut StreamCollection,
    event: &ScalarEvent,
    config: &Config,
) -> GmResult<ProcessingSummary> {
    process_streams_with_options(collection, event, config, &ProcessOptions::default(), None)
}

/// Full-control variant of [`process_streams`].
pub fn process_streams_with_options(
    collection: &mut StreamCollection,
    event: &ScalarEvent,
    config: &Config,
    options: &ProcessOptions,
    cancel: Option<&AtomicBool>,
) -> GmResult<ProcessingSummary> {
    let registry = StepRegistry::standard();
    registry.validate_program(&config.processing)?;

    // Resolve step functions and args up front so configuration errors are
    // fatal before work starts; the catalog is injected into
    // trim_multiple_events here.
    let mut program: Vec<(String, crate::processing::step::StepFn, serde_yaml::Value)> =
        Vec::new();
    for step in &config.processing {
        let name = step.name()?.to_string();
        let step_fn = registry
            .get(&name)
            .ok_or_else(|| GmError::Config(format!("Processing step '{name}' is not valid.")))?;
        let mut args = step.args().clone();
        if name == "trim_multiple_events" && !options.catalog.is_empty() {
            let catalog_value = serde_yaml::to_value(&options.catalog)
                .map_err(|e| GmError::Serialization(e.to_string()))?;
            if let serde_yaml::Value::Mapping(map) = &mut args {
                map.insert(serde_yaml::Value::String("catalog".to_string()), catalog_value);
            } else {
                let mut map = serde_yaml::Mapping::new();
                map.insert(serde_yaml::Value::String("catalog".to_string()), catalog_value);
                args = serde_yaml::Value::Mapping(map);
            }
        }
        program.push((name, step_fn, args));
    }

    let signal_end_config = config.signal_end_for_region(options.region.as_deref());
    let any_trace_failures = config.check_stream.any_trace_failures;

    let steps_counter = AtomicUsize::new(0);
    let first_error = std::sync::Mutex::new(None::<GmError>);

    collection
        .streams
        .par_iter_mut()
        .for_each(|stream| {
            log::debug!("Checking stream {}...", stream.get_id());

            // Windowing pre-pass
            if !cancelled(cancel) {
                windows::signal_split(stream, event, config);
                windows::signal_end(stream, event, signal_end_config);
                if config.windows.window_checks.enabled {
                    windows::window_checks(
                        stream,
                        config.windows.window_checks.min_noise_duration,
                        config.windows.window_checks.min_signal_duration,
                    );
                }
                if any_trace_failures {
                    stream.check_stream("window_checks");
                }
            }

            // Program execution, strictly in order
            for (name, step_fn, args) in &program {
                if cancelled(cancel) {
                    log::info!("Processing cancelled at step '{name}'");
                    break;
                }
                log::debug!("Processing step: {name}");
                if let Err(err) = step_fn(stream, event, args, config) {
                    let mut slot = first_error.lock().unwrap_or_else(|e| e.into_inner());
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                    break;
                }
                steps_counter.fetch_add(1, Ordering::Relaxed);
                if any_trace_failures {
                    stream.check_stream(name);
                }
            }
        });

    if let Some(err) = first_error.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }

    // Colocated selection runs over the processed collection
    collection.select_colocated(&config.colocated);

    // Mark completed traces
    for stream in collection.iter_mut() {
        if stream.passed() {
            for tr in stream.iter_mut() {
                tr.stats.standard.process_level = ProcessLevel::V2;
            }
        }
    }

    let summary = ProcessingSummary {
        streams_processed: collection.len(),
        streams_passed: collection.n_passed(),
        streams_failed: collection.n_failed(),
        steps_executed: steps_counter.into_inner(),
    };
    log::info!(
        "Finished processing streams: {}/{} passed.",
        summary.streams_passed,
        summary.streams_processed
    );
    Ok(summary)
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
}

/// Run the program against a single stream (sequential helper used by
/// tests and by callers that manage their own parallelism).
pub fn process_stream(
    stream: &mut Stream,
    event: &ScalarEvent,
    config: &Config,
) -> GmResult<()> {
    let mut collection = StreamCollection::new(vec![std::mem::take(stream)]);
    process_streams(&mut collection, event, config)?;
    *stream = collection.streams.remove(0);
    Ok(())
}
