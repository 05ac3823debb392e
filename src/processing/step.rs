//! Processing-step registry.
//!
//! Every step shares the signature
//! `fn(&mut Stream, &ScalarEvent, &args, &Config) -> GmResult<()>`.
//! A step mutates the stream in place (samples, parameters, provenance,
//! failure flags); the returned error is reserved for configuration
//! problems, which abort the run before any stream is touched.

use std::collections::BTreeMap;

use crate::config::{Config, ProcessingStepConfig};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::types::{GmError, GmResult};

pub type StepFn = fn(&mut Stream, &ScalarEvent, &serde_yaml::Value, &Config) -> GmResult<()>;

/// Name -> function table of the registered processing steps.
pub struct StepRegistry {
    steps: BTreeMap<&'static str, StepFn>,
}

impl StepRegistry {
    /// Registry with every built-in step.
    pub fn standard() -> Self {
        use crate::processing::*;

        let mut steps: BTreeMap<&'static str, StepFn> = BTreeMap::new();
        steps.insert("check_free_field", pretesting::check_free_field);
        steps.insert("check_instrument", pretesting::check_instrument);
        steps.insert("min_sample_rate", pretesting::min_sample_rate);
        steps.insert("max_traces", pretesting::max_traces);
        steps.insert("check_max_amplitude", pretesting::check_max_amplitude);
        steps.insert("check_sta_lta", pretesting::check_sta_lta);
        steps.insert("check_zero_crossings", pretesting::check_zero_crossings);
        steps.insert("check_tail", pretesting::check_tail);
        steps.insert("check_clipping", clipping::check_clipping);
        steps.insert("remove_response", instrument_response::remove_response);
        steps.insert("detrend", detrend::detrend);
        steps.insert("taper", taper::taper);
        steps.insert("cut", windows::cut);
        steps.insert("zero_pad", zero_pad::zero_pad);
        steps.insert("strip_zero_pad", zero_pad::strip_zero_pad);
        steps.insert("compute_snr", snr::compute_snr);
        steps.insert("snr_check", snr::snr_check);
        steps.insert(
            "get_corner_frequencies",
            corner_frequencies::get_corner_frequencies,
        );
        steps.insert(
            "lowpass_max_frequency",
            corner_frequencies::lowpass_max_frequency,
        );
        steps.insert("ridder_fchp", ridder_fchp::ridder_fchp);
        steps.insert("highpass_filter", filtering::highpass_filter);
        steps.insert("lowpass_filter", filtering::lowpass_filter);
        steps.insert("bandpass_filter", filtering::bandpass_filter);
        steps.insert("bandstop_filter", filtering::bandstop_filter);
        steps.insert("resample", resample_step::resample);
        steps.insert("convert_to_acceleration", convert_units::convert_to_acceleration);
        steps.insert("trim_multiple_events", trim_events::trim_multiple_events);
        Self { steps }
    }

    pub fn get(&self, name: &str) -> Option<StepFn> {
        self.steps.get(name).copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.keys().copied().collect()
    }

    /// Validate a processing program: every entry must have exactly one
    /// key and name a registered step.
    pub fn validate_program(&self, program: &[ProcessingStepConfig]) -> GmResult<()> {
        for step in program {
            let name = step.name()?;
            if self.get(name).is_none() {
                return Err(GmError::Config(format!(
                    "Processing step '{name}' is not valid."
                )));
            }
        }
        Ok(())
    }
}
