//! Single-channel waveform container.
//!
//! A `Trace` owns its samples, a typed parameter map filled in by processing
//! steps, a cache of derived arrays (spectra, noise windows), and the
//! provenance log. All mutating operations adjust the metadata consistently
//! and append a provenance entry.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::provenance::{ProvenanceEntry, ProvenanceLog};
use crate::dsp;
use crate::dsp::window::TaperSide;
use crate::types::{
    add_seconds, seconds_between, Coordinates, FailureKind, GmError, GmResult,
    InstrumentResponse, InstrumentType, ProcessLevel, TraceFailure, UnitsType, Waveform,
};

/// Standard (format-independent) metadata carried by every trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardMetadata {
    /// Physical units string, e.g. "counts" or "cm/s^2"
    pub units: String,
    pub units_type: UnitsType,
    pub process_level: ProcessLevel,
    /// Source data format, e.g. "cosmos", "mseed"
    pub source_format: String,
    /// Instrument description
    pub instrument: String,
    /// Siting description used by the free-field check
    pub structure_type: String,
}

impl Default for StandardMetadata {
    fn default() -> Self {
        Self {
            units: "counts".to_string(),
            units_type: UnitsType::Counts,
            process_level: ProcessLevel::V0,
            source_format: "unknown".to_string(),
            instrument: String::new(),
            structure_type: String::new(),
        }
    }
}

/// Per-channel metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStats {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start_time: DateTime<Utc>,
    /// Sampling interval (s)
    pub delta: f64,
    pub npts: usize,
    /// Sensor azimuth clockwise from north (deg)
    pub azimuth: f64,
    /// Sensor dip from horizontal (deg, -90 = up)
    pub dip: f64,
    pub coordinates: Coordinates,
    pub standard: StandardMetadata,
    /// Opaque format-specific key/value metadata
    #[serde(default)]
    pub format_specific: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub response: Option<InstrumentResponse>,
}

impl TraceStats {
    pub fn sampling_rate(&self) -> f64 {
        1.0 / self.delta
    }
}

/// Typed per-trace parameter set by processing steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceParam {
    SignalSplit {
        split_time: DateTime<Utc>,
        method: String,
        picker_type: String,
    },
    SignalEnd {
        end_time: DateTime<Utc>,
        method: String,
    },
    CornerFrequencies {
        method: String,
        highpass: f64,
        lowpass: f64,
    },
    SnrConf {
        threshold: f64,
        min_freq: f64,
        max_freq: f64,
    },
    Snr {
        snr: Vec<f64>,
        freq: Vec<f64>,
    },
    ZeroCrossingRate {
        crossing_rate: f64,
    },
    Review {
        accepted: Option<bool>,
        corner_highpass: Option<f64>,
        corner_lowpass: Option<f64>,
    },
    Value(serde_json::Value),
}

/// Cached array, optionally with a frequency axis. Never persisted.
#[derive(Debug, Clone)]
pub struct CachedArray {
    pub values: Vec<f64>,
    pub freqs: Vec<f64>,
}

/// One channel of evenly sampled ground motion.
#[derive(Debug, Clone)]
pub struct Trace {
    pub stats: TraceStats,
    pub data: Waveform,
    params: HashMap<String, TraceParam>,
    cached: HashMap<String, CachedArray>,
    provenance: ProvenanceLog,
    failure: Option<TraceFailure>,
    warnings: Vec<String>,
}

impl Trace {
    pub fn new(stats: TraceStats, data: Waveform) -> GmResult<Self> {
        let trace = Self {
            stats,
            data,
            params: HashMap::new(),
            cached: HashMap::new(),
            provenance: ProvenanceLog::new(),
            failure: None,
            warnings: Vec::new(),
        };
        trace.validate()?;
        Ok(trace)
    }

    /// Enforce the container invariants.
    pub fn validate(&self) -> GmResult<()> {
        if self.stats.npts == 0 {
            return Err(GmError::Data(format!("{}: zero-length trace", self.id())));
        }
        if self.data.len() != self.stats.npts {
            return Err(GmError::Data(format!(
                "{}: sample count {} disagrees with npts {}",
                self.id(),
                self.data.len(),
                self.stats.npts
            )));
        }
        if self.stats.delta <= 0.0 {
            return Err(GmError::Data(format!(
                "{}: non-positive sampling interval",
                self.id()
            )));
        }
        Ok(())
    }

    /// SEED-style identifier NET.STA.LOC.CHA
    pub fn id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.stats.network, self.stats.station, self.stats.location, self.stats.channel
        )
    }

    pub fn sampling_rate(&self) -> f64 {
        self.stats.sampling_rate()
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        add_seconds(
            self.stats.start_time,
            (self.stats.npts.saturating_sub(1)) as f64 * self.stats.delta,
        )
    }

    /// Record duration (s)
    pub fn duration(&self) -> f64 {
        (self.stats.npts.saturating_sub(1)) as f64 * self.stats.delta
    }

    /// Sample index of an instant, clamped into the record
    pub fn index_of(&self, t: DateTime<Utc>) -> usize {
        let offset = seconds_between(t, self.stats.start_time) / self.stats.delta;
        let idx = offset.round();
        if idx < 0.0 {
            0
        } else {
            (idx as usize).min(self.stats.npts - 1)
        }
    }

    /// True when channel orientation is horizontal
    pub fn is_horizontal(&self) -> bool {
        !self.stats.channel.to_lowercase().contains('z')
    }

    /// Instrument category from the second channel-code character
    pub fn instrument_type(&self) -> InstrumentType {
        match self.stats.channel.chars().nth(1) {
            Some('N') => InstrumentType::Accelerometer,
            Some('H') | Some('L') => InstrumentType::Seismometer,
            _ => InstrumentType::Unsupported,
        }
    }

    /// Free-field siting check against structure-type keywords
    pub fn free_field(&self) -> bool {
        let stype = self.stats.standard.structure_type.to_lowercase();
        const NON_FREE: [&str; 11] = [
            "building", "bridge", "dam", "borehole", "hole", "crest", "toe", "foundation",
            "body", "roof", "floor",
        ];
        !NON_FREE.iter().any(|k| stype.contains(k))
    }

    // ----------------------------------------------------------------
    // Failure tracking

    /// Mark the trace failed. Only the first failure is kept; a trace
    /// accepted by manual review cannot be failed.
    pub fn fail(&mut self, step: &str, kind: FailureKind, reason: &str) {
        if let Some(TraceParam::Review {
            accepted: Some(true),
            ..
        }) = self.params.get("review")
        {
            return;
        }
        if self.failure.is_none() {
            log::info!("Failure: {} - {} - {}", step, self.id(), reason);
            self.failure = Some(TraceFailure {
                step: step.to_string(),
                kind,
                reason: reason.to_string(),
            });
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&TraceFailure> {
        self.failure.as_ref()
    }

    pub fn warn(&mut self, step: &str, reason: &str) {
        log::info!("Warning: {} - {} - {}", step, self.id(), reason);
        self.warnings.push(format!("{step}: {reason}"));
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    // ----------------------------------------------------------------
    // Parameters and cache

    pub fn set_parameter(&mut self, key: &str, value: TraceParam) {
        self.params.insert(key.to_string(), value);
    }

    pub fn get_parameter(&self, key: &str) -> Option<&TraceParam> {
        self.params.get(key)
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn parameter_keys(&self) -> Vec<&str> {
        self.params.keys().map(|k| k.as_str()).collect()
    }

    /// Split time set by the windowing engine
    pub fn signal_split_time(&self) -> Option<DateTime<Utc>> {
        match self.params.get("signal_split") {
            Some(TraceParam::SignalSplit { split_time, .. }) => Some(*split_time),
            _ => None,
        }
    }

    /// Signal end time set by the windowing engine
    pub fn signal_end_time(&self) -> Option<DateTime<Utc>> {
        match self.params.get("signal_end") {
            Some(TraceParam::SignalEnd { end_time, .. }) => Some(*end_time),
            _ => None,
        }
    }

    /// Corner frequencies (highpass, lowpass) if selected
    pub fn corner_frequencies(&self) -> Option<(f64, f64)> {
        match self.params.get("corner_frequencies") {
            Some(TraceParam::CornerFrequencies {
                highpass, lowpass, ..
            }) => Some((*highpass, *lowpass)),
            _ => None,
        }
    }

    pub fn set_cached(&mut self, key: &str, array: CachedArray) {
        self.cached.insert(key.to_string(), array);
    }

    pub fn get_cached(&self, key: &str) -> Option<&CachedArray> {
        self.cached.get(key)
    }

    pub fn has_cached(&self, key: &str) -> bool {
        self.cached.contains_key(key)
    }

    // ----------------------------------------------------------------
    // Provenance

    pub fn set_provenance(&mut self, activity: &str, attributes: BTreeMap<String, serde_json::Value>) {
        self.provenance.append(activity, attributes);
    }

    pub fn get_provenance(&self, activity: &str) -> Vec<&ProvenanceEntry> {
        self.provenance.select(activity)
    }

    pub fn has_provenance(&self, activity: &str) -> bool {
        self.provenance.contains(activity)
    }

    pub fn provenance(&self) -> &ProvenanceLog {
        &self.provenance
    }

    // ----------------------------------------------------------------
    // Mutating operations

    /// Subtract the mean; records the removed value.
    pub fn detrend_demean(&mut self) {
        let mean = self.data.mean().unwrap_or(0.0);
        self.data.mapv_inplace(|v| v - mean);
        let mut attrs = BTreeMap::new();
        attrs.insert("detrending_method".to_string(), json!("demean"));
        attrs.insert("value".to_string(), json!(mean));
        self.set_provenance("detrend", attrs);
    }

    /// Trim to [start, end] (either bound optional), nearest sample.
    pub fn trim(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        suppress_provenance: bool,
    ) -> GmResult<()> {
        let i0 = match start {
            Some(t) => {
                let off = seconds_between(t, self.stats.start_time) / self.stats.delta;
                off.round().max(0.0) as usize
            }
            None => 0,
        };
        let i1 = match end {
            Some(t) => {
                let off = seconds_between(t, self.stats.start_time) / self.stats.delta;
                let idx = off.round();
                if idx < 0.0 {
                    return Err(GmError::Processing(format!(
                        "{}: trim end before record start",
                        self.id()
                    )));
                }
                (idx as usize).min(self.stats.npts - 1)
            }
            None => self.stats.npts - 1,
        };
        if i1 < i0 || i0 >= self.stats.npts {
            return Err(GmError::Processing(format!(
                "{}: trim produced an empty window",
                self.id()
            )));
        }

        let new_data: Vec<f64> = self.data.iter().skip(i0).take(i1 - i0 + 1).cloned().collect();
        self.data = Array1::from(new_data);
        self.stats.start_time = add_seconds(self.stats.start_time, i0 as f64 * self.stats.delta);
        self.stats.npts = self.data.len();

        if !suppress_provenance {
            let mut attrs = BTreeMap::new();
            attrs.insert(
                "new_start_time".to_string(),
                json!(self.stats.start_time.to_rfc3339()),
            );
            attrs.insert(
                "new_end_time".to_string(),
                json!(self.end_time().to_rfc3339()),
            );
            self.set_provenance("cut", attrs);
        }
        Ok(())
    }

    /// Zero pad both ends with `length` seconds each.
    pub fn zero_pad(&mut self, length: f64) {
        let npad = (length / self.stats.delta).round() as usize;
        if npad == 0 {
            return;
        }
        let old_start = self.stats.start_time;
        let old_end = self.end_time();

        let mut padded = vec![0.0f64; npad];
        padded.extend(self.data.iter());
        padded.extend(std::iter::repeat(0.0).take(npad));
        self.data = Array1::from(padded);
        self.stats.start_time = add_seconds(old_start, -(npad as f64) * self.stats.delta);
        self.stats.npts = self.data.len();

        let mut attrs = BTreeMap::new();
        attrs.insert("fill_value".to_string(), json!(0.0));
        attrs.insert(
            "new_start_time".to_string(),
            json!(self.stats.start_time.to_rfc3339()),
        );
        attrs.insert("new_end_time".to_string(), json!(self.end_time().to_rfc3339()));
        attrs.insert("old_start_time".to_string(), json!(old_start.to_rfc3339()));
        attrs.insert("old_end_time".to_string(), json!(old_end.to_rfc3339()));
        self.set_provenance("pad", attrs);
    }

    /// Remove the padding added by [`zero_pad`].
    pub fn strip_zero_pad(&mut self) -> GmResult<()> {
        let window = {
            let pads = self.get_provenance("pad");
            match pads.last() {
                Some(entry) => {
                    let parse = |key: &str| {
                        entry
                            .attributes
                            .get(key)
                            .and_then(|v| v.as_str())
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|t| t.with_timezone(&Utc))
                    };
                    Some((parse("old_start_time"), parse("old_end_time")))
                }
                None => None,
            }
        };
        match window {
            None => Ok(()),
            Some((Some(old_start), Some(old_end))) => {
                self.trim(Some(old_start), Some(old_end), false)
            }
            Some(_) => Err(GmError::Processing(format!(
                "{}: pad provenance entry is missing the original window",
                self.id()
            ))),
        }
    }

    /// Hann taper with fractional width per side.
    pub fn taper(&mut self, width: f64, side: TaperSide) {
        if let Some(slice) = self.data.as_slice_mut() {
            dsp::window::hann_taper(slice, width, side);
        }
        let mut attrs = BTreeMap::new();
        attrs.insert("max_percentage".to_string(), json!(width));
        attrs.insert("type".to_string(), json!("hann"));
        attrs.insert("side".to_string(), json!(format!("{side:?}").to_lowercase()));
        self.set_provenance("taper", attrs);
    }

    /// Integrate once (acc -> vel -> disp).
    pub fn integrate(&mut self, frequency: bool, initial: f64, demean: bool) {
        if demean {
            self.detrend_demean();
        }
        let dt = self.stats.delta;
        let slice = self.data.to_vec();
        let (method, result) = if frequency {
            (
                "frequency domain",
                dsp::integrate::integrate_frequency(&slice, dt, initial),
            )
        } else {
            ("time domain", dsp::integrate::cumtrapz(&slice, dt, initial))
        };
        self.data = Array1::from(result);
        self.stats.npts = self.data.len();

        let input_units = self.stats.standard.units.clone();
        self.shift_units(-1);
        let mut attrs = BTreeMap::new();
        attrs.insert("integration_method".to_string(), json!(method));
        attrs.insert("input_units".to_string(), json!(input_units));
        attrs.insert("output_units".to_string(), json!(self.stats.standard.units));
        self.set_provenance("integrate", attrs);
    }

    /// Differentiate once (disp -> vel -> acc).
    pub fn differentiate(&mut self, frequency: bool) {
        let dt = self.stats.delta;
        let slice = self.data.to_vec();
        let (method, result) = if frequency {
            (
                "frequency",
                dsp::integrate::differentiate_frequency(&slice, dt),
            )
        } else {
            ("gradient", dsp::integrate::differentiate_gradient(&slice, dt))
        };
        self.data = Array1::from(result);
        self.stats.npts = self.data.len();

        let input_units = self.stats.standard.units.clone();
        self.shift_units(1);
        let mut attrs = BTreeMap::new();
        attrs.insert("differentiation_method".to_string(), json!(method));
        attrs.insert("input_units".to_string(), json!(input_units));
        attrs.insert("output_units".to_string(), json!(self.stats.standard.units));
        self.set_provenance("differentiate", attrs);
    }

    /// Move the units one step along counts/disp <-> vel <-> acc.
    /// `direction` +1 differentiates, -1 integrates.
    fn shift_units(&mut self, direction: i32) {
        let (units_type, units) = match (self.stats.standard.units_type, direction) {
            (UnitsType::Acc, -1) => (UnitsType::Vel, "cm/s"),
            (UnitsType::Vel, -1) => (UnitsType::Disp, "cm"),
            (UnitsType::Disp, 1) => (UnitsType::Vel, "cm/s"),
            (UnitsType::Vel, 1) => (UnitsType::Acc, "cm/s^2"),
            (other, _) => (other, self.stats.standard.units.as_str()),
        };
        let units = units.to_string();
        self.stats.standard.units_type = units_type;
        self.stats.standard.units = units;
    }

    /// All samples finite?
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Maximum absolute amplitude
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |m, &v| m.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::test_stats;
    use ndarray::Array1;

    fn make_trace(npts: usize) -> Trace {
        Trace::new(
            test_stats("HNE", npts, 0.01),
            Array1::from(vec![1.0; npts]),
        )
        .unwrap()
    }

    #[test]
    fn test_validation() {
        let stats = test_stats("HNE", 10, 0.01);
        assert!(Trace::new(stats.clone(), Array1::from(vec![0.0; 5])).is_err());
        let mut bad = stats.clone();
        bad.delta = 0.0;
        assert!(Trace::new(bad, Array1::from(vec![0.0; 10])).is_err());
        assert!(Trace::new(stats, Array1::from(vec![0.0; 10])).is_ok());
    }

    #[test]
    fn test_first_failure_wins() {
        let mut tr = make_trace(10);
        tr.fail("check_a", FailureKind::QaCheck, "first");
        tr.fail("check_b", FailureKind::QaCheck, "second");
        assert_eq!(tr.failure().unwrap().reason, "first");
        assert!(!tr.passed());
    }

    #[test]
    fn test_trim_adjusts_metadata() {
        let mut tr = make_trace(1000);
        let t0 = tr.stats.start_time;
        let new_start = add_seconds(t0, 1.0);
        let new_end = add_seconds(t0, 5.0);
        tr.trim(Some(new_start), Some(new_end), false).unwrap();
        assert_eq!(tr.stats.npts, 401);
        assert_eq!(tr.stats.start_time, new_start);
        assert!(tr.has_provenance("cut"));
    }

    #[test]
    fn test_zero_pad_round_trip() {
        let mut tr = make_trace(500);
        let orig_start = tr.stats.start_time;
        tr.zero_pad(2.0);
        assert_eq!(tr.stats.npts, 900);
        assert_eq!(tr.data[0], 0.0);
        tr.strip_zero_pad().unwrap();
        assert_eq!(tr.stats.npts, 500);
        assert_eq!(tr.stats.start_time, orig_start);
        assert_eq!(tr.data[0], 1.0);
    }

    #[test]
    fn test_units_shift() {
        let mut tr = make_trace(100);
        tr.stats.standard.units_type = UnitsType::Acc;
        tr.stats.standard.units = "cm/s^2".to_string();
        tr.integrate(false, 0.0, false);
        assert_eq!(tr.stats.standard.units_type, UnitsType::Vel);
        tr.integrate(false, 0.0, false);
        assert_eq!(tr.stats.standard.units_type, UnitsType::Disp);
        tr.differentiate(true);
        assert_eq!(tr.stats.standard.units_type, UnitsType::Vel);
    }

    #[test]
    fn test_instrument_type() {
        let tr = make_trace(10);
        assert_eq!(tr.instrument_type(), InstrumentType::Accelerometer);
        let tr2 = Trace::new(test_stats("HHZ", 10, 0.01), Array1::from(vec![0.0; 10])).unwrap();
        assert_eq!(tr2.instrument_type(), InstrumentType::Seismometer);
        assert!(!tr2.is_horizontal());
    }

    #[test]
    fn test_free_field() {
        let mut tr = make_trace(10);
        assert!(tr.free_field());
        tr.stats.standard.structure_type = "Building".to_string();
        assert!(!tr.free_field());
    }
}
