//! Provenance tracking for trace mutations.
//!
//! Every mutating operation on a trace appends exactly one entry with a
//! stable identifier, so two runs over identical inputs produce identical
//! provenance logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Short codes used to build stable provenance identifiers, following the
/// seis-prov activity naming scheme.
fn activity_code(activity: &str) -> &'static str {
    match activity {
        "cut" => "ct",
        "detrend" => "dt",
        "taper" => "tp",
        "pad" => "pd",
        "lowpass_filter" => "lp",
        "highpass_filter" => "hp",
        "bandpass_filter" => "bp",
        "bandstop_filter" => "bs",
        "remove_response" => "rr",
        "integrate" => "ig",
        "differentiate" => "dv",
        "resample" => "rs",
        "calculate" => "ca",
        _ => "op",
    }
}

/// One provenance record: which activity ran, with which parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Activity name, e.g. "detrend" or "remove_response"
    pub activity: String,
    /// Stable identifier, e.g. "seis_prov:sp003_dt"
    pub prov_id: String,
    /// Wall-clock time the activity was recorded
    pub time: DateTime<Utc>,
    /// Parameters sufficient to reproduce the step
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Ordered provenance log for one trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. The sequence number in the identifier is the
    /// position in this trace's log, which is what makes it stable.
    pub fn append(&mut self, activity: &str, attributes: BTreeMap<String, serde_json::Value>) {
        let prov_id = format!(
            "seis_prov:sp{:03}_{}",
            self.entries.len() + 1,
            activity_code(activity)
        );
        self.entries.push(ProvenanceEntry {
            activity: activity.to_string(),
            prov_id,
            time: Utc::now(),
            attributes,
        });
    }

    /// All entries whose activity matches.
    pub fn select(&self, activity: &str) -> Vec<&ProvenanceEntry> {
        self.entries
            .iter()
            .filter(|e| e.activity == activity)
            .collect()
    }

    pub fn contains(&self, activity: &str) -> bool {
        self.entries.iter().any(|e| e.activity == activity)
    }

    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
