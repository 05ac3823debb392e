//! Station stream: the one-to-three traces of a single sensor instance.

use std::collections::BTreeMap;

use crate::core::trace::Trace;
use crate::types::{seconds_between, FailureKind, GmError, GmResult};

/// Allowed spread in sample counts across member traces
const NPTS_TOLERANCE: usize = 1;

/// Ordered set of traces belonging to one station/instrument/location.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pub traces: Vec<Trace>,
    parameters: BTreeMap<String, serde_json::Value>,
}

impl Stream {
    pub fn new(traces: Vec<Trace>) -> Self {
        Self {
            traces,
            parameters: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trace> {
        self.traces.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Trace> {
        self.traces.iter_mut()
    }

    /// NET.STA.INST identifier (instrument = first two channel characters)
    pub fn get_id(&self) -> String {
        format!("{}.{}", self.get_net_sta(), self.get_inst())
    }

    pub fn get_net_sta(&self) -> String {
        match self.traces.first() {
            Some(tr) => format!("{}.{}", tr.stats.network, tr.stats.station),
            None => String::new(),
        }
    }

    pub fn get_net_sta_loc(&self) -> String {
        match self.traces.first() {
            Some(tr) => format!(
                "{}.{}.{}",
                tr.stats.network, tr.stats.station, tr.stats.location
            ),
            None => String::new(),
        }
    }

    pub fn get_inst(&self) -> String {
        self.traces
            .first()
            .map(|tr| tr.stats.channel.chars().take(2).collect())
            .unwrap_or_default()
    }

    /// All member traces pass and there is at least one trace.
    pub fn passed(&self) -> bool {
        !self.traces.is_empty() && self.traces.iter().all(|tr| tr.passed())
    }

    pub fn num_horizontal(&self) -> usize {
        self.traces.iter().filter(|tr| tr.is_horizontal()).count()
    }

    /// Enforce the cross-trace consistency invariants.
    pub fn validate(&self) -> GmResult<()> {
        let first = match self.traces.first() {
            Some(tr) => tr,
            None => return Err(GmError::Data("empty stream".to_string())),
        };
        if self.traces.len() > 3 {
            return Err(GmError::Data(format!(
                "{}: more than three traces in stream",
                self.get_id()
            )));
        }

        let inst = self.get_inst();
        for tr in &self.traces {
            tr.validate()?;
            if tr.stats.network != first.stats.network
                || tr.stats.station != first.stats.station
                || tr.stats.location != first.stats.location
            {
                return Err(GmError::Data(format!(
                    "{}: inconsistent codes within stream",
                    self.get_id()
                )));
            }
            let tr_inst: String = tr.stats.channel.chars().take(2).collect();
            if tr_inst != inst {
                return Err(GmError::Data(format!(
                    "{}: inconsistent instrument codes within stream",
                    self.get_id()
                )));
            }
            if (tr.stats.delta - first.stats.delta).abs() > 1e-9 * first.stats.delta {
                return Err(GmError::Data(format!(
                    "{}: inconsistent sampling intervals within stream",
                    self.get_id()
                )));
            }
            if tr.stats.npts.abs_diff(first.stats.npts) > NPTS_TOLERANCE {
                return Err(GmError::Data(format!(
                    "{}: inconsistent sample counts within stream ({} vs {})",
                    self.get_id(),
                    tr.stats.npts,
                    first.stats.npts
                )));
            }
            let dt = seconds_between(tr.stats.start_time, first.stats.start_time).abs();
            if dt > 0.5 * first.stats.delta {
                return Err(GmError::Data(format!(
                    "{}: start times differ by more than half a sample",
                    self.get_id()
                )));
            }
        }
        Ok(())
    }

    /// Fail every trace in the stream.
    pub fn fail_all(&mut self, step: &str, kind: FailureKind, reason: &str) {
        for tr in &mut self.traces {
            tr.fail(step, kind, reason);
        }
    }

    /// Propagate a single trace failure to the whole stream.
    ///
    /// Run after each step when `check_stream.any_trace_failures` is set.
    pub fn check_stream(&mut self, step: &str) {
        let any_failed = self.traces.iter().any(|tr| !tr.passed());
        if any_failed {
            let reason = self
                .traces
                .iter()
                .find_map(|tr| tr.failure().map(|f| f.reason.clone()))
                .unwrap_or_else(|| "unknown trace failure".to_string());
            for tr in &mut self.traces {
                if tr.passed() {
                    tr.fail(
                        step,
                        FailureKind::QaCheck,
                        &format!("Stream failed: {reason}"),
                    );
                }
            }
        }
    }

    /// First failure among member traces, if any.
    pub fn first_failure(&self) -> Option<&crate::types::TraceFailure> {
        self.traces.iter().find_map(|tr| tr.failure())
    }

    pub fn set_stream_param(&mut self, key: &str, value: serde_json::Value) {
        self.parameters.insert(key.to_string(), value);
    }

    pub fn get_stream_param(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.get(key)
    }

    /// Horizontal traces, in stream order.
    pub fn horizontals(&self) -> Vec<&Trace> {
        self.traces.iter().filter(|tr| tr.is_horizontal()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::flat_trace;
    use crate::types::add_seconds;

    fn three_component() -> Stream {
        Stream::new(vec![
            flat_trace("HNE", 1000, 0.01, 1.0),
            flat_trace("HNN", 1000, 0.01, 1.0),
            flat_trace("HNZ", 1000, 0.01, 1.0),
        ])
    }

    #[test]
    fn test_valid_stream() {
        let st = three_component();
        assert!(st.validate().is_ok());
        assert_eq!(st.num_horizontal(), 2);
        assert_eq!(st.get_inst(), "HN");
        assert!(st.passed());
    }

    #[test]
    fn test_start_time_mismatch_rejected() {
        let mut st = three_component();
        let t = st.traces[1].stats.start_time;
        st.traces[1].stats.start_time = add_seconds(t, 0.02);
        assert!(st.validate().is_err());
    }

    #[test]
    fn test_sample_count_tolerance() {
        let mut st = three_component();
        st.traces[2].stats.npts = 999;
        st.traces[2].data = st.traces[2].data.slice(ndarray::s![..999]).to_owned();
        assert!(st.validate().is_ok());
        st.traces[2].stats.npts = 990;
        st.traces[2].data = st.traces[2].data.slice(ndarray::s![..990]).to_owned();
        assert!(st.validate().is_err());
    }

    #[test]
    fn test_check_stream_propagates() {
        let mut st = three_component();
        st.traces[0].fail("snr_check", FailureKind::QaCheck, "SNR too low");
        st.check_stream("snr_check");
        assert!(!st.passed());
        for tr in st.iter() {
            assert!(!tr.passed());
        }
    }

    #[test]
    fn test_check_stream_idempotent_on_passing() {
        let mut st = three_component();
        st.check_stream("snr_check");
        assert!(st.passed());
    }
}
