//! Resampling processing step (Lanczos interpolation).

use std::collections::BTreeMap;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::dsp::resample::lanczos_resample_to_rate;
use crate::types::GmResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleParams {
    pub new_sampling_rate: f64,
    /// Lanczos kernel half-width (samples)
    pub a: usize,
}

impl Default for ResampleParams {
    fn default() -> Self {
        Self {
            new_sampling_rate: 200.0,
            a: 50,
        }
    }
}

/// Processing step: resample every passing trace to a common rate.
pub fn resample(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: ResampleParams = parse_args(args)?;
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let old_rate = tr.sampling_rate();
        if (old_rate - params.new_sampling_rate).abs() < 1e-9 {
            continue;
        }
        let resampled = lanczos_resample_to_rate(
            &tr.data.to_vec(),
            old_rate,
            params.new_sampling_rate,
            params.a,
        );
        tr.data = Array1::from(resampled);
        tr.stats.npts = tr.data.len();
        tr.stats.delta = 1.0 / params.new_sampling_rate;

        let mut attrs = BTreeMap::new();
        attrs.insert("method".to_string(), json!("lanczos"));
        attrs.insert("old_sampling_rate".to_string(), json!(old_rate));
        attrs.insert(
            "new_sampling_rate".to_string(),
            json!(params.new_sampling_rate),
        );
        tr.set_provenance("resample", attrs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{synthetic_record, test_event};

    #[test]
    fn test_resample_changes_rate() {
        let mut st = Stream::new(vec![synthetic_record("HNE", 1000, 0.01, 3.0, 1.0)]);
        let args: serde_yaml::Value = serde_yaml::from_str("new_sampling_rate: 50.0").unwrap();
        resample(&mut st, &test_event(), &args, &Config::default()).unwrap();
        let tr = &st.traces[0];
        assert!((tr.sampling_rate() - 50.0).abs() < 1e-9);
        assert!(tr.has_provenance("resample"));
        // Half the rate, half the samples (plus endpoint)
        assert!((tr.stats.npts as i64 - 500).abs() <= 1);
    }
}
