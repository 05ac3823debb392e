//! Unit conversion step.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::dsp::window::TaperSide;
use crate::types::{GmResult, UnitsType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertToAccelerationParams {
    pub taper: bool,
    pub taper_width: f64,
    pub taper_side: TaperSide,
}

impl Default for ConvertToAccelerationParams {
    fn default() -> Self {
        Self {
            taper: true,
            taper_width: 0.05,
            taper_side: TaperSide::Both,
        }
    }
}

/// Processing step: differentiate velocity records to acceleration.
/// Acceleration streams pass through untouched.
pub fn convert_to_acceleration(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: ConvertToAccelerationParams = parse_args(args)?;
    let current = stream
        .traces
        .first()
        .map(|tr| tr.stats.standard.units_type);
    if current == Some(UnitsType::Acc) {
        return Ok(());
    }
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        if params.taper {
            tr.taper(params.taper_width, params.taper_side);
        }
        tr.differentiate(config.differentiation.frequency);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{flat_trace, test_event};

    #[test]
    fn test_velocity_converted() {
        let mut tr = flat_trace("HNE", 1000, 0.01, 1.0);
        tr.stats.standard.units_type = UnitsType::Vel;
        tr.stats.standard.units = "cm/s".to_string();
        let mut st = Stream::new(vec![tr]);
        convert_to_acceleration(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert_eq!(st.traces[0].stats.standard.units_type, UnitsType::Acc);
        assert!(st.traces[0].has_provenance("differentiate"));
    }

    #[test]
    fn test_acceleration_untouched() {
        let mut tr = flat_trace("HNE", 1000, 0.01, 1.0);
        tr.stats.standard.units_type = UnitsType::Acc;
        let mut st = Stream::new(vec![tr]);
        convert_to_acceleration(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default())
            .unwrap();
        assert!(!st.traces[0].has_provenance("differentiate"));
    }
}
