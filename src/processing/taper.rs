//! Taper processing step.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::dsp::window::TaperSide;
use crate::types::GmResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaperParams {
    #[serde(rename = "type")]
    pub taper_type: String,
    /// Decimal fraction of the trace length tapered at one end
    pub width: f64,
    pub side: TaperSide,
}

impl Default for TaperParams {
    fn default() -> Self {
        Self {
            taper_type: "hann".to_string(),
            width: 0.05,
            side: TaperSide::Both,
        }
    }
}

/// Processing step: taper every passing trace.
pub fn taper(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: TaperParams = parse_args(args)?;
    if params.taper_type != "hann" {
        return Err(crate::types::GmError::Config(format!(
            "unsupported taper type '{}'",
            params.taper_type
        )));
    }
    for tr in stream.iter_mut() {
        if tr.passed() {
            tr.taper(params.width, params.side);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{flat_trace, test_event};

    #[test]
    fn test_taper_step() {
        let mut st = Stream::new(vec![flat_trace("HNE", 200, 0.01, 1.0)]);
        taper(&mut st, &test_event(), &serde_yaml::Value::Null, &Config::default()).unwrap();
        assert_eq!(st.traces[0].data[0], 0.0);
        assert_eq!(st.traces[0].data[100], 1.0);
        assert!(st.traces[0].has_provenance("taper"));
    }
}
