//! Zero-padding steps.
//!
//! Padding covers at least `padding_factor / fhp` seconds on each side so
//! that acausal filters and integration have room to decay; it is stripped
//! symmetrically after filtering.

use serde::{Deserialize, Serialize};

use crate::config::{parse_args, Config};
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::types::{FailureKind, GmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroPadParams {
    /// Explicit pad length per side (s); overrides `padding_factor`
    pub length: Option<f64>,
    /// Pad length as a multiple of the highpass corner period
    pub padding_factor: f64,
}

impl Default for ZeroPadParams {
    fn default() -> Self {
        Self {
            length: None,
            padding_factor: 1.5,
        }
    }
}

/// Processing step: pad every passing trace with zeros on both ends.
pub fn zero_pad(
    stream: &mut Stream,
    _event: &ScalarEvent,
    args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    let params: ZeroPadParams = parse_args(args)?;

    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        let length = match params.length {
            Some(len) => len,
            None => match tr.corner_frequencies() {
                Some((hp, _)) if hp > 0.0 => params.padding_factor / hp,
                _ => {
                    tr.fail(
                        "zero_pad",
                        FailureKind::MissingPrereq,
                        "Cannot compute pad length: no highpass corner frequency set.",
                    );
                    continue;
                }
            },
        };
        tr.zero_pad(length);
    }
    Ok(())
}

/// Processing step: remove the padding added by `zero_pad`.
pub fn strip_zero_pad(
    stream: &mut Stream,
    _event: &ScalarEvent,
    _args: &serde_yaml::Value,
    _config: &Config,
) -> GmResult<()> {
    if !stream.passed() {
        return Ok(());
    }
    for tr in stream.iter_mut() {
        if !tr.passed() {
            continue;
        }
        if let Err(err) = tr.strip_zero_pad() {
            tr.fail("strip_zero_pad", FailureKind::Processing, &err.to_string());
        }
    }
    Ok(())
}
