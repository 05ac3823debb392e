//! groundmotion: a fast, modular ground-motion record processor
//!
//! This library turns raw seismometer and accelerometer recordings of
//! earthquakes into quality-controlled, filtered, instrument-corrected
//! ground-motion time series and derived intensity metrics.
//!
//! The engine is organized around five subsystems:
//! - a configurable processing pipeline scheduler ([`processing::runner`])
//! - a signal/noise windowing engine ([`processing::windows`])
//! - corner-frequency selection and Butterworth filtering
//!   ([`processing::corner_frequencies`], [`processing::filtering`])
//! - instrument-response removal ([`processing::instrument_response`])
//! - a waveform-metric engine ([`metrics`])

pub mod config;
pub mod core;
pub mod dsp;
pub mod io;
pub mod metrics;
pub mod processing;
pub mod types;

// Re-export the main types and entry points for easier access
pub use config::Config;
pub use core::{ScalarEvent, Stream, StreamCollection, Trace};
pub use io::{GroundMotionPacket, MemoryWorkspace, Workspace};
pub use metrics::{collect_metrics, MetricsCollection, WaveformMetricCalculator};
pub use processing::{process_streams, process_streams_with_options, ProcessOptions};
pub use types::{GmError, GmResult};
