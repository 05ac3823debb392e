//! Waveform-metric engine: peak values, response spectra, RotD
//! combinations, Fourier amplitude spectra, and duration measures.

pub mod calculator;
pub mod oscillator;
pub mod reduction;
pub mod rotation;

pub use calculator::{
    collect_metrics, MetricValue, MetricsCollection, StationMetrics, StreamFailureRow,
    WaveformMetric, WaveformMetricCalculator,
};
