//! Waveform-metric calculator.
//!
//! Consumes processed streams (acceleration, cm/s^2) and produces one
//! metric row per (metric type, component), each tagged with the parameter
//! dictionary that identifies it. Failed streams contribute a diagnostic
//! failure row instead of metric rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Config, IntegrationConfig, MetricsConfig};
use crate::core::collection::StreamCollection;
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::dsp::integrate::{cumtrapz, integrate_frequency};
use crate::dsp::resample::lanczos_upsample;
use crate::metrics::oscillator::peak_pseudo_acceleration;
use crate::metrics::reduction::{
    arias_intensity, cav, fourier_amplitude_spectrum, significant_duration, sorted_duration,
};
use crate::metrics::rotation::{percentile, rotate_combine};
use crate::types::{FailureKind, GmResult, G_CM_S2};

/// Scalar value or a spectral curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Spectrum {
        frequencies: Vec<f64>,
        values: Vec<f64>,
    },
}

/// One computed metric with the parameters that identify it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformMetric {
    /// Metric type, e.g. "PGA", "SA", "Duration"
    pub metric_type: String,
    /// Component specification, e.g. "HNE", "rotd50", "geometric_mean"
    pub component: String,
    pub value: MetricValue,
    pub units: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// All metrics of one station stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationMetrics {
    pub station_id: String,
    pub event_id: String,
    pub metrics: Vec<WaveformMetric>,
}

/// Diagnostic row for a failed stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFailureRow {
    pub stream_id: String,
    pub step: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Per-event metric output: station rows plus the failure table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsCollection {
    pub stations: Vec<StationMetrics>,
    pub failures: Vec<StreamFailureRow>,
}

/// Compute the configured metrics for every passing stream.
pub fn collect_metrics(
    collection: &StreamCollection,
    event: &ScalarEvent,
    config: &Config,
) -> GmResult<MetricsCollection> {
    let calculator = WaveformMetricCalculator::new(config);
    let mut output = MetricsCollection::default();
    for stream in collection.iter() {
        if stream.passed() {
            output.stations.push(calculator.run(stream, event)?);
        } else if let Some(failure) = stream.first_failure() {
            output.failures.push(StreamFailureRow {
                stream_id: stream.get_id(),
                step: failure.step.clone(),
                kind: failure.kind,
                reason: failure.reason.clone(),
            });
        }
    }
    Ok(output)
}

pub struct WaveformMetricCalculator<'a> {
    metrics: &'a MetricsConfig,
    integration: &'a IntegrationConfig,
}

impl<'a> WaveformMetricCalculator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            metrics: &config.metrics,
            integration: &config.integration,
        }
    }

    /// Compute every configured (component, type) combination.
    pub fn run(&self, stream: &Stream, event: &ScalarEvent) -> GmResult<StationMetrics> {
        let mut rows: Vec<WaveformMetric> = Vec::new();

        for (component, types) in &self.metrics.components_and_types {
            for metric_type in types {
                match component.as_str() {
                    "channels" => self.channels(stream, metric_type, &mut rows),
                    "arithmetic_mean" | "geometric_mean" | "quadratic_mean" => {
                        self.horizontal_mean(stream, component, metric_type, &mut rows)
                    }
                    "rotd" => self.rotd(stream, metric_type, &mut rows),
                    other => {
                        log::warn!("Unknown metric component '{other}', skipping");
                    }
                }
            }
        }

        Ok(StationMetrics {
            station_id: stream.get_id(),
            event_id: event.id.clone(),
            metrics: rows,
        })
    }

    fn velocity(&self, acc: &[f64], dt: f64) -> Vec<f64> {
        if self.integration.frequency {
            integrate_frequency(acc, dt, self.integration.initial)
        } else {
            cumtrapz(acc, dt, self.integration.initial)
        }
    }

    /// Scalar metric of one acceleration series; None when the type
    /// produces per-period or spectral rows handled elsewhere.
    fn scalar(&self, metric_type: &str, acc: &[f64], dt: f64) -> Option<Vec<(f64, BTreeMap<String, serde_json::Value>, &'static str)>> {
        let mut rows = Vec::new();
        match metric_type {
            "pga" => {
                let peak = acc.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
                rows.push((peak / G_CM_S2, BTreeMap::new(), "g"));
            }
            "pgv" => {
                let vel = self.velocity(acc, dt);
                let peak = vel.iter().fold(0.0f64, |m, &v| m.max(v.abs()));
                rows.push((peak, BTreeMap::new(), "cm/s"));
            }
            "arias" => {
                rows.push((arias_intensity(acc, dt), BTreeMap::new(), "cm/s"));
            }
            "cav" => {
                let threshold = self.metrics.type_parameters.cav.threshold;
                let mut params = BTreeMap::new();
                params.insert("threshold".to_string(), json!(threshold));
                rows.push((cav(acc, dt, threshold), params, "cm/s"));
            }
            "duration" => {
                for interval in &self.metrics.type_parameters.duration.intervals {
                    if let Some((p1, p2)) = parse_interval(interval) {
                        let mut params = BTreeMap::new();
                        params.insert("interval".to_string(), json!(interval));
                        rows.push((significant_duration(acc, dt, p1, p2), params, "s"));
                    }
                }
            }
            "sorted_duration" => {
                for interval in &self.metrics.type_parameters.duration.intervals {
                    if let Some((p1, p2)) = parse_interval(interval) {
                        let mut params = BTreeMap::new();
                        params.insert("interval".to_string(), json!(interval));
                        rows.push((sorted_duration(acc, dt, p1, p2), params, "s"));
                    }
                }
            }
            "sa" => {
                let sa = &self.metrics.type_parameters.sa;
                for &period in &sa.periods {
                    for &damping in &sa.damping {
                        let psa = self.spectral_acceleration(acc, dt, period, damping);
                        let mut params = BTreeMap::new();
                        params.insert("period".to_string(), json!(period));
                        params.insert("damping".to_string(), json!(damping));
                        rows.push((psa, params, "g"));
                    }
                }
            }
            _ => return None,
        }
        Some(rows)
    }

    /// PSA (g) with upsampling for short periods near Nyquist.
    fn spectral_acceleration(&self, acc: &[f64], dt: f64, period: f64, damping: f64) -> f64 {
        let sa = &self.metrics.type_parameters.sa;
        let ns = ((sa.ns_factor * dt / period - 0.01) as isize + 1).max(1) as usize;
        if ns > 1 {
            let upsampled = lanczos_upsample(acc, ns, 10);
            let tlen = (acc.len() - 1) as f64 * dt;
            let new_dt = tlen / (upsampled.len() - 1) as f64;
            peak_pseudo_acceleration(&upsampled, new_dt, period, damping) / G_CM_S2
        } else {
            peak_pseudo_acceleration(acc, dt, period, damping) / G_CM_S2
        }
    }

    fn push_rows(
        rows: &mut Vec<WaveformMetric>,
        metric_type: &str,
        component: &str,
        computed: Vec<(f64, BTreeMap<String, serde_json::Value>, &'static str)>,
    ) {
        for (value, parameters, units) in computed {
            rows.push(WaveformMetric {
                metric_type: canonical_type_name(metric_type),
                component: component.to_string(),
                value: MetricValue::Scalar(value),
                units: units.to_string(),
                parameters,
            });
        }
    }

    fn channels(&self, stream: &Stream, metric_type: &str, rows: &mut Vec<WaveformMetric>) {
        for tr in stream.iter() {
            let dt = tr.stats.delta;
            let acc = tr.data.to_vec();
            if metric_type == "fas" {
                rows.push(self.fas_row(&acc, dt, &tr.stats.channel));
                continue;
            }
            if let Some(computed) = self.scalar(metric_type, &acc, dt) {
                Self::push_rows(rows, metric_type, &tr.stats.channel, computed);
            }
        }
    }

    fn fas_row(&self, acc: &[f64], dt: f64, component: &str) -> WaveformMetric {
        let fas = &self.metrics.type_parameters.fas;
        let (freqs, values) = fourier_amplitude_spectrum(
            acc,
            dt,
            fas.smoothing_parameter,
            fas.frequencies.start,
            fas.frequencies.stop,
            fas.frequencies.count,
        );
        let mut params = BTreeMap::new();
        params.insert("smoothing_method".to_string(), json!("konno_ohmachi"));
        params.insert(
            "smoothing_parameter".to_string(),
            json!(fas.smoothing_parameter),
        );
        WaveformMetric {
            metric_type: "FAS".to_string(),
            component: component.to_string(),
            value: MetricValue::Spectrum {
                frequencies: freqs,
                values,
            },
            units: "cm/s".to_string(),
            parameters: params,
        }
    }

    /// Arithmetic/geometric/quadratic mean of the two horizontal channel
    /// values.
    fn horizontal_mean(
        &self,
        stream: &Stream,
        component: &str,
        metric_type: &str,
        rows: &mut Vec<WaveformMetric>,
    ) {
        let horizontals = stream.horizontals();
        if horizontals.len() != 2 || metric_type == "fas" {
            return;
        }
        let computed: Vec<Vec<(f64, BTreeMap<String, serde_json::Value>, &'static str)>> =
            horizontals
                .iter()
                .filter_map(|tr| self.scalar(metric_type, &tr.data.to_vec(), tr.stats.delta))
                .collect();
        if computed.len() != 2 {
            return;
        }
        let combined: Vec<(f64, BTreeMap<String, serde_json::Value>, &'static str)> = computed[0]
            .iter()
            .zip(computed[1].iter())
            .map(|((v1, params, units), (v2, _, _))| {
                let value = match component {
                    "arithmetic_mean" => 0.5 * (v1 + v2),
                    "geometric_mean" => (v1 * v2).sqrt(),
                    _ => (0.5 * (v1 * v1 + v2 * v2)).sqrt(),
                };
                (value, params.clone(), *units)
            })
            .collect();
        Self::push_rows(rows, metric_type, component, combined);
    }

    /// RotD(p): the requested percentile over all rotation angles of the
    /// per-rotation metric.
    fn rotd(&self, stream: &Stream, metric_type: &str, rows: &mut Vec<WaveformMetric>) {
        let horizontals = stream.horizontals();
        if horizontals.len() != 2 {
            return;
        }
        if metric_type == "fas" {
            log::warn!("RotD is not defined for FAS, skipping");
            return;
        }
        let dt = horizontals[0].stats.delta;
        let h1 = horizontals[0].data.to_vec();
        let h2 = horizontals[1].data.to_vec();
        let delta_deg = self.metrics.component_parameters.rotation_delta_deg;
        let rotated = rotate_combine(&h1, &h2, delta_deg);

        // Metric per rotation; row structure (periods, intervals) is the
        // same for every rotation
        let mut per_rotation: Vec<Vec<(f64, BTreeMap<String, serde_json::Value>, &'static str)>> =
            Vec::with_capacity(rotated.nrows());
        for row in rotated.outer_iter() {
            let series: Vec<f64> = row.to_vec();
            if let Some(computed) = self.scalar(metric_type, &series, dt) {
                per_rotation.push(computed);
            }
        }
        if per_rotation.is_empty() {
            return;
        }

        let n_rows = per_rotation[0].len();
        for &pctl in &self.metrics.component_parameters.rotd_percentiles {
            for row_idx in 0..n_rows {
                let values: Vec<f64> = per_rotation.iter().map(|r| r[row_idx].0).collect();
                let (_, base_params, units) = &per_rotation[0][row_idx];
                let mut params = base_params.clone();
                params.insert("percentile".to_string(), json!(pctl));
                params.insert("rotation_delta_deg".to_string(), json!(delta_deg));
                rows.push(WaveformMetric {
                    metric_type: canonical_type_name(metric_type),
                    component: format!("rotd{pctl}"),
                    value: MetricValue::Scalar(percentile(&values, pctl)),
                    units: units.to_string(),
                    parameters: params,
                });
            }
        }
    }
}

fn canonical_type_name(metric_type: &str) -> String {
    match metric_type {
        "pga" => "PGA".to_string(),
        "pgv" => "PGV".to_string(),
        "sa" => "SA".to_string(),
        "fas" => "FAS".to_string(),
        "arias" => "Arias".to_string(),
        "cav" => "CAV".to_string(),
        "duration" => "Duration".to_string(),
        "sorted_duration" => "SortedDuration".to_string(),
        other => other.to_string(),
    }
}

/// Parse an interval spec like "5-95".
fn parse_interval(interval: &str) -> Option<(f64, f64)> {
    let mut parts = interval.splitn(2, '-');
    let p1 = parts.next()?.trim().parse().ok()?;
    let p2 = parts.next()?.trim().parse().ok()?;
    Some((p1, p2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{synthetic_record, test_event};
    use crate::core::trace::Trace;
    use crate::types::UnitsType;
    use ndarray::Array1;

    fn processed_stream() -> Stream {
        let mut traces = Vec::new();
        for ch in ["HNE", "HNN", "HNZ"] {
            let mut tr = synthetic_record(ch, 6000, 0.01, 5.0, 50.0);
            tr.stats.standard.units_type = UnitsType::Acc;
            tr.stats.standard.units = "cm/s^2".to_string();
            traces.push(tr);
        }
        Stream::new(traces)
    }

    #[test]
    fn test_channels_pga_rows() {
        let config = Config::default();
        let calc = WaveformMetricCalculator::new(&config);
        let metrics = calc.run(&processed_stream(), &test_event()).unwrap();
        let pga_rows: Vec<&WaveformMetric> = metrics
            .metrics
            .iter()
            .filter(|m| m.metric_type == "PGA" && m.component.starts_with("HN"))
            .collect();
        assert_eq!(pga_rows.len(), 3);
        for row in pga_rows {
            if let MetricValue::Scalar(v) = row.value {
                assert!(v > 0.0 && v < 1.0, "PGA in g: {v}");
            } else {
                panic!("PGA must be scalar");
            }
        }
    }

    #[test]
    fn test_rotd50_between_channel_extremes() {
        let config = Config::default();
        let calc = WaveformMetricCalculator::new(&config);
        let st = processed_stream();
        let metrics = calc.run(&st, &test_event()).unwrap();

        let channel_pga: Vec<f64> = metrics
            .metrics
            .iter()
            .filter(|m| {
                m.metric_type == "PGA"
                    && (m.component == "HNE" || m.component == "HNN")
            })
            .filter_map(|m| match m.value {
                MetricValue::Scalar(v) => Some(v),
                _ => None,
            })
            .collect();
        let rotd50 = metrics
            .metrics
            .iter()
            .find(|m| m.metric_type == "PGA" && m.component == "rotd50")
            .and_then(|m| match m.value {
                MetricValue::Scalar(v) => Some(v),
                _ => None,
            })
            .expect("rotd50 PGA row");

        // Trivial bound: rotd50 cannot exceed the vector peak of the two
        // horizontals and cannot drop below min-channel / sqrt(2)
        let max_channel = channel_pga.iter().cloned().fold(0.0f64, f64::max);
        let min_channel = channel_pga.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(rotd50 <= max_channel * std::f64::consts::SQRT_2 + 1e-12);
        assert!(rotd50 >= min_channel / std::f64::consts::SQRT_2 - 1e-12);
    }

    #[test]
    fn test_rotd_rotation_invariance() {
        // Rigidly rotating the two horizontals must not change RotD50(PGA)
        let config = Config::default();
        let calc = WaveformMetricCalculator::new(&config);
        let st = processed_stream();

        let rotd = |stream: &Stream| -> f64 {
            let metrics = calc.run(stream, &test_event()).unwrap();
            metrics
                .metrics
                .iter()
                .find(|m| m.metric_type == "PGA" && m.component == "rotd50")
                .and_then(|m| match m.value {
                    MetricValue::Scalar(v) => Some(v),
                    _ => None,
                })
                .unwrap()
        };

        let base = rotd(&st);

        let mut rotated = st.clone();
        let theta: f64 = 37.0f64.to_radians();
        let h1 = st.traces[0].data.to_vec();
        let h2 = st.traces[1].data.to_vec();
        let r1: Vec<f64> = h1
            .iter()
            .zip(h2.iter())
            .map(|(&a, &b)| a * theta.cos() + b * theta.sin())
            .collect();
        let r2: Vec<f64> = h1
            .iter()
            .zip(h2.iter())
            .map(|(&a, &b)| -a * theta.sin() + b * theta.cos())
            .collect();
        rotated.traces[0].data = Array1::from(r1);
        rotated.traces[1].data = Array1::from(r2);

        let after = rotd(&rotated);
        // Invariant to within the rotation-grid resolution
        assert!((base - after).abs() / base < 0.02, "base {base}, after {after}");
    }

    #[test]
    fn test_metric_monotonicity_bound() {
        // PGA(max channel) >= PGA(arithmetic mean of horizontals) / sqrt(2)
        let config = Config::default();
        let calc = WaveformMetricCalculator::new(&config);
        let st = processed_stream();
        let metrics = calc.run(&st, &test_event()).unwrap();
        let max_channel = metrics
            .metrics
            .iter()
            .filter(|m| m.metric_type == "PGA" && m.component.starts_with("HN"))
            .filter_map(|m| match m.value {
                MetricValue::Scalar(v) => Some(v),
                _ => None,
            })
            .fold(0.0f64, f64::max);

        let horizontals = st.horizontals();
        let am = {
            let peak = |tr: &Trace| tr.max_abs() / G_CM_S2;
            0.5 * (peak(horizontals[0]) + peak(horizontals[1]))
        };
        assert!(max_channel >= am / std::f64::consts::SQRT_2);
    }

    #[test]
    fn test_fas_spectrum_row() {
        let config = Config::default();
        let calc = WaveformMetricCalculator::new(&config);
        let metrics = calc.run(&processed_stream(), &test_event()).unwrap();
        let fas = metrics
            .metrics
            .iter()
            .find(|m| m.metric_type == "FAS")
            .expect("FAS row");
        match &fas.value {
            MetricValue::Spectrum { frequencies, values } => {
                assert_eq!(frequencies.len(), values.len());
                assert!(!frequencies.is_empty());
            }
            _ => panic!("FAS must be a spectrum"),
        }
    }

    #[test]
    fn test_failed_stream_produces_failure_row() {
        let config = Config::default();
        let mut st = processed_stream();
        st.traces[0].fail("snr_check", FailureKind::QaCheck, "SNR too low");
        let collection = StreamCollection::new(vec![st]);
        let out = collect_metrics(&collection, &test_event(), &config).unwrap();
        assert!(out.stations.is_empty());
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].step, "snr_check");
    }
}
