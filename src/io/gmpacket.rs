//! Ground-motion-packet output.
//!
//! Serializes a `MetricsCollection` into the ground-motion-packet layout:
//! one entry per (event, station, metric type, component), plus the
//! diagnostic table of failed streams.

use serde::{Deserialize, Serialize};

use crate::core::event::ScalarEvent;
use crate::metrics::{MetricValue, MetricsCollection, StreamFailureRow};
use crate::types::{GmError, GmResult};

const PACKET_VERSION: &str = "0.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketEvent {
    pub id: String,
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketMetric {
    pub station_id: String,
    pub metric_type: String,
    pub component: String,
    pub units: String,
    pub value: MetricValue,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty", default)]
    pub parameters: std::collections::BTreeMap<String, serde_json::Value>,
}

/// Top-level packet document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundMotionPacket {
    pub version: String,
    pub event: PacketEvent,
    pub metrics: Vec<PacketMetric>,
    /// One row per failed stream: which step failed it and why
    pub failures: Vec<StreamFailureRow>,
}

impl GroundMotionPacket {
    pub fn from_metrics(event: &ScalarEvent, collection: &MetricsCollection) -> Self {
        let mut metrics = Vec::new();
        for station in &collection.stations {
            for metric in &station.metrics {
                metrics.push(PacketMetric {
                    station_id: station.station_id.clone(),
                    metric_type: metric.metric_type.clone(),
                    component: metric.component.clone(),
                    units: metric.units.clone(),
                    value: metric.value.clone(),
                    parameters: metric.parameters.clone(),
                });
            }
        }
        Self {
            version: PACKET_VERSION.to_string(),
            event: PacketEvent {
                id: event.id.clone(),
                time: event.time.to_rfc3339(),
                latitude: event.latitude,
                longitude: event.longitude,
                depth_km: event.depth_km,
                magnitude: event.magnitude,
            },
            metrics,
            failures: collection.failures.clone(),
        }
    }

    pub fn to_json(&self) -> GmResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| GmError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::test_event;
    use crate::metrics::{StationMetrics, WaveformMetric};
    use std::collections::BTreeMap;

    #[test]
    fn test_packet_serialization() {
        let collection = MetricsCollection {
            stations: vec![StationMetrics {
                station_id: "CI.TST.HN".to_string(),
                event_id: "ci38457511".to_string(),
                metrics: vec![WaveformMetric {
                    metric_type: "PGA".to_string(),
                    component: "rotd50".to_string(),
                    value: MetricValue::Scalar(0.123),
                    units: "g".to_string(),
                    parameters: BTreeMap::new(),
                }],
            }],
            failures: vec![StreamFailureRow {
                stream_id: "CI.BAD.HN".to_string(),
                step: "snr_check".to_string(),
                kind: crate::types::FailureKind::QaCheck,
                reason: "SNR check: SNR 1.2 < 3.0".to_string(),
            }],
        };
        let packet = GroundMotionPacket::from_metrics(&test_event(), &collection);
        let json = packet.to_json().unwrap();
        assert!(json.contains("\"PGA\""));
        assert!(json.contains("rotd50"));
        assert!(json.contains("snr_check"));

        let parsed: GroundMotionPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.metrics.len(), 1);
        assert_eq!(parsed.failures.len(), 1);
    }
}
