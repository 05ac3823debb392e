//! Stream collection: grouping raw traces into station streams, duplicate
//! resolution, and colocated-instrument selection.

use std::collections::BTreeMap;

use crate::config::{ColocatedConfig, Config, DuplicateConfig};
use crate::core::stream::Stream;
use crate::core::trace::Trace;
use crate::types::{FailureKind, GmResult, ProcessLevel};

/// Streams for a single event.
#[derive(Debug, Clone, Default)]
pub struct StreamCollection {
    pub streams: Vec<Stream>,
}

impl StreamCollection {
    pub fn new(streams: Vec<Stream>) -> Self {
        Self { streams }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stream> {
        self.streams.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Stream> {
        self.streams.iter_mut()
    }

    /// Group raw traces into station streams, resolving duplicates.
    pub fn from_traces(traces: Vec<Trace>, config: &Config) -> GmResult<Self> {
        // Duplicate resolution first, trace by trace
        let mut kept: Vec<Trace> = Vec::new();
        'next_trace: for tr in traces {
            for existing in kept.iter_mut() {
                if are_duplicates(existing, &tr, config.duplicate.max_dist_tolerance) {
                    if !prefer_first(existing, &tr, &config.duplicate) {
                        *existing = tr;
                    }
                    continue 'next_trace;
                }
            }
            kept.push(tr);
        }

        // Group by network.station.instrument.location
        let mut groups: BTreeMap<String, Vec<Trace>> = BTreeMap::new();
        for tr in kept {
            let inst: String = tr.stats.channel.chars().take(2).collect();
            let key = format!(
                "{}.{}.{}.{}",
                tr.stats.network, tr.stats.station, inst, tr.stats.location
            );
            groups.entry(key).or_default().push(tr);
        }

        let mut streams: Vec<Stream> = Vec::new();
        for (_, group) in groups {
            let mut stream = Stream::new(group);
            if let Err(err) = stream.validate() {
                log::debug!("Stream {} failed validation: {err}", stream.get_id());
                stream.fail_all("stream_validation", FailureKind::Data, &err.to_string());
            }
            streams.push(stream);
        }
        log::info!("Grouped traces into {} streams", streams.len());
        Ok(Self { streams })
    }

    /// Keep the preferred instrument among colocated streams; fail the rest.
    pub fn select_colocated(&mut self, config: &ColocatedConfig) {
        if !config.enabled {
            return;
        }
        // Group passing stream indices by site
        let mut sites: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, st) in self.streams.iter().enumerate() {
            if st.passed() {
                sites.entry(st.get_net_sta_loc()).or_default().push(i);
            }
        }
        for (_, indices) in sites {
            if indices.len() < 2 {
                continue;
            }
            let rank = |inst: &str| {
                config
                    .preference
                    .iter()
                    .position(|p| inst.starts_with(p.as_str()))
                    .unwrap_or(usize::MAX)
            };
            let best = indices
                .iter()
                .cloned()
                .min_by_key(|&i| rank(&self.streams[i].get_inst()))
                .unwrap_or(indices[0]);
            for &i in &indices {
                if i != best {
                    let reason = format!(
                        "Colocated with preferred instrument {}",
                        self.streams[best].get_inst()
                    );
                    self.streams[i].fail_all("colocated", FailureKind::QaCheck, &reason);
                }
            }
        }
    }

    /// Count of streams whose traces all passed.
    pub fn n_passed(&self) -> usize {
        self.streams.iter().filter(|st| st.passed()).count()
    }

    pub fn n_failed(&self) -> usize {
        self.streams.len() - self.n_passed()
    }
}

/// Orientation class of a channel: horizontals 1/N, 2/E, or vertical.
fn orientation_class(channel: &str) -> char {
    match channel.chars().last() {
        Some('1') | Some('N') => '1',
        Some('2') | Some('E') => '2',
        _ => 'Z',
    }
}

/// Two traces describe the same channel at the same site.
fn are_duplicates(tr1: &Trace, tr2: &Trace, max_dist_tolerance: f64) -> bool {
    if orientation_class(&tr1.stats.channel) != orientation_class(&tr2.stats.channel) {
        return false;
    }
    // Matching SEED ids short of the orientation code
    let id1 = format!(
        "{}.{}.{}.{}",
        tr1.stats.network,
        tr1.stats.station,
        tr1.stats.location,
        &tr1.stats.channel[..tr1.stats.channel.len().saturating_sub(1)]
    );
    let id2 = format!(
        "{}.{}.{}.{}",
        tr2.stats.network,
        tr2.stats.station,
        tr2.stats.location,
        &tr2.stats.channel[..tr2.stats.channel.len().saturating_sub(1)]
    );
    if id1 == id2 {
        return true;
    }
    // Otherwise same station/instrument within the distance tolerance
    let inst1: String = tr1.stats.channel.chars().take(2).collect();
    let inst2: String = tr2.stats.channel.chars().take(2).collect();
    if tr1.stats.station != tr2.stats.station || inst1 != inst2 {
        return false;
    }
    distance_m(
        tr1.stats.coordinates.latitude,
        tr1.stats.coordinates.longitude,
        tr2.stats.coordinates.latitude,
        tr2.stats.coordinates.longitude,
    ) < max_dist_tolerance
}

fn distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * 6_371_000.0 * a.sqrt().asin()
}

fn process_level_code(level: ProcessLevel) -> &'static str {
    match level {
        ProcessLevel::V0 => "V0",
        ProcessLevel::V1 => "V1",
        ProcessLevel::V2 => "V2",
        ProcessLevel::V3 => "V3",
    }
}

/// Decide whether the first of two duplicate traces is preferred, walking
/// the configured preference order until a criterion differentiates them.
fn prefer_first(tr1: &Trace, tr2: &Trace, config: &DuplicateConfig) -> bool {
    for pref in &config.preference_order {
        let scores: Option<(f64, f64)> = match pref.as_str() {
            "process_level" => {
                let idx = |tr: &Trace| {
                    config
                        .process_level_preference
                        .iter()
                        .position(|p| p == process_level_code(tr.stats.standard.process_level))
                        .unwrap_or(usize::MAX) as f64
                };
                Some((idx(tr1), idx(tr2)))
            }
            "source_format" => {
                let find = |tr: &Trace| {
                    config
                        .format_preference
                        .iter()
                        .position(|p| p == &tr.stats.standard.source_format)
                };
                match (find(tr1), find(tr2)) {
                    (Some(a), Some(b)) => Some((a as f64, b as f64)),
                    _ => None,
                }
            }
            "starttime" => Some((
                tr1.stats.start_time.timestamp_nanos_opt().unwrap_or(0) as f64,
                tr2.stats.start_time.timestamp_nanos_opt().unwrap_or(0) as f64,
            )),
            "npts" => Some((1.0 / tr1.stats.npts as f64, 1.0 / tr2.stats.npts as f64)),
            "sampling_rate" => Some((tr1.stats.delta, tr2.stats.delta)),
            "location_code" => {
                let loc = |tr: &Trace| {
                    if tr.stats.location == "--" {
                        f64::INFINITY
                    } else {
                        tr.stats.location.parse::<f64>().unwrap_or(1e9)
                    }
                };
                Some((loc(tr1), loc(tr2)))
            }
            _ => None,
        };
        if let Some((s1, s2)) = scores {
            if (s1 - s2).abs() > f64::EPSILON {
                return s1 < s2;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::flat_trace;

    #[test]
    fn test_grouping_by_station() {
        let config = Config::default();
        let mut tr_other = flat_trace("HNE", 1000, 0.01, 1.0);
        tr_other.stats.station = "OTHER".to_string();
        tr_other.stats.coordinates.latitude = 36.5;
        let traces = vec![
            flat_trace("HNE", 1000, 0.01, 1.0),
            flat_trace("HNN", 1000, 0.01, 1.0),
            flat_trace("HNZ", 1000, 0.01, 1.0),
            tr_other,
        ];
        let sc = StreamCollection::from_traces(traces, &config).unwrap();
        assert_eq!(sc.len(), 2);
        let sizes: Vec<usize> = sc.iter().map(|st| st.len()).collect();
        assert!(sizes.contains(&3) && sizes.contains(&1));
    }

    #[test]
    fn test_duplicate_process_level_preference() {
        // Two copies of the same channels at V0 and V1: V1 wins per the
        // default preference order.
        let config = Config::default();
        let mut traces = Vec::new();
        for ch in ["HNE", "HNN", "HNZ"] {
            let mut v0 = flat_trace(ch, 1000, 0.01, 1.0);
            v0.stats.standard.process_level = ProcessLevel::V0;
            v0.stats.standard.source_format = "cosmos".to_string();
            traces.push(v0);
            let mut v1 = flat_trace(ch, 1000, 0.01, 2.0);
            v1.stats.standard.process_level = ProcessLevel::V1;
            v1.stats.standard.source_format = "dmg".to_string();
            traces.push(v1);
        }
        let sc = StreamCollection::from_traces(traces, &config).unwrap();
        assert_eq!(sc.len(), 1);
        for tr in sc.streams[0].iter() {
            assert_eq!(tr.stats.standard.process_level, ProcessLevel::V1);
        }
    }

    #[test]
    fn test_colocated_selection() {
        let config = Config::default();
        let mut traces = vec![
            flat_trace("HNE", 1000, 0.01, 1.0),
            flat_trace("HNN", 1000, 0.01, 1.0),
        ];
        for ch in ["HHE", "HHN"] {
            traces.push(flat_trace(ch, 1000, 0.01, 1.0));
        }
        let mut sc = StreamCollection::from_traces(traces, &config).unwrap();
        assert_eq!(sc.len(), 2);
        sc.select_colocated(&config.colocated);
        // HN (accelerometer) is preferred over HH
        assert_eq!(sc.n_passed(), 1);
        let passed: Vec<&Stream> = sc.iter().filter(|st| st.passed()).collect();
        assert_eq!(passed[0].get_inst(), "HN");
    }
}
