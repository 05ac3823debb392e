//! Persistence boundary.
//!
//! The engine never touches storage directly; it consumes and produces
//! streams through the `Workspace` trait. The HDF5-backed implementation
//! lives outside this crate; `MemoryWorkspace` backs the tests.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::core::event::ScalarEvent;
use crate::core::stream::Stream;
use crate::types::{GmError, GmResult};

/// Interface to the workspace file holding events, streams, configuration,
/// and auxiliary byte blobs.
pub trait Workspace {
    fn get_event_ids(&self) -> GmResult<Vec<String>>;

    fn get_event(&self, event_id: &str) -> GmResult<ScalarEvent>;

    /// Streams of one event, optionally restricted to stations and labels.
    fn get_streams(
        &self,
        event_id: &str,
        stations: Option<&[String]>,
        labels: Option<&[String]>,
    ) -> GmResult<Vec<Stream>>;

    fn get_config(&self) -> GmResult<Config>;

    fn insert_aux(&mut self, group: &str, key: &str, data: Vec<u8>) -> GmResult<()>;

    fn get_aux(&self, group: &str, key: &str) -> GmResult<Option<Vec<u8>>>;

    /// Persist streams under a label (samples, metadata, parameters,
    /// provenance).
    fn set_streams(&mut self, event_id: &str, label: &str, streams: Vec<Stream>) -> GmResult<()>;
}

/// In-memory workspace used by tests and examples.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    events: BTreeMap<String, ScalarEvent>,
    streams: BTreeMap<(String, String), Vec<Stream>>,
    aux: BTreeMap<(String, String), Vec<u8>>,
    config: Config,
}

impl MemoryWorkspace {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn add_event(&mut self, event: ScalarEvent, raw_streams: Vec<Stream>) {
        let id = event.id.clone();
        self.events.insert(id.clone(), event);
        self.streams.insert((id, "unprocessed".to_string()), raw_streams);
    }
}

impl Workspace for MemoryWorkspace {
    fn get_event_ids(&self) -> GmResult<Vec<String>> {
        Ok(self.events.keys().cloned().collect())
    }

    fn get_event(&self, event_id: &str) -> GmResult<ScalarEvent> {
        self.events
            .get(event_id)
            .cloned()
            .ok_or_else(|| GmError::Data(format!("unknown event id '{event_id}'")))
    }

    fn get_streams(
        &self,
        event_id: &str,
        stations: Option<&[String]>,
        labels: Option<&[String]>,
    ) -> GmResult<Vec<Stream>> {
        let mut out = Vec::new();
        for ((eid, label), streams) in &self.streams {
            if eid != event_id {
                continue;
            }
            if let Some(labels) = labels {
                if !labels.iter().any(|l| l == label) {
                    continue;
                }
            }
            for st in streams {
                if let Some(stations) = stations {
                    if !stations.iter().any(|s| *s == st.get_net_sta()) {
                        continue;
                    }
                }
                out.push(st.clone());
            }
        }
        Ok(out)
    }

    fn get_config(&self) -> GmResult<Config> {
        Ok(self.config.clone())
    }

    fn insert_aux(&mut self, group: &str, key: &str, data: Vec<u8>) -> GmResult<()> {
        self.aux.insert((group.to_string(), key.to_string()), data);
        Ok(())
    }

    fn get_aux(&self, group: &str, key: &str) -> GmResult<Option<Vec<u8>>> {
        Ok(self.aux.get(&(group.to_string(), key.to_string())).cloned())
    }

    fn set_streams(&mut self, event_id: &str, label: &str, streams: Vec<Stream>) -> GmResult<()> {
        self.streams
            .insert((event_id.to_string(), label.to_string()), streams);
        Ok(())
    }
}
