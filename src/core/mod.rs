//! Core data model: traces, streams, collections, events, provenance.

pub mod collection;
pub mod event;
pub mod provenance;
pub mod stream;
pub mod trace;

#[cfg(test)]
pub(crate) mod testutil;

pub use collection::StreamCollection;
pub use event::ScalarEvent;
pub use provenance::{ProvenanceEntry, ProvenanceLog};
pub use stream::Stream;
pub use trace::{CachedArray, StandardMetadata, Trace, TraceParam, TraceStats};
