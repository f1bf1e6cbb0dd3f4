//! Measurement pipeline for round-robin style time series.
//!
//! Raw samples (counters, gauges) are read per resource, turned into rates, normalized onto a
//! fixed step grid with heartbeat-based staleness, consolidated (AVERAGE/MIN/MAX) to a query
//! resolution, combined by calculations and projected onto a fixed set of export labels. Every
//! stage is a lazy iterator; [`ResultProcessor`] composes them and [`query::select`] runs one
//! query against a [`SampleReader`].
//!
//! ```no_run
//! use tsrollup::{query, AggregationFunction, Duration, InMemorySampleStore, QueryOptions,
//!     Resource, ResultDescriptor};
//!
//! # fn main() -> Result<(), tsrollup::TsError> {
//! let store = InMemorySampleStore::new();
//! let descriptor = ResultDescriptor::builder(Duration::minutes(5))
//!     .datasource("in", "ifInOctets", AggregationFunction::Average)
//!     .export(["in"])
//!     .build()?;
//! let results = query::select(
//!     &store,
//!     &Resource::new("node1"),
//!     None,
//!     None,
//!     descriptor,
//!     None,
//!     QueryOptions::default(),
//! )?;
//! for row in results.rows() {
//!     println!("{} {:?}", row.timestamp(), row.elements());
//! }
//! # Ok(())
//! # }
//! ```

// Declare modules
pub mod aggregation;
pub mod codec;
pub mod compute;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod ingest;
pub mod interval;
pub mod primary;
pub mod processor;
pub mod query;
pub mod rate;
pub mod storage;
pub mod telemetry;
pub mod time;
pub mod types;

/// Process-wide settings and report definitions.
pub use crate::config::{PipelineConfig, ReportConfig};
/// Query configuration: datasources, calculations and exports.
pub use crate::descriptor::{
    AggregationFunction, BinaryOp, Operand, ResultDescriptor, ResultDescriptorBuilder,
};
/// Error type for every fallible operation.
pub use crate::error::TsError;
/// Background fan-out of ingested samples.
pub use crate::ingest::{IngestConfig, SampleProcessor, SampleProcessorService};
/// Step-aligned timestamp sequences.
pub use crate::interval::IntervalGenerator;
/// Entry point for running one measurement query.
pub use crate::processor::{QueryOptions, ResultProcessor, ResultStream};
/// Sample source used by queries, and an in-memory implementation.
pub use crate::storage::{InMemorySampleStore, SampleReader};
/// Structured event hook for observability.
pub use crate::telemetry::{PipelineEvent, PipelineEventListener};
/// Unit-aware instants and spans.
pub use crate::time::{Duration, TimeUnit, Timestamp};
/// Samples, measurements and the rows that group them.
pub use crate::types::{
    AttributeMap, Element, Measurement, MetricType, Resource, Results, Row, Sample, ValueType,
};
