#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(unreachable_pub)]

//! A streaming dataflow runtime for regularly-sampled numeric telemetry:
//! a fixed-capacity batch ring buffer, filter lifecycle and worker hosting,
//! a property-contract validation system, and a pipeline container that
//! exposes a DAG of filters as a single filter.
//!
//! This crate is a thin re-export over the workspace's single-purpose
//! crates; application code depends on `dflow` and reaches every piece
//! through one `use`, the way the reference pipeline toolkit this workspace
//! is grounded on re-exports its own `receiver`/`processor`/`exporter`
//! family through its top-level `engine` crate.
//!
//! See each re-exported crate's own docs for the details of its module:
//! [`dflow_error`] for the closed error taxonomy, [`dflow_buffer`] for the
//! SPSC batch ring buffer, [`dflow_filter`] for the filter core and
//! operations vtable, [`dflow_property`] for the property-contract
//! validation system, and [`dflow_pipeline`] for the pipeline container.
//! [`dflow_harness`] is re-exported only for integration tests and external
//! conformance suites; it is not part of the runtime itself.

/// The SPSC batch ring buffer: [`BatchBuffer`], `BufferConfig`, overflow policies.
pub use dflow_buffer as buffer;
/// The closed error taxonomy: [`Ec`], `WorkerErrInfo`, `worker_fatal!`.
pub use dflow_error as error;
/// The filter core and operations vtable: [`FilterCore`], [`FilterOps`].
pub use dflow_filter as filter;
/// The generic compliance suite; not part of the runtime itself.
pub use dflow_harness as harness;
/// The pipeline container: [`Pipeline`], `PipelineConfig`.
pub use dflow_pipeline as pipeline;
/// The property-contract validation system: [`PropertyGraph`], `PropertyContract`.
pub use dflow_property as property;

pub use dflow_buffer::{BatchBuffer, BatchHead, BatchMeta, BatchTail, BufferConfig, BufferStatsSnapshot, DType, OverflowPolicy, Sample};
pub use dflow_error::{worker_fatal, Ec, NamedWorkerError, WorkerErrInfo, WorkerErrSink};
pub use dflow_filter::{
    filt_deinit, filt_describe, filt_flush, filt_sink_connect, filt_start, filt_stop, FilterConfig, FilterCore, FilterOps,
    FilterStatsSnapshot, FilterType, Health,
};
pub use dflow_pipeline::{Pipeline, PipelineConfig, PipelineConnection};
pub use dflow_property::{
    Behavior, Constraint, PropagationResult, PropertyContract, PropertyError, PropertyGraph, PropertyKey, PropertyTable, PropertyValue,
};
