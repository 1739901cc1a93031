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

//! The pipeline container (§4.5): a DAG of child filters exposed to the
//! outside world through the ordinary [`dflow_filter::FilterOps`] vtable,
//! so a pipeline can itself be a child of another pipeline.

mod config;
mod pipeline;

pub use config::{PipelineConfig, PipelineConnection};
pub use pipeline::Pipeline;
