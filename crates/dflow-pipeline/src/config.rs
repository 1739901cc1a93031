//! Configuration consumed by [`crate::Pipeline::init`].

use std::sync::Arc;

use dflow_filter::FilterOps;
use dflow_property::PropertyContract;

/// One intra-DAG connection to wire during `init`: `(from, from_port) ->
/// (to, to_port)`, named by child filter name (resolved against
/// [`PipelineConfig::filters`] during init).
#[derive(Debug, Clone)]
pub struct PipelineConnection {
    /// The producing child filter's name.
    pub from: String,
    /// The producing child's output port.
    pub from_port: usize,
    /// The consuming child filter's name.
    pub to: String,
    /// The consuming child's input port (index into its owned input
    /// buffers).
    pub to_port: usize,
}

impl PipelineConnection {
    /// Convenience constructor.
    #[must_use]
    pub fn new(from: impl Into<String>, from_port: usize, to: impl Into<String>, to_port: usize) -> Self {
        Self {
            from: from.into(),
            from_port,
            to: to.into(),
            to_port,
        }
    }
}

/// Configuration for one [`crate::Pipeline`].
pub struct PipelineConfig {
    /// The pipeline's own name, used for its `FilterCore` identity.
    pub name: String,
    /// The pipeline's child filters, in no particular order. Exclusively
    /// owned by the pipeline once `init` succeeds.
    pub filters: Vec<Arc<dyn FilterOps>>,
    /// Intra-DAG connections among `filters`.
    pub connections: Vec<PipelineConnection>,
    /// The name of the child filter the pipeline's single external input
    /// buffer is aliased to.
    pub input_filter: String,
    /// The input port (index into the designated input filter's owned
    /// input buffers) the alias targets.
    pub input_port: usize,
    /// The name of the child filter `sink_connect` on the pipeline forwards
    /// to.
    pub output_filter: String,
    /// The output port `sink_connect` on the pipeline forwards to.
    pub output_port: usize,
    /// The property contract the pipeline itself declares to an outer
    /// graph it participates in — independent of the contracts its
    /// children declare to each other internally.
    pub property_contract: PropertyContract,
}
