//! A filter's outgoing connection to a downstream input buffer.

use std::sync::Arc;

use dflow_buffer::BatchBuffer;

/// A `(source_filter, output_port, destination_buffer)` tuple, stored only
/// on the source side: the destination buffer has no back-reference to its
/// producer.
///
/// The sink buffer is non-owning: the filter that owns it (as one of its
/// input buffers) is responsible for its lifetime, and a pipeline is
/// expected to stop children in reverse topological order before any
/// `deinit` so a producer never outlives the buffer it writes into.
#[derive(Clone)]
pub struct Connection {
    /// The downstream input buffer this output port feeds.
    pub sink: Arc<BatchBuffer>,
}

impl Connection {
    /// Wraps a sink buffer reference in a new connection.
    #[must_use]
    pub fn new(sink: Arc<BatchBuffer>) -> Self {
        Self { sink }
    }
}
