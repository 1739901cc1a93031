//! The pipeline container: a DAG of child filters wired up during `init`
//! and exposed to the outside world as a single filter.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dflow_buffer::{BatchBuffer, DType};
use dflow_error::{Ec, WorkerErrInfo};
use dflow_filter::{FilterConfig, FilterCore, FilterOps, FilterType};
use dflow_property::{PropagationResult, PropertyError, PropertyGraph};

use crate::config::PipelineConfig;

/// A DAG of child filters exposed through the ordinary [`FilterOps`] vtable.
///
/// A `Pipeline` owns its children exclusively: once [`Pipeline::init`]
/// succeeds, the only way to reach a child is through the pipeline
/// (`sink_connect` on the pipeline forwards to the designated output child,
/// and the pipeline's one input buffer is the designated input child's own
/// input buffer, shared by `Arc` rather than copied). The pipeline never
/// runs its own worker thread: its [`FilterOps::run`] is never invoked
/// because [`FilterOps::start`]/[`FilterOps::stop`] are overridden to
/// cascade to the children instead.
pub struct Pipeline {
    core: FilterCore,
    filters: Vec<Arc<dyn FilterOps>>,
    by_name: HashMap<String, Arc<dyn FilterOps>>,
    connections: Vec<crate::config::PipelineConnection>,
    output_filter: Arc<dyn FilterOps>,
    output_port: usize,
}

impl Pipeline {
    /// Wires up a pipeline from `config`.
    ///
    /// 1. Indexes the child filters by name, rejecting duplicates.
    /// 2. Resolves and bounds-checks the designated input and output
    ///    endpoints.
    /// 3. Wires every intra-DAG connection by calling `sink_connect` on the
    ///    producing child with the consuming child's own input buffer —
    ///    the ordinary connection mechanism, just run on filters that
    ///    happen to live inside this pipeline rather than at the top level.
    /// 4. Aliases the pipeline's single external input buffer to the
    ///    designated input child's input buffer: no data is copied between
    ///    the pipeline boundary and the child, they are the same
    ///    [`dflow_buffer::BatchBuffer`]. If the designated input child owns
    ///    no input buffers at all (a pure source, e.g. a signal generator),
    ///    the pipeline itself has no external input — it is a root pipeline
    ///    in the sense of §4.4's root-source requirement, and `input_port`
    ///    is not bounds-checked against it.
    ///
    /// # Errors
    /// [`Ec::InvalidConfig`] for an unresolvable or out-of-range endpoint
    /// name/port; whatever [`FilterOps::sink_connect`] returns for a bad
    /// intra-DAG connection.
    pub fn init(config: PipelineConfig) -> Result<Arc<Self>, Ec> {
        let mut filters = Vec::with_capacity(config.filters.len());
        let mut by_name = HashMap::with_capacity(config.filters.len());
        for filter in config.filters {
            let name = filter.core().name().to_string();
            if by_name.contains_key(&name) {
                return Err(Ec::InvalidConfig);
            }
            let _ = by_name.insert(name, Arc::clone(&filter));
            filters.push(filter);
        }

        let input_filter = by_name.get(&config.input_filter).cloned().ok_or(Ec::InvalidConfig)?;
        if !input_filter.core().input_buffers().is_empty() && config.input_port >= input_filter.core().input_buffers().len() {
            return Err(Ec::InvalidConfig);
        }

        let output_filter = by_name.get(&config.output_filter).cloned().ok_or(Ec::InvalidConfig)?;
        if config.output_port >= output_filter.core().max_sinks() {
            return Err(Ec::InvalidConfig);
        }

        for conn in &config.connections {
            let from = by_name.get(&conn.from).cloned().ok_or(Ec::InvalidConfig)?;
            let to = by_name.get(&conn.to).cloned().ok_or(Ec::InvalidConfig)?;
            if conn.to_port >= to.core().input_buffers().len() {
                return Err(Ec::InvalidConfig);
            }
            let sink = Arc::clone(&to.core().input_buffers()[conn.to_port]);
            from.sink_connect(conn.from_port, sink)?;
        }

        let aliased_inputs = if input_filter.core().input_buffers().is_empty() {
            Vec::new()
        } else {
            vec![Arc::clone(&input_filter.core().input_buffers()[config.input_port])]
        };
        let core = FilterCore::new(FilterConfig {
            name: config.name,
            filter_type: FilterType::Container,
            max_sinks: 1,
            input_buffers: aliased_inputs,
            property_contract: config.property_contract,
        });

        Ok(Arc::new(Self {
            core,
            filters,
            by_name,
            connections: config.connections,
            output_filter,
            output_port: config.output_port,
        }))
    }

    /// The child filters, in the order they were declared in
    /// [`PipelineConfig::filters`].
    #[must_use]
    pub fn children(&self) -> &[Arc<dyn FilterOps>] {
        &self.filters
    }

    /// A named child, if this pipeline has one by that name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Arc<dyn FilterOps>> {
        self.by_name.get(name)
    }

    /// Builds a [`PropertyGraph`] from the children's declared contracts and
    /// the intra-DAG connections, and validates it.
    ///
    /// This is deliberately a separate call from [`Pipeline::init`]: a
    /// pipeline can be fully wired (every `sink_connect` already having
    /// succeeded) yet still violate a property constraint a single
    /// `dtype`/port check at `init` time could not catch (sample-period
    /// alignment across a multi-input filter, for instance). Callers are
    /// expected to call this before `start` and treat failure the same way
    /// they would a failed `init`: no worker thread is ever spawned.
    ///
    /// # Errors
    /// See [`PropertyGraph::validate`].
    pub fn validate_properties(&self) -> Result<PropagationResult, PropertyError> {
        let mut graph = PropertyGraph::new();
        for filter in &self.filters {
            graph.add_filter(filter.core().name().to_string(), filter.core().property_contract().clone());
        }
        for conn in &self.connections {
            graph.connect(&conn.from, &conn.to, conn.to_port);
        }
        graph.validate()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.core.name())
            .field("running", &self.core.is_running())
            .field("children", &self.filters.len())
            .finish()
    }
}

impl FilterOps for Pipeline {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    /// Never invoked: [`Pipeline::start`]/[`Pipeline::stop`] cascade to the
    /// children directly rather than spawning a worker thread of the
    /// pipeline's own.
    fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
        Ok(())
    }

    fn output_dtype(&self, port: usize) -> Option<DType> {
        if port == 0 {
            self.output_filter.output_dtype(self.output_port)
        } else {
            None
        }
    }

    /// Validates every child's property contract, then starts every child
    /// in declaration order. On the first failure, the children already
    /// started are stopped again and the error is propagated; the pipeline
    /// never ends up partially running, and a property violation leaves it
    /// not running at all.
    fn start(self: Arc<Self>) -> Result<(), Ec> {
        use std::sync::atomic::Ordering;

        self.validate_properties().map_err(|e| e.code)?;

        let was_running = self.core.running_flag().swap(true, Ordering::AcqRel);
        if was_running {
            return Err(Ec::AlreadyRunning);
        }

        for (idx, filter) in self.filters.iter().enumerate() {
            if let Err(e) = Arc::clone(filter).start() {
                tracing::error!(pipeline = %self.core.name(), child = %filter.core().name(), error = ?e, "child failed to start, rolling back");
                for started in &self.filters[..idx] {
                    let _ = started.stop();
                }
                self.core.running_flag().store(false, Ordering::Release);
                return Err(e);
            }
        }
        tracing::info!(pipeline = %self.core.name(), children = self.filters.len(), "pipeline started");
        Ok(())
    }

    /// Stops every child, in reverse declaration order, so a downstream
    /// sink drains before its upstream producer is torn down.
    fn stop(&self) -> Result<(), Ec> {
        use std::sync::atomic::Ordering;

        self.core.running_flag().store(false, Ordering::Release);
        let mut first_err = None;
        for filter in self.filters.iter().rev() {
            if let Err(e) = filter.stop() {
                tracing::error!(pipeline = %self.core.name(), child = %filter.core().name(), error = ?e, "child failed to stop cleanly");
                first_err.get_or_insert(e);
            }
        }
        tracing::info!(pipeline = %self.core.name(), "pipeline stopped");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops (if running) and deinits every child, in reverse declaration
    /// order. Idempotent: a second call finds every child already deinited.
    fn deinit(&self) -> Result<(), Ec> {
        if self.core.is_running() {
            self.stop()?;
        }
        let mut first_err = None;
        for filter in self.filters.iter().rev() {
            if let Err(e) = filter.deinit() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forwards to the designated output child instead of recording the
    /// connection locally: the pipeline has no sink table of its own.
    fn sink_connect(&self, port: usize, sink: Arc<BatchBuffer>) -> Result<(), Ec> {
        if port != 0 {
            return Err(Ec::ExceedsMaxSinks);
        }
        self.output_filter.sink_connect(self.output_port, sink)
    }

    /// A one-line summary of the pipeline followed by one line per child.
    fn describe(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "{} (Container): running={} children={}",
            self.core.name(),
            self.core.is_running(),
            self.filters.len()
        )?;
        for filter in &self.filters {
            write!(out, "  - ")?;
            filter.describe(out)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dflow_buffer::{BufferConfig, OverflowPolicy, Sample};
    use dflow_error::worker_fatal;
    use dflow_property::{Behavior, PropertyKey, PropertyValue};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn buf(capacity: usize, dtype: DType) -> Arc<BatchBuffer> {
        Arc::new(
            BatchBuffer::new(BufferConfig {
                capacity,
                max_batch_samples: 4,
                dtype,
                overflow_policy: OverflowPolicy::Block,
                consumer_active_returns_error: false,
                default_timeout_ms: 200,
            })
            .unwrap(),
        )
    }

    struct CountingSource {
        core: FilterCore,
        n: usize,
        emitted: AtomicUsize,
    }

    impl CountingSource {
        fn new(name: &str, n: usize) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: name.into(),
                    filter_type: FilterType::Source,
                    max_sinks: 1,
                    input_buffers: Vec::new(),
                    property_contract: dflow_property::PropertyContract::new()
                        .with_behavior(Behavior::Set(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
                }),
                n,
                emitted: AtomicUsize::new(0),
            })
        }
    }

    impl FilterOps for CountingSource {
        fn core(&self) -> &FilterCore {
            &self.core
        }

        fn output_dtype(&self, _port: usize) -> Option<DType> {
            Some(DType::F32)
        }

        fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
            let timeout = Some(Duration::from_millis(200));
            while self.core().is_running() {
                let i = self.emitted.load(AtomicOrdering::Relaxed);
                if i >= self.n {
                    let _ = self.emit_complete(timeout);
                    return Ok(());
                }
                let sink = match self.sink_at(0) {
                    Some(s) => s,
                    None => worker_fatal!(self.core(), Ec::NoSink, "source has no sink"),
                };
                let mut head = match sink.get_head() {
                    Ok(h) => h,
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "get_head failed"),
                };
                head.fill(&[Sample::F32(i as f32)]);
                match sink.submit(head, timeout) {
                    Ok(()) => {}
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "submit failed"),
                }
                self.core().record_batch(1);
                let _ = self.emitted.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Ok(())
        }
    }

    /// Forwards every sample from its one input to its one sink, doubling
    /// the value. Stands in for a real transform in pipeline wiring tests.
    struct Doubler {
        core: FilterCore,
        input: Arc<BatchBuffer>,
    }

    impl Doubler {
        fn new(name: &str, input: Arc<BatchBuffer>) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: name.into(),
                    filter_type: FilterType::Transform,
                    max_sinks: 1,
                    input_buffers: vec![Arc::clone(&input)],
                    property_contract: dflow_property::PropertyContract::new()
                        .with_behavior(Behavior::Preserve(PropertyKey::DataType, 0)),
                }),
                input,
            })
        }
    }

    impl FilterOps for Doubler {
        fn core(&self) -> &FilterCore {
            &self.core
        }

        fn output_dtype(&self, _port: usize) -> Option<DType> {
            Some(DType::F32)
        }

        fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
            let timeout = Some(Duration::from_millis(200));
            loop {
                let tail = match self.input.get_tail(timeout) {
                    Ok(t) => t,
                    Err(Ec::Complete) => {
                        let _ = self.emit_complete(timeout);
                        return Ok(());
                    }
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "get_tail failed"),
                };
                let doubled: Vec<Sample> = tail
                    .valid_samples()
                    .into_iter()
                    .map(|s| match s {
                        Sample::F32(v) => Sample::F32(v * 2.0),
                        other => other,
                    })
                    .collect();
                let n = tail.meta().head;
                self.input.release_tail(tail);

                let sink = match self.sink_at(0) {
                    Some(s) => s,
                    None => worker_fatal!(self.core(), Ec::NoSink, "doubler has no sink"),
                };
                let mut head = match sink.get_head() {
                    Ok(h) => h,
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "get_head failed"),
                };
                head.fill(&doubled);
                match sink.submit(head, timeout) {
                    Ok(()) => {}
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "submit failed"),
                }
                self.core().record_batch(n);
            }
        }
    }

    struct CaptureSink {
        core: FilterCore,
        input: Arc<BatchBuffer>,
        captured: Mutex<Vec<f32>>,
    }

    impl CaptureSink {
        fn new(name: &str, input: Arc<BatchBuffer>) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: name.into(),
                    filter_type: FilterType::Sink,
                    max_sinks: 0,
                    input_buffers: vec![Arc::clone(&input)],
                    property_contract: dflow_property::PropertyContract::new()
                        .with_constraint(dflow_property::Constraint::Eq(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
                }),
                input,
                captured: Mutex::new(Vec::new()),
            })
        }
    }

    impl FilterOps for CaptureSink {
        fn core(&self) -> &FilterCore {
            &self.core
        }

        fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
            let timeout = Some(Duration::from_millis(200));
            loop {
                let tail = match self.input.get_tail(timeout) {
                    Ok(t) => t,
                    Err(Ec::Complete) => return Ok(()),
                    Err(Ec::Stopped) => return Ok(()),
                    Err(e) => worker_fatal!(self.core(), e, "get_tail failed"),
                };
                let mut captured = self.captured.lock().expect("capture mutex poisoned");
                for sample in tail.valid_samples() {
                    if let Sample::F32(v) = sample {
                        captured.push(v);
                    }
                }
                let n = tail.meta().head;
                drop(captured);
                self.input.release_tail(tail);
                self.core().record_batch(n);
            }
        }
    }

    /// A sink whose contract requires a property the `CountingSource` never
    /// sets, used to exercise a `validate_properties` failure that has
    /// nothing to do with `dtype`.
    struct PickySink {
        core: FilterCore,
        input: Arc<BatchBuffer>,
    }

    impl PickySink {
        fn new(name: &str, input: Arc<BatchBuffer>) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: name.into(),
                    filter_type: FilterType::Sink,
                    max_sinks: 0,
                    input_buffers: vec![Arc::clone(&input)],
                    property_contract: dflow_property::PropertyContract::new()
                        .with_constraint(dflow_property::Constraint::Exists(PropertyKey::SamplePeriodNs)),
                }),
                input,
            })
        }
    }

    impl FilterOps for PickySink {
        fn core(&self) -> &FilterCore {
            &self.core
        }

        fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
            Ok(())
        }
    }

    fn build_pipeline() -> (Arc<Pipeline>, Arc<CaptureSink>) {
        let internal = buf(8, DType::F32);
        let source = CountingSource::new("source", 16);
        let doubler = Doubler::new("doubler", Arc::clone(&internal));
        let sink_buf = buf(8, DType::F32);
        let sink = CaptureSink::new("sink", Arc::clone(&sink_buf));

        let config = PipelineConfig {
            name: "doubling_pipeline".into(),
            filters: vec![source.clone() as Arc<dyn FilterOps>, doubler.clone() as Arc<dyn FilterOps>, sink.clone() as Arc<dyn FilterOps>],
            connections: vec![
                crate::config::PipelineConnection::new("source", 0, "doubler", 0),
                crate::config::PipelineConnection::new("doubler", 0, "sink", 0),
            ],
            input_filter: "source".into(),
            input_port: 0,
            output_filter: "sink".into(),
            output_port: 0,
            property_contract: dflow_property::PropertyContract::new(),
        };

        (Pipeline::init(config).unwrap(), sink)
    }

    #[test]
    fn pipeline_delivers_transformed_samples_end_to_end() {
        let (pipeline, sink) = build_pipeline();

        assert!(pipeline.validate_properties().is_ok());

        Arc::clone(&pipeline).start().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        pipeline.stop().unwrap();

        let captured = sink.captured.lock().unwrap().clone();
        assert_eq!(captured, (0..16).map(|i| (i as f32) * 2.0).collect::<Vec<_>>());
    }

    #[test]
    fn init_rejects_unknown_endpoint_names() {
        let source = CountingSource::new("source", 1);
        let config = PipelineConfig {
            name: "bad".into(),
            filters: vec![source as Arc<dyn FilterOps>],
            connections: Vec::new(),
            input_filter: "does-not-exist".into(),
            input_port: 0,
            output_filter: "source".into(),
            output_port: 0,
            property_contract: dflow_property::PropertyContract::new(),
        };
        assert_eq!(Pipeline::init(config).unwrap_err(), Ec::InvalidConfig);
    }

    #[test]
    fn init_rejects_duplicate_filter_names() {
        let a = CountingSource::new("dup", 1);
        let b = CountingSource::new("dup", 1);
        let config = PipelineConfig {
            name: "bad".into(),
            filters: vec![a as Arc<dyn FilterOps>, b as Arc<dyn FilterOps>],
            connections: Vec::new(),
            input_filter: "dup".into(),
            input_port: 0,
            output_filter: "dup".into(),
            output_port: 0,
            property_contract: dflow_property::PropertyContract::new(),
        };
        assert_eq!(Pipeline::init(config).unwrap_err(), Ec::InvalidConfig);
    }

    #[test]
    fn validate_properties_catches_a_property_violation_without_starting_anything() {
        let sink_buf = buf(8, DType::F32);
        let source = CountingSource::new("source", 1);
        let sink = PickySink::new("sink", Arc::clone(&sink_buf));

        let config = PipelineConfig {
            name: "mismatched".into(),
            filters: vec![source.clone() as Arc<dyn FilterOps>, sink.clone() as Arc<dyn FilterOps>],
            connections: vec![crate::config::PipelineConnection::new("source", 0, "sink", 0)],
            input_filter: "source".into(),
            input_port: 0,
            output_filter: "source".into(),
            output_port: 0,
            property_contract: dflow_property::PropertyContract::new(),
        };

        let pipeline = Pipeline::init(config).unwrap();
        let err = pipeline.validate_properties().unwrap_err();
        assert_eq!(err.code, Ec::PropertyViolation);
        assert!(!pipeline.core().is_running());
    }

    #[test]
    fn stop_and_deinit_are_idempotent() {
        let (pipeline, _sink) = build_pipeline();
        Arc::clone(&pipeline).start().unwrap();
        pipeline.stop().unwrap();
        pipeline.stop().unwrap();
        pipeline.deinit().unwrap();
        pipeline.deinit().unwrap();
    }
}
