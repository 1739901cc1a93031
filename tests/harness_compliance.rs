//! Runs the full generic compliance suite against the runtime's own
//! core types, and exercises two of the concrete end-to-end scenarios
//! directly against the public `dflow` crate surface.

use std::sync::Arc;
use std::time::Duration;

use dflow::buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow::filter::FilterOps;
use dflow::harness;
use dflow::pipeline::{Pipeline, PipelineConfig};
use dflow::property::{Constraint, PropertyContract, PropertyKey};
use dflow::Ec;

fn buf(capacity: usize) -> Arc<BatchBuffer> {
    Arc::new(
        BatchBuffer::new(BufferConfig {
            capacity,
            max_batch_samples: 64,
            dtype: DType::F32,
            overflow_policy: OverflowPolicy::Block,
            consumer_active_returns_error: false,
            default_timeout_ms: 500,
        })
        .expect("valid buffer config"),
    )
}

#[test]
fn full_compliance_suite_passes() {
    let report = harness::run_all();
    let failures = report.failures();
    assert!(failures.is_empty(), "harness reported failures:\n{report}");
}

/// Scenario 1: `R(1024)` through a linear source -> passthrough -> sink
/// chain wrapped in a pipeline, `t_ns` advancing by `batch_size * period_ns`.
#[test]
fn scenario_1_linear_chain_through_a_pipeline() {
    let internal = buf(16);
    let source = harness::CountingSource::new("scenario1_source", 1024, 64, 1000);
    let relay = harness::Passthrough::new("scenario1_relay", Arc::clone(&internal));

    source.sink_connect(0, Arc::clone(&internal)).expect("sink_connect");

    let config = PipelineConfig {
        name: "scenario1_pipeline".into(),
        filters: vec![source.clone() as Arc<dyn FilterOps>, relay.clone() as Arc<dyn FilterOps>],
        connections: Vec::new(),
        input_filter: "scenario1_relay".into(),
        input_port: 0,
        output_filter: "scenario1_relay".into(),
        output_port: 0,
        property_contract: PropertyContract::new(),
    };
    let pipeline = Pipeline::init(config).expect("pipeline wiring should succeed");
    assert!(pipeline.validate_properties().is_ok());

    let sink_buf = buf(16);
    let sink = harness::CaptureSink::new("scenario1_sink", Arc::clone(&sink_buf), Duration::ZERO);
    pipeline.sink_connect(0, Arc::clone(&sink_buf)).expect("pipeline sink_connect");

    Arc::clone(&pipeline).start().expect("pipeline start");
    Arc::clone(&sink).start().expect("sink start");

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sink.all_samples().len() < 1024 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    pipeline.stop().expect("pipeline stop");
    sink.stop().expect("sink stop");

    let all = sink.all_samples();
    assert_eq!(all.len(), 1024);
    for (i, v) in all.iter().enumerate() {
        assert!((*v - i as f32).abs() < f32::EPSILON, "sample {i} was {v}");
    }
}

struct RequiresMinBatchCapacity {
    core: dflow::FilterCore,
    input: Arc<BatchBuffer>,
}

impl RequiresMinBatchCapacity {
    fn new(name: &str, input: Arc<BatchBuffer>) -> Arc<Self> {
        Arc::new(Self {
            core: dflow::FilterCore::new(dflow::FilterConfig {
                name: name.into(),
                filter_type: dflow::FilterType::Sink,
                max_sinks: 0,
                input_buffers: vec![Arc::clone(&input)],
                property_contract: PropertyContract::new().with_constraint(Constraint::Exists(PropertyKey::MinBatchCapacity)),
            }),
            input,
        })
    }
}

impl FilterOps for RequiresMinBatchCapacity {
    fn core(&self) -> &dflow::FilterCore {
        &self.core
    }

    fn run(self: Arc<Self>) -> Result<(), dflow::WorkerErrInfo> {
        Ok(())
    }
}

/// Scenario 5: a pipeline whose output child requires a property no
/// upstream filter ever sets fails `validate_properties` with
/// `PropertyViolation`, before any worker starts.
#[test]
fn scenario_5_property_violation_exits_before_any_worker_starts() {
    let sink_input = buf(4);
    let source = harness::CountingSource::new("scenario5_source", 4, 4, 1000);
    let picky = RequiresMinBatchCapacity::new("scenario5_sink", Arc::clone(&sink_input));

    let config = PipelineConfig {
        name: "scenario5_pipeline".into(),
        filters: vec![source.clone() as Arc<dyn FilterOps>, picky.clone() as Arc<dyn FilterOps>],
        connections: vec![dflow::PipelineConnection::new("scenario5_source", 0, "scenario5_sink", 0)],
        input_filter: "scenario5_source".into(),
        input_port: 0,
        output_filter: "scenario5_source".into(),
        output_port: 0,
        property_contract: PropertyContract::new(),
    };
    let pipeline = Pipeline::init(config).expect("pipeline wiring should succeed; the violation is property-level, not connection-level");

    let validate_err = pipeline.validate_properties().expect_err("MinBatchCapacity is never set by the source");
    assert_eq!(validate_err.code, Ec::PropertyViolation);

    let start_err = Arc::clone(&pipeline).start().expect_err("start must refuse to run a property-violating pipeline");
    assert_eq!(start_err, Ec::PropertyViolation);
    assert!(!pipeline.core().is_running());
}
