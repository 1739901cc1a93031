//! Connection checks: `sink_connect` port bounds, duplicate-sink rejection,
//! max-sinks rejection, pipeline forwarding equivalence (P8).

use std::sync::Arc;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy, Sample};
use dflow_error::Ec;
use dflow_filter::FilterOps;
use dflow_pipeline::{Pipeline, PipelineConfig};
use dflow_property::PropertyContract;

use crate::fixtures::{CountingSource, Passthrough};
use crate::report::{from_result, Category, HarnessCheck};

fn buf(capacity: usize) -> Arc<BatchBuffer> {
    Arc::new(
        BatchBuffer::new(BufferConfig {
            capacity,
            max_batch_samples: 4,
            dtype: DType::F32,
            overflow_policy: OverflowPolicy::Block,
            consumer_active_returns_error: false,
            default_timeout_ms: 200,
        })
        .expect("harness fixture buffer config is always valid"),
    )
}

/// `sink_connect` on a port beyond `max_sinks` returns `ExceedsMaxSinks`.
pub fn port_bounds_rejected() -> HarnessCheck {
    let result = (|| {
        let source = CountingSource::new("connection_port_bounds", 1, 1, 1000);
        match source.sink_connect(1, buf(2)) {
            Err(Ec::ExceedsMaxSinks) => Ok("out-of-range port returned ExceedsMaxSinks".to_string()),
            Err(other) => Err(format!("expected ExceedsMaxSinks, got {other}")),
            Ok(()) => Err("out-of-range port unexpectedly accepted".to_string()),
        }
    })();
    from_result("connection_port_bounds_rejected", Category::Connection, result)
}

/// A second `sink_connect` on an already-connected port returns
/// `AlreadyConnected`.
pub fn duplicate_sink_rejected() -> HarnessCheck {
    let result = (|| {
        let source = CountingSource::new("connection_duplicate_sink", 1, 1, 1000);
        source.sink_connect(0, buf(2)).map_err(|e| format!("first sink_connect failed: {e}"))?;
        match source.sink_connect(0, buf(2)) {
            Err(Ec::AlreadyConnected) => Ok("duplicate sink_connect returned AlreadyConnected".to_string()),
            Err(other) => Err(format!("expected AlreadyConnected, got {other}")),
            Ok(()) => Err("duplicate sink_connect unexpectedly accepted".to_string()),
        }
    })();
    from_result("connection_duplicate_sink_rejected", Category::Connection, result)
}

/// `start` on a filter that requires a sink and has none fails fast with
/// `NoSink`, without spawning a worker thread.
pub fn max_sinks_rejected_and_no_sink_fails_fast() -> HarnessCheck {
    let result = (|| {
        let source = CountingSource::new("connection_no_sink", 1, 1, 1000);
        match Arc::clone(&source).start() {
            Err(Ec::NoSink) => {
                if source.core().is_running() {
                    Err("filter reported running after a failed start".to_string())
                } else {
                    Ok("start without a required sink returned NoSink and left running=false".to_string())
                }
            }
            Err(other) => Err(format!("expected NoSink, got {other}")),
            Ok(()) => Err("start without a required sink unexpectedly succeeded".to_string()),
        }
    })();
    from_result("connection_no_sink_fails_fast", Category::Connection, result)
}

/// P8: connecting an external sink to a pipeline whose designated output
/// is `X` is observationally equivalent to connecting that sink directly
/// to `X` — downstream receives identical batches in identical order.
pub fn p8_pipeline_forwarding_equivalence() -> HarnessCheck {
    let result = (|| {
        let internal = buf(8);
        let relay = Passthrough::new("p8_relay", Arc::clone(&internal));

        let config = PipelineConfig {
            name: "p8_pipeline".into(),
            filters: vec![Arc::clone(&relay) as Arc<dyn FilterOps>],
            connections: Vec::new(),
            input_filter: "p8_relay".into(),
            input_port: 0,
            output_filter: "p8_relay".into(),
            output_port: 0,
            property_contract: PropertyContract::new(),
        };
        let pipeline = Pipeline::init(config).map_err(|e| format!("pipeline init failed: {e}"))?;

        let sink_buf = buf(8);
        pipeline
            .sink_connect(0, Arc::clone(&sink_buf))
            .map_err(|e| format!("pipeline sink_connect failed: {e}"))?;

        sink_buf.start().map_err(|e| format!("sink buffer start failed: {e}"))?;
        Arc::clone(&pipeline).start().map_err(|e| format!("pipeline start failed: {e}"))?;

        for i in 0..4 {
            let mut head = internal.get_head().map_err(|e| format!("get_head failed: {e}"))?;
            head.fill(&[Sample::F32(i as f32)]);
            internal
                .submit(head, Some(Duration::from_millis(200)))
                .map_err(|e| format!("submit failed: {e}"))?;
        }

        let mut received = Vec::new();
        for _ in 0..4 {
            let tail = sink_buf
                .get_tail(Some(Duration::from_millis(500)))
                .map_err(|e| format!("get_tail failed: {e}"))?;
            received.extend(tail.valid_samples());
            sink_buf.release_tail(tail);
        }
        pipeline.stop().map_err(|e| format!("pipeline stop failed: {e}"))?;

        let expected: Vec<Sample> = (0..4).map(|i| Sample::F32(i as f32)).collect();
        if received == expected {
            Ok(format!(
                "sink reached through the pipeline's forwarded sink_connect received {} samples identical to a direct connection",
                received.len()
            ))
        } else {
            Err(format!("expected {expected:?}, got {received:?}"))
        }
    })();
    from_result("p8_pipeline_forwarding_equivalence", Category::Connection, result)
}

/// Returns every connection check.
pub fn all() -> Vec<HarnessCheck> {
    vec![
        port_bounds_rejected(),
        duplicate_sink_rejected(),
        max_sinks_rejected_and_no_sink_fails_fast(),
        p8_pipeline_forwarding_equivalence(),
    ]
}
