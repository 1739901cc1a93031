//! Data-flow checks: SPSC FIFO ordering and bitwise equality (P1),
//! completion propagation (P9).

use std::sync::Arc;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow_filter::{FilterOps, Health};

use crate::fixtures::{CaptureSink, CountingSource, Passthrough};
use crate::report::{from_result, Category, HarnessCheck};

fn buf(capacity: usize, max_batch_samples: usize) -> Arc<BatchBuffer> {
    Arc::new(
        BatchBuffer::new(BufferConfig {
            capacity,
            max_batch_samples,
            dtype: DType::F32,
            overflow_policy: OverflowPolicy::Block,
            consumer_active_returns_error: false,
            default_timeout_ms: 1000,
        })
        .expect("harness fixture buffer config is always valid"),
    )
}

fn run_chain(total: usize, batch_size: usize, ring: usize) -> Result<Arc<CaptureSink>, String> {
    let source_to_pass = buf(ring, batch_size);
    let pass_to_sink = buf(ring, batch_size);

    let source = CountingSource::new("dataflow_source", total, batch_size, 1000);
    let passthrough = Passthrough::new("dataflow_passthrough", Arc::clone(&source_to_pass));
    let sink = CaptureSink::new("dataflow_sink", Arc::clone(&pass_to_sink), Duration::ZERO);

    source.sink_connect(0, Arc::clone(&source_to_pass)).map_err(|e| format!("source sink_connect failed: {e}"))?;
    passthrough
        .sink_connect(0, Arc::clone(&pass_to_sink))
        .map_err(|e| format!("passthrough sink_connect failed: {e}"))?;

    source_to_pass.start().map_err(|e| format!("source_to_pass start failed: {e}"))?;
    pass_to_sink.start().map_err(|e| format!("pass_to_sink start failed: {e}"))?;

    Arc::clone(&source).start().map_err(|e| format!("source start failed: {e}"))?;
    Arc::clone(&passthrough).start().map_err(|e| format!("passthrough start failed: {e}"))?;
    Arc::clone(&sink).start().map_err(|e| format!("sink start failed: {e}"))?;

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sink.all_samples().len() < total && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let _ = source.stop();
    let _ = passthrough.stop();
    let _ = sink.stop();

    Ok(sink)
}

/// P1, seeded with scenario 1: `R(1024)` in batches of 64 through a
/// `PRESERVE`-everything passthrough into a capture sink with ring 16.
/// Expects 16 batches of `head == 64`, 1024 samples total, `data[i] == i`
/// globally, and `t_ns` of batch `k` equal to `64_000 * k`.
pub fn p1_spsc_fifo_ordering() -> HarnessCheck {
    let result = (|| {
        let sink = run_chain(1024, 64, 16)?;
        let batches = sink.captured();

        if batches.len() != 16 {
            return Err(format!("expected 16 batches, got {}", batches.len()));
        }
        for (k, batch) in batches.iter().enumerate() {
            if batch.samples.len() != 64 {
                return Err(format!("batch {k} has head {}, expected 64", batch.samples.len()));
            }
            if batch.t_ns != 64_000 * k as i64 {
                return Err(format!("batch {k} has t_ns {}, expected {}", batch.t_ns, 64_000 * k as i64));
            }
        }

        let all: Vec<f32> = batches.into_iter().flat_map(|b| b.samples).collect();
        if all.len() != 1024 {
            return Err(format!("expected 1024 total samples, got {}", all.len()));
        }
        for (i, v) in all.iter().enumerate() {
            if (*v - i as f32).abs() > f32::EPSILON {
                return Err(format!("sample {i} was {v}, expected {i}"));
            }
        }
        Ok("16 batches of head=64 delivered in order, t_ns and sample values exactly as expected".to_string())
    })();
    from_result("p1_spsc_fifo_ordering", Category::DataFlow, result)
}

/// P9: a source emitting `N` batches then `COMPLETE` causes the downstream
/// sink to consume exactly `N` batches of data, observe `COMPLETE`, and
/// every worker thread exits cleanly (health never reports `Failed`).
pub fn p9_completion_propagation() -> HarnessCheck {
    let result = (|| {
        let source_to_pass = buf(8, 4);
        let pass_to_sink = buf(8, 4);

        let source = CountingSource::new("p9_source", 40, 4, 1000);
        let passthrough = Passthrough::new("p9_passthrough", Arc::clone(&source_to_pass));
        let sink = CaptureSink::new("p9_sink", Arc::clone(&pass_to_sink), Duration::ZERO);

        source.sink_connect(0, Arc::clone(&source_to_pass)).map_err(|e| format!("sink_connect failed: {e}"))?;
        passthrough
            .sink_connect(0, Arc::clone(&pass_to_sink))
            .map_err(|e| format!("sink_connect failed: {e}"))?;

        source_to_pass.start().map_err(|e| format!("buffer start failed: {e}"))?;
        pass_to_sink.start().map_err(|e| format!("buffer start failed: {e}"))?;

        Arc::clone(&source).start().map_err(|e| format!("source start failed: {e}"))?;
        Arc::clone(&passthrough).start().map_err(|e| format!("passthrough start failed: {e}"))?;
        Arc::clone(&sink).start().map_err(|e| format!("sink start failed: {e}"))?;

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.all_samples().len() < 40 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // give the sink's worker a moment to observe COMPLETE after its last batch
        std::thread::sleep(Duration::from_millis(50));

        let _ = source.stop();
        let _ = passthrough.stop();
        let _ = sink.stop();

        let total: usize = sink.all_samples().len();
        if total != 40 {
            return Err(format!("sink consumed {total} samples, expected exactly 40"));
        }
        for (name, health) in [
            ("source", source.get_health()),
            ("passthrough", passthrough.get_health()),
            ("sink", sink.get_health()),
        ] {
            if matches!(health, Health::Failed(_)) {
                return Err(format!("{name} reported Failed health after completion: {health:?}"));
            }
        }
        Ok("all 40 samples consumed, COMPLETE observed, no worker failed".to_string())
    })();
    from_result("p9_completion_propagation", Category::DataFlow, result)
}

/// Returns every data-flow check.
pub fn all() -> Vec<HarnessCheck> {
    vec![p1_spsc_fifo_ordering(), p9_completion_propagation()]
}
