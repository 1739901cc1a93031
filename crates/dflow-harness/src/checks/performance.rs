//! Performance checks: zero drops under backpressure with `Block` (P3),
//! and `produced == consumed + dropped_by_producer` under `DropHead` (P4).

use std::sync::Arc;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow_filter::FilterOps;

use crate::fixtures::{CaptureSink, CountingSource};
use crate::report::{from_result, Category, HarnessCheck};

fn buf(capacity: usize, max_batch_samples: usize, policy: OverflowPolicy) -> Arc<BatchBuffer> {
    Arc::new(
        BatchBuffer::new(BufferConfig {
            capacity,
            max_batch_samples,
            dtype: DType::F32,
            overflow_policy: policy,
            consumer_active_returns_error: false,
            default_timeout_ms: 2000,
        })
        .expect("harness fixture buffer config is always valid"),
    )
}

/// P3: with `Block`, a slow consumer never causes a producer to drop a
/// batch; every submitted batch is eventually consumed.
pub fn p3_block_produces_zero_drops() -> HarnessCheck {
    let result = (|| {
        let buffer = buf(4, 8, OverflowPolicy::Block);
        let source = CountingSource::new("perf_block_source", 200, 8, 1000);
        let sink = CaptureSink::new("perf_block_sink", Arc::clone(&buffer), Duration::from_millis(2));

        source.sink_connect(0, Arc::clone(&buffer)).map_err(|e| format!("sink_connect failed: {e}"))?;
        buffer.start().map_err(|e| format!("buffer start failed: {e}"))?;
        Arc::clone(&source).start().map_err(|e| format!("source start failed: {e}"))?;
        Arc::clone(&sink).start().map_err(|e| format!("sink start failed: {e}"))?;

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sink.all_samples().len() < 200 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let _ = source.stop();
        let _ = sink.stop();

        let stats = buffer.stats();
        if stats.dropped_by_producer != 0 {
            return Err(format!("expected zero drops under Block, got {}", stats.dropped_by_producer));
        }
        let total = sink.all_samples().len();
        if total != 200 {
            return Err(format!("expected all 200 samples consumed, got {total}"));
        }
        Ok(format!("0 drops, {total}/200 samples delivered under Block against a slow consumer"))
    })();
    from_result("p3_block_produces_zero_drops", Category::Performance, result)
}

/// P4: with `DropHead`, every batch the producer drops is counted, and a
/// dropped batch is never also submitted — once the run settles and the
/// sink has drained, `total_batches == consumed` (a dropped batch never
/// reaches `total_batches` at all; see `ring.rs`'s `submit`).
pub fn p4_drop_head_accounting_balances() -> HarnessCheck {
    let result = (|| {
        let buffer = buf(2, 8, OverflowPolicy::DropHead);
        let source = CountingSource::new("perf_drophead_source", 400, 8, 1000);
        let sink = CaptureSink::new("perf_drophead_sink", Arc::clone(&buffer), Duration::from_millis(5));

        source.sink_connect(0, Arc::clone(&buffer)).map_err(|e| format!("sink_connect failed: {e}"))?;
        buffer.start().map_err(|e| format!("buffer start failed: {e}"))?;
        Arc::clone(&source).start().map_err(|e| format!("source start failed: {e}"))?;
        Arc::clone(&sink).start().map_err(|e| format!("sink start failed: {e}"))?;

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while source.core().is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        // let the sink drain whatever is still queued
        std::thread::sleep(Duration::from_millis(100));
        let _ = source.stop();
        let _ = sink.stop();

        let stats = buffer.stats();
        if stats.dropped_by_producer == 0 {
            return Err("expected at least one drop under DropHead with a slow consumer".to_string());
        }
        if stats.total_batches != stats.consumed {
            return Err(format!(
                "accounting mismatch: total_batches={} consumed={} (dropped={})",
                stats.total_batches, stats.consumed, stats.dropped_by_producer
            ));
        }
        Ok(format!(
            "total_batches={} == consumed={}, dropped_by_producer={}",
            stats.total_batches, stats.consumed, stats.dropped_by_producer
        ))
    })();
    from_result("p4_drop_head_accounting_balances", Category::Performance, result)
}

/// Returns every performance check.
pub fn all() -> Vec<HarnessCheck> {
    vec![p3_block_produces_zero_drops(), p4_drop_head_accounting_balances()]
}
