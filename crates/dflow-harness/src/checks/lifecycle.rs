//! Lifecycle checks: init→start→stop→deinit ordering, idempotent deinit
//! (P10), double-start rejection, stop-from-not-started no-op.

use std::sync::Arc;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow_error::Ec;
use dflow_filter::FilterOps;

use crate::fixtures::{CaptureSink, CountingSource};
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

/// `filt_start` twice in a row returns `AlreadyRunning` the second time,
/// and leaves the filter running.
pub fn double_start_is_rejected() -> HarnessCheck {
    let result = (|| {
        let source = CountingSource::new("lifecycle_double_start", 1, 1, 1000);
        let sink_buf = buf(2);
        source.sink_connect(0, Arc::clone(&sink_buf)).map_err(|e| format!("sink_connect failed: {e}"))?;
        sink_buf.start().map_err(|e| format!("buffer start failed: {e}"))?;

        Arc::clone(&source).start().map_err(|e| format!("first start failed: {e}"))?;
        let second = Arc::clone(&source).start();
        let _ = source.stop();
        match second {
            Err(Ec::AlreadyRunning) => Ok("second start returned AlreadyRunning as expected".to_string()),
            Err(other) => Err(format!("second start returned {other} instead of AlreadyRunning")),
            Ok(()) => Err("second start unexpectedly succeeded".to_string()),
        }
    })();
    from_result("lifecycle_double_start_rejected", Category::Lifecycle, result)
}

/// `filt_stop` on a filter that was never started is a no-op that still
/// returns `Ok`.
pub fn stop_from_not_started_is_noop() -> HarnessCheck {
    let result = (|| {
        let sink_buf = buf(2);
        let sink = CaptureSink::new("lifecycle_never_started", sink_buf, Duration::ZERO);
        sink.stop().map_err(|e| format!("stop on never-started filter failed: {e}"))?;
        Ok("stop on a never-started filter returned Ok".to_string())
    })();
    from_result("lifecycle_stop_from_not_started_is_noop", Category::Lifecycle, result)
}

/// P10: a second `filt_deinit` after the first succeeds is a no-op that
/// still returns `Ok`.
pub fn idempotent_deinit() -> HarnessCheck {
    let result = (|| {
        let sink_buf = buf(2);
        let sink = CaptureSink::new("lifecycle_idempotent_deinit", sink_buf, Duration::ZERO);
        sink.deinit().map_err(|e| format!("first deinit failed: {e}"))?;
        sink.deinit().map_err(|e| format!("second deinit failed: {e}"))?;
        Ok("deinit called twice, both Ok".to_string())
    })();
    from_result("p10_idempotent_deinit", Category::Lifecycle, result)
}

/// Returns every lifecycle check.
pub fn all() -> Vec<HarnessCheck> {
    vec![double_start_is_rejected(), stop_from_not_started_is_noop(), idempotent_deinit()]
}
