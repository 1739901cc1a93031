//! Threading checks: stop promptness and the join guarantee (P5), and the
//! scenario 6 stop-timing budget for a short chain under sustained load.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow_filter::FilterOps;

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

/// P5 / scenario 6: a 3-filter chain producing a 1 us period (roughly 1
/// MHz) is stopped 50 ms after starting. `stop` must return within a
/// generous budget, leave every filter not running, and the sink must have
/// processed a nonzero, strictly-increasing-while-running sample count.
pub fn stop_is_prompt_under_sustained_load() -> HarnessCheck {
    let result = (|| {
        let source_to_pass = buf(64, 32);
        let pass_to_sink = buf(64, 32);

        // far more than can be produced in 50ms at this rate, so stop races the source
        let source = CountingSource::new("threading_source", 10_000_000, 32, 1_000);
        let passthrough = Passthrough::new("threading_passthrough", Arc::clone(&source_to_pass));
        let sink = CaptureSink::new("threading_sink", Arc::clone(&pass_to_sink), Duration::ZERO);

        source.sink_connect(0, Arc::clone(&source_to_pass)).map_err(|e| format!("sink_connect failed: {e}"))?;
        passthrough
            .sink_connect(0, Arc::clone(&pass_to_sink))
            .map_err(|e| format!("sink_connect failed: {e}"))?;

        source_to_pass.start().map_err(|e| format!("buffer start failed: {e}"))?;
        pass_to_sink.start().map_err(|e| format!("buffer start failed: {e}"))?;

        Arc::clone(&source).start().map_err(|e| format!("source start failed: {e}"))?;
        Arc::clone(&passthrough).start().map_err(|e| format!("passthrough start failed: {e}"))?;
        Arc::clone(&sink).start().map_err(|e| format!("sink start failed: {e}"))?;

        std::thread::sleep(Duration::from_millis(50));

        let budget = Duration::from_millis(250);
        let start = Instant::now();
        source.stop().map_err(|e| format!("source stop failed: {e}"))?;
        passthrough.stop().map_err(|e| format!("passthrough stop failed: {e}"))?;
        sink.stop().map_err(|e| format!("sink stop failed: {e}"))?;
        let elapsed = start.elapsed();

        if elapsed > budget {
            return Err(format!("stop took {elapsed:?}, exceeding the {budget:?} budget"));
        }
        for (name, running) in [
            ("source", source.core().is_running()),
            ("passthrough", passthrough.core().is_running()),
            ("sink", sink.core().is_running()),
        ] {
            if running {
                return Err(format!("{name} still reports running after stop"));
            }
        }

        let processed = sink.get_stats().samples_processed;
        if processed == 0 {
            return Err("sink processed zero samples in 50ms of sustained load".to_string());
        }
        Ok(format!("stop returned in {elapsed:?} (budget {budget:?}), {processed} samples processed, all filters stopped"))
    })();
    from_result("threading_stop_is_prompt_under_sustained_load", Category::Threading, result)
}

/// Returns every threading check.
pub fn all() -> Vec<HarnessCheck> {
    vec![stop_is_prompt_under_sustained_load()]
}
