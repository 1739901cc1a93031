//! Buffer-configuration checks: power-of-two capacity validation, and dtype
//! mismatch rejection at `sink_connect`.

use std::sync::Arc;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy};
use dflow_error::Ec;
use dflow_filter::FilterOps;
use validator::Validate;

use crate::fixtures::CountingSource;
use crate::report::{from_result, Category, HarnessCheck};

fn base_config() -> BufferConfig {
    BufferConfig {
        capacity: 8,
        max_batch_samples: 16,
        dtype: DType::F32,
        overflow_policy: OverflowPolicy::Block,
        consumer_active_returns_error: false,
        default_timeout_ms: 200,
    }
}

/// A non-power-of-two `capacity` fails `BufferConfig::validate` (and so
/// `BatchBuffer::new` rejects it with `InvalidConfig`), while a power of two
/// is accepted.
pub fn non_power_of_two_capacity_rejected() -> HarnessCheck {
    let result = (|| {
        let mut bad = base_config();
        bad.capacity = 7;
        if bad.validate().is_ok() {
            return Err("capacity=7 unexpectedly passed validation".to_string());
        }
        match BatchBuffer::new(bad) {
            Err(Ec::InvalidConfig) => {}
            Err(other) => return Err(format!("expected InvalidConfig, got {other}")),
            Ok(_) => return Err("BatchBuffer::new unexpectedly accepted capacity=7".to_string()),
        }

        let good = base_config();
        if BatchBuffer::new(good).is_err() {
            return Err("a power-of-two capacity was unexpectedly rejected".to_string());
        }
        Ok("capacity=7 rejected, capacity=8 accepted".to_string())
    })();
    from_result("buffer_config_non_power_of_two_capacity_rejected", Category::BufferConfig, result)
}

/// `sink_connect` rejects a sink whose configured dtype does not match the
/// producer's declared `output_dtype`.
pub fn dtype_mismatch_rejected_at_connect() -> HarnessCheck {
    let result = (|| {
        let source = CountingSource::new("buffer_config_dtype_source", 1, 1, 1000);
        let mut mismatched = base_config();
        mismatched.dtype = DType::I32;
        let sink = Arc::new(BatchBuffer::new(mismatched).map_err(|e| format!("sink buffer config invalid: {e}"))?);

        match source.sink_connect(0, sink) {
            Err(Ec::DtypeMismatch) => Ok("I32 sink rejected against an F32 producer with DtypeMismatch".to_string()),
            Err(other) => Err(format!("expected DtypeMismatch, got {other}")),
            Ok(()) => Err("mismatched dtype sink unexpectedly accepted".to_string()),
        }
    })();
    from_result("buffer_config_dtype_mismatch_rejected_at_connect", Category::BufferConfig, result)
}

/// Returns every buffer-config check.
pub fn all() -> Vec<HarnessCheck> {
    vec![non_power_of_two_capacity_rejected(), dtype_mismatch_rejected_at_connect()]
}
