//! Behavioral checks: property validation soundness (P6), the root-source
//! requirement (P7), and the `DropTail` no-torn-read interlock (P2).

use std::sync::Arc;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, BufferConfig, DType, OverflowPolicy, Sample};
use dflow_error::Ec;
use dflow_property::{Behavior, Constraint, PropertyContract, PropertyGraph, PropertyKey, PropertyValue};

use crate::report::{from_result, Category, HarnessCheck};

/// P6: a graph where a consumer's constraint is violated by its producer's
/// declared output fails with `PropertyViolation`, naming both filters in
/// the chain; a graph with no such violation validates successfully.
pub fn p6_property_validation_soundness() -> HarnessCheck {
    let result = (|| {
        let mut bad = PropertyGraph::new();
        bad.add_filter(
            "producer",
            PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::DataType, PropertyValue::DType(DType::I32))),
        );
        bad.add_filter(
            "consumer",
            PropertyContract::new().with_constraint(Constraint::Eq(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
        );
        bad.connect("producer", "consumer", 0);
        let err = match bad.validate() {
            Err(e) => e,
            Ok(_) => return Err("expected a PropertyViolation, validation unexpectedly succeeded".to_string()),
        };
        if err.code != Ec::PropertyViolation {
            return Err(format!("expected PropertyViolation, got {}", err.code));
        }
        if err.filter_chain != vec!["producer".to_string(), "consumer".to_string()] {
            return Err(format!("expected filter chain [producer, consumer], got {:?}", err.filter_chain));
        }

        let mut good = PropertyGraph::new();
        good.add_filter(
            "producer",
            PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
        );
        good.add_filter(
            "consumer",
            PropertyContract::new().with_constraint(Constraint::Eq(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
        );
        good.connect("producer", "consumer", 0);
        if good.validate().is_err() {
            return Err("a consistent producer/consumer pair was unexpectedly rejected".to_string());
        }
        Ok("mismatched dtype rejected with filter chain [producer, consumer], matching pair accepted".to_string())
    })();
    from_result("p6_property_validation_soundness", Category::Behavioral, result)
}

/// P7: a graph with no filter of in-degree zero (no source) fails
/// validation with `IncompletePipeline`.
pub fn p7_root_source_requirement() -> HarnessCheck {
    let result = (|| {
        let empty = PropertyGraph::new();
        match empty.validate() {
            Err(e) if e.code == Ec::IncompletePipeline => {
                Ok("a graph with no source filter failed with IncompletePipeline".to_string())
            }
            Err(e) => Err(format!("expected IncompletePipeline, got {}", e.code)),
            Ok(_) => Err("a graph with no filters unexpectedly validated".to_string()),
        }
    })();
    from_result("p7_root_source_requirement", Category::Behavioral, result)
}

/// P2: under `DropTail`, a slot the consumer is still reading (`CONSUMING`)
/// is never reclaimed out from under it. With `consumer_active_returns_error`
/// set, a producer that contests that exact slot gets `ConsumerActive`
/// rather than silently overwriting live data.
pub fn p2_drop_tail_no_torn_read() -> HarnessCheck {
    let result = (|| {
        let buffer = Arc::new(
            BatchBuffer::new(BufferConfig {
                capacity: 1,
                max_batch_samples: 1,
                dtype: DType::F32,
                overflow_policy: OverflowPolicy::DropTail,
                consumer_active_returns_error: true,
                default_timeout_ms: 0,
            })
            .map_err(|e| format!("buffer config invalid: {e}"))?,
        );
        buffer.start().map_err(|e| format!("buffer start failed: {e}"))?;

        let mut head = buffer.get_head().map_err(|e| format!("get_head failed: {e}"))?;
        head.fill(&[Sample::F32(1.0)]);
        buffer.submit(head, Some(Duration::from_millis(50))).map_err(|e| format!("submit failed: {e}"))?;

        let consuming = buffer.get_tail(Some(Duration::from_millis(50))).map_err(|e| format!("get_tail failed: {e}"))?;

        let contested_head = buffer.get_head().map_err(|e| format!("get_head failed: {e}"))?;
        match buffer.submit(contested_head, Some(Duration::from_millis(10))) {
            Err(Ec::ConsumerActive) => {}
            Err(other) => return Err(format!("expected ConsumerActive, got {other}")),
            Ok(()) => return Err("submit against a CONSUMING slot unexpectedly succeeded".to_string()),
        }

        let value = consuming.read(0);
        buffer.release_tail(consuming);
        if value != Sample::F32(1.0) {
            return Err(format!("consumer's in-flight read was torn: expected 1.0, saw {value:?}"));
        }
        Ok("producer contesting a CONSUMING slot got ConsumerActive, consumer's read was not torn".to_string())
    })();
    from_result("p2_drop_tail_no_torn_read", Category::Behavioral, result)
}

/// Returns every behavioral check.
pub fn all() -> Vec<HarnessCheck> {
    vec![p6_property_validation_soundness(), p7_root_source_requirement(), p2_drop_tail_no_torn_read()]
}
