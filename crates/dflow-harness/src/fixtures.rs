//! Minimal stand-in filters the checks drive: a counting source, a
//! `PRESERVE`-everything passthrough, and a capture sink. These exist only
//! to exercise the runtime from outside; they are not shipped as "the"
//! signal-generator/CSV filters any real deployment would use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dflow_buffer::{BatchBuffer, DType, Sample};
use dflow_error::{worker_fatal, Ec, WorkerErrInfo};
use dflow_filter::{FilterConfig, FilterCore, FilterOps, FilterType};
use dflow_property::{Behavior, PropertyContract, PropertyKey, PropertyValue};

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// One batch as the capture sink recorded it: sample values plus the
/// timing metadata the producer attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBatch {
    /// The batch's valid-prefix samples, as `f32` regardless of the
    /// buffer's declared dtype (checks in this crate are F32-only).
    pub samples: Vec<f32>,
    /// The batch's `t_ns`.
    pub t_ns: i64,
    /// The batch's `period_ns`.
    pub period_ns: u64,
}

/// Emits `total` samples as batches of at most `batch_size`, values
/// counting up from zero, `t_ns` advancing by `batch_size * period_ns`
/// each batch, then a `COMPLETE` marker. Fails fast with [`Ec::NoSink`] if
/// started with no sink connected.
pub struct CountingSource {
    core: FilterCore,
    total: usize,
    batch_size: usize,
    period_ns: u64,
    emitted: AtomicUsize,
}

impl CountingSource {
    /// Builds a new counting source, not yet started.
    #[must_use]
    pub fn new(name: &str, total: usize, batch_size: usize, period_ns: u64) -> Arc<Self> {
        Arc::new(Self {
            core: FilterCore::new(FilterConfig {
                name: name.into(),
                filter_type: FilterType::Source,
                max_sinks: 1,
                input_buffers: Vec::new(),
                property_contract: PropertyContract::new()
                    .with_behavior(Behavior::Set(PropertyKey::DataType, PropertyValue::DType(DType::F32)))
                    .with_behavior(Behavior::Set(PropertyKey::SamplePeriodNs, PropertyValue::Int(period_ns as i64))),
            }),
            total,
            batch_size,
            period_ns,
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
        while self.core().is_running() {
            let start = self.emitted.load(Ordering::Relaxed);
            if start >= self.total {
                let _ = self.emit_complete(Some(DEFAULT_TIMEOUT));
                return Ok(());
            }
            let n = self.batch_size.min(self.total - start);

            let sink = match self.sink_at(0) {
                Some(s) => s,
                None => worker_fatal!(self.core(), Ec::NoSink, "counting source has no sink"),
            };
            let mut head = match sink.get_head() {
                Ok(h) => h,
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "get_head failed"),
            };
            let samples: Vec<Sample> = (start..start + n).map(|i| Sample::F32(i as f32)).collect();
            head.fill(&samples);
            head.meta_mut().t_ns = (start as i64) * (self.period_ns as i64);
            head.meta_mut().period_ns = self.period_ns;
            head.meta_mut().batch_id = (start / self.batch_size.max(1)) as u64;
            match sink.submit(head, Some(DEFAULT_TIMEOUT)) {
                Ok(()) => {}
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "submit failed"),
            }
            self.core().record_batch(n);
            let _ = self.emitted.fetch_add(n, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Forwards every batch from its one input to its one sink unchanged:
/// samples, `t_ns`, `period_ns`, and `batch_id` are all preserved.
pub struct Passthrough {
    core: FilterCore,
    input: Arc<BatchBuffer>,
}

impl Passthrough {
    /// Builds a new passthrough over `input`, not yet started.
    #[must_use]
    pub fn new(name: &str, input: Arc<BatchBuffer>) -> Arc<Self> {
        Arc::new(Self {
            core: FilterCore::new(FilterConfig {
                name: name.into(),
                filter_type: FilterType::Transform,
                max_sinks: 1,
                input_buffers: vec![Arc::clone(&input)],
                property_contract: PropertyContract::new()
                    .with_behavior(Behavior::Preserve(PropertyKey::DataType, 0))
                    .with_behavior(Behavior::Preserve(PropertyKey::SamplePeriodNs, 0)),
            }),
            input,
        })
    }
}

impl FilterOps for Passthrough {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn output_dtype(&self, _port: usize) -> Option<DType> {
        Some(DType::F32)
    }

    fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
        loop {
            let tail = match self.input.get_tail(Some(DEFAULT_TIMEOUT)) {
                Ok(t) => t,
                Err(Ec::Complete) => {
                    let _ = self.emit_complete(Some(DEFAULT_TIMEOUT));
                    return Ok(());
                }
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "get_tail failed"),
            };

            let raw = tail.raw().to_vec();
            let head_len = tail.meta().head;
            let t_ns = tail.meta().t_ns;
            let period_ns = tail.meta().period_ns;
            let batch_id = tail.meta().batch_id;
            self.input.release_tail(tail);

            let sink = match self.sink_at(0) {
                Some(s) => s,
                None => worker_fatal!(self.core(), Ec::NoSink, "passthrough has no sink"),
            };
            let mut out_head = match sink.get_head() {
                Ok(h) => h,
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "get_head failed"),
            };
            out_head.raw_mut()[..raw.len()].copy_from_slice(&raw);
            out_head.meta_mut().head = head_len;
            out_head.meta_mut().t_ns = t_ns;
            out_head.meta_mut().period_ns = period_ns;
            out_head.meta_mut().batch_id = batch_id;
            match sink.submit(out_head, Some(DEFAULT_TIMEOUT)) {
                Ok(()) => {}
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "submit failed"),
            }
            self.core().record_batch(head_len);
        }
    }
}

/// Consumes every batch from its one input, recording its samples and
/// timing metadata, optionally sleeping `delay_per_batch` before releasing
/// each one (to model a slow consumer for backpressure/drop-accounting
/// checks).
pub struct CaptureSink {
    core: FilterCore,
    input: Arc<BatchBuffer>,
    delay_per_batch: Duration,
    captured: Mutex<Vec<CapturedBatch>>,
}

impl CaptureSink {
    /// Builds a new capture sink over `input`, not yet started.
    #[must_use]
    pub fn new(name: &str, input: Arc<BatchBuffer>, delay_per_batch: Duration) -> Arc<Self> {
        Arc::new(Self {
            core: FilterCore::new(FilterConfig {
                name: name.into(),
                filter_type: FilterType::Sink,
                max_sinks: 0,
                input_buffers: vec![Arc::clone(&input)],
                property_contract: PropertyContract::new()
                    .with_constraint(dflow_property::Constraint::Exists(PropertyKey::DataType)),
            }),
            input,
            delay_per_batch,
            captured: Mutex::new(Vec::new()),
        })
    }

    /// Every batch captured so far, in consumption order.
    #[must_use]
    pub fn captured(&self) -> Vec<CapturedBatch> {
        self.captured.lock().expect("capture mutex poisoned").clone()
    }

    /// All valid samples across every captured batch, concatenated.
    #[must_use]
    pub fn all_samples(&self) -> Vec<f32> {
        self.captured().into_iter().flat_map(|b| b.samples).collect()
    }
}

/// A transform that accepts a sink but always dies on its first tick with a
/// fixed error code, for exercising worker-fatal surfacing.
pub struct AlwaysFailingFilter {
    core: FilterCore,
    code: Ec,
}

impl AlwaysFailingFilter {
    /// Builds a filter that will fail with `code` as soon as it is started.
    #[must_use]
    pub fn new(name: &str, code: Ec) -> Arc<Self> {
        Arc::new(Self {
            core: FilterCore::new(FilterConfig {
                name: name.into(),
                filter_type: FilterType::Transform,
                max_sinks: 1,
                input_buffers: Vec::new(),
                property_contract: PropertyContract::new(),
            }),
            code,
        })
    }
}

impl FilterOps for AlwaysFailingFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn requires_sink(&self) -> bool {
        false
    }

    fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
        worker_fatal!(self.core(), self.code, "deliberate failure for harness testing");
    }
}

impl FilterOps for CaptureSink {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo> {
        loop {
            let tail = match self.input.get_tail(Some(DEFAULT_TIMEOUT)) {
                Ok(t) => t,
                Err(Ec::Complete) => return Ok(()),
                Err(Ec::Stopped) => return Ok(()),
                Err(e) => worker_fatal!(self.core(), e, "get_tail failed"),
            };

            let samples = tail
                .valid_samples()
                .into_iter()
                .map(|s| match s {
                    Sample::F32(v) => v,
                    Sample::I32(v) => v as f32,
                    Sample::U32(v) => v as f32,
                })
                .collect();
            let record = CapturedBatch {
                samples,
                t_ns: tail.meta().t_ns,
                period_ns: tail.meta().period_ns,
            };
            let n = tail.meta().head;
            self.input.release_tail(tail);

            if !self.delay_per_batch.is_zero() {
                std::thread::sleep(self.delay_per_batch);
            }

            self.captured.lock().expect("capture mutex poisoned").push(record);
            self.core().record_batch(n);
        }
    }
}
