//! The filter operations vtable: default lifecycle, data-flow, diagnostic,
//! and connection behavior every concrete filter inherits by embedding a
//! [`FilterCore`] and implementing only [`FilterOps::run`] plus whatever
//! defaults it needs to override.
//!
//! Rust has no null function pointers to forbid, so "no entry is ever null"
//! becomes: every method below has a default body, and a concrete filter's
//! `impl FilterOps for ConcreteFilter` only lists the overrides it actually
//! needs. [`FilterOps::run`] is the one mandatory method — it is the
//! worker function the spec describes as "a function pointer taking the
//! filter as argument, hosted in one thread per filter"; here that argument
//! is `self: Arc<Self>`, handed to the spawned thread by [`FilterOps::start`].

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dflow_buffer::{BatchBuffer, DType};
use dflow_error::{Ec, WorkerErrInfo};

use crate::connection::Connection;
use crate::core::{describe_core, FilterCore, FilterStatsSnapshot, FilterType, Health};

/// The operations vtable every filter implements.
///
/// Concrete filters embed a [`FilterCore`] as their first field (spec §9's
/// "inheritance by embedding") and expose it through [`Self::core`]; generic
/// code (the pipeline container, the conformance harness) then operates on
/// `Arc<dyn FilterOps>` rather than any concrete type.
///
/// [`Self::start`] and [`Self::run`] take `self: Arc<Self>` because starting
/// a filter hands its worker thread a handle that must outlive the call —
/// the Rust shape of "spawn a thread bound to the filter's worker function".
/// Every other method takes `&self`: stopping, describing, or reconfiguring
/// a filter never needs to extend its lifetime past the call.
pub trait FilterOps: Send + Sync {
    /// Access to the embedded base filter state.
    fn core(&self) -> &FilterCore;

    /// The worker function hosted on this filter's one OS thread while
    /// `running` is true.
    ///
    /// Implementations consume from owned input buffers via
    /// `get_tail`/`release_tail`, produce via `get_head`/`submit` on
    /// connected sinks, and return `Ok(())` on a clean `Stopped`/`Complete`
    /// exit or `Err(info)` — built with the `worker_fatal!` macro so the
    /// recorded source location is the check site, not this trait — on an
    /// unrecoverable error.
    fn run(self: Arc<Self>) -> Result<(), WorkerErrInfo>;

    /// `true` if this filter must have at least one connected sink before
    /// it may start. Sinks (no downstream) and container filters (whose
    /// `sink_connect` forwards internally) answer `false`.
    fn requires_sink(&self) -> bool {
        !matches!(self.core().filter_type(), FilterType::Sink)
    }

    /// The dtype this filter produces on `port`, if known independent of
    /// property propagation. `sink_connect`'s default implementation uses
    /// this to reject an obviously mismatched sink eagerly, the way the
    /// spec's `DTYPE_MISMATCH`/`WIDTH_MISMATCH` errors are "reported
    /// synchronously by init/connect/validate". Returning `None` (the
    /// default) defers the check entirely to property validation.
    fn output_dtype(&self, _port: usize) -> Option<DType> {
        None
    }

    /// Default `start`: asserts not-running, fails fast with `NoSink` if
    /// [`Self::requires_sink`] holds and no sink is connected, starts owned
    /// input buffers, then spawns exactly one worker thread bound to
    /// [`Self::run`].
    ///
    /// # Errors
    /// [`Ec::AlreadyRunning`] if already running; [`Ec::NoSink`] if a
    /// required sink is missing.
    fn start(self: Arc<Self>) -> Result<(), Ec>
    where
        Self: 'static,
    {
        let core = self.core();
        let was_running = core.running_flag().swap(true, Ordering::AcqRel);
        if was_running {
            return Err(Ec::AlreadyRunning);
        }

        if self.requires_sink() && connected_sink_count(core) == 0 {
            core.running_flag().store(false, Ordering::Release);
            return Err(Ec::NoSink);
        }

        for buf in core.input_buffers() {
            match buf.start() {
                Ok(()) | Err(Ec::AlreadyRunning) => {}
                Err(e) => {
                    core.running_flag().store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }

        let name = core.name().to_string();
        let worker_self = Arc::clone(&self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let err_target = Arc::clone(&worker_self);
                tracing::info!(filter = %name, "worker starting");
                if let Err(info) = worker_self.run() {
                    tracing::error!(filter = %name, code = ?info.code, message = %info.message, "worker terminated with error");
                    err_target.core().set_worker_err(info);
                } else {
                    tracing::info!(filter = %name, "worker exited cleanly");
                }
            })
            .expect("failed to spawn filter worker thread");

        *self.core().worker_handle().lock().expect("filter mutex poisoned") = Some(handle);
        Ok(())
    }

    /// Default `stop`: clears `running`, stops every owned input buffer
    /// (waking a blocked worker), joins the worker thread, and preserves
    /// any previously recorded `worker_err_info`. A no-op if never started.
    fn stop(&self) -> Result<(), Ec> {
        let core = self.core();
        core.running_flag().store(false, Ordering::Release);
        for buf in core.input_buffers() {
            buf.stop();
        }
        let handle = core.worker_handle().lock().expect("filter mutex poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(filter = %core.name(), "worker thread panicked");
            }
        }
        Ok(())
    }

    /// Default `deinit`: idempotent. Stops first if still running, then
    /// deinits every owned input buffer. A second call is a no-op.
    fn deinit(&self) -> Result<(), Ec> {
        if self.core().is_running() {
            self.stop()?;
        }
        for buf in self.core().input_buffers() {
            buf.deinit();
        }
        Ok(())
    }

    /// Default `flush`: no-op. Filters that buffer samples internally
    /// (e.g. a batch-matcher) override this to force a partial batch out.
    fn flush(&self) -> Result<(), Ec> {
        Ok(())
    }

    /// Default `drain`: no-op. Filters with internal queues beyond their
    /// input buffers override this to discard queued state.
    fn drain(&self) -> Result<(), Ec> {
        Ok(())
    }

    /// Default `reset`: no-op. Stateful transforms (e.g. a sample aligner
    /// tracking phase) override this to return to their initial state.
    fn reset(&self) -> Result<(), Ec> {
        Ok(())
    }

    /// Default `save_state`: no persisted state.
    fn save_state(&self) -> Result<Vec<u8>, Ec> {
        Ok(Vec::new())
    }

    /// Default `load_state`: rejects any non-empty state, since the default
    /// `save_state` never produces one.
    fn load_state(&self, state: &[u8]) -> Result<(), Ec> {
        if state.is_empty() {
            Ok(())
        } else {
            Err(Ec::InvalidArg)
        }
    }

    /// `samples_processed`/`n_batches` for this filter.
    fn get_stats(&self) -> FilterStatsSnapshot {
        self.core().stats()
    }

    /// This filter's current health.
    fn get_health(&self) -> Health {
        self.core().health()
    }

    /// Occupancy of every owned input buffer, in declaration order.
    fn get_backlog(&self) -> Vec<usize> {
        self.core().backlog()
    }

    /// Default `describe`: a one-line human-readable summary.
    fn describe(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        describe_core(self.core(), out)
    }

    /// Default `reconfigure`: rejected. A filter that supports live
    /// reconfiguration overrides this; the spec's Non-goals exclude dynamic
    /// graph topology changes but say nothing against a filter adjusting its
    /// own tunables in place.
    fn reconfigure(&self, _new_cfg: &dyn std::any::Any) -> Result<(), Ec> {
        Err(Ec::InvalidArg)
    }

    /// Default `validate_connection`: accepts any candidate connection.
    /// Filters with extra requirements beyond the property system (e.g. a
    /// container validating an internal endpoint) override this.
    fn validate_connection(&self, _other: &dyn FilterOps, _port: usize) -> Result<(), Ec> {
        Ok(())
    }

    /// Default `sink_connect`: bounds-checks `port`, rejects a duplicate
    /// connection, optionally checks [`Self::output_dtype`] against the
    /// sink's configured dtype, then records the connection under the
    /// filter's sink mutex.
    ///
    /// Virtualized so a container filter can override it to forward to its
    /// designated output filter instead (§4.5) — the canonical reason every
    /// vtable entry must have a real implementation rather than a null slot.
    ///
    /// # Errors
    /// [`Ec::ExceedsMaxSinks`], [`Ec::AlreadyConnected`], [`Ec::DtypeMismatch`].
    fn sink_connect(&self, port: usize, sink: Arc<BatchBuffer>) -> Result<(), Ec> {
        if let Some(expected) = self.output_dtype(port) {
            let actual = sink.config().dtype;
            if expected != actual {
                return Err(Ec::DtypeMismatch);
            }
        }
        default_sink_connect(self.core(), port, sink)
    }

    /// The sink buffers currently connected, in port order (gaps skipped).
    /// A convenience for worker implementations that fan out to every
    /// connected port, e.g. emitting `COMPLETE`.
    fn connected_sinks(&self) -> Vec<Arc<BatchBuffer>> {
        self.core()
            .sinks()
            .lock()
            .expect("filter mutex poisoned")
            .iter()
            .filter_map(|slot| slot.as_ref().map(|c| Arc::clone(&c.sink)))
            .collect()
    }

    /// The sink buffer connected at `port`, if any.
    fn sink_at(&self, port: usize) -> Option<Arc<BatchBuffer>> {
        self.core()
            .sinks()
            .lock()
            .expect("filter mutex poisoned")
            .get(port)
            .and_then(|slot| slot.as_ref())
            .map(|c| Arc::clone(&c.sink))
    }

    /// Writes an empty `head == 0`, `ec == Complete` batch to every
    /// connected sink: the completion-propagation convention (§4.3) every
    /// source and transform uses when it has finished producing data.
    ///
    /// # Errors
    /// Whatever the underlying `get_head`/`submit` calls return; a `Stopped`
    /// sink is tolerated (the downstream filter is already torn down).
    fn emit_complete(&self, timeout: Option<Duration>) -> Result<(), Ec> {
        for sink in self.connected_sinks() {
            let mut head = match sink.get_head() {
                Ok(head) => head,
                Err(Ec::Stopped) => continue,
                Err(e) => return Err(e),
            };
            head.meta_mut().ec = Ec::Complete;
            match sink.submit(head, timeout) {
                Ok(()) | Err(Ec::Stopped) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn connected_sink_count(core: &FilterCore) -> usize {
    core.sinks().lock().expect("filter mutex poisoned").iter().filter(|s| s.is_some()).count()
}

/// The default `sink_connect` body, factored out so a container filter's
/// override (which forwards to a child instead) can still reuse the
/// bounds/duplicate checks on its own sink table if it ever needs to.
pub(crate) fn default_sink_connect(core: &FilterCore, port: usize, sink: Arc<BatchBuffer>) -> Result<(), Ec> {
    if port >= core.max_sinks() {
        return Err(Ec::ExceedsMaxSinks);
    }
    let mut sinks = core.sinks().lock().expect("filter mutex poisoned");
    if sinks[port].is_some() {
        return Err(Ec::AlreadyConnected);
    }
    sinks[port] = Some(Connection::new(sink));
    Ok(())
}

/// Dispatches `start` through the vtable unconditionally, the spec's
/// `filt_start`.
///
/// # Errors
/// See [`FilterOps::start`].
pub fn filt_start<F: FilterOps + 'static>(filter: Arc<F>) -> Result<(), Ec> {
    filter.start()
}

/// Dispatches `stop` through the vtable unconditionally, the spec's
/// `filt_stop`.
///
/// # Errors
/// See [`FilterOps::stop`].
pub fn filt_stop(filter: &dyn FilterOps) -> Result<(), Ec> {
    filter.stop()
}

/// Dispatches `deinit` through the vtable unconditionally, the spec's
/// `filt_deinit`.
///
/// # Errors
/// See [`FilterOps::deinit`].
pub fn filt_deinit(filter: &dyn FilterOps) -> Result<(), Ec> {
    filter.deinit()
}

/// Dispatches `sink_connect` through the vtable unconditionally, the spec's
/// `filt_sink_connect`.
///
/// # Errors
/// See [`FilterOps::sink_connect`].
pub fn filt_sink_connect(filter: &dyn FilterOps, port: usize, sink: Arc<BatchBuffer>) -> Result<(), Ec> {
    filter.sink_connect(port, sink)
}

/// Dispatches `flush` through the vtable unconditionally, the spec's
/// `filt_flush`.
///
/// # Errors
/// See [`FilterOps::flush`].
pub fn filt_flush(filter: &dyn FilterOps) -> Result<(), Ec> {
    filter.flush()
}

/// Dispatches `describe` through the vtable unconditionally, the spec's
/// `filt_describe`, returning the rendered summary rather than writing
/// through an out-parameter.
#[must_use]
pub fn filt_describe(filter: &dyn FilterOps) -> String {
    let mut out = String::new();
    let _ = filter.describe(&mut out);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::FilterConfig;
    use dflow_buffer::{BufferConfig, OverflowPolicy, Sample};
    use dflow_error::worker_fatal;
    use dflow_property::PropertyContract;
    use std::sync::atomic::AtomicUsize;

    fn buffer(capacity: usize) -> Arc<BatchBuffer> {
        Arc::new(
            BatchBuffer::new(BufferConfig {
                capacity,
                max_batch_samples: 4,
                dtype: DType::F32,
                overflow_policy: OverflowPolicy::Block,
                consumer_active_returns_error: false,
                default_timeout_ms: 200,
            })
            .unwrap(),
        )
    }

    /// A minimal source: emits `n` single-sample batches counting up from
    /// zero, then a `COMPLETE` marker.
    struct CountingSource {
        core: FilterCore,
        n: usize,
        emitted: AtomicUsize,
    }

    impl CountingSource {
        fn new(n: usize) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: "counting_source".into(),
                    filter_type: FilterType::Source,
                    max_sinks: 1,
                    input_buffers: Vec::new(),
                    property_contract: PropertyContract::new(),
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
                let i = self.emitted.load(Ordering::Relaxed);
                if i >= self.n {
                    let _ = self.emit_complete(timeout);
                    return Ok(());
                }
                let sink = match self.sink_at(0) {
                    Some(s) => s,
                    None => worker_fatal!(self.core(), Ec::NoSink, "counting source has no sink"),
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
                let _ = self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    /// A minimal capture sink: owns one input buffer, appends every valid
    /// sample it consumes until it observes `COMPLETE`.
    struct CaptureSink {
        core: FilterCore,
        input: Arc<BatchBuffer>,
        captured: std::sync::Mutex<Vec<f32>>,
    }

    impl CaptureSink {
        fn new(input: Arc<BatchBuffer>) -> Arc<Self> {
            Arc::new(Self {
                core: FilterCore::new(FilterConfig {
                    name: "capture_sink".into(),
                    filter_type: FilterType::Sink,
                    max_sinks: 0,
                    input_buffers: vec![Arc::clone(&input)],
                    property_contract: PropertyContract::new(),
                }),
                input,
                captured: std::sync::Mutex::new(Vec::new()),
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

    #[test]
    fn linear_chain_delivers_every_sample_in_order() {
        let buf = buffer(8);
        let source = CountingSource::new(16);
        let sink = CaptureSink::new(Arc::clone(&buf));

        source.sink_connect(0, Arc::clone(&buf)).unwrap();
        buf.start().unwrap();

        Arc::clone(&source).start().unwrap();
        Arc::clone(&sink).start().unwrap();

        std::thread::sleep(Duration::from_millis(100));
        source.stop().unwrap();
        sink.stop().unwrap();

        let captured = sink.captured.lock().unwrap().clone();
        assert_eq!(captured, (0..16).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(source.get_stats().n_batches, 16);
        assert!(matches!(source.get_health(), Health::Stopped));
    }

    #[test]
    fn start_twice_is_rejected() {
        let source = CountingSource::new(1);
        let buf = buffer(2);
        source.sink_connect(0, buf.clone()).unwrap();
        buf.start().unwrap();

        Arc::clone(&source).start().unwrap();
        let err = Arc::clone(&source).start().unwrap_err();
        assert_eq!(err, Ec::AlreadyRunning);
        source.stop().unwrap();
    }

    #[test]
    fn sink_connect_rejects_duplicate_and_out_of_range_port() {
        let source = CountingSource::new(1);
        let buf_a = buffer(2);
        let buf_b = buffer(2);

        source.sink_connect(0, buf_a).unwrap();
        let err = source.sink_connect(0, buf_b.clone()).unwrap_err();
        assert_eq!(err, Ec::AlreadyConnected);

        let err = source.sink_connect(1, buf_b).unwrap_err();
        assert_eq!(err, Ec::ExceedsMaxSinks);
    }

    #[test]
    fn sink_connect_rejects_dtype_mismatch() {
        let source = CountingSource::new(1);
        let mismatched = Arc::new(
            BatchBuffer::new(BufferConfig {
                capacity: 2,
                max_batch_samples: 4,
                dtype: DType::I32,
                overflow_policy: OverflowPolicy::Block,
                consumer_active_returns_error: false,
                default_timeout_ms: 0,
            })
            .unwrap(),
        );
        let err = source.sink_connect(0, mismatched).unwrap_err();
        assert_eq!(err, Ec::DtypeMismatch);
    }

    #[test]
    fn start_without_required_sink_fails_fast() {
        let source = CountingSource::new(1);
        let err = Arc::clone(&source).start().unwrap_err();
        assert_eq!(err, Ec::NoSink);
        assert!(!source.core().is_running());
    }

    #[test]
    fn deinit_after_stop_is_idempotent() {
        let buf = buffer(2);
        let sink = CaptureSink::new(buf);
        sink.deinit().unwrap();
        sink.deinit().unwrap();
    }

    #[test]
    fn stop_from_not_started_is_a_no_op() {
        let buf = buffer(2);
        let sink = CaptureSink::new(buf);
        sink.stop().unwrap();
    }
}
