//! The base filter struct every concrete filter embeds as its first field,
//! and the bookkeeping it owns: identity, owned input buffers, the sink
//! fan-out table, lifecycle flags, and metrics.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use dflow_buffer::BatchBuffer;
use dflow_error::{WorkerErrInfo, WorkerErrSink};
use dflow_property::PropertyContract;

use crate::connection::Connection;

/// What role a filter plays in the graph. Purely informational: it does
/// not change how the base filter behaves, only what `describe` reports
/// and how a harness chooses which compliance checks apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    /// No inputs; produces data from an external source (a signal
    /// generator, a file reader).
    Source,
    /// No sinks; consumes data to an external destination.
    Sink,
    /// Has both inputs and sinks.
    Transform,
    /// Hosts an internal DAG of child filters (see `dflow-pipeline`).
    Container,
}

/// Point-in-time counters read off a filter's metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStatsSnapshot {
    /// Total samples this filter has processed across all batches.
    pub samples_processed: u64,
    /// Total batches this filter has processed.
    pub n_batches: u64,
}

#[derive(Debug, Default)]
struct FilterStats {
    samples_processed: AtomicU64,
    n_batches: AtomicU64,
}

impl FilterStats {
    fn record_batch(&self, n_samples: usize) {
        self.n_batches.fetch_add(1, Ordering::Relaxed);
        self.samples_processed.fetch_add(n_samples as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            n_batches: self.n_batches.load(Ordering::Relaxed),
        }
    }
}

/// A filter's health, derived from its `running` flag and `worker_err_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    /// The worker thread is running and has not recorded a fatal error.
    Running,
    /// The filter is not running and has not recorded a fatal error (either
    /// never started, or stopped cleanly).
    Stopped,
    /// The worker recorded a fatal error before exiting.
    Failed(WorkerErrInfo),
}

/// Configuration consumed by [`FilterCore::new`].
pub struct FilterConfig {
    /// The filter's name, used in logs, `describe`, and error tagging.
    pub name: String,
    /// The filter's role in the graph.
    pub filter_type: FilterType,
    /// The maximum number of sinks (output ports) this filter supports.
    pub max_sinks: usize,
    /// The input buffers this filter exclusively owns.
    pub input_buffers: Vec<Arc<BatchBuffer>>,
    /// The property contract this filter declares: input constraints and
    /// output behaviors (§4.4).
    pub property_contract: PropertyContract,
}

/// The base filter struct: identity, owned input buffers, sink fan-out
/// table, lifecycle flags, and metrics common to every filter.
///
/// Concrete filters embed this as their first field and expose it through
/// [`crate::FilterOps::core`], the Rust equivalent of the spec's
/// inheritance-by-embedding: generic code (the pipeline container, the
/// conformance harness) operates on any filter polymorphically through the
/// `FilterOps` trait object, not by downcasting to the concrete type.
pub struct FilterCore {
    name: String,
    filter_type: FilterType,
    max_sinks: usize,
    input_buffers: Vec<Arc<BatchBuffer>>,
    sinks: Mutex<Vec<Option<Connection>>>,
    running: AtomicBool,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    worker_err_info: Mutex<Option<WorkerErrInfo>>,
    stats: FilterStats,
    property_contract: PropertyContract,
}

impl FilterCore {
    /// Creates a new base filter in the `init`ed, not-running state.
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self {
            name: config.name,
            filter_type: config.filter_type,
            max_sinks: config.max_sinks,
            input_buffers: config.input_buffers,
            sinks: Mutex::new(vec![None; config.max_sinks]),
            running: AtomicBool::new(false),
            worker_handle: Mutex::new(None),
            worker_err_info: Mutex::new(None),
            stats: FilterStats::default(),
            property_contract: config.property_contract,
        }
    }

    /// The filter's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The filter's role in the graph.
    #[must_use]
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// The maximum number of sinks this filter supports.
    #[must_use]
    pub fn max_sinks(&self) -> usize {
        self.max_sinks
    }

    /// The input buffers this filter exclusively owns.
    #[must_use]
    pub fn input_buffers(&self) -> &[Arc<BatchBuffer>] {
        &self.input_buffers
    }

    /// `true` while the worker thread is (expected to be) running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// This filter's declared property contract.
    #[must_use]
    pub fn property_contract(&self) -> &PropertyContract {
        &self.property_contract
    }

    /// The first fatal error recorded by this filter's worker, if any.
    #[must_use]
    pub fn worker_err_info(&self) -> Option<WorkerErrInfo> {
        self.worker_err_info.lock().expect("filter mutex poisoned").clone()
    }

    /// This filter's current health.
    #[must_use]
    pub fn health(&self) -> Health {
        if let Some(err) = self.worker_err_info() {
            Health::Failed(err)
        } else if self.is_running() {
            Health::Running
        } else {
            Health::Stopped
        }
    }

    /// A snapshot of `samples_processed`/`n_batches`.
    #[must_use]
    pub fn stats(&self) -> FilterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Records that the worker processed one batch of `n_samples` valid
    /// samples. Called by a concrete filter's worker on every batch it
    /// produces or forwards.
    pub fn record_batch(&self, n_samples: usize) {
        self.stats.record_batch(n_samples);
    }

    /// Sum of `occupancy()` across every owned input buffer: how many
    /// batches are queued but not yet consumed.
    #[must_use]
    pub fn backlog(&self) -> Vec<usize> {
        self.input_buffers.iter().map(|buf| buf.occupancy()).collect()
    }

    pub(crate) fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    pub(crate) fn sinks(&self) -> &Mutex<Vec<Option<Connection>>> {
        &self.sinks
    }

    pub(crate) fn worker_handle(&self) -> &Mutex<Option<JoinHandle<()>>> {
        &self.worker_handle
    }
}

impl WorkerErrSink for FilterCore {
    fn set_worker_err(&self, info: WorkerErrInfo) {
        *self.worker_err_info.lock().expect("filter mutex poisoned") = Some(info);
        self.running.store(false, Ordering::Release);
    }
}

impl fmt::Debug for FilterCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCore")
            .field("name", &self.name)
            .field("filter_type", &self.filter_type)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Writes a one-line human-readable summary of a filter to `out`, the
/// default implementation of `describe`.
pub(crate) fn describe_core(core: &FilterCore, out: &mut dyn std::fmt::Write) -> fmt::Result {
    let sinks_connected = core.sinks().lock().expect("filter mutex poisoned").iter().filter(|s| s.is_some()).count();
    write!(
        out,
        "{} ({:?}): running={} stats={:?} backlog={:?} sinks={}/{} err={:?}",
        core.name(),
        core.filter_type(),
        core.is_running(),
        core.stats(),
        core.backlog(),
        sinks_connected,
        core.max_sinks(),
        core.worker_err_info(),
    )
}
