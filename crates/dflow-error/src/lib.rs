#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(unreachable_pub)]

//! The closed error-code taxonomy (`Ec`) returned by every fallible entry
//! point of the dataflow runtime, and the `WorkerErrInfo` record a filter's
//! worker thread populates when it dies.
//!
//! `Ec` is intentionally a flat, C-style code rather than a per-variant
//! structured error: detailed context (which filter, which file/line, what
//! message) belongs in [`WorkerErrInfo`] or in a caller's own error type, not
//! in the code itself. This mirrors the three error bands described for this
//! runtime: config errors, lifecycle signals, and worker-fatal errors all
//! share this one code space so a caller can match on it uniformly.

use std::fmt;

/// The closed set of error codes used across the dataflow runtime.
///
/// Variants are grouped, in declaration order, into the three bands used
/// throughout this runtime: config errors (reported synchronously by
/// `init`/`sink_connect`/`validate`), lifecycle signals (expected
/// control-flow outcomes from `get_tail`/`submit`, never populate
/// [`WorkerErrInfo`]), and worker-fatal errors (captured into
/// [`WorkerErrInfo`] via the `worker_fatal!` macro).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum Ec {
    /// No error; success.
    #[error("ok")]
    Ok,

    // --- config errors -----------------------------------------------
    /// A required pointer/handle was missing.
    #[error("null pointer")]
    NullPtr,
    /// An argument was out of range or otherwise invalid.
    #[error("invalid argument")]
    InvalidArg,
    /// A configuration struct failed validation.
    #[error("invalid configuration")]
    InvalidConfig,
    /// Arena or metadata allocation failed.
    #[error("allocation failed")]
    Alloc,
    /// `dtype` did not match between two connected buffers.
    #[error("dtype mismatch")]
    DtypeMismatch,
    /// Sample width did not match between two connected buffers.
    #[error("width mismatch")]
    WidthMismatch,
    /// Property validation failed for the graph.
    #[error("property violation")]
    PropertyViolation,
    /// A root pipeline had no source filter.
    #[error("incomplete pipeline: no source filter")]
    IncompletePipeline,
    /// `sink_connect` targeted a port that already has a sink.
    #[error("sink already connected")]
    AlreadyConnected,
    /// `sink_connect` targeted a port beyond `max_sinks`.
    #[error("exceeds max sinks")]
    ExceedsMaxSinks,

    // --- lifecycle signals ---------------------------------------------
    /// `start` was called on an already-running component.
    #[error("already running")]
    AlreadyRunning,
    /// An operation required a running component that was not running.
    #[error("not running")]
    NotRunning,
    /// A blocking operation exceeded its configured timeout.
    #[error("timed out")]
    Timeout,
    /// The component was stopped while a caller was blocked on it.
    #[error("stopped")]
    Stopped,
    /// The stream has ended; no further data will arrive.
    #[error("end of stream")]
    Complete,

    // --- worker-fatal errors --------------------------------------------
    /// A worker required a connected sink but had none at start.
    #[error("no sink connected")]
    NoSink,
    /// Regular data's `t_ns` was not aligned to `period_ns`.
    #[error("phase error")]
    PhaseError,
    /// The named input file does not exist.
    #[error("file not found")]
    FileNotFound,
    /// An I/O operation failed.
    #[error("I/O error")]
    IoError,
    /// Input data failed to parse.
    #[error("parse error")]
    ParseError,
    /// A named column was not present in the input.
    #[error("column not found")]
    ColumnNotFound,
    /// An output file reached a configured size limit.
    #[error("file full")]
    FileFull,
    /// A `DROP_TAIL` producer found the contested slot in `CONSUMING` state.
    #[error("consumer active on contested slot")]
    ConsumerActive,
    /// Data was dropped and the caller requested this to be reported as an
    /// error rather than silently counted.
    #[error("data dropped")]
    DataDropped,
}

impl Ec {
    /// Returns `true` for the lifecycle-signal band: `Timeout`, `Stopped`,
    /// `Complete`. These never populate [`WorkerErrInfo`]; they are expected
    /// control-flow outcomes handled locally by the caller.
    #[must_use]
    pub fn is_lifecycle_signal(self) -> bool {
        matches!(self, Ec::Timeout | Ec::Stopped | Ec::Complete)
    }

    /// Returns `true` for the config-error band, reported synchronously by
    /// `init`/`sink_connect`/`validate` and never surfaced from a running
    /// worker.
    #[must_use]
    pub fn is_config_error(self) -> bool {
        matches!(
            self,
            Ec::NullPtr
                | Ec::InvalidArg
                | Ec::InvalidConfig
                | Ec::Alloc
                | Ec::DtypeMismatch
                | Ec::WidthMismatch
                | Ec::PropertyViolation
                | Ec::IncompletePipeline
                | Ec::AlreadyConnected
                | Ec::ExceedsMaxSinks
        )
    }
}

/// A source-located, worker-fatal error record owned by a single filter.
///
/// Populated by the `worker_fatal!` macro at the exact check site that
/// detected the condition (not a helper function's location), read by the
/// parent thread only after `stop` has joined the worker, per the
/// single-writer/single-reader discipline of this field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerErrInfo {
    /// The error code.
    pub code: Ec,
    /// A human-readable message giving the specifics of the failure.
    pub message: String,
    /// The source file of the check site that raised this error.
    pub file: &'static str,
    /// The source line of the check site that raised this error.
    pub line: u32,
}

impl WorkerErrInfo {
    /// Creates a new worker error record.
    #[must_use]
    pub fn new(code: Ec, message: impl Into<String>, file: &'static str, line: u32) -> Self {
        Self {
            code,
            message: message.into(),
            file,
            line,
        }
    }
}

impl fmt::Display for WorkerErrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{} ({})", self.code, self.file, self.line, self.message)
    }
}

impl std::error::Error for WorkerErrInfo {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.code)
    }
}

/// A `WorkerErrInfo` additionally tagged with the name of the filter that
/// produced it, for surfacing across pipeline boundaries (§7: "the parent
/// surfaces the error after `stop`/`deinit`, tagged with the owning filter's
/// name").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedWorkerError {
    /// The name of the filter that produced this error.
    pub filter_name: String,
    /// The error itself.
    pub info: WorkerErrInfo,
}

impl fmt::Display for NamedWorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.filter_name, self.info)
    }
}

impl std::error::Error for NamedWorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.info)
    }
}

/// Records a worker-fatal error into `$slot` (an `&dyn `[`WorkerErrSink`])
/// with the call site's file and line, logs it, and returns
/// `Err(WorkerErrInfo)` from the enclosing function.
///
/// This is the only sanctioned way to populate `worker_err_info`: it
/// guarantees the source location recorded is that of the check that failed,
/// not of some shared helper deep in the call stack.
#[macro_export]
macro_rules! worker_fatal {
    ($slot:expr, $code:expr, $($arg:tt)*) => {{
        let info = $crate::WorkerErrInfo::new($code, format!($($arg)*), file!(), line!());
        tracing::error!(code = ?info.code, file = info.file, line = info.line, message = %info.message, "worker fatal error");
        $crate::WorkerErrSink::set_worker_err(&$slot, info.clone());
        return Err(info);
    }};
}

/// Implemented by anything that can receive a populated
/// [`WorkerErrInfo`] from a worker (normally `FilterCore`).
pub trait WorkerErrSink {
    /// Stores the worker-fatal error, clearing `running`.
    fn set_worker_err(&self, info: WorkerErrInfo);
}

#[cfg(test)]
mod test {
    use super::*;

    struct Sink(std::sync::Mutex<Option<WorkerErrInfo>>);
    impl WorkerErrSink for Sink {
        fn set_worker_err(&self, info: WorkerErrInfo) {
            *self.0.lock().expect("lock poisoned") = Some(info);
        }
    }

    fn fails(sink: &Sink) -> Result<(), WorkerErrInfo> {
        worker_fatal!(sink, Ec::NoSink, "no sink connected to port {}", 0);
        #[allow(unreachable_code)]
        Ok(())
    }

    #[test]
    fn worker_fatal_records_call_site() {
        let sink = Sink(std::sync::Mutex::new(None));
        let err = fails(&sink).unwrap_err();
        assert_eq!(err.code, Ec::NoSink);
        assert!(err.message.contains("port 0"));
        assert!(err.file.ends_with("lib.rs"));

        let recorded = sink.0.lock().unwrap().clone().unwrap();
        assert_eq!(recorded, err);
    }

    #[test]
    fn lifecycle_signals_are_distinguished_from_fatal_errors() {
        assert!(Ec::Timeout.is_lifecycle_signal());
        assert!(Ec::Stopped.is_lifecycle_signal());
        assert!(Ec::Complete.is_lifecycle_signal());
        assert!(!Ec::NoSink.is_lifecycle_signal());
        assert!(!Ec::IoError.is_lifecycle_signal());
    }

    #[test]
    fn config_errors_are_distinguished() {
        assert!(Ec::InvalidConfig.is_config_error());
        assert!(Ec::PropertyViolation.is_config_error());
        assert!(!Ec::Timeout.is_config_error());
        assert!(!Ec::IoError.is_config_error());
    }
}
