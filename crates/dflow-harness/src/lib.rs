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

//! A generic compliance suite (§4.7) any filter or pipeline implementation
//! can be run against: lifecycle, connection, data-flow, error, threading,
//! performance, buffer-configuration, and behavioral checks, covering the
//! testable properties P1 through P10.
//!
//! Each check is a free function returning a [`HarnessCheck`]; [`run_all`]
//! runs every one of them and returns an aggregate [`HarnessReport`]. The
//! fixtures in [`fixtures`] (a counting source, a passthrough transform, a
//! capture sink) exist only to drive these checks from outside the runtime
//! — they are not meant to ship as real filters.

mod checks;
mod fixtures;
mod report;

pub use fixtures::{AlwaysFailingFilter, CapturedBatch, CaptureSink, CountingSource, Passthrough};
pub use report::{fail, from_result, pass, Category, HarnessCheck, HarnessReport};

/// Runs every compliance check in every category and returns the
/// aggregate report.
#[must_use]
pub fn run_all() -> HarnessReport {
    let mut report = HarnessReport::new();
    for check in checks::lifecycle::all() {
        report.record(check);
    }
    for check in checks::connection::all() {
        report.record(check);
    }
    for check in checks::dataflow::all() {
        report.record(check);
    }
    for check in checks::error::all() {
        report.record(check);
    }
    for check in checks::threading::all() {
        report.record(check);
    }
    for check in checks::performance::all() {
        report.record(check);
    }
    for check in checks::buffer_config::all() {
        report.record(check);
    }
    for check in checks::behavioral::all() {
        report.record(check);
    }
    report
}
