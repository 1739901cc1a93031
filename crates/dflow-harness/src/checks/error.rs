//! Error checks: a worker-fatal error is captured with its code, message,
//! and call site, and is surfaced tagged with the owning filter's name after
//! `stop` joins the worker (§7).

use std::time::Duration;

use dflow_error::{Ec, NamedWorkerError};
use dflow_filter::{FilterOps, Health};

use crate::fixtures::AlwaysFailingFilter;
use crate::report::{from_result, Category, HarnessCheck};

/// A worker that dies via `worker_fatal!` leaves `get_health()` as
/// `Failed(info)` with the expected code, and the info survives being
/// tagged with the filter's name once the parent has joined it via `stop`.
pub fn worker_fatal_surfaces_tagged_with_filter_name() -> HarnessCheck {
    let result = (|| {
        let filter = AlwaysFailingFilter::new("error_always_fails", Ec::ParseError);
        filter.clone().start().map_err(|e| format!("start failed: {e}"))?;

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while matches!(filter.get_health(), Health::Running) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        filter.stop().map_err(|e| format!("stop failed: {e}"))?;

        let info = match filter.get_health() {
            Health::Failed(info) => info,
            other => return Err(format!("expected Failed health, got {other:?}")),
        };
        if info.code != Ec::ParseError {
            return Err(format!("expected ParseError, got {}", info.code));
        }
        if !info.file.ends_with("fixtures.rs") {
            return Err(format!("expected call site in fixtures.rs, got {}", info.file));
        }

        let named = NamedWorkerError {
            filter_name: filter.core().name().to_string(),
            info,
        };
        let rendered = named.to_string();
        if !rendered.contains("error_always_fails") || !rendered.contains("parse error") {
            return Err(format!("tagged error display missing filter name or code: {rendered}"));
        }
        Ok(format!("worker-fatal error surfaced as: {rendered}"))
    })();
    from_result("error_worker_fatal_tagged_with_filter_name", Category::Error, result)
}

/// Returns every error check.
pub fn all() -> Vec<HarnessCheck> {
    vec![worker_fatal_surfaces_tagged_with_filter_name()]
}
