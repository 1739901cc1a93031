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

//! Filter lifecycle, worker-thread hosting, the operations vtable, and sink
//! fan-out for the dataflow runtime.
//!
//! A concrete filter embeds a [`FilterCore`] as its first field and
//! implements [`FilterOps`] — Rust's version of the spec's "operations
//! vtable with no null entries": every method has a default body supplied
//! here, and a filter overrides only what it must. The only method without
//! a default is [`FilterOps::run`], the worker function hosted on the
//! filter's one OS thread while it is running.

mod connection;
mod core;
mod ops;

pub use connection::Connection;
pub use core::{FilterConfig, FilterCore, FilterStatsSnapshot, FilterType, Health};
pub use ops::{filt_deinit, filt_describe, filt_flush, filt_sink_connect, filt_start, filt_stop, FilterOps};
