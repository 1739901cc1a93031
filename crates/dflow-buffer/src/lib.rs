#![deny(
    trivial_numeric_casts,
    missing_docs,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(unreachable_pub)]

//! The fixed-capacity SPSC batch ring buffer filters exchange data through.
//!
//! A [`BatchBuffer`] is allocated once per connection between a producer
//! filter and a consumer filter, sized by a [`BufferConfig`]. Producer and
//! consumer exchange [`BatchHead`]/[`BatchTail`] views over the buffer's
//! shared arena rather than individually heap-allocated batches; the arena
//! itself never grows or moves after construction (B-I1).
//!
//! This is the only crate in the workspace that contains `unsafe` code:
//! every other crate forbids it outright. The arena-sharing mechanics live
//! entirely in [`ring`] and are isolated behind a safe public API.

mod batch;
mod config;
mod dtype;
mod ring;

pub use batch::{BatchHead, BatchMeta, BatchTail, Sample, SideChannel};
pub use config::{BufferConfig, OverflowPolicy};
pub use dtype::DType;
pub use ring::{BatchBuffer, BufferStats, BufferStatsSnapshot};
