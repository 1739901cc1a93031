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

//! Declarative per-filter property contracts, and the graph-wide
//! propagation/validation algorithm that checks an entire pipeline before
//! any worker thread is spawned.
//!
//! A filter declares a [`PropertyContract`] at init time: input
//! [`Constraint`]s it requires of what it receives, and output
//! [`Behavior`]s describing how it derives its own property table from its
//! inputs. A [`PropertyGraph`] wires contracts together the same way a
//! pipeline wires buffers together, and [`PropertyGraph::validate`] walks
//! it in topological order, propagating property tables forward and
//! failing fast with a [`PropertyError`] on the first violation.

mod contract;
mod graph;
mod table;
mod value;

pub use contract::{Behavior, Constraint, PropertyContract};
pub use graph::{PropagationResult, PropertyError, PropertyGraph};
pub use table::PropertyTable;
pub use value::{PropertyKey, PropertyValue};
