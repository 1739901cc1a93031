//! Per-filter property contracts: the input constraints a filter accepts
//! and the output behaviors it applies to produce its own property table.

use crate::value::{PropertyKey, PropertyValue};

/// What a filter requires of the property table it sees on its inputs.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// The property must be known, regardless of its value.
    Exists(PropertyKey),
    /// The property must be known and equal to `v`.
    Eq(PropertyKey, PropertyValue),
    /// The property must be known and numerically `>= v`.
    Gte(PropertyKey, PropertyValue),
    /// The property must be known and numerically `<= v`.
    Lte(PropertyKey, PropertyValue),
    /// The property must be known and equal across every input port named
    /// in `input_ports`.
    MultiInputAligned(PropertyKey, Vec<usize>),
}

/// How a filter derives one output property from its merged input table.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Assign a constant value, independent of any input.
    Set(PropertyKey, PropertyValue),
    /// Copy the value straight from the named input port's table.
    Preserve(PropertyKey, usize),
    /// Copy the named input port's numeric value, scaled by `factor`.
    Scale(PropertyKey, usize, f64),
    /// Mark the property unknown in the output table: a downstream filter
    /// must not require it.
    SetUnknown(PropertyKey),
}

/// The property contract a filter declares during `init`: input
/// constraints plus the behaviors used to compute its output table.
///
/// Behaviors are applied in declaration order; a later behavior targeting
/// the same key overwrites an earlier one's result, mirroring how the
/// propagation algorithm folds them one at a time over the merged input
/// table.
#[derive(Debug, Clone, Default)]
pub struct PropertyContract {
    /// Constraints this filter places on its incoming connections.
    pub constraints: Vec<Constraint>,
    /// Behaviors this filter uses to compute its output table.
    pub behaviors: Vec<Behavior>,
}

impl PropertyContract {
    /// An empty contract: no constraints, and an output table identical to
    /// the merged input table (every behavior list empty means "pass
    /// everything through unknown", matching an all-unknown source table
    /// for a filter with no inputs).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a constraint, for use while building a contract during init.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Adds a behavior, for use while building a contract during init.
    #[must_use]
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }
}
