//! Graph-wide property propagation and pre-start validation.
//!
//! A [`PropertyGraph`] mirrors the connection topology of a pipeline: one
//! node per filter, one edge per `(from, from_port) -> (to, to_port)`
//! connection. [`PropertyGraph::validate`] runs the propagation algorithm
//! described for this system: in topological order, merge each filter's
//! incoming tables, apply its declared behaviors to produce its output
//! table, then check the next filter's constraints against the tables it
//! receives.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use dflow_error::Ec;

use crate::contract::{Behavior, Constraint, PropertyContract};
use crate::table::PropertyTable;
use crate::value::PropertyValue;

struct NodeData {
    name: String,
    contract: PropertyContract,
}

struct EdgeData {
    to_port: usize,
}

/// A `PROPERTY_VIOLATION` or `INCOMPLETE_PIPELINE` raised while validating
/// a [`PropertyGraph`], carrying the filter-chain context the spec
/// requires ("naming both filters").
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message} ({})", filter_chain.join(" -> "))]
pub struct PropertyError {
    /// The underlying error code: always `PropertyViolation` or
    /// `IncompletePipeline`.
    pub code: Ec,
    /// The filters involved, in producer-to-consumer order (empty for a
    /// graph-wide error like a missing source or a cycle).
    pub filter_chain: Vec<String>,
    /// A human-readable description of what failed.
    pub message: String,
}

impl PropertyError {
    fn violation(chain: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            code: Ec::PropertyViolation,
            filter_chain: chain,
            message: message.into(),
        }
    }

    fn incomplete_pipeline() -> Self {
        Self {
            code: Ec::IncompletePipeline,
            filter_chain: Vec::new(),
            message: "root pipeline has no source filter (a filter with no inputs)".to_string(),
        }
    }

    fn cycle() -> Self {
        Self {
            code: Ec::PropertyViolation,
            filter_chain: Vec::new(),
            message: "connection graph contains a cycle; propagation requires a DAG".to_string(),
        }
    }
}

/// The connection topology and per-filter contracts of a pipeline, ready
/// for property propagation and validation.
#[derive(Default)]
pub struct PropertyGraph {
    graph: DiGraph<NodeData, EdgeData>,
    index_of: HashMap<String, NodeIndex>,
}

/// The output property table computed for every filter, keyed by name,
/// once a [`PropertyGraph`] has validated successfully.
pub type PropagationResult = HashMap<String, PropertyTable>;

impl PropertyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a filter and its property contract.
    ///
    /// # Panics
    /// Panics if `name` was already registered; each filter in a pipeline
    /// has a unique name by construction.
    pub fn add_filter(&mut self, name: impl Into<String>, contract: PropertyContract) {
        let name = name.into();
        assert!(!self.index_of.contains_key(&name), "duplicate filter name {name} in property graph");
        let idx = self.graph.add_node(NodeData { name: name.clone(), contract });
        let _ = self.index_of.insert(name, idx);
    }

    /// Registers a connection from `(from, from_port)` to `(to, to_port)`.
    ///
    /// # Panics
    /// Panics if `from` or `to` was not registered via [`Self::add_filter`]
    /// first; the caller is expected to add every filter before wiring
    /// connections between them.
    pub fn connect(&mut self, from: &str, to: &str, to_port: usize) {
        let from_idx = *self.index_of.get(from).unwrap_or_else(|| panic!("unknown filter {from}"));
        let to_idx = *self.index_of.get(to).unwrap_or_else(|| panic!("unknown filter {to}"));
        let _ = self.graph.add_edge(from_idx, to_idx, EdgeData { to_port });
    }

    /// Runs the propagation algorithm and validates every connection in
    /// topological order, stopping at the first `PROPERTY_VIOLATION`.
    ///
    /// Returns the computed output table for each filter on success, for
    /// callers (e.g. diagnostics/`describe`) that want to inspect what the
    /// graph inferred.
    pub fn validate(&self) -> Result<PropagationResult, PropertyError> {
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|_| PropertyError::cycle())?;

        let mut has_source = false;
        let mut outputs: HashMap<NodeIndex, PropertyTable> = HashMap::new();

        for idx in order {
            let incoming: Vec<_> = self.graph.edges_directed(idx, Direction::Incoming).collect();
            if incoming.is_empty() {
                has_source = true;
            }

            let node = &self.graph[idx];
            let mut input_tables: HashMap<usize, PropertyTable> = HashMap::new();

            for edge in &incoming {
                let producer_idx = edge.source();
                let producer = &self.graph[producer_idx];
                let producer_table = outputs
                    .get(&producer_idx)
                    .expect("producer already processed in topological order");

                for constraint in &node.contract.constraints {
                    if let Constraint::MultiInputAligned(..) = constraint {
                        continue;
                    }
                    if let Err(message) = check_constraint(constraint, producer_table) {
                        return Err(PropertyError::violation(vec![producer.name.clone(), node.name.clone()], message));
                    }
                }

                let _ = input_tables.insert(edge.weight().to_port, producer_table.clone());
            }

            for constraint in &node.contract.constraints {
                if let Constraint::MultiInputAligned(key, ports) = constraint {
                    check_multi_input_aligned(*key, ports, &input_tables)
                        .map_err(|message| PropertyError::violation(vec![node.name.clone()], message))?;
                }
            }

            let mut merged = PropertyTable::all_unknown();
            for table in input_tables.values() {
                merged.merge_from(table);
            }

            let mut output = merged.clone();
            for behavior in &node.contract.behaviors {
                apply_behavior(behavior, &input_tables, &mut output);
            }

            let _ = outputs.insert(idx, output);
        }

        if !has_source {
            return Err(PropertyError::incomplete_pipeline());
        }

        Ok(outputs
            .into_iter()
            .map(|(idx, table)| (self.graph[idx].name.clone(), table))
            .collect())
    }
}

fn check_constraint(constraint: &Constraint, table: &PropertyTable) -> Result<(), String> {
    match constraint {
        Constraint::Exists(key) => {
            if table.is_known(*key) {
                Ok(())
            } else {
                Err(format!("{key} must be known"))
            }
        }
        Constraint::Eq(key, expected) => match table.get(*key) {
            Some(actual) if actual == *expected => Ok(()),
            Some(actual) => Err(format!("{key} must equal {expected}, got {actual}")),
            None => Err(format!("{key} must equal {expected}, but is unknown")),
        },
        Constraint::Gte(key, bound) => match table.get(*key) {
            Some(actual) if actual.as_i64() >= bound.as_i64() => Ok(()),
            Some(actual) => Err(format!("{key} must be >= {bound}, got {actual}")),
            None => Err(format!("{key} must be >= {bound}, but is unknown")),
        },
        Constraint::Lte(key, bound) => match table.get(*key) {
            Some(actual) if actual.as_i64() <= bound.as_i64() => Ok(()),
            Some(actual) => Err(format!("{key} must be <= {bound}, got {actual}")),
            None => Err(format!("{key} must be <= {bound}, but is unknown")),
        },
        Constraint::MultiInputAligned(..) => Ok(()),
    }
}

fn check_multi_input_aligned(
    key: crate::value::PropertyKey,
    ports: &[usize],
    input_tables: &HashMap<usize, PropertyTable>,
) -> Result<(), String> {
    let mut reference: Option<PropertyValue> = None;
    for port in ports {
        let table = input_tables
            .get(port)
            .ok_or_else(|| format!("{key} alignment requires input port {port}, which has no connection"))?;
        let value = table
            .get(key)
            .ok_or_else(|| format!("{key} must be known on input port {port} for alignment"))?;
        match reference {
            None => reference = Some(value),
            Some(r) if r == value => {}
            Some(r) => return Err(format!("{key} differs across inputs: {r} vs {value} (port {port})")),
        }
    }
    Ok(())
}

fn apply_behavior(behavior: &Behavior, input_tables: &HashMap<usize, PropertyTable>, output: &mut PropertyTable) {
    match behavior {
        Behavior::Set(key, value) => output.set(*key, *value),
        Behavior::SetUnknown(key) => output.set_unknown(*key),
        Behavior::Preserve(key, input_idx) => {
            match input_tables.get(input_idx).and_then(|t| t.get(*key)) {
                Some(value) => output.set(*key, value),
                None => output.set_unknown(*key),
            }
        }
        Behavior::Scale(key, input_idx, factor) => {
            match input_tables.get(input_idx).and_then(|t| t.get(*key)) {
                Some(value) => {
                    let scaled = (value.as_i64() as f64 * factor).round() as i64;
                    output.set(*key, PropertyValue::Int(scaled));
                }
                None => output.set_unknown(*key),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::PropertyKey;
    use dflow_buffer::DType;

    fn source_contract(dtype: DType) -> PropertyContract {
        PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::DataType, PropertyValue::DType(dtype)))
    }

    #[test]
    fn accepts_matching_chain() {
        let mut graph = PropertyGraph::new();
        graph.add_filter("source", source_contract(DType::F32));
        graph.add_filter(
            "sink",
            PropertyContract::new().with_constraint(Constraint::Eq(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
        );
        graph.connect("source", "sink", 0);

        let result = graph.validate().unwrap();
        assert_eq!(result["source"].get(PropertyKey::DataType), Some(PropertyValue::DType(DType::F32)));
    }

    #[test]
    fn rejects_dtype_mismatch_naming_both_filters() {
        let mut graph = PropertyGraph::new();
        graph.add_filter("source", source_contract(DType::I32));
        graph.add_filter(
            "sink",
            PropertyContract::new().with_constraint(Constraint::Eq(PropertyKey::DataType, PropertyValue::DType(DType::F32))),
        );
        graph.connect("source", "sink", 0);

        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, Ec::PropertyViolation);
        assert_eq!(err.filter_chain, vec!["source".to_string(), "sink".to_string()]);
    }

    #[test]
    fn rejects_graph_with_no_source() {
        let mut graph = PropertyGraph::new();
        graph.add_filter("a", PropertyContract::new());
        graph.add_filter("b", PropertyContract::new());
        graph.connect("a", "b", 0);
        graph.connect("b", "a", 0);

        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, Ec::PropertyViolation);
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn rejects_missing_source_filter() {
        let mut graph = PropertyGraph::new();
        graph.add_filter("only", PropertyContract::new());
        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, Ec::IncompletePipeline);
    }

    #[test]
    fn multi_input_aligned_catches_mismatched_period() {
        let mut graph = PropertyGraph::new();
        graph.add_filter(
            "a",
            PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::SamplePeriodNs, PropertyValue::Int(1000))),
        );
        graph.add_filter(
            "b",
            PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::SamplePeriodNs, PropertyValue::Int(2000))),
        );
        graph.add_filter(
            "merge",
            PropertyContract::new().with_constraint(Constraint::MultiInputAligned(PropertyKey::SamplePeriodNs, vec![0, 1])),
        );
        graph.connect("a", "merge", 0);
        graph.connect("b", "merge", 1);

        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, Ec::PropertyViolation);
    }

    #[test]
    fn preserve_copies_from_named_input() {
        let mut graph = PropertyGraph::new();
        graph.add_filter("source", source_contract(DType::U32));
        graph.add_filter(
            "passthrough",
            PropertyContract::new().with_behavior(Behavior::Preserve(PropertyKey::DataType, 0)),
        );
        graph.connect("source", "passthrough", 0);

        let result = graph.validate().unwrap();
        assert_eq!(result["passthrough"].get(PropertyKey::DataType), Some(PropertyValue::DType(DType::U32)));
    }

    #[test]
    fn scale_multiplies_the_named_inputs_numeric_value() {
        let mut graph = PropertyGraph::new();
        graph.add_filter(
            "source",
            PropertyContract::new().with_behavior(Behavior::Set(PropertyKey::SamplePeriodNs, PropertyValue::Int(1000))),
        );
        graph.add_filter(
            "downsample",
            PropertyContract::new().with_behavior(Behavior::Scale(PropertyKey::SamplePeriodNs, 0, 2.0)),
        );
        graph.connect("source", "downsample", 0);

        let result = graph.validate().unwrap();
        assert_eq!(result["downsample"].get(PropertyKey::SamplePeriodNs), Some(PropertyValue::Int(2000)));
    }
}
