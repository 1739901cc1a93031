//! The closed property universe and the typed values it carries.

use std::fmt;

use dflow_buffer::DType;

/// The closed set of properties a filter can constrain on input or set on
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// The sample dtype carried by a connection.
    DataType,
    /// Sample period in nanoseconds. `0` would mean irregular data, but an
    /// irregular connection simply leaves this property unknown rather than
    /// setting it to zero.
    SamplePeriodNs,
    /// The smallest batch capacity a filter guarantees to produce or accept.
    MinBatchCapacity,
    /// The largest batch capacity a filter guarantees to produce or accept.
    MaxBatchCapacity,
    /// Whether every batch but the one carrying `COMPLETE` is full.
    GuaranteeFull,
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKey::DataType => "DATA_TYPE",
            PropertyKey::SamplePeriodNs => "SAMPLE_PERIOD_NS",
            PropertyKey::MinBatchCapacity => "MIN_BATCH_CAPACITY",
            PropertyKey::MaxBatchCapacity => "MAX_BATCH_CAPACITY",
            PropertyKey::GuaranteeFull => "GUARANTEE_FULL",
        };
        f.write_str(name)
    }
}

/// A typed value for one [`PropertyKey`].
///
/// A property is "known" exactly when a [`PropertyTable`](crate::table::PropertyTable)
/// holds an entry for it; there is no separate unknown variant here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// The value of `DATA_TYPE`.
    DType(DType),
    /// The value of `SAMPLE_PERIOD_NS`, `MIN_BATCH_CAPACITY`, or
    /// `MAX_BATCH_CAPACITY`.
    Int(i64),
    /// The value of `GUARANTEE_FULL`.
    Bool(bool),
}

impl PropertyValue {
    /// Numeric ordering used by `GTE`/`LTE` constraints and `SCALE`
    /// behaviors.
    ///
    /// # Panics
    /// Panics if called on a non-numeric value (`DType`/`Bool`); `GTE`,
    /// `LTE`, and `SCALE` are only meaningful for `Int`-valued properties,
    /// and a contract pairing them with a different property is a filter
    /// authoring bug, not a runtime condition to recover from.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        match self {
            PropertyValue::Int(v) => *v,
            other => panic!("property value {other:?} is not numeric"),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::DType(d) => write!(f, "{d}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
        }
    }
}
