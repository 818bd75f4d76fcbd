use bytes::Bytes;
use indexmap::IndexMap;
use num::BigInt;
use std::sync::Arc;

/// A single typed attribute value materialized from a batch column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    // Numeric types
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float16(ordered_float::OrderedFloat<f32>), // f16 widened to f32
    Float32(ordered_float::OrderedFloat<f32>),
    Float64(ordered_float::OrderedFloat<f64>),

    // Basic types
    Boolean(bool),
    String(Arc<str>),
    Bytes(Bytes),

    // Date/Time types
    Date32(i32), // Days since epoch
    Date64(i64), // Milliseconds since epoch

    // Decimal types
    Decimal128(i128, i8),   // value, scale
    Decimal256(BigInt, i8), // BigInt keeps the full 256-bit magnitude

    // Timestamp types with optional timezone
    TimestampSecond(i64, Option<Arc<str>>),
    TimestampMillis(i64, Option<Arc<str>>),
    TimestampMicros(i64, Option<Arc<str>>),
    TimestampNanos(i64, Option<Arc<str>>),

    // Time of day since midnight
    TimeMillis(i32),
    TimeMicros(i64),

    // Complex types
    List(Vec<FieldValue>),
    Map(Vec<(FieldValue, FieldValue)>),
    Record(IndexMap<Arc<str>, FieldValue>),

    // Null value
    Null,
}

impl FieldValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Get the type name of the value
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Int8(_) => "Int8",
            FieldValue::Int16(_) => "Int16",
            FieldValue::Int32(_) => "Int32",
            FieldValue::Int64(_) => "Int64",
            FieldValue::UInt8(_) => "UInt8",
            FieldValue::UInt16(_) => "UInt16",
            FieldValue::UInt32(_) => "UInt32",
            FieldValue::UInt64(_) => "UInt64",
            FieldValue::Float16(_) => "Float16",
            FieldValue::Float32(_) => "Float32",
            FieldValue::Float64(_) => "Float64",
            FieldValue::Boolean(_) => "Boolean",
            FieldValue::String(_) => "String",
            FieldValue::Bytes(_) => "Bytes",
            FieldValue::Date32(_) => "Date32",
            FieldValue::Date64(_) => "Date64",
            FieldValue::Decimal128(_, _) => "Decimal128",
            FieldValue::Decimal256(_, _) => "Decimal256",
            FieldValue::TimestampSecond(_, _) => "TimestampSecond",
            FieldValue::TimestampMillis(_, _) => "TimestampMillis",
            FieldValue::TimestampMicros(_, _) => "TimestampMicros",
            FieldValue::TimestampNanos(_, _) => "TimestampNanos",
            FieldValue::TimeMillis(_) => "TimeMillis",
            FieldValue::TimeMicros(_) => "TimeMicros",
            FieldValue::List(_) => "List",
            FieldValue::Map(_) => "Map",
            FieldValue::Record(_) => "Record",
            FieldValue::Null => "Null",
        }
    }

    /// Numeric view of the value, widened to f64.
    ///
    /// This is the comparison domain for statistics pruning and constraint
    /// evaluation. Widening 64-bit integers can lose precision near the
    /// extremes; pruning only ever uses it to decide "definitely no match",
    /// so the approximation cannot drop matching rows.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int8(v) => Some(*v as f64),
            FieldValue::Int16(v) => Some(*v as f64),
            FieldValue::Int32(v) => Some(*v as f64),
            FieldValue::Int64(v) => Some(*v as f64),
            FieldValue::UInt8(v) => Some(*v as f64),
            FieldValue::UInt16(v) => Some(*v as f64),
            FieldValue::UInt32(v) => Some(*v as f64),
            FieldValue::UInt64(v) => Some(*v as f64),
            FieldValue::Float16(v) => Some(v.0 as f64),
            FieldValue::Float32(v) => Some(v.0 as f64),
            FieldValue::Float64(v) => Some(v.0),
            FieldValue::Boolean(v) => Some(*v as i64 as f64),
            FieldValue::Date32(v) => Some(*v as f64),
            FieldValue::Date64(v) => Some(*v as f64),
            FieldValue::TimestampSecond(v, _)
            | FieldValue::TimestampMillis(v, _)
            | FieldValue::TimestampMicros(v, _)
            | FieldValue::TimestampNanos(v, _) => Some(*v as f64),
            FieldValue::TimeMillis(v) => Some(*v as f64),
            FieldValue::TimeMicros(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// String view of the value, when it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering against another value of a comparable kind.
    ///
    /// Strings compare lexicographically, everything numeric through the
    /// f64 view. Mismatched or non-comparable kinds return `None`.
    pub fn partial_cmp_value(&self, other: &FieldValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.as_ref().cmp(b.as_ref())),
            _ => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float64(ordered_float::OrderedFloat(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(Arc::from(v))
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(Arc::from(v.as_str()))
    }
}
