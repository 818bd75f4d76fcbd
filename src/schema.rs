//! Row-schema data model: regular field descriptors, geometry field
//! descriptors, dictionary domains, and the projection table recomputed
//! when fields are ignored.
//!
//! A [`ColumnSchema`] is built once at open time by [`crate::mapper`] and
//! is immutable afterwards; projections are separate tables layered on
//! top of it.

use std::sync::Arc;

use arrow_schema::{DataType, TimeUnit};

use crate::error::{GeoTableError, Result};
use crate::geometry::{Envelope, GeometryType};
use crate::metadata::Crs;

/// Per-field tagged dispatch key for value extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    String,
    Binary,
    FixedSizeBinary(i32),
    Date32,
    Date64,
    TimeMillis,
    TimeMicros,
    TimestampSecond(Option<Arc<str>>),
    TimestampMillis(Option<Arc<str>>),
    TimestampMicros(Option<Arc<str>>),
    TimestampNanos(Option<Arc<str>>),
    Decimal128(u8, i8),
    Decimal256(u8, i8),
    List,
    Map,
}

impl FieldKind {
    /// Map an Arrow data type to a field kind, `None` when the type has
    /// no row-side representation here.
    pub fn from_data_type(data_type: &DataType) -> Option<FieldKind> {
        Some(match data_type {
            DataType::Boolean => FieldKind::Boolean,
            DataType::Int8 => FieldKind::Int8,
            DataType::Int16 => FieldKind::Int16,
            DataType::Int32 => FieldKind::Int32,
            DataType::Int64 => FieldKind::Int64,
            DataType::UInt8 => FieldKind::UInt8,
            DataType::UInt16 => FieldKind::UInt16,
            DataType::UInt32 => FieldKind::UInt32,
            DataType::UInt64 => FieldKind::UInt64,
            DataType::Float16 => FieldKind::Float16,
            DataType::Float32 => FieldKind::Float32,
            DataType::Float64 => FieldKind::Float64,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => FieldKind::String,
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => FieldKind::Binary,
            DataType::FixedSizeBinary(size) => FieldKind::FixedSizeBinary(*size),
            DataType::Date32 => FieldKind::Date32,
            DataType::Date64 => FieldKind::Date64,
            DataType::Time32(TimeUnit::Millisecond) => FieldKind::TimeMillis,
            DataType::Time64(TimeUnit::Microsecond) => FieldKind::TimeMicros,
            DataType::Timestamp(unit, tz) => {
                let tz = tz.as_ref().map(|s| Arc::from(s.as_ref()));
                match unit {
                    TimeUnit::Second => FieldKind::TimestampSecond(tz),
                    TimeUnit::Millisecond => FieldKind::TimestampMillis(tz),
                    TimeUnit::Microsecond => FieldKind::TimestampMicros(tz),
                    TimeUnit::Nanosecond => FieldKind::TimestampNanos(tz),
                }
            }
            DataType::Decimal128(precision, scale) => FieldKind::Decimal128(*precision, *scale),
            DataType::Decimal256(precision, scale) => FieldKind::Decimal256(*precision, *scale),
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
                FieldKind::List
            }
            DataType::Map(_, _) => FieldKind::Map,
            _ => return None,
        })
    }

    /// Whether this kind orders like a number for statistics pruning.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Int8
                | FieldKind::Int16
                | FieldKind::Int32
                | FieldKind::Int64
                | FieldKind::UInt8
                | FieldKind::UInt16
                | FieldKind::UInt32
                | FieldKind::UInt64
                | FieldKind::Float16
                | FieldKind::Float32
                | FieldKind::Float64
        )
    }
}

/// A regular (non-geometry) field of the row schema.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Ordered child-index path from the batch root down to the column.
    /// Length 1 for a top-level column; longer when the field was
    /// flattened out of nested structs.
    pub path: Vec<usize>,
    /// Name of the coded-value domain when this field was dictionary
    /// encoded (the kind is then the dictionary key's integer kind).
    pub domain: Option<String>,
}

/// Coordinate memory layout of a GeoArrow-encoded column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordLayout {
    /// FixedSizeList of interleaved x/y[/z][/m] float64 values
    Interleaved,
    /// Struct of parallel x, y[, z][, m] float64 children
    Separated,
}

/// The geometry shape a GeoArrow column encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoArrowShape {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeoArrowShape {
    /// List nesting depth above the coordinate level.
    pub fn list_depth(self) -> usize {
        match self {
            GeoArrowShape::Point => 0,
            GeoArrowShape::LineString | GeoArrowShape::MultiPoint => 1,
            GeoArrowShape::Polygon | GeoArrowShape::MultiLineString => 2,
            GeoArrowShape::MultiPolygon => 3,
        }
    }
}

/// Geometry encoding variant of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomEncoding {
    Wkb,
    Wkt,
    GeoArrow {
        shape: GeoArrowShape,
        layout: CoordLayout,
    },
}

/// Companion bounding-box column reference parsed from the covering
/// convention: a struct column with four float subfields.
#[derive(Debug, Clone)]
pub struct CoveringBBox {
    /// Top-level batch column holding the bbox struct
    pub column: usize,
    pub xmin: usize,
    pub ymin: usize,
    pub xmax: usize,
    pub ymax: usize,
    /// Subfields are float32 rather than float64
    pub float32: bool,
}

/// A geometry field of the row schema.
#[derive(Debug, Clone)]
pub struct GeometryFieldDescriptor {
    pub name: String,
    pub encoding: GeomEncoding,
    pub geometry_type: GeometryType,
    pub nullable: bool,
    pub crs: Option<Arc<Crs>>,
    pub epoch: Option<f64>,
    /// Top-level batch column index
    pub column: usize,
    pub covering: Option<CoveringBBox>,
    /// Whole-column bounding box declared by sidecar metadata
    pub column_bbox: Option<Envelope>,
}

/// Declaration of a coded-value domain backing a dictionary column.
#[derive(Debug, Clone)]
pub struct DomainDescriptor {
    pub name: String,
    /// Index into `ColumnSchema::fields` of the owning field
    pub field_index: usize,
}

/// The row schema: regular fields, geometry fields, FID source, domains.
#[derive(Debug, Clone, Default)]
pub struct ColumnSchema {
    pub fields: Vec<FieldDescriptor>,
    pub geometry_fields: Vec<GeometryFieldDescriptor>,
    /// FID column name and top-level batch column index, when a
    /// designated integer column supplies feature ids
    pub fid_column: Option<(String, usize)>,
    pub domains: Vec<DomainDescriptor>,
}

impl ColumnSchema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn geometry_index(&self, name: &str) -> Option<usize> {
        self.geometry_fields.iter().position(|f| f.name == name)
    }

    pub fn domain(&self, name: &str) -> Option<&DomainDescriptor> {
        self.domains.iter().find(|d| d.name == name)
    }

    /// The projection with every field active.
    pub fn full_projection(&self) -> Projection {
        Projection {
            fields: vec![true; self.fields.len()],
            geometries: vec![true; self.geometry_fields.len()],
        }
    }

    /// Recompute the logical→physical activation table for a set of
    /// ignored field names. Geometry fields may be ignored too. Unknown
    /// names are an error naming the offender.
    pub fn projection_ignoring(&self, ignored: &[&str]) -> Result<Projection> {
        let mut projection = self.full_projection();
        for name in ignored {
            if let Some(idx) = self.field_index(name) {
                projection.fields[idx] = false;
            } else if let Some(idx) = self.geometry_index(name) {
                projection.geometries[idx] = false;
            } else {
                return Err(GeoTableError::invalid_argument(format!(
                    "cannot ignore unknown field {name:?}"
                )));
            }
        }
        Ok(projection)
    }
}

/// Activation table layered over a [`ColumnSchema`]; recomputed once per
/// `set_ignored_fields` call instead of threading name checks through
/// every read path.
#[derive(Debug, Clone)]
pub struct Projection {
    pub fields: Vec<bool>,
    pub geometries: Vec<bool>,
}

impl Projection {
    pub fn field_active(&self, idx: usize) -> bool {
        self.fields.get(idx).copied().unwrap_or(false)
    }

    pub fn geometry_active(&self, idx: usize) -> bool {
        self.geometries.get(idx).copied().unwrap_or(false)
    }
}
