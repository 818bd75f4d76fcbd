//! Row materialization: one row index + the current batch's columns →
//! a [`Feature`].
//!
//! Value extraction is a tagged dispatch over [`FieldKind`], one handler
//! per kind; nested list/map/struct values recurse over the physical
//! Arrow type. Unsupported shapes and malformed geometries degrade to
//! null values with a warning; they never abort the row.

use arrow_array::cast::AsArray;
use arrow_array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Decimal128Array, Decimal256Array,
    FixedSizeBinaryArray, FixedSizeListArray, Float16Array, Float32Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, LargeListArray, ListArray, MapArray, RecordBatch,
    StructArray, Time32MillisecondArray, Time64MicrosecondArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::DataType;
use bytes::Bytes;
use indexmap::IndexMap;
use num::BigInt;
use ordered_float::OrderedFloat;
use std::sync::Arc;
use tracing::warn;

use crate::arrays::{binary_value, downcast, string_value};
use crate::error::{GeoTableError, Result};
use crate::feature::{Feature, GeometryValue};
use crate::geometry::{Geometry, GeometryKind};
use crate::schema::{ColumnSchema, FieldDescriptor, FieldKind, GeometryFieldDescriptor, Projection};
use crate::value::FieldValue;
use crate::{geoarrow, wkb, wkt};

/// Walk a nesting path from the batch root, honoring struct-level null
/// bits: a null ancestor nulls the whole leaf.
fn leaf_array(batch: &RecordBatch, path: &[usize], row: usize) -> Result<Option<ArrayRef>> {
    let first = *path
        .first()
        .ok_or_else(|| GeoTableError::internal("empty field path"))?;
    let mut array: ArrayRef = batch
        .columns()
        .get(first)
        .ok_or_else(|| GeoTableError::schema(format!("column {first} out of range")))?
        .clone();
    for &child in &path[1..] {
        if array.is_null(row) {
            return Ok(None);
        }
        let strukt = downcast::<StructArray>(array.as_ref())?;
        array = strukt
            .columns()
            .get(child)
            .ok_or_else(|| GeoTableError::schema(format!("struct child {child} out of range")))?
            .clone();
    }
    Ok(Some(array))
}

/// Extract one field value from the batch.
pub fn read_field_value(
    batch: &RecordBatch,
    field: &FieldDescriptor,
    row: usize,
) -> Result<FieldValue> {
    let Some(array) = leaf_array(batch, &field.path, row)? else {
        return Ok(FieldValue::Null);
    };
    let array = array.as_ref();
    if array.is_null(row) {
        return Ok(FieldValue::Null);
    }
    // dictionary columns surface their index value; the string table is
    // exposed separately as a domain
    if let Some(dict) = array.as_any_dictionary_opt() {
        let keys = dict.keys();
        if keys.is_null(row) {
            return Ok(FieldValue::Null);
        }
        return read_value(keys, row, &field.kind);
    }
    read_value(array, row, &field.kind)
}

/// Tagged dispatch over the field kind.
fn read_value(array: &dyn Array, row: usize, kind: &FieldKind) -> Result<FieldValue> {
    match kind {
        FieldKind::Boolean => read_boolean(array, row),
        FieldKind::Int8 => read_int8(array, row),
        FieldKind::Int16 => read_int16(array, row),
        FieldKind::Int32 => read_int32(array, row),
        FieldKind::Int64 => read_int64(array, row),
        FieldKind::UInt8 => read_uint8(array, row),
        FieldKind::UInt16 => read_uint16(array, row),
        FieldKind::UInt32 => read_uint32(array, row),
        FieldKind::UInt64 => read_uint64(array, row),
        FieldKind::Float16 => read_float16(array, row),
        FieldKind::Float32 => read_float32(array, row),
        FieldKind::Float64 => read_float64(array, row),
        FieldKind::String => Ok(FieldValue::String(Arc::from(string_value(array, row)?))),
        FieldKind::Binary => Ok(FieldValue::Bytes(Bytes::copy_from_slice(binary_value(
            array, row,
        )?))),
        FieldKind::FixedSizeBinary(_) => read_fixed_binary(array, row),
        FieldKind::Date32 => read_date32(array, row),
        FieldKind::Date64 => read_date64(array, row),
        FieldKind::TimeMillis => read_time_millis(array, row),
        FieldKind::TimeMicros => read_time_micros(array, row),
        FieldKind::TimestampSecond(tz) => {
            let a = downcast::<TimestampSecondArray>(array)?;
            Ok(FieldValue::TimestampSecond(a.value(row), tz.clone()))
        }
        FieldKind::TimestampMillis(tz) => {
            let a = downcast::<TimestampMillisecondArray>(array)?;
            Ok(FieldValue::TimestampMillis(a.value(row), tz.clone()))
        }
        FieldKind::TimestampMicros(tz) => {
            let a = downcast::<TimestampMicrosecondArray>(array)?;
            Ok(FieldValue::TimestampMicros(a.value(row), tz.clone()))
        }
        FieldKind::TimestampNanos(tz) => {
            let a = downcast::<TimestampNanosecondArray>(array)?;
            Ok(FieldValue::TimestampNanos(a.value(row), tz.clone()))
        }
        FieldKind::Decimal128(_, _) => read_decimal128(array, row),
        FieldKind::Decimal256(_, _) => read_decimal256(array, row),
        FieldKind::List | FieldKind::Map => value_from_array(array, row),
    }
}

fn read_boolean(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Boolean(
        downcast::<BooleanArray>(array)?.value(row),
    ))
}

fn read_int8(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Int8(downcast::<Int8Array>(array)?.value(row)))
}

fn read_int16(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Int16(downcast::<Int16Array>(array)?.value(row)))
}

fn read_int32(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Int32(downcast::<Int32Array>(array)?.value(row)))
}

fn read_int64(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Int64(downcast::<Int64Array>(array)?.value(row)))
}

fn read_uint8(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::UInt8(downcast::<UInt8Array>(array)?.value(row)))
}

fn read_uint16(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::UInt16(
        downcast::<UInt16Array>(array)?.value(row),
    ))
}

fn read_uint32(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::UInt32(
        downcast::<UInt32Array>(array)?.value(row),
    ))
}

fn read_uint64(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::UInt64(
        downcast::<UInt64Array>(array)?.value(row),
    ))
}

fn read_float16(array: &dyn Array, row: usize) -> Result<FieldValue> {
    let value = downcast::<Float16Array>(array)?.value(row);
    Ok(FieldValue::Float16(OrderedFloat(value.to_f32())))
}

fn read_float32(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Float32(OrderedFloat(
        downcast::<Float32Array>(array)?.value(row),
    )))
}

fn read_float64(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Float64(OrderedFloat(
        downcast::<Float64Array>(array)?.value(row),
    )))
}

fn read_fixed_binary(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Bytes(Bytes::copy_from_slice(
        downcast::<FixedSizeBinaryArray>(array)?.value(row),
    )))
}

fn read_date32(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Date32(
        downcast::<Date32Array>(array)?.value(row),
    ))
}

fn read_date64(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::Date64(
        downcast::<Date64Array>(array)?.value(row),
    ))
}

fn read_time_millis(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::TimeMillis(
        downcast::<Time32MillisecondArray>(array)?.value(row),
    ))
}

fn read_time_micros(array: &dyn Array, row: usize) -> Result<FieldValue> {
    Ok(FieldValue::TimeMicros(
        downcast::<Time64MicrosecondArray>(array)?.value(row),
    ))
}

fn read_decimal128(array: &dyn Array, row: usize) -> Result<FieldValue> {
    let a = downcast::<Decimal128Array>(array)?;
    let scale = match a.data_type() {
        DataType::Decimal128(_, scale) => *scale,
        _ => 0,
    };
    Ok(FieldValue::Decimal128(a.value(row), scale))
}

fn read_decimal256(array: &dyn Array, row: usize) -> Result<FieldValue> {
    let a = downcast::<Decimal256Array>(array)?;
    let scale = match a.data_type() {
        DataType::Decimal256(_, scale) => *scale,
        _ => 0,
    };
    let bytes = a.value(row).to_le_bytes();
    let bigint = if bytes[31] & 0x80 != 0 {
        // negative: undo two's complement
        let mut inverted = [0u8; 32];
        for (i, &b) in bytes.iter().enumerate() {
            inverted[i] = !b;
        }
        let positive = BigInt::from_bytes_le(num::bigint::Sign::Plus, &inverted);
        -(positive + BigInt::from(1))
    } else {
        BigInt::from_bytes_le(num::bigint::Sign::Plus, &bytes)
    };
    Ok(FieldValue::Decimal256(bigint, scale))
}

/// Generic conversion driven by the physical type, used for the elements
/// of lists, maps and struct records.
fn value_from_array(array: &dyn Array, row: usize) -> Result<FieldValue> {
    if array.is_null(row) {
        return Ok(FieldValue::Null);
    }
    match array.data_type() {
        DataType::List(_) => {
            let list = downcast::<ListArray>(array)?;
            let values = list.value(row);
            collect_list(values.as_ref())
        }
        DataType::LargeList(_) => {
            let list = downcast::<LargeListArray>(array)?;
            let values = list.value(row);
            collect_list(values.as_ref())
        }
        DataType::FixedSizeList(_, _) => {
            let list = downcast::<FixedSizeListArray>(array)?;
            let values = list.value(row);
            collect_list(values.as_ref())
        }
        DataType::Map(_, _) => {
            let map = downcast::<MapArray>(array)?;
            let entries = map.value(row);
            let keys = entries.column(0);
            let values = entries.column(1);
            let mut out = Vec::with_capacity(keys.len());
            for i in 0..keys.len() {
                out.push((
                    value_from_array(keys.as_ref(), i)?,
                    value_from_array(values.as_ref(), i)?,
                ));
            }
            Ok(FieldValue::Map(out))
        }
        DataType::Struct(fields) => {
            let strukt = downcast::<StructArray>(array)?;
            let mut record = IndexMap::new();
            for (i, field) in fields.iter().enumerate() {
                record.insert(
                    Arc::from(field.name().as_str()),
                    value_from_array(strukt.column(i).as_ref(), row)?,
                );
            }
            Ok(FieldValue::Record(record))
        }
        data_type => match FieldKind::from_data_type(data_type) {
            Some(kind) => read_value(array, row, &kind),
            None => Err(GeoTableError::conversion(format!(
                "unsupported element type {data_type:?}"
            ))),
        },
    }
}

fn collect_list(values: &dyn Array) -> Result<FieldValue> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        out.push(value_from_array(values, i)?);
    }
    Ok(FieldValue::List(out))
}

/// Decode one geometry value, dispatching on the field's encoding.
/// Returns `Ok(None)` for null rows.
pub fn decode_geometry(
    batch: &RecordBatch,
    desc: &GeometryFieldDescriptor,
    row: usize,
) -> Result<Option<Geometry>> {
    let array = batch
        .columns()
        .get(desc.column)
        .ok_or_else(|| GeoTableError::schema(format!("geometry column {} out of range", desc.column)))?
        .as_ref();
    if array.is_null(row) {
        return Ok(None);
    }
    let geometry = match desc.encoding {
        crate::schema::GeomEncoding::Wkb => wkb::read_geometry(binary_value(array, row)?)?,
        crate::schema::GeomEncoding::Wkt => wkt::read_geometry(string_value(array, row)?)?,
        crate::schema::GeomEncoding::GeoArrow { shape, layout } => {
            let t = desc.geometry_type;
            geoarrow::decode_geoarrow(array, row, shape, layout, t.has_z, t.has_m)?
        }
    };
    Ok(Some(geometry))
}

/// Apply the declared-type promotion rules: singular instances under a
/// multi-typed field are wrapped, and the Z/M presence is forced to the
/// declared dimensionality, empty geometries included.
fn conform_geometry(mut geometry: Geometry, desc: &GeometryFieldDescriptor) -> Geometry {
    let declared = desc.geometry_type;
    if declared.kind == GeometryKind::Unknown {
        return geometry;
    }
    if declared.kind.is_multi() {
        geometry = geometry.promote_to_multi(declared.kind);
    }
    geometry.force_zm(declared.has_z, declared.has_m);
    geometry
}

/// The fast bbox of a row from its covering columns, when present.
pub fn covering_envelope(
    batch: &RecordBatch,
    desc: &GeometryFieldDescriptor,
    row: usize,
) -> Option<crate::geometry::Envelope> {
    let covering = desc.covering.as_ref()?;
    let strukt = batch.columns().get(covering.column)?.as_struct_opt()?;
    if strukt.is_null(row) {
        return None;
    }
    let edge = |subfield: usize| -> Option<f64> {
        let column = strukt.columns().get(subfield)?;
        if covering.float32 {
            Some(column.as_primitive_opt::<arrow_array::types::Float32Type>()?.value(row) as f64)
        } else {
            Some(column.as_primitive_opt::<arrow_array::types::Float64Type>()?.value(row))
        }
    };
    Some(crate::geometry::Envelope::new(
        edge(covering.xmin)?,
        edge(covering.ymin)?,
        edge(covering.xmax)?,
        edge(covering.ymax)?,
    ))
}

/// Materialize one row into a [`Feature`].
///
/// `fid` is the already-resolved feature id (explicit column value or
/// breakpoint-adjusted running index). Ignored fields stay null; field
/// read errors and malformed geometries degrade to null with a warning.
pub fn read_feature(
    batch: &RecordBatch,
    row: usize,
    schema: &ColumnSchema,
    projection: &Projection,
    fid: i64,
) -> Feature {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for (idx, field) in schema.fields.iter().enumerate() {
        if !projection.field_active(idx) {
            fields.push(FieldValue::Null);
            continue;
        }
        match read_field_value(batch, field, row) {
            Ok(value) => fields.push(value),
            Err(error) => {
                warn!(field = field.name.as_str(), %error, "could not read field value");
                fields.push(FieldValue::Null);
            }
        }
    }

    let mut geometries = Vec::with_capacity(schema.geometry_fields.len());
    for (idx, desc) in schema.geometry_fields.iter().enumerate() {
        if !projection.geometry_active(idx) {
            geometries.push(None);
            continue;
        }
        match decode_geometry(batch, desc, row) {
            Ok(Some(geometry)) => geometries.push(Some(GeometryValue {
                geometry: conform_geometry(geometry, desc),
                crs: desc.crs.clone(),
            })),
            Ok(None) => geometries.push(None),
            Err(error) => {
                warn!(field = desc.name.as_str(), %error, "could not decode geometry");
                geometries.push(None);
            }
        }
    }

    Feature::new(fid, fields, geometries)
}

/// Read the explicit FID column value, when the schema has one.
pub fn read_fid(batch: &RecordBatch, schema: &ColumnSchema, row: usize) -> Option<i64> {
    let (_, column) = schema.fid_column.as_ref()?;
    let array = batch.columns().get(*column)?;
    if array.is_null(row) {
        return None;
    }
    match array.data_type() {
        DataType::Int32 => Some(array.as_primitive::<arrow_array::types::Int32Type>().value(row) as i64),
        DataType::Int64 => Some(array.as_primitive::<arrow_array::types::Int64Type>().value(row)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map_schema;
    use arrow_array::StringArray;
    use arrow_schema::Field;

    fn batch(schema: arrow_schema::Schema, columns: Vec<ArrayRef>) -> RecordBatch {
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    #[test]
    fn test_read_scalar_fields() {
        let schema = arrow_schema::Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("height", DataType::Float64, true),
        ]);
        let b = batch(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![10, 20])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
                Arc::new(Float64Array::from(vec![1.5, 2.5])),
            ],
        );
        let mapped = map_schema(&schema, None, None);
        let projection = mapped.full_projection();
        let feature = read_feature(&b, 1, &mapped, &projection, 1);
        assert_eq!(feature.field(0), &FieldValue::Int64(20));
        assert_eq!(feature.field(1), &FieldValue::Null);
        assert_eq!(feature.field(2), &FieldValue::Float64(OrderedFloat(2.5)));
    }

    #[test]
    fn test_nested_struct_extraction() {
        let inner = vec![
            Field::new("city", DataType::Utf8, true),
            Field::new("zip", DataType::Int32, true),
        ];
        let schema = arrow_schema::Schema::new(vec![Field::new(
            "address",
            DataType::Struct(inner.clone().into()),
            true,
        )]);
        let strukt = StructArray::from(vec![
            (
                Arc::new(inner[0].clone()),
                Arc::new(StringArray::from(vec!["here", "there"])) as ArrayRef,
            ),
            (
                Arc::new(inner[1].clone()),
                Arc::new(Int32Array::from(vec![100, 200])) as ArrayRef,
            ),
        ]);
        let b = batch(schema.clone(), vec![Arc::new(strukt)]);
        let mapped = map_schema(&schema, None, None);
        assert_eq!(mapped.fields.len(), 2);
        let value = read_field_value(&b, &mapped.fields[1], 1).unwrap();
        assert_eq!(value, FieldValue::Int32(200));
    }

    #[test]
    fn test_dictionary_resolves_to_key() {
        use arrow_array::DictionaryArray;
        let schema = arrow_schema::Schema::new(vec![Field::new(
            "category",
            DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
            true,
        )]);
        let dict: DictionaryArray<arrow_array::types::Int32Type> =
            vec!["red", "green", "red"].into_iter().collect();
        let b = batch(schema.clone(), vec![Arc::new(dict)]);
        let mapped = map_schema(&schema, None, None);
        let first = read_field_value(&b, &mapped.fields[0], 0).unwrap();
        let third = read_field_value(&b, &mapped.fields[0], 2).unwrap();
        assert_eq!(first, third);
        assert!(matches!(first, FieldValue::Int32(_)));
    }

    #[test]
    fn test_wkb_geometry_with_promotion() {
        use crate::geometry::{Coord, GeometryType, LineString};
        let sidecar = crate::metadata::parse_geo_metadata(
            r#"{"columns": {"geometry": {"encoding": "WKB",
                "geometry_types": ["MultiLineString"]}}}"#,
        )
        .unwrap();
        let schema = arrow_schema::Schema::new(vec![Field::new("geometry", DataType::Binary, true)]);
        let line = wkb::write_geometry(&Geometry::LineString(LineString {
            coords: vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)],
            has_z: false,
            has_m: false,
        }));
        let b = batch(
            schema.clone(),
            vec![Arc::new(arrow_array::BinaryArray::from(vec![
                Some(line.as_slice()),
                None,
            ]))],
        );
        let mapped = map_schema(&schema, Some(&sidecar), None);
        assert_eq!(
            mapped.geometry_fields[0].geometry_type,
            GeometryType::new(GeometryKind::MultiLineString)
        );
        let projection = mapped.full_projection();
        let feature = read_feature(&b, 0, &mapped, &projection, 0);
        match feature.geometry().unwrap() {
            Geometry::MultiLineString(m) => assert_eq!(m.lines.len(), 1),
            other => panic!("expected promoted multi, got {other:?}"),
        }
        let feature = read_feature(&b, 1, &mapped, &projection, 1);
        assert!(feature.geometry().is_none());
    }

    #[test]
    fn test_malformed_geometry_degrades_to_null() {
        let schema = arrow_schema::Schema::new(vec![Field::new("geometry", DataType::Binary, true)]);
        let b = batch(
            schema.clone(),
            vec![Arc::new(arrow_array::BinaryArray::from(vec![Some(
                &b"\x01\x02\x03"[..],
            )]))],
        );
        let mapped = map_schema(&schema, None, None);
        let projection = mapped.full_projection();
        let feature = read_feature(&b, 0, &mapped, &projection, 0);
        assert!(feature.geometry().is_none());
        assert_eq!(feature.fid, 0);
    }

    #[test]
    fn test_list_field() {
        use arrow_array::builder::{Int32Builder, ListBuilder};
        let mut builder = ListBuilder::new(Int32Builder::new());
        builder.values().append_value(1);
        builder.values().append_value(2);
        builder.append(true);
        builder.values().append_value(3);
        builder.append(true);
        let list = builder.finish();
        let schema = arrow_schema::Schema::new(vec![Field::new(
            "values",
            list.data_type().clone(),
            true,
        )]);
        let b = batch(schema.clone(), vec![Arc::new(list)]);
        let mapped = map_schema(&schema, None, None);
        let value = read_field_value(&b, &mapped.fields[0], 0).unwrap();
        assert_eq!(
            value,
            FieldValue::List(vec![FieldValue::Int32(1), FieldValue::Int32(2)])
        );
    }
}
