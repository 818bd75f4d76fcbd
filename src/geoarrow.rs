//! GeoArrow nested-column codec: physical-shape validation, per-row
//! decode, and column geometry-type unification.
//!
//! Two coordinate layouts are handled: interleaved (FixedSizeList of
//! x/y[/z][/m] float64 values) and separated (Struct of parallel float64
//! children). Dimensionality is inferred from the list size or the struct
//! field names; for a size-3 list the value-field name distinguishes
//! `xyz` from `xym`.

use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float64Array, ListArray, StructArray};
use arrow_schema::{DataType, Field};

use crate::arrays::{binary_value, downcast, string_value};
use crate::error::Result;
use crate::geometry::{
    Coord, Geometry, GeometryKind, GeometryType, LineString, MultiLineString, MultiPoint,
    MultiPolygon, Point, Polygon,
};
use crate::metadata::EncodingHint;
use crate::schema::{CoordLayout, GeoArrowShape, GeomEncoding};
use crate::{wkb, wkt};

impl GeoArrowShape {
    pub fn kind(self) -> GeometryKind {
        match self {
            GeoArrowShape::Point => GeometryKind::Point,
            GeoArrowShape::LineString => GeometryKind::LineString,
            GeoArrowShape::Polygon => GeometryKind::Polygon,
            GeoArrowShape::MultiPoint => GeometryKind::MultiPoint,
            GeoArrowShape::MultiLineString => GeometryKind::MultiLineString,
            GeoArrowShape::MultiPolygon => GeometryKind::MultiPolygon,
        }
    }
}

/// Dimensionality of an interleaved coordinate list.
fn interleaved_point_type(data_type: &DataType) -> Option<(bool, bool)> {
    let DataType::FixedSizeList(value_field, size) = data_type else {
        return None;
    };
    if !matches!(value_field.data_type(), DataType::Float64) {
        return None;
    }
    match size {
        2 => Some((false, false)),
        3 => {
            if value_field.name() == "xym" {
                Some((false, true))
            } else {
                // "xyz" or the generic "element"
                Some((true, false))
            }
        }
        4 => Some((true, true)),
        _ => None,
    }
}

/// Dimensionality of a separated (struct) coordinate level: fields named
/// x, y, then optionally z and/or m, all float64.
fn separated_point_type(data_type: &DataType) -> Option<(bool, bool)> {
    let DataType::Struct(fields) = data_type else {
        return None;
    };
    if fields.len() < 2 || fields.len() > 4 {
        return None;
    }
    let is_double =
        |f: &Field, name: &str| f.name() == name && matches!(f.data_type(), DataType::Float64);
    if !is_double(&fields[0], "x") || !is_double(&fields[1], "y") {
        return None;
    }
    match fields.len() {
        2 => Some((false, false)),
        3 => {
            if is_double(&fields[2], "z") {
                Some((true, false))
            } else if is_double(&fields[2], "m") {
                Some((false, true))
            } else {
                None
            }
        }
        _ => {
            if is_double(&fields[2], "z") && is_double(&fields[3], "m") {
                Some((true, true))
            } else {
                None
            }
        }
    }
}

fn point_type(data_type: &DataType) -> Option<(CoordLayout, bool, bool)> {
    if let Some((has_z, has_m)) = interleaved_point_type(data_type) {
        return Some((CoordLayout::Interleaved, has_z, has_m));
    }
    separated_point_type(data_type).map(|(z, m)| (CoordLayout::Separated, z, m))
}

/// Walk `depth` list levels down to the coordinate level.
fn list_of_points(data_type: &DataType, depth: usize) -> Option<(CoordLayout, bool, bool)> {
    if depth == 0 {
        return point_type(data_type);
    }
    let DataType::List(child) = data_type else {
        return None;
    };
    list_of_points(child.data_type(), depth - 1)
}

/// Check that the declared or inferred encoding matches the physical
/// column shape. `None` means the caller should demote the column to a
/// regular attribute.
pub fn validate_encoding(
    field: &Field,
    hint: EncodingHint,
) -> Option<(GeometryType, GeomEncoding)> {
    match hint {
        EncodingHint::Wkb => match field.data_type() {
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
                Some((GeometryType::UNKNOWN, GeomEncoding::Wkb))
            }
            _ => None,
        },
        EncodingHint::Wkt => match field.data_type() {
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
                Some((GeometryType::UNKNOWN, GeomEncoding::Wkt))
            }
            _ => None,
        },
        EncodingHint::Shape(shape) => {
            let (layout, has_z, has_m) = list_of_points(field.data_type(), shape.list_depth())?;
            Some((
                GeometryType::with_zm(shape.kind(), has_z, has_m),
                GeomEncoding::GeoArrow { shape, layout },
            ))
        }
    }
}

/// Reader over the coordinate level of a GeoArrow column.
enum CoordReader<'a> {
    Interleaved {
        list: &'a FixedSizeListArray,
        values: &'a Float64Array,
        has_z: bool,
        has_m: bool,
    },
    Separated {
        x: &'a Float64Array,
        y: &'a Float64Array,
        z: Option<&'a Float64Array>,
        m: Option<&'a Float64Array>,
    },
}

impl<'a> CoordReader<'a> {
    fn new(point_array: &'a dyn Array, layout: CoordLayout, has_z: bool, has_m: bool) -> Result<Self> {
        match layout {
            CoordLayout::Interleaved => {
                let list = downcast::<FixedSizeListArray>(point_array)?;
                let values = downcast::<Float64Array>(list.values().as_ref())?;
                Ok(CoordReader::Interleaved {
                    list,
                    values,
                    has_z,
                    has_m,
                })
            }
            CoordLayout::Separated => {
                let strukt = downcast::<StructArray>(point_array)?;
                let x = downcast::<Float64Array>(strukt.column(0).as_ref())?;
                let y = downcast::<Float64Array>(strukt.column(1).as_ref())?;
                let mut next = 2;
                let z = if has_z {
                    let a = downcast::<Float64Array>(strukt.column(next).as_ref())?;
                    next += 1;
                    Some(a)
                } else {
                    None
                };
                let m = if has_m {
                    Some(downcast::<Float64Array>(strukt.column(next).as_ref())?)
                } else {
                    None
                };
                Ok(CoordReader::Separated { x, y, z, m })
            }
        }
    }

    /// Whether the point at this index carries no coordinates.
    fn is_empty(&self, point_idx: usize) -> bool {
        match self {
            CoordReader::Interleaved { list, values, .. } => {
                values.is_null(list.value_offset(point_idx) as usize)
            }
            CoordReader::Separated { x, .. } => x.is_null(point_idx),
        }
    }

    fn coord(&self, point_idx: usize) -> Coord {
        match self {
            CoordReader::Interleaved {
                list,
                values,
                has_z,
                has_m,
            } => {
                let base = list.value_offset(point_idx) as usize;
                let mut slot = base + 2;
                let z = has_z.then(|| {
                    let v = values.value(slot);
                    slot += 1;
                    v
                });
                let m = has_m.then(|| values.value(slot));
                Coord {
                    x: values.value(base),
                    y: values.value(base + 1),
                    z,
                    m,
                }
            }
            CoordReader::Separated { x, y, z, m } => Coord {
                x: x.value(point_idx),
                y: y.value(point_idx),
                z: z.map(|a| a.value(point_idx)),
                m: m.map(|a| a.value(point_idx)),
            },
        }
    }

    fn sequence(&self, start: usize, end: usize) -> Vec<Coord> {
        (start..end).map(|i| self.coord(i)).collect()
    }
}

fn list_bounds(list: &ListArray, idx: usize) -> (usize, usize) {
    let offsets = list.value_offsets();
    (offsets[idx] as usize, offsets[idx + 1] as usize)
}

/// Decode one GeoArrow row. The caller has already handled the column
/// null bit; `row` is known valid.
pub fn decode_geoarrow(
    array: &dyn Array,
    row: usize,
    shape: GeoArrowShape,
    layout: CoordLayout,
    has_z: bool,
    has_m: bool,
) -> Result<Geometry> {
    match shape {
        GeoArrowShape::Point => {
            let reader = CoordReader::new(array, layout, has_z, has_m)?;
            let coord = (!reader.is_empty(row)).then(|| reader.coord(row));
            Ok(Geometry::Point(Point { coord, has_z, has_m }))
        }
        GeoArrowShape::LineString => {
            let list = downcast::<ListArray>(array)?;
            let reader = CoordReader::new(list.values().as_ref(), layout, has_z, has_m)?;
            let (start, end) = list_bounds(list, row);
            Ok(Geometry::LineString(LineString {
                coords: reader.sequence(start, end),
                has_z,
                has_m,
            }))
        }
        GeoArrowShape::MultiPoint => {
            let list = downcast::<ListArray>(array)?;
            let reader = CoordReader::new(list.values().as_ref(), layout, has_z, has_m)?;
            let (start, end) = list_bounds(list, row);
            let points = (start..end)
                .map(|i| Point {
                    coord: (!reader.is_empty(i)).then(|| reader.coord(i)),
                    has_z,
                    has_m,
                })
                .collect();
            Ok(Geometry::MultiPoint(MultiPoint { points, has_z, has_m }))
        }
        GeoArrowShape::Polygon => {
            let rings_list = downcast::<ListArray>(array)?;
            let ring = downcast::<ListArray>(rings_list.values().as_ref())?;
            let reader = CoordReader::new(ring.values().as_ref(), layout, has_z, has_m)?;
            let (ring_start, ring_end) = list_bounds(rings_list, row);
            let rings = (ring_start..ring_end)
                .map(|k| {
                    let (start, end) = list_bounds(ring, k);
                    reader.sequence(start, end)
                })
                .collect();
            Ok(Geometry::Polygon(Polygon { rings, has_z, has_m }))
        }
        GeoArrowShape::MultiLineString => {
            let lines_list = downcast::<ListArray>(array)?;
            let line = downcast::<ListArray>(lines_list.values().as_ref())?;
            let reader = CoordReader::new(line.values().as_ref(), layout, has_z, has_m)?;
            let (lines_start, lines_end) = list_bounds(lines_list, row);
            let lines = (lines_start..lines_end)
                .map(|k| {
                    let (start, end) = list_bounds(line, k);
                    LineString {
                        coords: reader.sequence(start, end),
                        has_z,
                        has_m,
                    }
                })
                .collect();
            Ok(Geometry::MultiLineString(MultiLineString {
                lines,
                has_z,
                has_m,
            }))
        }
        GeoArrowShape::MultiPolygon => {
            let polys_list = downcast::<ListArray>(array)?;
            let rings_list = downcast::<ListArray>(polys_list.values().as_ref())?;
            let ring = downcast::<ListArray>(rings_list.values().as_ref())?;
            let reader = CoordReader::new(ring.values().as_ref(), layout, has_z, has_m)?;
            let (polys_start, polys_end) = list_bounds(polys_list, row);
            let polygons = (polys_start..polys_end)
                .map(|p| {
                    let (ring_start, ring_end) = list_bounds(rings_list, p);
                    Polygon {
                        rings: (ring_start..ring_end)
                            .map(|k| {
                                let (start, end) = list_bounds(ring, k);
                                reader.sequence(start, end)
                            })
                            .collect(),
                        has_z,
                        has_m,
                    }
                })
                .collect();
            Ok(Geometry::MultiPolygon(MultiPolygon {
                polygons,
                has_z,
                has_m,
            }))
        }
    }
}

/// Running state of a column type scan: promoted base kind, whether a
/// true multi instance was seen, unioned Z/M flags.
#[derive(Debug, Default)]
pub struct TypeUnifier {
    base: Option<GeometryKind>,
    mixed: bool,
    seen_multi: bool,
    has_z: bool,
    has_m: bool,
}

impl TypeUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observed type in. Returns `false` once the column is
    /// known mixed, at which point scanning can stop.
    pub fn observe(&mut self, t: GeometryType) -> bool {
        if self.mixed {
            return false;
        }
        let promoted = t.kind.promoted();
        match self.base {
            None => self.base = Some(promoted),
            Some(base) if base != promoted => {
                self.mixed = true;
                return false;
            }
            Some(_) => {}
        }
        self.seen_multi |= t.kind.is_multi();
        self.has_z |= t.has_z;
        self.has_m |= t.has_m;
        true
    }

    pub fn finish(self) -> GeometryType {
        if self.mixed {
            return GeometryType::UNKNOWN;
        }
        match self.base {
            // samples exhausted without a single non-null geometry
            None => GeometryType::UNKNOWN,
            Some(base) => {
                let kind = if self.seen_multi { base } else { base.demoted() };
                GeometryType::with_zm(kind, self.has_z, self.has_m)
            }
        }
    }
}

/// Scan column chunks reading only each geometry's leading type
/// indicator and unify the observed types.
///
/// GeoArrow-encoded columns carry their type statically and never need a
/// scan; WKB reads the five header bytes, WKT the leading keyword.
pub fn unify_geometry_type<'a, I>(chunks: I, encoding: GeomEncoding) -> GeometryType
where
    I: IntoIterator<Item = &'a ArrayRef>,
{
    if let GeomEncoding::GeoArrow { .. } = encoding {
        return GeometryType::UNKNOWN;
    }
    let mut unifier = TypeUnifier::new();
    'scan: for array in chunks {
        for row in 0..array.len() {
            if array.is_null(row) {
                continue;
            }
            let observed = match encoding {
                GeomEncoding::Wkb => binary_value(array.as_ref(), row)
                    .ok()
                    .and_then(wkb::peek_type),
                GeomEncoding::Wkt => string_value(array.as_ref(), row)
                    .ok()
                    .and_then(wkt::peek_type),
                GeomEncoding::GeoArrow { .. } => unreachable!(),
            };
            if let Some(t) = observed {
                if !unifier.observe(t) {
                    break 'scan;
                }
            }
        }
    }
    unifier.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::types::Float64Type;
    use arrow_array::BinaryArray;
    use std::sync::Arc;

    fn interleaved_points(points: &[Option<Vec<f64>>], dim: i32) -> FixedSizeListArray {
        let values: Vec<Option<Vec<Option<f64>>>> = points
            .iter()
            .map(|p| p.as_ref().map(|c| c.iter().map(|v| Some(*v)).collect()))
            .collect();
        FixedSizeListArray::from_iter_primitive::<Float64Type, _, _>(values, dim)
    }

    #[test]
    fn test_validate_interleaved_point() {
        let array = interleaved_points(&[Some(vec![1.0, 2.0])], 2);
        let field = Field::new("geometry", array.data_type().clone(), true);
        let (t, encoding) =
            validate_encoding(&field, EncodingHint::Shape(GeoArrowShape::Point)).unwrap();
        assert_eq!(t.kind, GeometryKind::Point);
        assert!(!t.has_z);
        assert_eq!(
            encoding,
            GeomEncoding::GeoArrow {
                shape: GeoArrowShape::Point,
                layout: CoordLayout::Interleaved
            }
        );
    }

    #[test]
    fn test_validate_xym_hint() {
        let value_field = Arc::new(Field::new("xym", DataType::Float64, true));
        let dt = DataType::FixedSizeList(value_field, 3);
        assert_eq!(interleaved_point_type(&dt), Some((false, true)));

        let value_field = Arc::new(Field::new("xyz", DataType::Float64, true));
        let dt = DataType::FixedSizeList(value_field, 3);
        assert_eq!(interleaved_point_type(&dt), Some((true, false)));
    }

    #[test]
    fn test_validate_separated_point() {
        let dt = DataType::Struct(
            vec![
                Field::new("x", DataType::Float64, false),
                Field::new("y", DataType::Float64, false),
                Field::new("z", DataType::Float64, false),
            ]
            .into(),
        );
        assert_eq!(separated_point_type(&dt), Some((true, false)));
        let field = Field::new("geometry", dt, true);
        let (t, encoding) =
            validate_encoding(&field, EncodingHint::Shape(GeoArrowShape::Point)).unwrap();
        assert!(t.has_z);
        assert!(matches!(
            encoding,
            GeomEncoding::GeoArrow {
                layout: CoordLayout::Separated,
                ..
            }
        ));
    }

    #[test]
    fn test_validate_mismatch_demotes() {
        let field = Field::new("geometry", DataType::Utf8, true);
        assert!(validate_encoding(&field, EncodingHint::Wkb).is_none());
        let field = Field::new("geometry", DataType::Binary, true);
        assert!(validate_encoding(&field, EncodingHint::Shape(GeoArrowShape::Point)).is_none());
    }

    #[test]
    fn test_decode_point() {
        let array = interleaved_points(&[Some(vec![3.0, 4.0]), Some(vec![5.0, 6.0])], 2);
        let geom = decode_geoarrow(
            &array,
            1,
            GeoArrowShape::Point,
            CoordLayout::Interleaved,
            false,
            false,
        )
        .unwrap();
        match geom {
            Geometry::Point(p) => {
                let c = p.coord.unwrap();
                assert_eq!((c.x, c.y), (5.0, 6.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_separated_point() {
        let fields = vec![
            Arc::new(Field::new("x", DataType::Float64, false)),
            Arc::new(Field::new("y", DataType::Float64, false)),
        ];
        let array = StructArray::from(vec![
            (
                fields[0].clone(),
                Arc::new(Float64Array::from(vec![1.0, 2.0])) as arrow_array::ArrayRef,
            ),
            (
                fields[1].clone(),
                Arc::new(Float64Array::from(vec![10.0, 20.0])) as arrow_array::ArrayRef,
            ),
        ]);
        let geom = decode_geoarrow(
            &array,
            1,
            GeoArrowShape::Point,
            CoordLayout::Separated,
            false,
            false,
        )
        .unwrap();
        match geom {
            Geometry::Point(p) => {
                let c = p.coord.unwrap();
                assert_eq!((c.x, c.y), (2.0, 20.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unifier_promotion_rule() {
        let mut u = TypeUnifier::new();
        assert!(u.observe(GeometryType::new(GeometryKind::Polygon)));
        assert!(u.observe(GeometryType::new(GeometryKind::MultiPolygon)));
        assert_eq!(u.finish().kind, GeometryKind::MultiPolygon);

        let mut u = TypeUnifier::new();
        assert!(u.observe(GeometryType::new(GeometryKind::Polygon)));
        assert!(u.observe(GeometryType::new(GeometryKind::Polygon)));
        assert_eq!(u.finish().kind, GeometryKind::Polygon);

        let mut u = TypeUnifier::new();
        assert!(u.observe(GeometryType::new(GeometryKind::Point)));
        assert!(!u.observe(GeometryType::new(GeometryKind::LineString)));
        assert_eq!(u.finish().kind, GeometryKind::Unknown);

        let u = TypeUnifier::new();
        assert_eq!(u.finish().kind, GeometryKind::Unknown);
    }

    #[test]
    fn test_unify_from_wkb_column() {
        use crate::geometry::{Coord, LineString};
        let line = |coords: Vec<Coord>| {
            wkb::write_geometry(&Geometry::LineString(LineString {
                coords,
                has_z: false,
                has_m: false,
            }))
        };
        let a = line(vec![Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0)]);
        let b = wkb::write_geometry(&Geometry::MultiLineString(MultiLineString {
            lines: vec![],
            has_z: true,
            has_m: false,
        }));
        let array: ArrayRef = Arc::new(BinaryArray::from(vec![
            Some(a.as_slice()),
            None,
            Some(b.as_slice()),
        ]));
        let t = unify_geometry_type([&array], GeomEncoding::Wkb);
        assert_eq!(t.kind, GeometryKind::MultiLineString);
        assert!(t.has_z);
    }
}
