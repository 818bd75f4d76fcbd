//! The row-oriented feature record handed to callers.

use std::sync::Arc;

use crate::geometry::Geometry;
use crate::metadata::Crs;
use crate::value::FieldValue;

/// A geometry value together with the spatial reference of its column.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryValue {
    pub geometry: Geometry,
    pub crs: Option<Arc<Crs>>,
}

/// One materialized row: a stable feature id, the regular field values in
/// schema order, and the geometry values in geometry-field order.
/// Ownership passes to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub fid: i64,
    pub fields: Vec<FieldValue>,
    pub geometries: Vec<Option<GeometryValue>>,
}

impl Feature {
    pub fn new(fid: i64, fields: Vec<FieldValue>, geometries: Vec<Option<GeometryValue>>) -> Self {
        Feature {
            fid,
            fields,
            geometries,
        }
    }

    /// Field value by position; `Null` past the end.
    pub fn field(&self, idx: usize) -> &FieldValue {
        self.fields.get(idx).unwrap_or(&FieldValue::Null)
    }

    /// First geometry value, the common single-geometry case.
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometries
            .first()
            .and_then(|g| g.as_ref())
            .map(|g| &g.geometry)
    }

    pub fn geometry_at(&self, idx: usize) -> Option<&Geometry> {
        self.geometries
            .get(idx)
            .and_then(|g| g.as_ref())
            .map(|g| &g.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, GeometryKind, Point};

    #[test]
    fn test_accessors() {
        let feature = Feature::new(
            7,
            vec![FieldValue::Int32(1), FieldValue::Null],
            vec![
                Some(GeometryValue {
                    geometry: Geometry::Point(Point {
                        coord: Some(Coord::xy(1.0, 2.0)),
                        has_z: false,
                        has_m: false,
                    }),
                    crs: None,
                }),
                None,
            ],
        );
        assert_eq!(feature.fid, 7);
        assert_eq!(feature.field(0), &FieldValue::Int32(1));
        assert_eq!(feature.field(9), &FieldValue::Null);
        assert_eq!(
            feature.geometry().unwrap().geometry_type().kind,
            GeometryKind::Point
        );
        assert!(feature.geometry_at(1).is_none());
    }
}
