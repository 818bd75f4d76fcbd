use std::sync::Arc;

use arrow_array::{ArrayRef, BinaryArray, Int32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use rand::Rng;

use geotable::geometry::{Coord, Envelope, Geometry, Point};
use geotable::pushdown::CompareOp;
use geotable::{
    col, lit, wkb, FeatureReader, FieldValue, FilterExpr, MemoryRowGroupSource, ReaderOptions,
    SpatialFilter, TableSource,
};

fn int_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]))
}

fn int_batch(schema: &SchemaRef, values: Vec<Option<i32>>) -> RecordBatch {
    RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(values))]).unwrap()
}

fn open_groups(groups: Vec<Vec<Option<i32>>>) -> FeatureReader {
    let schema = int_schema();
    let groups = groups
        .into_iter()
        .map(|values| vec![int_batch(&schema, values)])
        .collect();
    let source = MemoryRowGroupSource::new(schema, groups);
    FeatureReader::open(TableSource::File(Box::new(source)), ReaderOptions::new()).unwrap()
}

// Scenario: two row groups covering [0,9] and [10,19]; `v = 15` skips
// group 0 entirely, scans only group 1, and yields exactly one feature
// whose global FID is 15.
#[test]
fn equality_filter_prunes_whole_groups() {
    let mut reader = open_groups(vec![
        (0..10).map(Some).collect(),
        (10..20).map(Some).collect(),
    ]);
    reader
        .set_attribute_filter(Some(FilterExpr::eq(col("v"), lit(15))))
        .unwrap();
    assert_eq!(reader.selected_units(), Some(&[1usize][..]));

    let feature = reader.next_feature().expect("one matching feature");
    assert_eq!(feature.fid, 15);
    assert_eq!(feature.field(0), &FieldValue::Int32(15));
    assert!(reader.next_feature().is_none());
}

#[test]
fn range_filter_keeps_straddling_groups() {
    let mut reader = open_groups(vec![
        (0..10).map(Some).collect(),
        (10..20).map(Some).collect(),
        (20..30).map(Some).collect(),
    ]);
    reader
        .set_attribute_filter(Some(FilterExpr::compare(CompareOp::Ge, col("v"), lit(18))))
        .unwrap();
    assert_eq!(reader.selected_units(), Some(&[1usize, 2][..]));
    let mut fids = Vec::new();
    while let Some(feature) = reader.next_feature() {
        fids.push(feature.fid);
    }
    assert_eq!(fids, (18..30).collect::<Vec<i64>>());
}

#[test]
fn is_null_filter_uses_null_counts() {
    let mut reader = open_groups(vec![
        (0..5).map(Some).collect(),
        vec![Some(5), None, Some(7), None, Some(9)],
    ]);
    reader
        .set_attribute_filter(Some(FilterExpr::is_null(col("v"))))
        .unwrap();
    // group 0 has no nulls and is pruned
    assert_eq!(reader.selected_units(), Some(&[1usize][..]));
    let mut fids = Vec::new();
    while let Some(feature) = reader.next_feature() {
        fids.push(feature.fid);
    }
    // FIDs stay in the original global row space despite the skipped unit
    assert_eq!(fids, vec![6, 8]);
}

#[test]
fn clearing_the_filter_restores_full_iteration() {
    let mut reader = open_groups(vec![
        (0..10).map(Some).collect(),
        (10..20).map(Some).collect(),
    ]);
    reader
        .set_attribute_filter(Some(FilterExpr::eq(col("v"), lit(15))))
        .unwrap();
    assert_eq!(reader.feature_count(true).unwrap(), Some(1));
    reader.set_attribute_filter(None).unwrap();
    assert!(reader.selected_units().is_none());
    assert_eq!(reader.feature_count(false).unwrap(), Some(20));
}

#[test]
fn unknown_field_filter_is_rejected() {
    let mut reader = open_groups(vec![(0..10).map(Some).collect()]);
    assert!(reader
        .set_attribute_filter(Some(FilterExpr::eq(col("missing"), lit(1))))
        .is_err());
}

#[test]
fn or_filter_falls_back_to_residual_evaluation() {
    let mut reader = open_groups(vec![
        (0..10).map(Some).collect(),
        (10..20).map(Some).collect(),
    ]);
    let expr = FilterExpr::eq(col("v"), lit(3)).or(FilterExpr::eq(col("v"), lit(17)));
    reader.set_attribute_filter(Some(expr)).unwrap();
    // nothing compiled, so no unit can be pruned
    assert!(reader.selected_units().is_none());
    let mut values = Vec::new();
    while let Some(feature) = reader.next_feature() {
        values.push(feature.field(0).clone());
    }
    assert_eq!(values, vec![FieldValue::Int32(3), FieldValue::Int32(17)]);
}

#[test]
fn spatial_filter_prunes_on_unit_bboxes() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "geometry",
        DataType::Binary,
        true,
    )]));
    let group = |range: std::ops::Range<i32>| {
        let encoded: Vec<Option<Vec<u8>>> = range
            .map(|i| {
                Some(wkb::write_geometry(&Geometry::Point(Point {
                    coord: Some(Coord::xy(i as f64, i as f64)),
                    has_z: false,
                    has_m: false,
                })))
            })
            .collect();
        let column: ArrayRef = Arc::new(BinaryArray::from_iter(encoded));
        vec![RecordBatch::try_new(schema.clone(), vec![column]).unwrap()]
    };
    let source = MemoryRowGroupSource::new(schema.clone(), vec![group(0..5), group(10..15)])
        .with_geometry_bbox(0, 0, Envelope::new(0.0, 0.0, 4.0, 4.0))
        .with_geometry_bbox(1, 0, Envelope::new(10.0, 10.0, 14.0, 14.0));
    let mut reader =
        FeatureReader::open(TableSource::File(Box::new(source)), ReaderOptions::new()).unwrap();

    reader
        .set_spatial_filter(
            0,
            Some(SpatialFilter::Envelope(Envelope::new(11.0, 11.0, 13.0, 13.0))),
        )
        .unwrap();
    assert_eq!(reader.selected_units(), Some(&[1usize][..]));

    let mut fids = Vec::new();
    while let Some(feature) = reader.next_feature() {
        let env = feature.geometry().unwrap().envelope();
        assert!(env.intersects(&Envelope::new(11.0, 11.0, 13.0, 13.0)));
        fids.push(feature.fid);
    }
    // group 0 holds original rows 0..5, so the matches keep offsets 6..9
    assert_eq!(fids, vec![6, 7, 8]);
}

// Pushdown soundness: for random units and a random constraint, pruning
// plus row filtering must select exactly the rows the predicate selects.
#[test]
fn randomized_pruning_never_drops_matches() {
    let mut rng = rand::rng();
    for _ in 0..50 {
        let group_count = rng.random_range(1..=5);
        let mut groups: Vec<Vec<Option<i32>>> = Vec::new();
        let mut all_rows: Vec<Option<i32>> = Vec::new();
        for _ in 0..group_count {
            let base: i32 = rng.random_range(-50..50);
            let rows: usize = rng.random_range(1..=20);
            let group: Vec<Option<i32>> = (0..rows)
                .map(|_| {
                    if rng.random_range(0..10) == 0 {
                        None
                    } else {
                        Some(base + rng.random_range(0..20))
                    }
                })
                .collect();
            all_rows.extend(group.iter().cloned());
            groups.push(group);
        }

        let literal: i32 = rng.random_range(-60..80);
        let op = match rng.random_range(0..6) {
            0 => CompareOp::Eq,
            1 => CompareOp::Ne,
            2 => CompareOp::Lt,
            3 => CompareOp::Le,
            4 => CompareOp::Gt,
            _ => CompareOp::Ge,
        };
        let expected: Vec<i64> = all_rows
            .iter()
            .enumerate()
            .filter_map(|(idx, value)| {
                let v = (*value)?;
                let keep = match op {
                    CompareOp::Eq => v == literal,
                    CompareOp::Ne => v != literal,
                    CompareOp::Lt => v < literal,
                    CompareOp::Le => v <= literal,
                    CompareOp::Gt => v > literal,
                    CompareOp::Ge => v >= literal,
                };
                keep.then_some(idx as i64)
            })
            .collect();

        let mut reader = open_groups(groups);
        reader
            .set_attribute_filter(Some(FilterExpr::compare(op, col("v"), lit(literal))))
            .unwrap();
        let mut actual = Vec::new();
        while let Some(feature) = reader.next_feature() {
            actual.push(feature.fid);
        }
        assert_eq!(actual, expected, "op {op:?} literal {literal}");
    }
}
