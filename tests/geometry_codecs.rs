use geotable::geometry::{Coord, Geometry, GeometryKind, LineString, MultiPolygon, Point, Polygon};
use geotable::{wkb, wkt};

fn square_ring(origin: f64, size: f64) -> Vec<Coord> {
    vec![
        Coord::xy(origin, origin),
        Coord::xy(origin, origin + size),
        Coord::xy(origin + size, origin + size),
        Coord::xy(origin + size, origin),
        Coord::xy(origin, origin),
    ]
}

fn sample_geometries() -> Vec<Geometry> {
    vec![
        Geometry::Point(Point {
            coord: Some(Coord::xy(3.0, -7.5)),
            has_z: false,
            has_m: false,
        }),
        Geometry::Point(Point {
            coord: Some(Coord::xyz(3.0, -7.5, 22.0)),
            has_z: true,
            has_m: false,
        }),
        Geometry::LineString(LineString {
            coords: vec![Coord::xy(0.0, 0.0), Coord::xy(4.0, 1.0), Coord::xy(-2.0, 8.0)],
            has_z: false,
            has_m: false,
        }),
        Geometry::Polygon(Polygon {
            rings: vec![square_ring(0.0, 10.0), square_ring(2.0, 3.0)],
            has_z: false,
            has_m: false,
        }),
        Geometry::MultiPolygon(MultiPolygon {
            polygons: vec![
                Polygon {
                    rings: vec![square_ring(0.0, 1.0)],
                    has_z: false,
                    has_m: false,
                },
                Polygon {
                    rings: vec![square_ring(50.0, 5.0)],
                    has_z: false,
                    has_m: false,
                },
            ],
            has_z: false,
            has_m: false,
        }),
        Geometry::empty(GeometryKind::MultiLineString, false, false),
    ]
}

#[test]
fn wkb_roundtrip_preserves_geometry() {
    for geometry in sample_geometries() {
        let buf = wkb::write_geometry(&geometry);
        let back = wkb::read_geometry(&buf).unwrap();
        assert_eq!(back, geometry);
    }
}

#[test]
fn envelope_fast_path_equals_full_decode() {
    for geometry in sample_geometries() {
        let buf = wkb::write_geometry(&geometry);
        let fast = wkb::envelope(&buf).unwrap();
        let full = wkb::read_geometry(&buf).unwrap().envelope();
        assert_eq!(fast, full, "envelope mismatch for {geometry}");
    }
}

// Scenario: a polygon with exterior ring (0,0),(0,10),(10,10),(10,0),(0,0)
// bounds to (0,0)-(10,10) without constructing the polygon.
#[test]
fn polygon_envelope_without_decode() {
    let polygon = Geometry::Polygon(Polygon {
        rings: vec![square_ring(0.0, 10.0)],
        has_z: false,
        has_m: false,
    });
    let buf = wkb::write_geometry(&polygon);
    let env = wkb::envelope(&buf).unwrap();
    assert_eq!((env.min_x, env.min_y, env.max_x, env.max_y), (0.0, 0.0, 10.0, 10.0));
}

#[test]
fn truncation_never_panics() {
    for geometry in sample_geometries() {
        let buf = wkb::write_geometry(&geometry);
        for cut in 0..buf.len() {
            // must fail or succeed cleanly on every prefix
            let _ = wkb::read_geometry(&buf[..cut]);
            let _ = wkb::envelope(&buf[..cut]);
        }
    }
}

#[test]
fn wkt_and_wkb_agree() {
    let cases = [
        "POINT (1 2)",
        "LINESTRING (0 0, 4 1, -2 8)",
        "POLYGON ((0 0, 0 10, 10 10, 10 0, 0 0))",
        "MULTIPOINT ((1 2), (3 4))",
        "MULTIPOLYGON (((0 0, 0 1, 1 1, 1 0, 0 0)))",
        "GEOMETRYCOLLECTION (POINT (5 5), LINESTRING (0 0, 1 1))",
    ];
    for case in cases {
        let from_wkt = wkt::read_geometry(case).unwrap();
        let from_wkb = wkb::read_geometry(&wkb::write_geometry(&from_wkt)).unwrap();
        assert_eq!(from_wkt, from_wkb);
        assert_eq!(from_wkt.envelope(), from_wkb.envelope());
    }
}

#[test]
fn wkt_peek_matches_parse() {
    for case in [
        "POINT Z (1 2 3)",
        "MULTIPOLYGON EMPTY",
        "LINESTRING M (1 2 9, 3 4 9)",
    ] {
        let peeked = wkt::peek_type(case).unwrap();
        let parsed = wkt::read_geometry(case).unwrap().geometry_type();
        assert_eq!(peeked.kind, parsed.kind);
        assert_eq!(peeked.has_z, parsed.has_z);
        assert_eq!(peeked.has_m, parsed.has_m);
    }
}

#[test]
fn wkb_peek_reads_only_header() {
    let geometry = Geometry::Polygon(Polygon {
        rings: vec![square_ring(0.0, 1.0)],
        has_z: true,
        has_m: false,
    });
    let buf = wkb::write_geometry(&geometry);
    // the peek works on the first five bytes alone
    let t = wkb::peek_type(&buf[..5]).unwrap();
    assert_eq!(t.kind, GeometryKind::Polygon);
    assert!(t.has_z);
}
