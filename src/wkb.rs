//! WKB geometry codec.
//!
//! Decoding never trusts input lengths: every count is validated against
//! the remaining buffer before allocation, recursion is capped, and any
//! inconsistency surfaces as [`GeoTableError::MalformedGeometry`] rather
//! than a panic. A fast envelope path reads only headers and coordinate
//! sequences, skipping geometry construction entirely.

use crate::error::{GeoTableError, Result};
use crate::geometry::{
    Coord, Envelope, Geometry, GeometryCollection, GeometryKind, GeometryType, LineString,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};

/// Nesting bound for collections, matching the envelope fast path.
const MAX_NESTING: usize = 128;

const EWKB_SRID: u32 = 0x2000_0000;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| GeoTableError::malformed_geometry("truncated WKB header"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32> {
        let end = self.pos + 4;
        let bytes: [u8; 4] = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| GeoTableError::malformed_geometry("truncated WKB word"))?
            .try_into()
            .map_err(|_| GeoTableError::internal("u32 slice width"))?;
        self.pos = end;
        Ok(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> Result<f64> {
        let end = self.pos + 8;
        let bytes: [u8; 8] = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| GeoTableError::malformed_geometry("truncated WKB coordinate"))?
            .try_into()
            .map_err(|_| GeoTableError::internal("f64 slice width"))?;
        self.pos = end;
        Ok(if little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    /// Read a header (byte order, type code, optional EWKB SRID) and
    /// return the decoded type.
    fn read_header(&mut self) -> Result<(GeometryType, bool)> {
        let order = self.read_u8()?;
        let little_endian = match order {
            0 => false,
            1 => true,
            other => {
                return Err(GeoTableError::malformed_geometry(format!(
                    "invalid WKB byte order {other}"
                )))
            }
        };
        let code = self.read_u32(little_endian)?;
        if code & EWKB_SRID != 0 {
            self.read_u32(little_endian)?;
        }
        let geom_type = GeometryType::from_wkb_code(code).ok_or_else(|| {
            GeoTableError::malformed_geometry(format!("unknown WKB geometry code {code}"))
        })?;
        Ok((geom_type, little_endian))
    }

    /// Validate an element count against the remaining bytes, given a
    /// conservative minimum encoded size per element.
    fn checked_count(&self, count: u32, min_element_size: usize) -> Result<usize> {
        let count = count as usize;
        if min_element_size != 0 && count > self.remaining() / min_element_size {
            return Err(GeoTableError::malformed_geometry(format!(
                "element count {count} exceeds remaining buffer"
            )));
        }
        Ok(count)
    }

    fn read_coord(&mut self, le: bool, has_z: bool, has_m: bool) -> Result<Coord> {
        let x = self.read_f64(le)?;
        let y = self.read_f64(le)?;
        let z = if has_z { Some(self.read_f64(le)?) } else { None };
        let m = if has_m { Some(self.read_f64(le)?) } else { None };
        Ok(Coord { x, y, z, m })
    }

    fn read_ring(&mut self, le: bool, has_z: bool, has_m: bool) -> Result<Vec<Coord>> {
        let dim = 2 + usize::from(has_z) + usize::from(has_m);
        let n = self.read_u32(le)?;
        let n = self.checked_count(n, dim * 8)?;
        let mut coords = Vec::with_capacity(n);
        for _ in 0..n {
            coords.push(self.read_coord(le, has_z, has_m)?);
        }
        Ok(coords)
    }
}

/// Read only the leading byte-order flag and type code.
///
/// Returns `None` for buffers shorter than the five header bytes or with
/// an unrecognized code; never fails hard.
pub fn peek_type(buf: &[u8]) -> Option<GeometryType> {
    if buf.len() < 5 {
        return None;
    }
    let little_endian = match buf[0] {
        0 => false,
        1 => true,
        _ => return None,
    };
    let bytes: [u8; 4] = buf[1..5].try_into().ok()?;
    let code = if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    };
    GeometryType::from_wkb_code(code)
}

/// Decode a full geometry from a WKB buffer.
pub fn read_geometry(buf: &[u8]) -> Result<Geometry> {
    let mut cursor = Cursor::new(buf);
    read_geometry_inner(&mut cursor, 0)
}

fn read_geometry_inner(cursor: &mut Cursor<'_>, depth: usize) -> Result<Geometry> {
    if depth > MAX_NESTING {
        return Err(GeoTableError::malformed_geometry("nesting too deep"));
    }
    let (geom_type, le) = cursor.read_header()?;
    let (has_z, has_m) = (geom_type.has_z, geom_type.has_m);
    let dim = geom_type.dimensions();

    match geom_type.kind {
        GeometryKind::Point => {
            let coord = cursor.read_coord(le, has_z, has_m)?;
            // A point of all-NaN ordinates is the conventional WKB empty
            let coord = if coord.x.is_nan() && coord.y.is_nan() {
                None
            } else {
                Some(coord)
            };
            Ok(Geometry::Point(Point { coord, has_z, has_m }))
        }
        GeometryKind::LineString => {
            let coords = cursor.read_ring(le, has_z, has_m)?;
            Ok(Geometry::LineString(LineString { coords, has_z, has_m }))
        }
        GeometryKind::Polygon => {
            let n_rings = cursor.read_u32(le)?;
            // each ring encodes at least its own 4-byte count
            let n_rings = cursor.checked_count(n_rings, 4)?;
            let mut rings = Vec::with_capacity(n_rings);
            for _ in 0..n_rings {
                rings.push(cursor.read_ring(le, has_z, has_m)?);
            }
            Ok(Geometry::Polygon(Polygon { rings, has_z, has_m }))
        }
        GeometryKind::MultiPoint => {
            let n = cursor.read_u32(le)?;
            let n = cursor.checked_count(n, 5 + dim * 8)?;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry_inner(cursor, depth + 1)? {
                    Geometry::Point(p) => points.push(p),
                    other => {
                        return Err(GeoTableError::malformed_geometry(format!(
                            "MultiPoint member is {}",
                            other.geometry_type()
                        )))
                    }
                }
            }
            Ok(Geometry::MultiPoint(MultiPoint { points, has_z, has_m }))
        }
        GeometryKind::MultiLineString => {
            let n = cursor.read_u32(le)?;
            let n = cursor.checked_count(n, 9)?;
            let mut lines = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry_inner(cursor, depth + 1)? {
                    Geometry::LineString(l) => lines.push(l),
                    other => {
                        return Err(GeoTableError::malformed_geometry(format!(
                            "MultiLineString member is {}",
                            other.geometry_type()
                        )))
                    }
                }
            }
            Ok(Geometry::MultiLineString(MultiLineString {
                lines,
                has_z,
                has_m,
            }))
        }
        GeometryKind::MultiPolygon => {
            let n = cursor.read_u32(le)?;
            let n = cursor.checked_count(n, 9)?;
            let mut polygons = Vec::with_capacity(n);
            for _ in 0..n {
                match read_geometry_inner(cursor, depth + 1)? {
                    Geometry::Polygon(p) => polygons.push(p),
                    other => {
                        return Err(GeoTableError::malformed_geometry(format!(
                            "MultiPolygon member is {}",
                            other.geometry_type()
                        )))
                    }
                }
            }
            Ok(Geometry::MultiPolygon(MultiPolygon {
                polygons,
                has_z,
                has_m,
            }))
        }
        GeometryKind::GeometryCollection => {
            let n = cursor.read_u32(le)?;
            let n = cursor.checked_count(n, 5)?;
            let mut geometries = Vec::with_capacity(n);
            for _ in 0..n {
                geometries.push(read_geometry_inner(cursor, depth + 1)?);
            }
            Ok(Geometry::GeometryCollection(GeometryCollection {
                geometries,
                has_z,
                has_m,
            }))
        }
        GeometryKind::Unknown => Err(GeoTableError::malformed_geometry("unknown geometry kind")),
    }
}

/// Accumulate the bounding box of a WKB buffer without building a
/// geometry tree. Returns `None` on any length or offset inconsistency.
pub fn envelope(buf: &[u8]) -> Option<Envelope> {
    let mut cursor = Cursor::new(buf);
    let mut env = Envelope::empty();
    envelope_inner(&mut cursor, &mut env, 0).ok()?;
    Some(env)
}

fn envelope_inner(cursor: &mut Cursor<'_>, env: &mut Envelope, depth: usize) -> Result<()> {
    if depth > MAX_NESTING {
        return Err(GeoTableError::malformed_geometry("nesting too deep"));
    }
    let (geom_type, le) = cursor.read_header()?;
    let (has_z, has_m) = (geom_type.has_z, geom_type.has_m);
    let dim = geom_type.dimensions();

    match geom_type.kind {
        GeometryKind::Point => {
            let c = cursor.read_coord(le, has_z, has_m)?;
            if !(c.x.is_nan() && c.y.is_nan()) {
                env.merge_coord(&c);
            }
            Ok(())
        }
        GeometryKind::LineString => merge_sequence(cursor, env, le, has_z, has_m),
        GeometryKind::Polygon => {
            let n_rings = cursor.read_u32(le)?;
            let n_rings = cursor.checked_count(n_rings, 4)?;
            for _ in 0..n_rings {
                merge_sequence(cursor, env, le, has_z, has_m)?;
            }
            Ok(())
        }
        GeometryKind::MultiPoint
        | GeometryKind::MultiLineString
        | GeometryKind::MultiPolygon
        | GeometryKind::GeometryCollection => {
            let n = cursor.read_u32(le)?;
            let min_size = if geom_type.kind == GeometryKind::MultiPoint {
                5 + dim * 8
            } else {
                5
            };
            let n = cursor.checked_count(n, min_size)?;
            for _ in 0..n {
                envelope_inner(cursor, env, depth + 1)?;
            }
            Ok(())
        }
        GeometryKind::Unknown => Err(GeoTableError::malformed_geometry("unknown geometry kind")),
    }
}

fn merge_sequence(
    cursor: &mut Cursor<'_>,
    env: &mut Envelope,
    le: bool,
    has_z: bool,
    has_m: bool,
) -> Result<()> {
    let dim = 2 + usize::from(has_z) + usize::from(has_m);
    let n = cursor.read_u32(le)?;
    let n = cursor.checked_count(n, dim * 8)?;
    for _ in 0..n {
        let c = cursor.read_coord(le, has_z, has_m)?;
        env.merge_coord(&c);
    }
    Ok(())
}

/// Encode a geometry in little-endian ISO WKB.
pub fn write_geometry(geom: &Geometry) -> Vec<u8> {
    let mut out = Vec::new();
    write_inner(geom, &mut out);
    out
}

fn write_header(geom_type: GeometryType, out: &mut Vec<u8>) {
    out.push(1); // little endian
    out.extend_from_slice(&geom_type.to_wkb_code().to_le_bytes());
}

fn write_coord(c: &Coord, has_z: bool, has_m: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(&c.x.to_le_bytes());
    out.extend_from_slice(&c.y.to_le_bytes());
    if has_z {
        out.extend_from_slice(&c.z.unwrap_or(0.0).to_le_bytes());
    }
    if has_m {
        out.extend_from_slice(&c.m.unwrap_or(0.0).to_le_bytes());
    }
}

fn write_sequence(coords: &[Coord], has_z: bool, has_m: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
    for c in coords {
        write_coord(c, has_z, has_m, out);
    }
}

fn write_inner(geom: &Geometry, out: &mut Vec<u8>) {
    let geom_type = geom.geometry_type();
    write_header(geom_type, out);
    match geom {
        Geometry::Point(p) => match &p.coord {
            Some(c) => write_coord(c, p.has_z, p.has_m, out),
            None => {
                // empty point: NaN ordinates
                let nan = Coord {
                    x: f64::NAN,
                    y: f64::NAN,
                    z: p.has_z.then_some(f64::NAN),
                    m: p.has_m.then_some(f64::NAN),
                };
                write_coord(&nan, p.has_z, p.has_m, out);
            }
        },
        Geometry::LineString(l) => write_sequence(&l.coords, l.has_z, l.has_m, out),
        Geometry::Polygon(p) => {
            out.extend_from_slice(&(p.rings.len() as u32).to_le_bytes());
            for ring in &p.rings {
                write_sequence(ring, p.has_z, p.has_m, out);
            }
        }
        Geometry::MultiPoint(m) => {
            out.extend_from_slice(&(m.points.len() as u32).to_le_bytes());
            for p in &m.points {
                write_inner(&Geometry::Point(p.clone()), out);
            }
        }
        Geometry::MultiLineString(m) => {
            out.extend_from_slice(&(m.lines.len() as u32).to_le_bytes());
            for l in &m.lines {
                write_inner(&Geometry::LineString(l.clone()), out);
            }
        }
        Geometry::MultiPolygon(m) => {
            out.extend_from_slice(&(m.polygons.len() as u32).to_le_bytes());
            for p in &m.polygons {
                write_inner(&Geometry::Polygon(p.clone()), out);
            }
        }
        Geometry::GeometryCollection(gc) => {
            out.extend_from_slice(&(gc.geometries.len() as u32).to_le_bytes());
            for g in &gc.geometries {
                write_inner(g, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(coords: &[(f64, f64)]) -> Geometry {
        Geometry::LineString(LineString {
            coords: coords.iter().map(|&(x, y)| Coord::xy(x, y)).collect(),
            has_z: false,
            has_m: false,
        })
    }

    #[test]
    fn test_point_roundtrip() {
        let geom = Geometry::Point(Point {
            coord: Some(Coord::xyz(1.5, -2.5, 10.0)),
            has_z: true,
            has_m: false,
        });
        let buf = write_geometry(&geom);
        assert_eq!(peek_type(&buf).unwrap().kind, GeometryKind::Point);
        assert_eq!(read_geometry(&buf).unwrap(), geom);
    }

    #[test]
    fn test_polygon_envelope_without_decode() {
        let geom = Geometry::Polygon(Polygon {
            rings: vec![vec![
                Coord::xy(0.0, 0.0),
                Coord::xy(0.0, 10.0),
                Coord::xy(10.0, 10.0),
                Coord::xy(10.0, 0.0),
                Coord::xy(0.0, 0.0),
            ]],
            has_z: false,
            has_m: false,
        });
        let buf = write_geometry(&geom);
        let env = envelope(&buf).unwrap();
        assert_eq!((env.min_x, env.min_y, env.max_x, env.max_y), (0.0, 0.0, 10.0, 10.0));
        assert_eq!(env, geom.envelope());
    }

    #[test]
    fn test_envelope_matches_full_decode() {
        let geom = Geometry::MultiLineString(MultiLineString {
            lines: vec![
                LineString {
                    coords: vec![Coord::xy(-3.0, 2.0), Coord::xy(8.0, -1.0)],
                    has_z: false,
                    has_m: false,
                },
                LineString {
                    coords: vec![Coord::xy(4.0, 9.0), Coord::xy(5.0, 5.0)],
                    has_z: false,
                    has_m: false,
                },
            ],
            has_z: false,
            has_m: false,
        });
        let buf = write_geometry(&geom);
        assert_eq!(envelope(&buf).unwrap(), read_geometry(&buf).unwrap().envelope());
    }

    #[test]
    fn test_truncated_buffer() {
        let buf = write_geometry(&line(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]));
        for cut in [0, 1, 4, 5, 8, 9, buf.len() - 1] {
            assert!(read_geometry(&buf[..cut]).is_err(), "cut at {cut}");
            assert!(envelope(&buf[..cut]).is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn test_hostile_count() {
        // linestring claiming u32::MAX points in a 13-byte buffer
        let mut buf = vec![1u8];
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(read_geometry(&buf).is_err());
        assert!(envelope(&buf).is_none());
    }

    #[test]
    fn test_big_endian_decode() {
        // big-endian point (2.0, 3.0)
        let mut buf = vec![0u8];
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&2.0f64.to_be_bytes());
        buf.extend_from_slice(&3.0f64.to_be_bytes());
        match read_geometry(&buf).unwrap() {
            Geometry::Point(p) => {
                let c = p.coord.unwrap();
                assert_eq!((c.x, c.y), (2.0, 3.0));
            }
            other => panic!("expected point, got {:?}", other),
        }
    }

    #[test]
    fn test_ewkb_srid_skipped() {
        // EWKB point with SRID flag and srid=4326
        let mut buf = vec![1u8];
        buf.extend_from_slice(&(0x2000_0001u32).to_le_bytes());
        buf.extend_from_slice(&4326u32.to_le_bytes());
        buf.extend_from_slice(&7.0f64.to_le_bytes());
        buf.extend_from_slice(&8.0f64.to_le_bytes());
        let env = envelope(&buf).unwrap();
        assert_eq!((env.min_x, env.min_y), (7.0, 8.0));
        assert!(read_geometry(&buf).is_ok());
    }

    #[test]
    fn test_collection_roundtrip() {
        let geom = Geometry::GeometryCollection(GeometryCollection {
            geometries: vec![
                Geometry::Point(Point {
                    coord: Some(Coord::xy(1.0, 2.0)),
                    has_z: false,
                    has_m: false,
                }),
                line(&[(0.0, 0.0), (5.0, 5.0)]),
            ],
            has_z: false,
            has_m: false,
        });
        let buf = write_geometry(&geom);
        assert_eq!(read_geometry(&buf).unwrap(), geom);
        assert_eq!(envelope(&buf).unwrap(), geom.envelope());
    }
}
