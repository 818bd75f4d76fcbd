//! WKT geometry codec: a recursive-descent parser, a leading-keyword
//! peek, and `Display` formatting for [`Geometry`].

use crate::error::{GeoTableError, Result};
use crate::geometry::{
    Coord, Geometry, GeometryCollection, GeometryKind, GeometryType, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, Polygon,
};

/// Read only the leading keyword and dimensionality marker.
///
/// `"MULTIPOLYGON Z (...)"` peeks as MultiPolygon Z without touching the
/// coordinate text. Returns `None` when the keyword is not a geometry tag.
pub fn peek_type(text: &str) -> Option<GeometryType> {
    let mut p = Parser::new(text);
    p.skip_ws();
    let keyword = p.ident()?;
    let kind = kind_from_keyword(&keyword)?;
    p.skip_ws();
    let (mut has_z, mut has_m) = (false, false);
    let save = p.pos;
    if let Some(marker) = p.ident() {
        match marker.as_str() {
            "Z" => has_z = true,
            "M" => has_m = true,
            "ZM" => {
                has_z = true;
                has_m = true;
            }
            "EMPTY" => {}
            _ => p.pos = save,
        }
    }
    Some(GeometryType { kind, has_z, has_m })
}

/// Parse a full WKT geometry.
pub fn read_geometry(text: &str) -> Result<Geometry> {
    let mut p = Parser::new(text);
    let geom = p.geometry()?;
    p.skip_ws();
    if p.pos != p.buf.len() {
        return Err(GeoTableError::malformed_geometry(format!(
            "trailing content at offset {}",
            p.pos
        )));
    }
    Ok(geom)
}

fn kind_from_keyword(keyword: &str) -> Option<GeometryKind> {
    Some(match keyword {
        "POINT" => GeometryKind::Point,
        "LINESTRING" => GeometryKind::LineString,
        "POLYGON" => GeometryKind::Polygon,
        "MULTIPOINT" => GeometryKind::MultiPoint,
        "MULTILINESTRING" => GeometryKind::MultiLineString,
        "MULTIPOLYGON" => GeometryKind::MultiPolygon,
        "GEOMETRYCOLLECTION" => GeometryKind::GeometryCollection,
        _ => return None,
    })
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Parser {
            buf: text.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .map(|b| b.is_ascii_alphabetic())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        Some(
            std::str::from_utf8(&self.buf[start..self.pos])
                .ok()?
                .to_ascii_uppercase(),
        )
    }

    fn expect(&mut self, ch: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(GeoTableError::malformed_geometry(format!(
                "expected '{}' at offset {}",
                ch as char, self.pos
            )))
        }
    }

    fn accept(&mut self, ch: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn number(&mut self) -> Result<f64> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .map(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.buf[start..self.pos])
            .map_err(|_| GeoTableError::malformed_geometry("non-ascii number"))?;
        text.parse::<f64>().map_err(|_| {
            GeoTableError::malformed_geometry(format!("invalid number at offset {start}"))
        })
    }

    /// Parse the tag + optional Z/M marker + EMPTY detection.
    fn header(&mut self) -> Result<(GeometryKind, bool, bool, bool)> {
        self.skip_ws();
        let keyword = self
            .ident()
            .ok_or_else(|| GeoTableError::malformed_geometry("missing geometry keyword"))?;
        let kind = kind_from_keyword(&keyword).ok_or_else(|| {
            GeoTableError::malformed_geometry(format!("unknown geometry keyword {keyword}"))
        })?;
        self.skip_ws();
        let (mut has_z, mut has_m) = (false, false);
        let save = self.pos;
        if let Some(marker) = self.ident() {
            match marker.as_str() {
                "Z" => has_z = true,
                "M" => has_m = true,
                "ZM" => {
                    has_z = true;
                    has_m = true;
                }
                "EMPTY" => return Ok((kind, has_z, has_m, true)),
                _ => self.pos = save,
            }
        }
        self.skip_ws();
        let save = self.pos;
        if let Some(marker) = self.ident() {
            if marker == "EMPTY" {
                return Ok((kind, has_z, has_m, true));
            }
            self.pos = save;
        }
        Ok((kind, has_z, has_m, false))
    }

    /// One coordinate tuple; dimensionality inferred from the token count
    /// unless Z/M markers fixed it already.
    fn coord(&mut self, has_z: &mut bool, has_m: &mut bool, explicit: bool) -> Result<Coord> {
        let x = self.number()?;
        let y = self.number()?;
        let mut extra = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b) if b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.') => {
                    extra.push(self.number()?);
                }
                _ => break,
            }
        }
        if !explicit {
            match extra.len() {
                0 => {}
                1 => *has_z = true,
                _ => {
                    *has_z = true;
                    *has_m = true;
                }
            }
        }
        // when Z is absent the first extra ordinate is M
        let mut iter = extra.into_iter();
        let z = if *has_z { iter.next() } else { None };
        let m = if *has_m { iter.next() } else { None };
        Ok(Coord {
            x,
            y,
            z: if *has_z { Some(z.unwrap_or(0.0)) } else { None },
            m: if *has_m { Some(m.unwrap_or(0.0)) } else { None },
        })
    }

    fn coord_sequence(
        &mut self,
        has_z: &mut bool,
        has_m: &mut bool,
        explicit: bool,
    ) -> Result<Vec<Coord>> {
        self.expect(b'(')?;
        let mut coords = Vec::new();
        loop {
            coords.push(self.coord(has_z, has_m, explicit)?);
            if !self.accept(b',') {
                break;
            }
        }
        self.expect(b')')?;
        Ok(coords)
    }

    fn geometry(&mut self) -> Result<Geometry> {
        let (kind, mut has_z, mut has_m, empty) = self.header()?;
        if empty {
            return Ok(Geometry::empty(kind, has_z, has_m));
        }
        let explicit = has_z || has_m;
        match kind {
            GeometryKind::Point => {
                self.expect(b'(')?;
                let c = self.coord(&mut has_z, &mut has_m, explicit)?;
                self.expect(b')')?;
                Ok(Geometry::Point(Point {
                    coord: Some(c),
                    has_z,
                    has_m,
                }))
            }
            GeometryKind::LineString => {
                let coords = self.coord_sequence(&mut has_z, &mut has_m, explicit)?;
                Ok(Geometry::LineString(LineString { coords, has_z, has_m }))
            }
            GeometryKind::Polygon => {
                self.expect(b'(')?;
                let mut rings = Vec::new();
                loop {
                    rings.push(self.coord_sequence(&mut has_z, &mut has_m, explicit)?);
                    if !self.accept(b',') {
                        break;
                    }
                }
                self.expect(b')')?;
                Ok(Geometry::Polygon(Polygon { rings, has_z, has_m }))
            }
            GeometryKind::MultiPoint => {
                self.expect(b'(')?;
                let mut points = Vec::new();
                loop {
                    // both MULTIPOINT (1 2, 3 4) and MULTIPOINT ((1 2), (3 4))
                    let wrapped = self.accept(b'(');
                    let c = self.coord(&mut has_z, &mut has_m, explicit)?;
                    if wrapped {
                        self.expect(b')')?;
                    }
                    points.push(Point {
                        coord: Some(c),
                        has_z,
                        has_m,
                    });
                    if !self.accept(b',') {
                        break;
                    }
                }
                self.expect(b')')?;
                for p in &mut points {
                    p.has_z = has_z;
                    p.has_m = has_m;
                }
                Ok(Geometry::MultiPoint(MultiPoint { points, has_z, has_m }))
            }
            GeometryKind::MultiLineString => {
                self.expect(b'(')?;
                let mut lines = Vec::new();
                loop {
                    let coords = self.coord_sequence(&mut has_z, &mut has_m, explicit)?;
                    lines.push(LineString {
                        coords,
                        has_z,
                        has_m,
                    });
                    if !self.accept(b',') {
                        break;
                    }
                }
                self.expect(b')')?;
                for l in &mut lines {
                    l.has_z = has_z;
                    l.has_m = has_m;
                }
                Ok(Geometry::MultiLineString(MultiLineString {
                    lines,
                    has_z,
                    has_m,
                }))
            }
            GeometryKind::MultiPolygon => {
                self.expect(b'(')?;
                let mut polygons = Vec::new();
                loop {
                    self.expect(b'(')?;
                    let mut rings = Vec::new();
                    loop {
                        rings.push(self.coord_sequence(&mut has_z, &mut has_m, explicit)?);
                        if !self.accept(b',') {
                            break;
                        }
                    }
                    self.expect(b')')?;
                    polygons.push(Polygon {
                        rings,
                        has_z,
                        has_m,
                    });
                    if !self.accept(b',') {
                        break;
                    }
                }
                self.expect(b')')?;
                for p in &mut polygons {
                    p.has_z = has_z;
                    p.has_m = has_m;
                }
                Ok(Geometry::MultiPolygon(MultiPolygon {
                    polygons,
                    has_z,
                    has_m,
                }))
            }
            GeometryKind::GeometryCollection => {
                self.expect(b'(')?;
                let mut geometries = Vec::new();
                loop {
                    geometries.push(self.geometry()?);
                    if !self.accept(b',') {
                        break;
                    }
                }
                self.expect(b')')?;
                Ok(Geometry::GeometryCollection(GeometryCollection {
                    geometries,
                    has_z,
                    has_m,
                }))
            }
            GeometryKind::Unknown => {
                Err(GeoTableError::malformed_geometry("unknown geometry kind"))
            }
        }
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = self.geometry_type();
        write!(f, "{}", t.kind.name().to_ascii_uppercase())?;
        match (t.has_z, t.has_m) {
            (true, true) => write!(f, " ZM")?,
            (true, false) => write!(f, " Z")?,
            (false, true) => write!(f, " M")?,
            (false, false) => {}
        }
        if self.is_empty() {
            return write!(f, " EMPTY");
        }
        write!(f, " ")?;
        write_body(self, f)
    }
}

fn write_coord(c: &Coord, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", c.x, c.y)?;
    if let Some(z) = c.z {
        write!(f, " {z}")?;
    }
    if let Some(m) = c.m {
        write!(f, " {m}")?;
    }
    Ok(())
}

fn write_sequence(coords: &[Coord], f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "(")?;
    for (i, c) in coords.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_coord(c, f)?;
    }
    write!(f, ")")
}

fn write_body(geom: &Geometry, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match geom {
        Geometry::Point(p) => match &p.coord {
            Some(c) => {
                write!(f, "(")?;
                write_coord(c, f)?;
                write!(f, ")")
            }
            None => write!(f, "EMPTY"),
        },
        Geometry::LineString(l) => write_sequence(&l.coords, f),
        Geometry::Polygon(p) => {
            write!(f, "(")?;
            for (i, ring) in p.rings.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_sequence(ring, f)?;
            }
            write!(f, ")")
        }
        Geometry::MultiPoint(m) => {
            write!(f, "(")?;
            for (i, p) in m.points.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match &p.coord {
                    Some(c) => {
                        write!(f, "(")?;
                        write_coord(c, f)?;
                        write!(f, ")")?;
                    }
                    None => write!(f, "EMPTY")?,
                }
            }
            write!(f, ")")
        }
        Geometry::MultiLineString(m) => {
            write!(f, "(")?;
            for (i, l) in m.lines.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_sequence(&l.coords, f)?;
            }
            write!(f, ")")
        }
        Geometry::MultiPolygon(m) => {
            write!(f, "(")?;
            for (i, p) in m.polygons.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "(")?;
                for (j, ring) in p.rings.iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write_sequence(ring, f)?;
                }
                write!(f, ")")?;
            }
            write!(f, ")")
        }
        Geometry::GeometryCollection(gc) => {
            write!(f, "(")?;
            for (i, g) in gc.geometries.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{g}")?;
            }
            write!(f, ")")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        match read_geometry("POINT (30 10)").unwrap() {
            Geometry::Point(p) => {
                let c = p.coord.unwrap();
                assert_eq!((c.x, c.y), (30.0, 10.0));
                assert!(!p.has_z);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_point_z_marker_and_inferred() {
        let a = read_geometry("POINT Z (1 2 3)").unwrap();
        let b = read_geometry("POINT (1 2 3)").unwrap();
        assert_eq!(a, b);
        assert!(a.geometry_type().has_z);
    }

    #[test]
    fn test_parse_m_marker() {
        match read_geometry("POINT M (1 2 5)").unwrap() {
            Geometry::Point(p) => {
                let c = p.coord.unwrap();
                assert_eq!(c.m, Some(5.0));
                assert_eq!(c.z, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_polygon_with_hole() {
        let wkt = "POLYGON ((0 0, 0 10, 10 10, 10 0, 0 0), (2 2, 2 4, 4 4, 4 2, 2 2))";
        match read_geometry(wkt).unwrap() {
            Geometry::Polygon(p) => {
                assert_eq!(p.rings.len(), 2);
                assert_eq!(p.rings[0].len(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_multipoint_both_styles() {
        let a = read_geometry("MULTIPOINT (1 2, 3 4)").unwrap();
        let b = read_geometry("MULTIPOINT ((1 2), (3 4))").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_empty() {
        let g = read_geometry("MULTIPOLYGON EMPTY").unwrap();
        assert!(g.is_empty());
        assert_eq!(g.geometry_type().kind, GeometryKind::MultiPolygon);
        let g = read_geometry("POINT Z EMPTY").unwrap();
        assert!(g.geometry_type().has_z);
    }

    #[test]
    fn test_parse_collection() {
        let g = read_geometry("GEOMETRYCOLLECTION (POINT (1 2), LINESTRING (0 0, 1 1))").unwrap();
        match g {
            Geometry::GeometryCollection(gc) => assert_eq!(gc.geometries.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_peek_type() {
        let t = peek_type("MULTILINESTRING ZM ((1 2 3 4))").unwrap();
        assert_eq!(t.kind, GeometryKind::MultiLineString);
        assert!(t.has_z && t.has_m);
        assert!(peek_type("CIRCULARSTRING (0 0, 1 1, 2 0)").is_none());
    }

    #[test]
    fn test_display_roundtrip() {
        for wkt in [
            "POINT (30 10)",
            "LINESTRING (0 0, 1 1, 2 2)",
            "POLYGON ((0 0, 0 10, 10 10, 10 0, 0 0))",
            "MULTIPOINT ((1 2), (3 4))",
            "GEOMETRYCOLLECTION (POINT (1 2))",
        ] {
            let geom = read_geometry(wkt).unwrap();
            assert_eq!(read_geometry(&geom.to_string()).unwrap(), geom);
        }
    }

    #[test]
    fn test_reject_garbage() {
        assert!(read_geometry("").is_err());
        assert!(read_geometry("POINT (1)").is_err());
        assert!(read_geometry("POINT (1 2").is_err());
        assert!(read_geometry("POINT (1 2) extra").is_err());
    }
}
