//! Geometry object model shared by every codec.
//!
//! Geometries are plain owned values: coordinate sequences with explicit
//! Z/M presence flags. The flags are carried even by empty geometries so a
//! column's declared dimensionality survives materialization.

/// Flattened geometry base kind, without dimensionality modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    /// Mixed or undetermined column type
    Unknown,
}

impl GeometryKind {
    /// The collection-promoted form of this kind: singular kinds map to
    /// their multi counterpart, everything else is unchanged.
    pub fn promoted(self) -> GeometryKind {
        match self {
            GeometryKind::Point => GeometryKind::MultiPoint,
            GeometryKind::LineString => GeometryKind::MultiLineString,
            GeometryKind::Polygon => GeometryKind::MultiPolygon,
            other => other,
        }
    }

    /// Inverse of [`GeometryKind::promoted`] for the three paired kinds.
    pub fn demoted(self) -> GeometryKind {
        match self {
            GeometryKind::MultiPoint => GeometryKind::Point,
            GeometryKind::MultiLineString => GeometryKind::LineString,
            GeometryKind::MultiPolygon => GeometryKind::Polygon,
            other => other,
        }
    }

    /// Whether this kind is one of the multi/collection kinds.
    pub fn is_multi(self) -> bool {
        matches!(
            self,
            GeometryKind::MultiPoint
                | GeometryKind::MultiLineString
                | GeometryKind::MultiPolygon
                | GeometryKind::GeometryCollection
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::MultiPolygon => "MultiPolygon",
            GeometryKind::GeometryCollection => "GeometryCollection",
            GeometryKind::Unknown => "Unknown",
        }
    }
}

/// A geometry kind plus dimensionality modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryType {
    pub kind: GeometryKind,
    pub has_z: bool,
    pub has_m: bool,
}

impl GeometryType {
    pub const UNKNOWN: GeometryType = GeometryType {
        kind: GeometryKind::Unknown,
        has_z: false,
        has_m: false,
    };

    pub fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            has_z: false,
            has_m: false,
        }
    }

    pub fn with_zm(kind: GeometryKind, has_z: bool, has_m: bool) -> Self {
        Self { kind, has_z, has_m }
    }

    /// Decode an ISO or EWKB type code. EWKB sets dimensionality through
    /// high flag bits; ISO adds 1000 per modifier.
    pub fn from_wkb_code(code: u32) -> Option<GeometryType> {
        const EWKB_Z: u32 = 0x8000_0000;
        const EWKB_M: u32 = 0x4000_0000;
        const EWKB_SRID: u32 = 0x2000_0000;

        let mut has_z = code & EWKB_Z != 0;
        let mut has_m = code & EWKB_M != 0;
        let mut base = code & !(EWKB_Z | EWKB_M | EWKB_SRID);

        // ISO: 1..7 = XY, 1001.. = Z, 2001.. = M, 3001.. = ZM
        match base / 1000 {
            0 => {}
            1 => {
                has_z = true;
                base %= 1000;
            }
            2 => {
                has_m = true;
                base %= 1000;
            }
            3 => {
                has_z = true;
                has_m = true;
                base %= 1000;
            }
            _ => return None,
        }

        let kind = match base {
            1 => GeometryKind::Point,
            2 => GeometryKind::LineString,
            3 => GeometryKind::Polygon,
            4 => GeometryKind::MultiPoint,
            5 => GeometryKind::MultiLineString,
            6 => GeometryKind::MultiPolygon,
            7 => GeometryKind::GeometryCollection,
            _ => return None,
        };
        Some(GeometryType { kind, has_z, has_m })
    }

    /// The ISO WKB type code for this type.
    pub fn to_wkb_code(self) -> u32 {
        let base = match self.kind {
            GeometryKind::Point => 1,
            GeometryKind::LineString => 2,
            GeometryKind::Polygon => 3,
            GeometryKind::MultiPoint => 4,
            GeometryKind::MultiLineString => 5,
            GeometryKind::MultiPolygon => 6,
            GeometryKind::GeometryCollection => 7,
            GeometryKind::Unknown => 0,
        };
        base + if self.has_z { 1000 } else { 0 } + if self.has_m { 2000 } else { 0 }
    }

    /// Parse a type name such as `"MultiPolygon Z"` or `"Point ZM"`.
    pub fn from_name(name: &str) -> Option<GeometryType> {
        let mut parts = name.split_whitespace();
        let base = parts.next()?;
        let kind = match base.to_ascii_lowercase().as_str() {
            "point" => GeometryKind::Point,
            "linestring" => GeometryKind::LineString,
            "polygon" => GeometryKind::Polygon,
            "multipoint" => GeometryKind::MultiPoint,
            "multilinestring" => GeometryKind::MultiLineString,
            "multipolygon" => GeometryKind::MultiPolygon,
            "geometrycollection" => GeometryKind::GeometryCollection,
            _ => return None,
        };
        let (mut has_z, mut has_m) = (false, false);
        if let Some(modifier) = parts.next() {
            match modifier.to_ascii_uppercase().as_str() {
                "Z" => has_z = true,
                "M" => has_m = true,
                "ZM" => {
                    has_z = true;
                    has_m = true;
                }
                _ => return None,
            }
        }
        Some(GeometryType { kind, has_z, has_m })
    }

    /// Union dimensionality flags with another observation.
    pub fn union_zm(self, other: GeometryType) -> GeometryType {
        GeometryType {
            kind: self.kind,
            has_z: self.has_z || other.has_z,
            has_m: self.has_m || other.has_m,
        }
    }

    /// Number of coordinate slots per vertex.
    pub fn dimensions(self) -> usize {
        2 + usize::from(self.has_z) + usize::from(self.has_m)
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind.name())?;
        match (self.has_z, self.has_m) {
            (true, true) => write!(f, " ZM"),
            (true, false) => write!(f, " Z"),
            (false, true) => write!(f, " M"),
            (false, false) => Ok(()),
        }
    }
}

/// One vertex. `z`/`m` are present iff the owning geometry's flags say so.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub m: Option<f64>,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Self {
        Coord {
            x,
            y,
            z: None,
            m: None,
        }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Coord {
            x,
            y,
            z: Some(z),
            m: None,
        }
    }

    fn force_zm(&mut self, has_z: bool, has_m: bool) {
        self.z = if has_z { Some(self.z.unwrap_or(0.0)) } else { None };
        self.m = if has_m { Some(self.m.unwrap_or(0.0)) } else { None };
    }
}

/// Axis-aligned bounding box. Starts uninitialized; an uninitialized
/// envelope participates in no intersection test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub min_z: Option<f64>,
    pub max_z: Option<f64>,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope::empty()
    }
}

impl Envelope {
    pub fn empty() -> Self {
        Envelope {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: None,
            max_z: None,
        }
    }

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
            min_z: None,
            max_z: None,
        }
    }

    /// Whether any point has been merged in.
    pub fn is_initialized(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    pub fn merge_xy(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn merge_coord(&mut self, c: &Coord) {
        self.merge_xy(c.x, c.y);
        if let Some(z) = c.z {
            self.min_z = Some(self.min_z.map_or(z, |v| v.min(z)));
            self.max_z = Some(self.max_z.map_or(z, |v| v.max(z)));
        }
    }

    pub fn merge_envelope(&mut self, other: &Envelope) {
        if !other.is_initialized() {
            return;
        }
        self.merge_xy(other.min_x, other.min_y);
        self.merge_xy(other.max_x, other.max_y);
        if let Some(z) = other.min_z {
            self.min_z = Some(self.min_z.map_or(z, |v| v.min(z)));
        }
        if let Some(z) = other.max_z {
            self.max_z = Some(self.max_z.map_or(z, |v| v.max(z)));
        }
    }

    /// XY intersection test. Uninitialized envelopes intersect nothing.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.is_initialized()
            && other.is_initialized()
            && self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

/// A possibly-empty point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub coord: Option<Coord>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineString {
    pub coords: Vec<Coord>,
    pub has_z: bool,
    pub has_m: bool,
}

/// Rings are closed coordinate sequences; the first ring is the exterior.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<Coord>>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiPoint {
    pub points: Vec<Point>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiLineString {
    pub lines: Vec<LineString>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiPolygon {
    pub polygons: Vec<Polygon>,
    pub has_z: bool,
    pub has_m: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryCollection {
    pub geometries: Vec<Geometry>,
    pub has_z: bool,
    pub has_m: bool,
}

/// An owned geometry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    LineString(LineString),
    Polygon(Polygon),
    MultiPoint(MultiPoint),
    MultiLineString(MultiLineString),
    MultiPolygon(MultiPolygon),
    GeometryCollection(GeometryCollection),
}

impl Geometry {
    pub fn empty(kind: GeometryKind, has_z: bool, has_m: bool) -> Geometry {
        match kind {
            GeometryKind::Point | GeometryKind::Unknown => Geometry::Point(Point {
                coord: None,
                has_z,
                has_m,
            }),
            GeometryKind::LineString => Geometry::LineString(LineString {
                coords: Vec::new(),
                has_z,
                has_m,
            }),
            GeometryKind::Polygon => Geometry::Polygon(Polygon {
                rings: Vec::new(),
                has_z,
                has_m,
            }),
            GeometryKind::MultiPoint => Geometry::MultiPoint(MultiPoint {
                points: Vec::new(),
                has_z,
                has_m,
            }),
            GeometryKind::MultiLineString => Geometry::MultiLineString(MultiLineString {
                lines: Vec::new(),
                has_z,
                has_m,
            }),
            GeometryKind::MultiPolygon => Geometry::MultiPolygon(MultiPolygon {
                polygons: Vec::new(),
                has_z,
                has_m,
            }),
            GeometryKind::GeometryCollection => {
                Geometry::GeometryCollection(GeometryCollection {
                    geometries: Vec::new(),
                    has_z,
                    has_m,
                })
            }
        }
    }

    pub fn geometry_type(&self) -> GeometryType {
        let (kind, has_z, has_m) = match self {
            Geometry::Point(g) => (GeometryKind::Point, g.has_z, g.has_m),
            Geometry::LineString(g) => (GeometryKind::LineString, g.has_z, g.has_m),
            Geometry::Polygon(g) => (GeometryKind::Polygon, g.has_z, g.has_m),
            Geometry::MultiPoint(g) => (GeometryKind::MultiPoint, g.has_z, g.has_m),
            Geometry::MultiLineString(g) => (GeometryKind::MultiLineString, g.has_z, g.has_m),
            Geometry::MultiPolygon(g) => (GeometryKind::MultiPolygon, g.has_z, g.has_m),
            Geometry::GeometryCollection(g) => {
                (GeometryKind::GeometryCollection, g.has_z, g.has_m)
            }
        };
        GeometryType { kind, has_z, has_m }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Point(g) => g.coord.is_none(),
            Geometry::LineString(g) => g.coords.is_empty(),
            Geometry::Polygon(g) => g.rings.iter().all(|r| r.is_empty()),
            Geometry::MultiPoint(g) => g.points.is_empty(),
            Geometry::MultiLineString(g) => g.lines.is_empty(),
            Geometry::MultiPolygon(g) => g.polygons.is_empty(),
            Geometry::GeometryCollection(g) => g.geometries.is_empty(),
        }
    }

    /// Accumulate the envelope of every vertex.
    pub fn envelope(&self) -> Envelope {
        let mut env = Envelope::empty();
        self.merge_into(&mut env);
        env
    }

    fn merge_into(&self, env: &mut Envelope) {
        match self {
            Geometry::Point(g) => {
                if let Some(c) = &g.coord {
                    env.merge_coord(c);
                }
            }
            Geometry::LineString(g) => {
                for c in &g.coords {
                    env.merge_coord(c);
                }
            }
            Geometry::Polygon(g) => {
                for ring in &g.rings {
                    for c in ring {
                        env.merge_coord(c);
                    }
                }
            }
            Geometry::MultiPoint(g) => {
                for p in &g.points {
                    if let Some(c) = &p.coord {
                        env.merge_coord(c);
                    }
                }
            }
            Geometry::MultiLineString(g) => {
                for line in &g.lines {
                    for c in &line.coords {
                        env.merge_coord(c);
                    }
                }
            }
            Geometry::MultiPolygon(g) => {
                for poly in &g.polygons {
                    for ring in &poly.rings {
                        for c in ring {
                            env.merge_coord(c);
                        }
                    }
                }
            }
            Geometry::GeometryCollection(g) => {
                for geom in &g.geometries {
                    geom.merge_into(env);
                }
            }
        }
    }

    /// Force Z and M presence to match a declared dimensionality, adding
    /// zeroed ordinates or dropping existing ones as needed. Applies to
    /// empty geometries as well (the flags are still carried).
    pub fn force_zm(&mut self, has_z: bool, has_m: bool) {
        match self {
            Geometry::Point(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                if let Some(c) = &mut g.coord {
                    c.force_zm(has_z, has_m);
                }
            }
            Geometry::LineString(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for c in &mut g.coords {
                    c.force_zm(has_z, has_m);
                }
            }
            Geometry::Polygon(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for ring in &mut g.rings {
                    for c in ring {
                        c.force_zm(has_z, has_m);
                    }
                }
            }
            Geometry::MultiPoint(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for p in &mut g.points {
                    p.has_z = has_z;
                    p.has_m = has_m;
                    if let Some(c) = &mut p.coord {
                        c.force_zm(has_z, has_m);
                    }
                }
            }
            Geometry::MultiLineString(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for line in &mut g.lines {
                    for c in &mut line.coords {
                        c.force_zm(has_z, has_m);
                    }
                }
            }
            Geometry::MultiPolygon(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for poly in &mut g.polygons {
                    poly.has_z = has_z;
                    poly.has_m = has_m;
                    for ring in &mut poly.rings {
                        for c in ring {
                            c.force_zm(has_z, has_m);
                        }
                    }
                }
            }
            Geometry::GeometryCollection(g) => {
                g.has_z = has_z;
                g.has_m = has_m;
                for geom in &mut g.geometries {
                    geom.force_zm(has_z, has_m);
                }
            }
        }
    }

    /// Wrap a singular geometry into a one-part multi of `target` kind.
    /// Returns the geometry unchanged when it already matches (or when the
    /// combination is not a promotion this model knows about).
    pub fn promote_to_multi(self, target: GeometryKind) -> Geometry {
        match (self, target) {
            (Geometry::Point(p), GeometryKind::MultiPoint) => {
                let (has_z, has_m) = (p.has_z, p.has_m);
                Geometry::MultiPoint(MultiPoint {
                    points: vec![p],
                    has_z,
                    has_m,
                })
            }
            (Geometry::LineString(l), GeometryKind::MultiLineString) => {
                let (has_z, has_m) = (l.has_z, l.has_m);
                Geometry::MultiLineString(MultiLineString {
                    lines: vec![l],
                    has_z,
                    has_m,
                })
            }
            (Geometry::Polygon(p), GeometryKind::MultiPolygon) => {
                let (has_z, has_m) = (p.has_z, p.has_m);
                Geometry::MultiPolygon(MultiPolygon {
                    polygons: vec![p],
                    has_z,
                    has_m,
                })
            }
            (geom, _) => geom,
        }
    }
}
