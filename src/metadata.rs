//! Sidecar JSON metadata describing geometry columns (the `geo`
//! key/value entry of GeoParquet-style files).
//!
//! Parsing is permissive: unknown keys are ignored, `crs` may be a string
//! or a PROJJSON object (kept verbatim), and the legacy singular
//! `geometry_type` key is accepted alongside `geometry_types`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::Result;
use crate::geometry::{Envelope, GeometryType};
use crate::schema::GeoArrowShape;

/// Spatial reference of a geometry column, passed through opaquely.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Crs {
    /// Authority string or WKT, e.g. `"EPSG:4326"`
    Text(String),
    /// PROJJSON object
    Projjson(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// One `[column, subfield]` reference inside a covering declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoveringPath(pub Vec<String>);

impl CoveringPath {
    pub fn column(&self) -> Option<&str> {
        self.0.first().map(|s| s.as_str())
    }

    pub fn subfield(&self) -> Option<&str> {
        self.0.get(1).map(|s| s.as_str())
    }
}

/// The `covering.bbox` object: per-edge column references.
#[derive(Debug, Clone, Deserialize)]
pub struct CoveringBBoxPaths {
    pub xmin: CoveringPath,
    pub ymin: CoveringPath,
    pub xmax: CoveringPath,
    pub ymax: CoveringPath,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Covering {
    pub bbox: Option<CoveringBBoxPaths>,
}

/// Per-column sidecar entry.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeoColumn {
    pub encoding: Option<String>,
    #[serde(default)]
    geometry_types: Option<OneOrMany>,
    #[serde(default, rename = "geometry_type")]
    geometry_type_legacy: Option<OneOrMany>,
    pub crs: Option<Crs>,
    pub bbox: Option<Vec<f64>>,
    pub epoch: Option<f64>,
    pub covering: Option<Covering>,
}

impl GeoColumn {
    /// Declared geometry type names, whichever key carried them.
    pub fn geometry_type_names(&self) -> Vec<String> {
        self.geometry_types
            .clone()
            .or_else(|| self.geometry_type_legacy.clone())
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Unify the declared names into a single column type, with the same
    /// promoted-base rule used when scanning rows: mixed bases are
    /// Unknown, a multi instance forces the multi variant, Z/M union.
    pub fn declared_geometry_type(&self) -> Option<GeometryType> {
        let names = self.geometry_type_names();
        if names.is_empty() {
            return None;
        }
        let mut unified: Option<GeometryType> = None;
        let mut seen_multi = false;
        for name in &names {
            let t = GeometryType::from_name(name)?;
            seen_multi |= t.kind.is_multi();
            match unified {
                None => unified = Some(GeometryType::with_zm(t.kind.promoted(), t.has_z, t.has_m)),
                Some(current) => {
                    if t.kind.promoted() != current.kind {
                        return Some(GeometryType::UNKNOWN);
                    }
                    unified = Some(current.union_zm(t));
                }
            }
        }
        let unified = unified?;
        let kind = if seen_multi {
            unified.kind
        } else {
            unified.kind.demoted()
        };
        Some(GeometryType::with_zm(kind, unified.has_z, unified.has_m))
    }

    /// Whole-column envelope from the 4- or 6-element bbox.
    pub fn envelope(&self) -> Option<Envelope> {
        let bbox = self.bbox.as_ref()?;
        match bbox.len() {
            4 => Some(Envelope::new(bbox[0], bbox[1], bbox[2], bbox[3])),
            6 => {
                let mut env = Envelope::new(bbox[0], bbox[1], bbox[3], bbox[4]);
                env.min_z = Some(bbox[2]);
                env.max_z = Some(bbox[5]);
                Some(env)
            }
            _ => None,
        }
    }
}

/// The decoded sidecar document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeoMetadata {
    pub version: Option<String>,
    pub primary_column: Option<String>,
    #[serde(default)]
    pub columns: HashMap<String, GeoColumn>,
}

/// Parse the sidecar JSON. Callers treat a failure as "no sidecar"
/// after logging; it is never fatal to opening the table.
pub fn parse_geo_metadata(json: &str) -> Result<GeoMetadata> {
    Ok(serde_json::from_str(json)?)
}

/// What an encoding name in the sidecar (or an extension-type tag)
/// requests; the physical layout is still subject to validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingHint {
    Wkb,
    Wkt,
    Shape(GeoArrowShape),
}

/// Map a declared encoding name to a hint. Accepts the sidecar names
/// (`WKB`, `point`, …) and the `geoarrow.`-prefixed extension names.
pub fn encoding_hint(name: &str) -> Option<EncodingHint> {
    let name = name.strip_prefix("geoarrow.").unwrap_or(name);
    Some(match name.to_ascii_lowercase().as_str() {
        "wkb" => EncodingHint::Wkb,
        "wkt" => EncodingHint::Wkt,
        "point" => EncodingHint::Shape(GeoArrowShape::Point),
        "linestring" => EncodingHint::Shape(GeoArrowShape::LineString),
        "polygon" => EncodingHint::Shape(GeoArrowShape::Polygon),
        "multipoint" => EncodingHint::Shape(GeoArrowShape::MultiPoint),
        "multilinestring" => EncodingHint::Shape(GeoArrowShape::MultiLineString),
        "multipolygon" => EncodingHint::Shape(GeoArrowShape::MultiPolygon),
        _ => return None,
    })
}
