//! Builds the row schema from a columnar schema plus sidecar metadata.
//!
//! Geometry columns are discovered from three competing conventions, in
//! order: a sidecar `columns` entry, an `ARROW:extension:name` tag, and
//! (for otherwise untagged tables) a binary column named `geometry` or
//! `geography`. A declared encoding that does not match the physical
//! column shape demotes the column to a regular attribute with a warning;
//! it is never fatal.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use tracing::warn;

use crate::geoarrow::{unify_geometry_type, validate_encoding};
use crate::geometry::GeometryKind;
use crate::metadata::{encoding_hint, Crs, EncodingHint, GeoMetadata};
use crate::schema::{
    ColumnSchema, CoveringBBox, DomainDescriptor, FieldDescriptor, FieldKind,
    GeometryFieldDescriptor,
};

const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

/// Map an Arrow schema to the row schema.
///
/// `fid_column` designates the feature-id source; it only takes effect
/// when the named column exists with a 32- or 64-bit integer type.
pub fn map_schema(
    schema: &Schema,
    sidecar: Option<&GeoMetadata>,
    fid_column: Option<&str>,
) -> ColumnSchema {
    let mut out = ColumnSchema::default();

    // Columns consumed by covering declarations never become fields.
    let covering_columns: Vec<&str> = sidecar
        .map(|meta| {
            meta.columns
                .values()
                .filter_map(|c| c.covering.as_ref())
                .filter_map(|c| c.bbox.as_ref())
                .flat_map(|paths| {
                    [&paths.xmin, &paths.ymin, &paths.xmax, &paths.ymax]
                        .into_iter()
                        .filter_map(|p| p.column())
                })
                .collect()
        })
        .unwrap_or_default();

    for (column, field) in schema.fields().iter().enumerate() {
        let name = field.name().as_str();

        if covering_columns.contains(&name) {
            continue;
        }

        if let Some(fid_name) = fid_column {
            if name == fid_name {
                if matches!(field.data_type(), DataType::Int32 | DataType::Int64) {
                    out.fid_column = Some((name.to_string(), column));
                    continue;
                }
                warn!(
                    column = name,
                    data_type = ?field.data_type(),
                    "FID column is not a 32/64-bit integer; keeping it as a regular field"
                );
            }
        }

        if let Some(hint) = geometry_hint(field, sidecar) {
            match validate_encoding(field, hint) {
                Some((validated_type, encoding)) => {
                    let geo = sidecar.and_then(|m| m.columns.get(name));
                    let declared = geo
                        .and_then(|g| g.declared_geometry_type())
                        .filter(|t| t.kind != GeometryKind::Unknown)
                        .unwrap_or(validated_type);
                    let crs = geo
                        .and_then(|g| g.crs.clone())
                        .or_else(|| extension_crs(field))
                        .map(Arc::new);
                    let covering = geo
                        .and_then(|g| g.covering.as_ref())
                        .and_then(|c| c.bbox.as_ref())
                        .and_then(|paths| resolve_covering(schema, name, paths));
                    out.geometry_fields.push(GeometryFieldDescriptor {
                        name: name.to_string(),
                        encoding,
                        geometry_type: declared,
                        nullable: field.is_nullable(),
                        crs,
                        epoch: geo.and_then(|g| g.epoch),
                        column,
                        covering,
                        column_bbox: geo.and_then(|g| g.envelope()),
                    });
                    continue;
                }
                None => {
                    warn!(
                        column = name,
                        data_type = ?field.data_type(),
                        "declared geometry encoding does not match the column type; \
                         treating it as a regular attribute"
                    );
                }
            }
        }

        map_regular_column(field, vec![column], &mut out);
    }

    out
}

/// The encoding a column claims, from whichever convention declares it.
fn geometry_hint(field: &Field, sidecar: Option<&GeoMetadata>) -> Option<EncodingHint> {
    let name = field.name().as_str();
    if let Some(geo) = sidecar.and_then(|m| m.columns.get(name)) {
        // GeoParquet defaults to WKB when the encoding key is absent
        return Some(
            geo.encoding
                .as_deref()
                .and_then(encoding_hint)
                .unwrap_or(EncodingHint::Wkb),
        );
    }
    if let Some(extension) = field.metadata().get(EXTENSION_NAME_KEY) {
        return encoding_hint(extension);
    }
    // untagged tables: a bare binary column with the conventional name
    if (name == "geometry" || name == "geography")
        && matches!(
            field.data_type(),
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView
        )
    {
        return Some(EncodingHint::Wkb);
    }
    None
}

/// CRS carried by `ARROW:extension:metadata` as `{"crs": ...}`.
fn extension_crs(field: &Field) -> Option<Crs> {
    let raw = field.metadata().get(EXTENSION_METADATA_KEY)?;
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match value.get("crs")? {
        serde_json::Value::String(s) => Some(Crs::Text(s.clone())),
        obj @ serde_json::Value::Object(_) => Some(Crs::Projjson(obj.clone())),
        _ => None,
    }
}

/// Resolve covering `[column, subfield]` paths into concrete indices.
/// All four edges must live in the same top-level struct column.
fn resolve_covering(
    schema: &Schema,
    geom_name: &str,
    paths: &crate::metadata::CoveringBBoxPaths,
) -> Option<CoveringBBox> {
    let column_name = paths.xmin.column()?;
    for p in [&paths.ymin, &paths.xmax, &paths.ymax] {
        if p.column() != Some(column_name) {
            warn!(
                column = geom_name,
                "covering bbox spread across several columns is not handled; ignoring it"
            );
            return None;
        }
    }
    let (column, bbox_field) = schema.column_with_name(column_name)?;
    let DataType::Struct(children) = bbox_field.data_type() else {
        warn!(column = column_name, "covering bbox column is not a struct");
        return None;
    };
    let subfield = |name: Option<&str>| -> Option<usize> {
        let name = name?;
        children.iter().position(|f| f.name() == name)
    };
    let xmin = subfield(paths.xmin.subfield())?;
    let ymin = subfield(paths.ymin.subfield())?;
    let xmax = subfield(paths.xmax.subfield())?;
    let ymax = subfield(paths.ymax.subfield())?;
    let float32 = matches!(children[xmin].data_type(), DataType::Float32);
    Some(CoveringBBox {
        column,
        xmin,
        ymin,
        xmax,
        ymax,
        float32,
    })
}

/// Register one non-geometry column, flattening nested structs into
/// dotted leaf names with explicit child-index paths.
fn map_regular_column(field: &Field, path: Vec<usize>, out: &mut ColumnSchema) {
    // iterative walk; the stack is bounded by the schema's nesting depth
    let mut stack: Vec<(String, Arc<Field>, Vec<usize>)> = vec![(
        field.name().clone(),
        Arc::new(field.clone()),
        path,
    )];
    while let Some((name, field, path)) = stack.pop() {
        match field.data_type() {
            DataType::Struct(children) => {
                // push in reverse so the leaves come out in declaration order
                for (child_idx, child) in children.iter().enumerate().rev() {
                    let mut child_path = path.clone();
                    child_path.push(child_idx);
                    stack.push((
                        format!("{name}.{}", child.name()),
                        child.clone(),
                        child_path,
                    ));
                }
            }
            DataType::Dictionary(key_type, value_type) => {
                let key_kind = FieldKind::from_data_type(key_type);
                match (key_kind, value_type.as_ref()) {
                    (Some(kind), DataType::Utf8 | DataType::LargeUtf8)
                        if kind.is_numeric() =>
                    {
                        let field_index = out.fields.len();
                        out.domains.push(DomainDescriptor {
                            name: name.clone(),
                            field_index,
                        });
                        out.fields.push(FieldDescriptor {
                            name: name.clone(),
                            kind,
                            nullable: field.is_nullable(),
                            path,
                            domain: Some(name),
                        });
                    }
                    _ => {
                        warn!(
                            column = name.as_str(),
                            "unhandled dictionary column; skipping it"
                        );
                    }
                }
            }
            data_type => match FieldKind::from_data_type(data_type) {
                Some(kind) => out.fields.push(FieldDescriptor {
                    name,
                    kind,
                    nullable: field.is_nullable(),
                    path,
                    domain: None,
                }),
                None => {
                    warn!(
                        column = name.as_str(),
                        ?data_type,
                        "column type has no row-side representation; skipping it"
                    );
                }
            },
        }
    }
}

/// Fill still-unknown geometry types by scanning sample batches, reading
/// only each geometry's leading type indicator.
pub fn fill_geometry_types(schema: &mut ColumnSchema, samples: &[Arc<RecordBatch>]) {
    for geom in &mut schema.geometry_fields {
        if geom.geometry_type.kind != GeometryKind::Unknown {
            continue;
        }
        let chunks: Vec<_> = samples
            .iter()
            .filter_map(|batch| batch.columns().get(geom.column))
            .cloned()
            .collect();
        let unified = unify_geometry_type(chunks.iter(), geom.encoding);
        if unified.kind != GeometryKind::Unknown {
            geom.geometry_type = unified;
        }
    }
}

/// Build the string table of a dictionary-backed domain from the first
/// batch carrying the column.
pub fn domain_values(
    batch: &RecordBatch,
    schema: &ColumnSchema,
    domain: &DomainDescriptor,
) -> Option<Vec<Option<String>>> {
    use arrow_array::cast::AsArray;
    use arrow_array::Array;

    let field = schema.fields.get(domain.field_index)?;
    let mut array = batch.columns().get(*field.path.first()?)?.clone();
    for child in &field.path[1..] {
        let strukt = array.as_struct_opt()?;
        array = strukt.column(*child).clone();
    }
    let dict = array.as_any_dictionary_opt()?;
    let values = dict.values();
    let strings = values.as_string_opt::<i32>()?;
    Some(
        (0..strings.len())
            .map(|i| (!strings.is_null(i)).then(|| strings.value(i).to_string()))
            .collect(),
    )
}
