//! The feature reader: a pull iterator over a columnar source.
//!
//! `FeatureReader` drives the outer "get next feature" loop: the cursor
//! supplies the current batch, compiled constraints and the spatial
//! pre-filter decide whether whole units or single rows are skipped, and
//! the materializer turns the surviving rows into [`Feature`]s. The loop
//! is an explicit `loop`/`continue`; rows rejected by any pre-filter fall
//! through to the next iteration.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::RecordBatch;
use tracing::warn;

use crate::error::{GeoTableError, Result};
use crate::feature::Feature;
use crate::geometry::{Envelope, Geometry, GeometryKind};
use crate::mapper::{domain_values, fill_geometry_types, map_schema};
use crate::materialize::{covering_envelope, decode_geometry, read_feature, read_fid};
use crate::metadata::parse_geo_metadata;
use crate::pushdown::{
    compile, constraint_matches, evaluate, referenced_fields, unit_bbox_match, unit_match,
    CompiledFilter, Constraint, ConstraintTarget, FilterExpr, RowBreak, RowRemap, UnitMatch,
};
use crate::schema::{ColumnSchema, GeomEncoding, Projection};
use crate::source::{BatchCursor, TableSource};
use crate::value::FieldValue;

/// Sidecar metadata key looked up in the Arrow schema metadata when the
/// source itself does not carry one.
const GEO_SCHEMA_METADATA_KEY: &str = "geo";

/// Open-time options.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Name of the column supplying feature ids
    pub fid_column: Option<String>,
    /// Scan geometry columns whose type the metadata leaves unknown,
    /// reading only each geometry's leading type indicator
    pub scan_geometry_types: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self {
            fid_column: None,
            scan_geometry_types: true,
        }
    }

    pub fn with_fid_column(mut self, name: &str) -> Self {
        self.fid_column = Some(name.to_string());
        self
    }

    pub fn without_type_scan(mut self) -> Self {
        self.scan_geometry_types = false;
        self
    }
}

/// A spatial filter: a plain envelope, or a geometry whose envelope is
/// used (exact shape tests are outside this crate).
#[derive(Debug, Clone)]
pub enum SpatialFilter {
    Envelope(Envelope),
    Geometry(Geometry),
}

impl SpatialFilter {
    fn envelope(&self) -> Envelope {
        match self {
            SpatialFilter::Envelope(env) => *env,
            SpatialFilter::Geometry(geom) => geom.envelope(),
        }
    }
}

/// Pull-based reader of features over a columnar source.
pub struct FeatureReader {
    cursor: BatchCursor,
    schema: ColumnSchema,
    projection: Projection,
    attr_filter: Option<FilterExpr>,
    compiled: Option<CompiledFilter>,
    spatial: Option<(usize, Envelope)>,
    row_in_batch: usize,
    rows_before_batch: i64,
    remap: Option<RowRemap>,
    domain_cache: HashMap<String, Vec<Option<String>>>,
}

impl FeatureReader {
    /// Open a reader over a source, mapping its schema once.
    pub fn open(source: TableSource, options: ReaderOptions) -> Result<FeatureReader> {
        let arrow_schema = source.schema();
        let sidecar_raw = match &source {
            TableSource::File(file) => file.sidecar_json(),
            TableSource::Stream(_) => None,
        }
        .or_else(|| arrow_schema.metadata().get(GEO_SCHEMA_METADATA_KEY).cloned());
        let sidecar = sidecar_raw.and_then(|json| match parse_geo_metadata(&json) {
            Ok(meta) => Some(meta),
            Err(error) => {
                warn!(%error, "sidecar geometry metadata is malformed; ignoring it");
                None
            }
        });

        let mut schema = map_schema(&arrow_schema, sidecar.as_ref(), options.fid_column.as_deref());
        let mut cursor = BatchCursor::new(source);

        let needs_scan = options.scan_geometry_types
            && schema
                .geometry_fields
                .iter()
                .any(|g| g.geometry_type.kind == GeometryKind::Unknown);
        if needs_scan {
            scan_geometry_types(&mut cursor, &mut schema)?;
        }

        let projection = schema.full_projection();
        Ok(FeatureReader {
            cursor,
            schema,
            projection,
            attr_filter: None,
            compiled: None,
            spatial: None,
            row_in_batch: 0,
            rows_before_batch: 0,
            remap: None,
            domain_cache: HashMap::new(),
        })
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    /// Row groups the current filters select on an addressable source;
    /// `None` when every unit is read.
    pub fn selected_units(&self) -> Option<&[usize]> {
        self.cursor.selection()
    }

    /// Restart iteration from the first feature.
    pub fn reset(&mut self) -> Result<()> {
        self.cursor.reset()?;
        self.row_in_batch = 0;
        self.rows_before_batch = 0;
        if let Some(remap) = &mut self.remap {
            remap.reset_cursor();
        }
        Ok(())
    }

    /// Install (or clear) the attribute filter. Recomputes the unit
    /// selection for addressable sources and restarts iteration.
    pub fn set_attribute_filter(&mut self, filter: Option<FilterExpr>) -> Result<()> {
        if let Some(expr) = &filter {
            self.check_referenced_fields(expr)?;
        }
        self.compiled = filter.as_ref().map(|expr| compile(expr, &self.schema));
        self.attr_filter = filter;
        self.recompute_selection()
    }

    /// Install (or clear) the spatial filter on one geometry field.
    pub fn set_spatial_filter(
        &mut self,
        geom_index: usize,
        filter: Option<SpatialFilter>,
    ) -> Result<()> {
        if geom_index >= self.schema.geometry_fields.len() {
            return Err(GeoTableError::invalid_argument(format!(
                "geometry field {geom_index} out of range"
            )));
        }
        self.spatial = filter.map(|f| (geom_index, f.envelope()));
        self.recompute_selection()
    }

    /// Recompute the logical→physical projection for a set of ignored
    /// field names. The active filters must not reference them.
    pub fn set_ignored_fields(&mut self, names: &[&str]) -> Result<()> {
        if let Some(expr) = &self.attr_filter {
            let mut referenced = Vec::new();
            referenced_fields(expr, &mut referenced);
            if let Some(clash) = referenced.iter().find(|n| names.contains(&n.as_str())) {
                return Err(GeoTableError::invalid_argument(format!(
                    "cannot ignore field {clash:?} while the attribute filter references it"
                )));
            }
        }
        self.projection = self.schema.projection_ignoring(names)?;
        Ok(())
    }

    /// Number of features, answered from metadata when no filter forces
    /// a scan. `None` when the count is unknowable without `force`.
    pub fn feature_count(&mut self, force: bool) -> Result<Option<i64>> {
        if self.attr_filter.is_none() && self.spatial.is_none() {
            if let Some(rows) = self.cursor.selected_rows() {
                return Ok(Some(rows));
            }
        }
        if !force {
            return Ok(None);
        }
        self.reset()?;
        let mut count = 0i64;
        while self.next_feature().is_some() {
            count += 1;
        }
        self.reset()?;
        Ok(Some(count))
    }

    /// Extent of one geometry field. Without `force` only the sidecar
    /// whole-column bbox is consulted.
    pub fn extent(&mut self, geom_index: usize, force: bool) -> Result<Option<Envelope>> {
        let Some(desc) = self.schema.geometry_fields.get(geom_index) else {
            return Err(GeoTableError::invalid_argument(format!(
                "geometry field {geom_index} out of range"
            )));
        };
        if self.attr_filter.is_none() && self.spatial.is_none() {
            if let Some(bbox) = desc.column_bbox {
                return Ok(Some(bbox));
            }
        }
        if !force {
            return Ok(None);
        }
        self.reset()?;
        let mut merged = Envelope::empty();
        while let Some(feature) = self.next_feature() {
            if let Some(geometry) = feature.geometry_at(geom_index) {
                merged.merge_envelope(&geometry.envelope());
            }
        }
        self.reset()?;
        Ok(merged.is_initialized().then_some(merged))
    }

    /// Position iteration at a global (original) row index. Returns
    /// false when the index is out of range or inside a skipped unit.
    pub fn seek_global_row(&mut self, index: i64) -> Result<bool> {
        let selected = match &self.remap {
            Some(remap) => match remap.selected_index(index) {
                Some(selected) => selected,
                None => return Ok(false),
            },
            None => index,
        };
        match self.cursor.seek(selected)? {
            Some(position) => {
                self.row_in_batch = position.row_in_batch;
                self.rows_before_batch = position.rows_before_batch;
                if let Some(remap) = &mut self.remap {
                    remap.reset_cursor();
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fetch one feature by id, bypassing the active filters. Iteration
    /// position is left just after the returned feature.
    pub fn feature_by_fid(&mut self, fid: i64) -> Result<Option<Feature>> {
        if self.schema.fid_column.is_none() {
            // positional ids: a direct seek
            if !self.seek_global_row(fid)? {
                return Ok(None);
            }
            match self.next_raw_row() {
                Some((batch, row, selected_idx)) => {
                    let resolved = self.resolve_fid(&batch, row, selected_idx);
                    Ok((resolved == fid).then(|| {
                        read_feature(&batch, row, &self.schema, &self.projection, resolved)
                    }))
                }
                None => Ok(None),
            }
        } else {
            // explicit column: scan from the start
            self.reset()?;
            while let Some((batch, row, selected_idx)) = self.next_raw_row() {
                if read_fid(&batch, &self.schema, row) == Some(fid) {
                    let resolved = self.resolve_fid(&batch, row, selected_idx);
                    return Ok(Some(read_feature(
                        &batch,
                        row,
                        &self.schema,
                        &self.projection,
                        resolved,
                    )));
                }
            }
            Ok(None)
        }
    }

    /// The string table of a dictionary-backed domain, built from the
    /// first batch carrying the column and cached. Stays queryable after
    /// the owning field is ignored.
    pub fn domain(&mut self, name: &str) -> Result<Option<Vec<Option<String>>>> {
        if let Some(values) = self.domain_cache.get(name) {
            return Ok(Some(values.clone()));
        }
        let Some(descriptor) = self.schema.domain(name).cloned() else {
            return Ok(None);
        };
        let batch = match self.cursor.current_batch() {
            Some(batch) => batch.clone(),
            None => {
                // unstarted or exhausted: peek at the first batch, then
                // restore the cursor
                self.reset()?;
                if !self.cursor.read_next_batch() {
                    return Ok(None);
                }
                let batch = match self.cursor.current_batch() {
                    Some(batch) => batch.clone(),
                    None => return Ok(None),
                };
                self.reset()?;
                batch
            }
        };
        match domain_values(&batch, &self.schema, &descriptor) {
            Some(values) => {
                self.domain_cache.insert(name.to_string(), values.clone());
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    /// Pull the next feature passing the active filters.
    pub fn next_feature(&mut self) -> Option<Feature> {
        loop {
            let (batch, row, selected_idx) = self.next_raw_row()?;
            let fid = self.resolve_fid(&batch, row, selected_idx);

            if let Some(compiled) = &self.compiled {
                if !row_passes_constraints(
                    &batch,
                    row,
                    fid,
                    &compiled.constraints,
                    &self.schema,
                ) {
                    continue;
                }
            }
            if let Some((geom_index, filter_env)) = &self.spatial {
                if !row_passes_spatial(&batch, row, *geom_index, filter_env, &self.schema) {
                    continue;
                }
            }

            let feature = read_feature(&batch, row, &self.schema, &self.projection, fid);

            let fully = self
                .compiled
                .as_ref()
                .map(|c| c.fully_translated)
                .unwrap_or(true);
            if !fully {
                if let Some(expr) = &self.attr_filter {
                    if !evaluate(expr, &feature, &self.schema) {
                        continue;
                    }
                }
            }
            return Some(feature);
        }
    }

    /// Next (batch, row, selected-row-index) triple, advancing batches as
    /// needed. No filtering.
    fn next_raw_row(&mut self) -> Option<(Arc<RecordBatch>, usize, i64)> {
        loop {
            if let Some(batch) = self.cursor.current_batch() {
                if self.row_in_batch < batch.num_rows() {
                    let batch = batch.clone();
                    let row = self.row_in_batch;
                    self.row_in_batch += 1;
                    return Some((batch, row, self.rows_before_batch + row as i64));
                }
            }
            if !self.advance_batch() {
                return None;
            }
        }
    }

    fn advance_batch(&mut self) -> bool {
        if let Some(batch) = self.cursor.current_batch() {
            self.rows_before_batch += batch.num_rows() as i64;
        }
        self.row_in_batch = 0;
        self.cursor.read_next_batch()
    }

    /// FID of the row: explicit column value, else the breakpoint-
    /// adjusted running index.
    fn resolve_fid(&mut self, batch: &RecordBatch, row: usize, selected_idx: i64) -> i64 {
        if let Some(fid) = read_fid(batch, &self.schema, row) {
            return fid;
        }
        match &mut self.remap {
            Some(remap) => remap.original_index(selected_idx).unwrap_or(selected_idx),
            None => selected_idx,
        }
    }

    fn check_referenced_fields(&self, expr: &FilterExpr) -> Result<()> {
        let mut referenced = Vec::new();
        referenced_fields(expr, &mut referenced);
        for name in referenced {
            let known = self.schema.field_index(&name).is_some()
                || self
                    .schema
                    .fid_column
                    .as_ref()
                    .is_some_and(|(fid_name, _)| fid_name == &name);
            if !known {
                return Err(GeoTableError::invalid_argument(format!(
                    "attribute filter references unknown field {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Re-run statistics pruning over the units of an addressable source
    /// and rebuild the sparse row remapping; then restart iteration.
    fn recompute_selection(&mut self) -> Result<()> {
        if !self.cursor.is_file() {
            self.remap = None;
            return self.reset();
        }

        let (selected, breaks, total_groups) = {
            let TableSource::File(file) = self.cursor.source() else {
                return Err(GeoTableError::internal("file selection on stream source"));
            };
            let total_groups = file.row_group_count();
            let mut selected = Vec::new();
            let mut breaks = Vec::new();
            let mut selected_before = 0i64;
            let mut original = 0i64;
            for group in 0..total_groups {
                let rows = file.row_group_rows(group);
                let mut skip = false;

                if let Some(compiled) = &self.compiled {
                    for constraint in &compiled.constraints {
                        let stats = match constraint.target {
                            ConstraintTarget::Field(index) => self
                                .schema
                                .fields
                                .get(index)
                                .and_then(|f| file.statistics(group, &f.path)),
                            ConstraintTarget::Fid => self
                                .schema
                                .fid_column
                                .as_ref()
                                .and_then(|(_, column)| file.statistics(group, &[*column])),
                        };
                        if unit_match(stats.as_ref(), constraint) == UnitMatch::No {
                            skip = true;
                            break;
                        }
                    }
                }

                if !skip {
                    if let Some((geom_index, filter_env)) = &self.spatial {
                        if let Some(desc) = self.schema.geometry_fields.get(*geom_index) {
                            let bbox = file
                                .geometry_statistics(group, desc.column)
                                .and_then(|s| s.bbox)
                                .or_else(|| {
                                    // the sidecar bbox covers the whole
                                    // column; only usable as a unit bound
                                    // when there is a single unit
                                    (total_groups == 1).then_some(desc.column_bbox).flatten()
                                });
                            if unit_bbox_match(bbox.as_ref(), filter_env) == UnitMatch::No {
                                skip = true;
                            }
                        }
                    }
                }

                if !skip {
                    breaks.push(RowBreak {
                        selected_before,
                        original_start: original,
                        rows,
                    });
                    selected.push(group);
                    selected_before += rows;
                }
                original += rows;
            }
            (selected, breaks, total_groups)
        };

        if selected.len() == total_groups {
            self.remap = None;
            self.cursor.set_selection(None)?;
        } else {
            self.remap = Some(RowRemap::new(breaks));
            self.cursor.set_selection(Some(selected))?;
        }
        self.row_in_batch = 0;
        self.rows_before_batch = 0;
        Ok(())
    }
}

/// Evaluate the compiled constraints directly against batch columns,
/// skipping the row before materialization when any fails.
fn row_passes_constraints(
    batch: &RecordBatch,
    row: usize,
    fid: i64,
    constraints: &[Constraint],
    schema: &ColumnSchema,
) -> bool {
    use crate::materialize::read_field_value;

    for constraint in constraints {
        let value = match constraint.target {
            ConstraintTarget::Fid => Some(FieldValue::Int64(fid)),
            ConstraintTarget::Field(index) => match schema.fields.get(index) {
                Some(field) => read_field_value(batch, field, row).ok(),
                None => None,
            },
        };
        if !constraint_matches(constraint, value.as_ref()) {
            return false;
        }
    }
    true
}

/// Row-level spatial pre-filter: covering bbox columns when present,
/// the WKB envelope fast path for binary geometries, a full decode
/// otherwise. Rows without a geometry never match.
fn row_passes_spatial(
    batch: &RecordBatch,
    row: usize,
    geom_index: usize,
    filter_env: &Envelope,
    schema: &ColumnSchema,
) -> bool {
    use crate::arrays::binary_value;

    let Some(desc) = schema.geometry_fields.get(geom_index) else {
        return true;
    };

    if let Some(row_bbox) = covering_envelope(batch, desc, row) {
        if !row_bbox.intersects(filter_env) {
            return false;
        }
    }

    let Some(array) = batch.columns().get(desc.column) else {
        return false;
    };
    if array.is_null(row) {
        return false;
    }

    if desc.encoding == GeomEncoding::Wkb {
        // envelope without building the geometry; only intersecting rows
        // are decoded downstream
        return match binary_value(array.as_ref(), row) {
            Ok(bytes) => match crate::wkb::envelope(bytes) {
                Some(env) => env.intersects(filter_env),
                None => false,
            },
            Err(_) => false,
        };
    }

    match decode_geometry(batch, desc, row) {
        Ok(Some(geometry)) => geometry.envelope().intersects(filter_env),
        _ => false,
    }
}

/// Scan for still-unknown geometry column types. Addressable sources
/// scan every unit; forward-only streams scan only the lookahead window
/// so the cursor stays resettable.
fn scan_geometry_types(cursor: &mut BatchCursor, schema: &mut ColumnSchema) -> Result<()> {
    let mut samples = Vec::new();
    let limit = if cursor.is_file() { usize::MAX } else { 2 };
    while samples.len() < limit && cursor.read_next_batch() {
        if let Some(batch) = cursor.current_batch() {
            samples.push(batch.clone());
        }
    }
    fill_geometry_types(schema, &samples);
    cursor.reset()
}
