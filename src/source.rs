//! Batch sources and the pull-iteration state machine.
//!
//! Two source shapes exist: forward-only [`BatchStream`]s and addressable
//! [`RowGroupSource`]s. [`BatchCursor`] drives either through the
//! `Unstarted → Reading → Exhausted` cycle, caching the first two batches
//! of a forward-only stream so count/extent queries and resets do not
//! force a rescan, and honoring a row-group selection computed by
//! pushdown for addressable sources.
//!
//! A read error from the underlying source is logged and treated as
//! end-of-data; iteration terminates cleanly instead of raising.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{Array, RecordBatch};
use arrow_schema::{DataType, SchemaRef};
use tracing::warn;

use crate::error::{GeoTableError, Result};
use crate::pushdown::{ColumnStats, GeomStats};
use crate::value::FieldValue;

/// A forward-only sequence of record batches.
pub trait BatchStream {
    fn schema(&self) -> SchemaRef;

    /// Pull the next sequential batch; `None` at end of stream.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;

    /// Return to the beginning. `Ok(false)` means the stream cannot
    /// rewind; the caller reports that instead of silently continuing.
    fn rewind(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// An addressable file of independently readable row groups with
/// optional per-group statistics.
pub trait RowGroupSource {
    fn schema(&self) -> SchemaRef;

    fn row_group_count(&self) -> usize;

    fn row_group_rows(&self, group: usize) -> i64;

    /// (Re)open a reader positioned at the start of `group`.
    fn open_row_group(&mut self, group: usize) -> Result<()>;

    /// Next batch of the currently open row group; `None` at group end.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;

    /// Min/max/null-count statistics for a top-level column, when the
    /// format tracks them. `path` is the nesting path of the field.
    fn statistics(&self, group: usize, path: &[usize]) -> Option<ColumnStats>;

    /// Geometry statistics (bounding box) for a top-level column.
    fn geometry_statistics(&self, group: usize, column: usize) -> Option<GeomStats>;

    /// Raw sidecar geometry metadata JSON, when the file carries one.
    fn sidecar_json(&self) -> Option<String> {
        None
    }
}

/// Either source shape, type-erased.
pub enum TableSource {
    Stream(Box<dyn BatchStream>),
    File(Box<dyn RowGroupSource>),
}

impl TableSource {
    pub fn schema(&self) -> SchemaRef {
        match self {
            TableSource::Stream(s) => s.schema(),
            TableSource::File(f) => f.schema(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TableSource::File(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Unstarted,
    Reading,
    Exhausted,
}

/// Outcome of a cursor seek: where the requested row sits in the batch
/// that is now current.
#[derive(Debug, Clone, Copy)]
pub struct SeekPosition {
    pub row_in_batch: usize,
    /// Rows of the selection preceding the now-current batch
    pub rows_before_batch: i64,
}

/// The pull-iteration state machine over either source kind.
pub struct BatchCursor {
    source: TableSource,
    state: ReadState,
    current: Option<Arc<RecordBatch>>,
    /// Batches served since the last reset
    ordinal: i64,
    /// Batches pulled from the underlying stream since open/rewind
    stream_pos: i64,
    /// First and second batches of a forward-only stream
    cache: [Option<Arc<RecordBatch>>; 2],
    eof_seen: bool,
    single_batch: bool,
    /// Row groups to read, in order; `None` = all
    selection: Option<Vec<usize>>,
    /// Position within the selection (or plain next group index)
    next_group_slot: usize,
    group_open: bool,
}

impl BatchCursor {
    pub fn new(source: TableSource) -> Self {
        BatchCursor {
            source,
            state: ReadState::Unstarted,
            current: None,
            ordinal: 0,
            stream_pos: 0,
            cache: [None, None],
            eof_seen: false,
            single_batch: false,
            selection: None,
            next_group_slot: 0,
            group_open: false,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.source.schema()
    }

    pub fn source(&self) -> &TableSource {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut TableSource {
        &mut self.source
    }

    pub fn is_file(&self) -> bool {
        self.source.is_file()
    }

    /// Whether the stream turned out to hold a single batch.
    pub fn is_single_batch(&self) -> bool {
        self.single_batch
    }

    pub fn current_batch(&self) -> Option<&Arc<RecordBatch>> {
        self.current.as_ref()
    }

    /// Restrict an addressable source to a subset of row groups, in
    /// order. Resets the cursor position.
    pub fn set_selection(&mut self, selection: Option<Vec<usize>>) -> Result<()> {
        self.selection = selection;
        self.reset()
    }

    pub fn selection(&self) -> Option<&[usize]> {
        self.selection.as_deref()
    }

    /// Advance to the next batch. Returns `false` (and transitions to
    /// Exhausted) when no further data exists; read errors count as
    /// exhaustion after a warning.
    pub fn read_next_batch(&mut self) -> bool {
        if self.state == ReadState::Exhausted {
            return false;
        }
        let fetched = if self.is_file() {
            self.next_file_batch()
        } else {
            self.next_stream_batch()
        };
        match fetched {
            Ok(Some(batch)) => {
                self.current = Some(batch);
                self.ordinal += 1;
                self.state = ReadState::Reading;
                true
            }
            Ok(None) => {
                self.current = None;
                self.state = ReadState::Exhausted;
                false
            }
            Err(error) => {
                warn!(%error, "batch read failed; treating source as exhausted");
                self.current = None;
                self.state = ReadState::Exhausted;
                false
            }
        }
    }

    fn next_file_batch(&mut self) -> Result<Option<Arc<RecordBatch>>> {
        let TableSource::File(file) = &mut self.source else {
            return Err(GeoTableError::internal("file batch on stream source"));
        };
        loop {
            if self.group_open {
                if let Some(batch) = file.next_batch()? {
                    return Ok(Some(Arc::new(batch)));
                }
                self.group_open = false;
                self.next_group_slot += 1;
            }
            let slot = self.next_group_slot;
            let group = match (&self.selection, slot) {
                (Some(sel), slot) => match sel.get(slot) {
                    Some(g) => *g,
                    None => return Ok(None),
                },
                (None, slot) => {
                    if slot >= file.row_group_count() {
                        return Ok(None);
                    }
                    slot
                }
            };
            file.open_row_group(group)?;
            self.group_open = true;
        }
    }

    fn next_stream_batch(&mut self) -> Result<Option<Arc<RecordBatch>>> {
        // replay from the lookahead cache after a reset
        if self.ordinal < self.stream_pos {
            let slot = self.ordinal as usize;
            if slot < self.cache.len() {
                if let Some(batch) = &self.cache[slot] {
                    return Ok(Some(batch.clone()));
                }
            }
            return Err(GeoTableError::internal(
                "stream position ran ahead of the lookahead cache",
            ));
        }
        if self.eof_seen {
            return Ok(None);
        }
        let TableSource::Stream(stream) = &mut self.source else {
            return Err(GeoTableError::internal("stream batch on file source"));
        };
        match stream.next_batch()? {
            Some(batch) => {
                let batch = Arc::new(batch);
                let slot = self.stream_pos as usize;
                if slot < self.cache.len() {
                    self.cache[slot] = Some(batch.clone());
                }
                self.stream_pos += 1;
                Ok(Some(batch))
            }
            None => {
                self.eof_seen = true;
                if self.stream_pos == 1 {
                    self.single_batch = true;
                }
                Ok(None)
            }
        }
    }

    /// Discard the current batch reference and return to Unstarted.
    ///
    /// Forward-only streams already read past the lookahead window need
    /// the underlying source to rewind; when it cannot, this is a
    /// reported failure, not a silent no-op.
    pub fn reset(&mut self) -> Result<()> {
        self.current = None;
        self.state = ReadState::Unstarted;
        self.ordinal = 0;
        self.next_group_slot = 0;
        self.group_open = false;
        if let TableSource::Stream(stream) = &mut self.source {
            // replay covers everything as long as no batch beyond the two
            // cached ones was pulled
            let cache_covers = self.stream_pos <= self.cache.len() as i64;
            if !cache_covers {
                if stream.rewind()? {
                    self.stream_pos = 0;
                    self.eof_seen = false;
                    self.cache = [None, None];
                } else {
                    return Err(GeoTableError::rewind(
                        "forward-only source cannot restart beyond its lookahead window",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Total rows of the (selected) units, when knowable without a scan.
    pub fn selected_rows(&self) -> Option<i64> {
        match &self.source {
            TableSource::File(f) => {
                let total = match &self.selection {
                    Some(sel) => sel.iter().map(|&g| f.row_group_rows(g)).sum(),
                    None => (0..f.row_group_count()).map(|g| f.row_group_rows(g)).sum(),
                };
                Some(total)
            }
            TableSource::Stream(_) => {
                if self.single_batch {
                    self.cache[0].as_ref().map(|b| b.num_rows() as i64)
                } else if self.eof_seen && self.stream_pos <= self.cache.len() as i64 {
                    Some(
                        self.cache
                            .iter()
                            .flatten()
                            .map(|b| b.num_rows() as i64)
                            .sum(),
                    )
                } else {
                    None
                }
            }
        }
    }

    /// Position the cursor so the `target`-th row of the selection is in
    /// the current batch.
    ///
    /// Addressable sources reopen the containing row group directly; a
    /// single-batch stream is a plain index assignment; any other stream
    /// resets and skips forward (which may fail if it cannot rewind).
    pub fn seek(&mut self, target: i64) -> Result<Option<SeekPosition>> {
        if target < 0 {
            return Ok(None);
        }
        if self.is_file() {
            self.seek_file(target)
        } else {
            self.seek_stream(target)
        }
    }

    fn seek_file(&mut self, target: i64) -> Result<Option<SeekPosition>> {
        // locate the containing row group by accumulating row counts
        let found = {
            let TableSource::File(file) = &self.source else {
                return Err(GeoTableError::internal("file seek on stream source"));
            };
            let groups: Vec<usize> = match &self.selection {
                Some(sel) => sel.clone(),
                None => (0..file.row_group_count()).collect(),
            };
            let mut before: i64 = 0;
            let mut found = None;
            for (slot, &group) in groups.iter().enumerate() {
                let rows = file.row_group_rows(group);
                if target < before + rows {
                    found = Some((slot, group, target - before));
                    break;
                }
                before += rows;
            }
            found
        };
        let Some((slot, group, mut offset)) = found else {
            return Ok(None);
        };
        {
            let TableSource::File(file) = &mut self.source else {
                return Err(GeoTableError::internal("file seek on stream source"));
            };
            file.open_row_group(group)?;
        }
        self.group_open = true;
        self.next_group_slot = slot;
        self.state = ReadState::Reading;
        self.current = None;
        // walk batches inside the group to the in-group offset
        loop {
            let batch = {
                let TableSource::File(file) = &mut self.source else {
                    return Err(GeoTableError::internal("file seek on stream source"));
                };
                file.next_batch()?
            };
            let Some(batch) = batch else {
                return Ok(None);
            };
            let rows = batch.num_rows() as i64;
            if offset < rows {
                self.current = Some(Arc::new(batch));
                return Ok(Some(SeekPosition {
                    row_in_batch: offset as usize,
                    rows_before_batch: target - offset,
                }));
            }
            offset -= rows;
        }
    }

    fn seek_stream(&mut self, target: i64) -> Result<Option<SeekPosition>> {
        if self.single_batch {
            let Some(batch) = self.cache[0].clone() else {
                return Ok(None);
            };
            if target >= batch.num_rows() as i64 {
                return Ok(None);
            }
            self.current = Some(batch);
            self.ordinal = 1;
            self.state = ReadState::Reading;
            return Ok(Some(SeekPosition {
                row_in_batch: target as usize,
                rows_before_batch: 0,
            }));
        }
        self.reset()?;
        let mut before: i64 = 0;
        while self.read_next_batch() {
            let rows = self
                .current
                .as_ref()
                .map(|b| b.num_rows() as i64)
                .unwrap_or(0);
            if target < before + rows {
                return Ok(Some(SeekPosition {
                    row_in_batch: (target - before) as usize,
                    rows_before_batch: before,
                }));
            }
            before += rows;
        }
        Ok(None)
    }
}

/// In-memory forward-only stream, optionally rewindable. Used by tests
/// and by callers embedding already-materialized batches.
pub struct MemoryBatchStream {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    pos: usize,
    rewindable: bool,
}

impl MemoryBatchStream {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        MemoryBatchStream {
            schema,
            batches,
            pos: 0,
            rewindable: false,
        }
    }

    pub fn rewindable(mut self) -> Self {
        self.rewindable = true;
        self
    }
}

impl BatchStream for MemoryBatchStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let batch = self.batches.get(self.pos).cloned();
        if batch.is_some() {
            self.pos += 1;
        }
        Ok(batch)
    }

    fn rewind(&mut self) -> Result<bool> {
        if !self.rewindable {
            return Ok(false);
        }
        self.pos = 0;
        Ok(true)
    }
}

/// In-memory addressable source: one or more batches per row group, with
/// per-group statistics derived from the data.
pub struct MemoryRowGroupSource {
    schema: SchemaRef,
    groups: Vec<Vec<RecordBatch>>,
    open: Option<(usize, usize)>,
    geo_stats: HashMap<(usize, usize), GeomStats>,
    sidecar: Option<String>,
}

impl MemoryRowGroupSource {
    pub fn new(schema: SchemaRef, groups: Vec<Vec<RecordBatch>>) -> Self {
        MemoryRowGroupSource {
            schema,
            groups,
            open: None,
            geo_stats: HashMap::new(),
            sidecar: None,
        }
    }

    pub fn with_sidecar(mut self, json: &str) -> Self {
        self.sidecar = Some(json.to_string());
        self
    }

    /// Attach a geometry bounding box statistic for (group, column).
    pub fn with_geometry_bbox(
        mut self,
        group: usize,
        column: usize,
        bbox: crate::geometry::Envelope,
    ) -> Self {
        self.geo_stats
            .insert((group, column), GeomStats { bbox: Some(bbox) });
        self
    }
}

/// Derive min/max/null-count from the concrete arrays of a group, for
/// the column kinds statistics pruning understands.
fn compute_stats(arrays: &[&dyn Array]) -> Option<ColumnStats> {
    let mut stats = ColumnStats {
        row_count: arrays.iter().map(|a| a.len() as u64).sum(),
        null_count: Some(arrays.iter().map(|a| a.null_count() as u64).sum()),
        ..Default::default()
    };
    for array in arrays {
        for row in 0..array.len() {
            if array.is_null(row) {
                continue;
            }
            let value = match array.data_type() {
                DataType::Int32 => FieldValue::Int32(
                    array.as_primitive::<arrow_array::types::Int32Type>().value(row),
                ),
                DataType::Int64 => FieldValue::Int64(
                    array.as_primitive::<arrow_array::types::Int64Type>().value(row),
                ),
                DataType::Float64 => FieldValue::Float64(ordered_float::OrderedFloat(
                    array.as_primitive::<arrow_array::types::Float64Type>().value(row),
                )),
                DataType::Utf8 => {
                    FieldValue::String(Arc::from(array.as_string::<i32>().value(row)))
                }
                _ => return None,
            };
            update_stats(&mut stats, value);
        }
    }
    Some(stats)
}

fn update_stats(stats: &mut ColumnStats, value: FieldValue) {
    let replace_min = match &stats.min {
        Some(min) => matches!(value.partial_cmp_value(min), Some(std::cmp::Ordering::Less)),
        None => true,
    };
    if replace_min {
        stats.min = Some(value.clone());
    }
    let replace_max = match &stats.max {
        Some(max) => matches!(
            value.partial_cmp_value(max),
            Some(std::cmp::Ordering::Greater)
        ),
        None => true,
    };
    if replace_max {
        stats.max = Some(value);
    }
}

impl RowGroupSource for MemoryRowGroupSource {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn row_group_count(&self) -> usize {
        self.groups.len()
    }

    fn row_group_rows(&self, group: usize) -> i64 {
        self.groups
            .get(group)
            .map(|batches| batches.iter().map(|b| b.num_rows() as i64).sum())
            .unwrap_or(0)
    }

    fn open_row_group(&mut self, group: usize) -> Result<()> {
        if group >= self.groups.len() {
            return Err(GeoTableError::invalid_argument(format!(
                "row group {group} out of range"
            )));
        }
        self.open = Some((group, 0));
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let Some((group, pos)) = self.open else {
            return Ok(None);
        };
        match self.groups[group].get(pos) {
            Some(batch) => {
                self.open = Some((group, pos + 1));
                Ok(Some(batch.clone()))
            }
            None => Ok(None),
        }
    }

    fn statistics(&self, group: usize, path: &[usize]) -> Option<ColumnStats> {
        // statistics exist for top-level columns only
        let [column] = path else { return None };
        let batches = self.groups.get(group)?;
        let arrays: Vec<&dyn Array> = batches
            .iter()
            .map(|b| b.columns().get(*column).map(|a| a.as_ref()))
            .collect::<Option<_>>()?;
        compute_stats(&arrays)
    }

    fn geometry_statistics(&self, group: usize, column: usize) -> Option<GeomStats> {
        self.geo_stats.get(&(group, column)).cloned()
    }

    fn sidecar_json(&self) -> Option<String> {
        self.sidecar.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int32Array;
    use arrow_schema::{Field, Schema};

    fn int_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, true)]))
    }

    fn int_batch(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(int_schema(), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn drain(cursor: &mut BatchCursor) -> Vec<usize> {
        let mut sizes = Vec::new();
        while cursor.read_next_batch() {
            sizes.push(cursor.current_batch().unwrap().num_rows());
        }
        sizes
    }

    #[test]
    fn test_stream_iteration_and_replay() {
        let stream = MemoryBatchStream::new(
            int_schema(),
            vec![int_batch(vec![1, 2]), int_batch(vec![3])],
        );
        let mut cursor = BatchCursor::new(TableSource::Stream(Box::new(stream)));
        assert_eq!(drain(&mut cursor), vec![2, 1]);
        assert!(!cursor.is_single_batch());

        // both batches sit in the lookahead cache: replay without rewind
        cursor.reset().unwrap();
        assert_eq!(drain(&mut cursor), vec![2, 1]);
        assert_eq!(cursor.selected_rows(), Some(3));
    }

    #[test]
    fn test_single_batch_detection() {
        let stream = MemoryBatchStream::new(int_schema(), vec![int_batch(vec![1, 2, 3])]);
        let mut cursor = BatchCursor::new(TableSource::Stream(Box::new(stream)));
        assert_eq!(drain(&mut cursor), vec![3]);
        assert!(cursor.is_single_batch());
        cursor.reset().unwrap();
        assert_eq!(drain(&mut cursor), vec![3]);
        // direct index assignment
        let pos = cursor.seek(1).unwrap().unwrap();
        assert_eq!(pos.row_in_batch, 1);
    }

    #[test]
    fn test_rewind_required_beyond_cache() {
        let batches = vec![
            int_batch(vec![1]),
            int_batch(vec![2]),
            int_batch(vec![3]),
        ];
        let stream = MemoryBatchStream::new(int_schema(), batches.clone());
        let mut cursor = BatchCursor::new(TableSource::Stream(Box::new(stream)));
        assert_eq!(drain(&mut cursor).len(), 3);
        // three batches pulled, cache holds two: reset must fail
        assert!(matches!(cursor.reset(), Err(GeoTableError::Rewind(_))));

        let stream = MemoryBatchStream::new(int_schema(), batches).rewindable();
        let mut cursor = BatchCursor::new(TableSource::Stream(Box::new(stream)));
        assert_eq!(drain(&mut cursor).len(), 3);
        cursor.reset().unwrap();
        assert_eq!(drain(&mut cursor).len(), 3);
    }

    #[test]
    fn test_file_iteration_with_selection() {
        let source = MemoryRowGroupSource::new(
            int_schema(),
            vec![
                vec![int_batch(vec![0, 1])],
                vec![int_batch(vec![2, 3])],
                vec![int_batch(vec![4, 5])],
            ],
        );
        let mut cursor = BatchCursor::new(TableSource::File(Box::new(source)));
        assert_eq!(drain(&mut cursor), vec![2, 2, 2]);
        assert_eq!(cursor.selected_rows(), Some(6));

        cursor.set_selection(Some(vec![0, 2])).unwrap();
        let mut seen = Vec::new();
        while cursor.read_next_batch() {
            let batch = cursor.current_batch().unwrap();
            let col = batch.column(0).as_primitive::<arrow_array::types::Int32Type>();
            seen.extend((0..col.len()).map(|i| col.value(i)));
        }
        assert_eq!(seen, vec![0, 1, 4, 5]);
        assert_eq!(cursor.selected_rows(), Some(4));
    }

    #[test]
    fn test_file_seek() {
        let source = MemoryRowGroupSource::new(
            int_schema(),
            vec![
                vec![int_batch(vec![0, 1, 2])],
                vec![int_batch(vec![3, 4, 5])],
            ],
        );
        let mut cursor = BatchCursor::new(TableSource::File(Box::new(source)));
        let pos = cursor.seek(4).unwrap().unwrap();
        assert_eq!(pos.row_in_batch, 1);
        assert_eq!(pos.rows_before_batch, 3);
        let batch = cursor.current_batch().unwrap();
        let col = batch.column(0).as_primitive::<arrow_array::types::Int32Type>();
        assert_eq!(col.value(pos.row_in_batch), 4);
        assert!(cursor.seek(17).unwrap().is_none());
    }

    #[test]
    fn test_memory_statistics() {
        let source = MemoryRowGroupSource::new(
            int_schema(),
            vec![vec![int_batch(vec![5, 1, 9])]],
        );
        let stats = source.statistics(0, &[0]).unwrap();
        assert_eq!(stats.min, Some(FieldValue::Int32(1)));
        assert_eq!(stats.max, Some(FieldValue::Int32(9)));
        assert_eq!(stats.null_count, Some(0));
        assert_eq!(stats.row_count, 3);
        assert!(source.statistics(0, &[0, 1]).is_none());
    }
}
