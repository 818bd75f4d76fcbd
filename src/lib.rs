//! Read columnar geospatial tables as row-oriented feature records
//!
//! `geotable` converts batch-oriented columnar data (Arrow record
//! batches, Arrow IPC streams and files, Parquet files following the
//! GeoParquet metadata conventions) into features with typed attributes
//! and geometry values, pushing spatial and attribute filters down to
//! the columnar source so rejected rows are never materialized.
//!
//! # Key Components
//!
//! - **FeatureReader**: the pull iterator over a source
//!   - `next_feature` / `reset` iteration with lookahead caching
//!   - attribute and spatial filters compiled into per-unit statistics
//!     pruning and per-row pre-filters
//!   - projection (`set_ignored_fields`), count/extent fast paths,
//!     lookup by FID or global row index
//!
//! - **Sources**: forward-only streams and addressable row-group files
//!   - [`source::BatchStream`] / [`source::RowGroupSource`] traits
//!   - adapters for Parquet files and Arrow IPC, plus in-memory
//!     implementations for embedding materialized batches
//!
//! - **Geometry codecs**: WKB, WKT and GeoArrow nested columns
//!   - bounds-checked decoding that never trusts input lengths
//!   - a fast WKB envelope path that skips geometry construction
//!   - column type unification from leading type indicators
//!
//! - **Schema mapping**: columnar schema + sidecar JSON → row schema
//!   - geometry column discovery across competing conventions
//!   - struct flattening with explicit child-index paths
//!   - dictionary columns exposed as coded-value domains
//!
//! # Example
//!
//! ```no_run
//! use geotable::{FeatureReader, ReaderOptions, TableSource, ParquetFileSource};
//!
//! # fn run() -> geotable::Result<()> {
//! let bytes = bytes::Bytes::from(std::fs::read("places.parquet")?);
//! let source = ParquetFileSource::try_new(bytes)?;
//! let mut reader = FeatureReader::open(
//!     TableSource::File(Box::new(source)),
//!     ReaderOptions::new(),
//! )?;
//! while let Some(feature) = reader.next_feature() {
//!     println!("{} -> {:?}", feature.fid, feature.geometry());
//! }
//! # Ok(())
//! # }
//! ```

mod arrays;
pub mod error;
pub mod feature;
pub mod geoarrow;
pub mod geometry;
pub mod ipc_source;
pub mod layer;
pub mod mapper;
pub mod materialize;
pub mod metadata;
pub mod parquet_source;
pub mod pushdown;
pub mod schema;
pub mod source;
pub mod value;
pub mod wkb;
pub mod wkt;

pub use error::{GeoTableError, Result};
pub use feature::{Feature, GeometryValue};
pub use geometry::{Coord, Envelope, Geometry, GeometryKind, GeometryType};
pub use ipc_source::{IpcFileSource, IpcStreamSource};
pub use layer::{FeatureReader, ReaderOptions, SpatialFilter};
pub use metadata::{Crs, GeoMetadata};
pub use parquet_source::ParquetFileSource;
pub use pushdown::{col, lit, CompareOp, FilterExpr};
pub use schema::{ColumnSchema, FieldDescriptor, FieldKind, GeometryFieldDescriptor};
pub use source::{BatchStream, MemoryBatchStream, MemoryRowGroupSource, RowGroupSource, TableSource};
pub use value::FieldValue;
