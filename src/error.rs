use thiserror::Error;

/// Core error type for reading columnar geospatial tables
#[derive(Error, Debug)]
pub enum GeoTableError {
    /// IO errors from file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow errors from Arrow operations
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// Parquet format errors
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Sidecar metadata JSON errors
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Schema-related errors
    #[error("Schema error: {0}")]
    Schema(String),

    /// Type conversion errors
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Truncated or inconsistent geometry payloads
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    /// Invalid argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Reset requested on a source that cannot rewind
    #[error("Rewind not supported: {0}")]
    Rewind(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Internal errors that shouldn't happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for geotable operations
pub type Result<T> = std::result::Result<T, GeoTableError>;

impl GeoTableError {
    /// Create a new schema error
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        GeoTableError::Schema(msg.into())
    }

    /// Create a new conversion error
    pub fn conversion<S: Into<String>>(msg: S) -> Self {
        GeoTableError::Conversion(msg.into())
    }

    /// Create a new malformed-geometry error
    pub fn malformed_geometry<S: Into<String>>(msg: S) -> Self {
        GeoTableError::MalformedGeometry(msg.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        GeoTableError::InvalidArgument(msg.into())
    }

    /// Create a new rewind error
    pub fn rewind<S: Into<String>>(msg: S) -> Self {
        GeoTableError::Rewind(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        GeoTableError::Unsupported(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GeoTableError::Internal(msg.into())
    }
}
