//! Storage engine error kinds: one enum covering query compilation, schema
//! validation, and the underlying database driver, each variant reached via
//! a `#[from]` conversion from its source error type.

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("malformed query payload: {0}")]
    Parse(String),

    #[error("{0}")]
    Schema(String),

    #[error("unsupported value type: {0}")]
    Type(String),

    #[error("Sort and timebucket modifiers can not be used in the same payload")]
    SortAndTimebucket,

    #[error("JSON does not contain where clause")]
    MissingWhere,

    #[error("Unable to convert data to the required type")]
    InvalidTypeConversion,

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// SQLSTATE `22P02` ("invalid text representation") is remapped to a
    /// friendlier message instead of passing the raw driver error through.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("22P02") {
                return Self::InvalidTypeConversion;
            }
        }
        Self::Db(err)
    }
}

/// Lets callers inject how storage failures get reported instead of the
/// engine reaching for a global. The default implementation just logs.
pub trait ErrorSink: Send + Sync {
    fn record(&self, op: &str, reason: &str, retriable: bool);
}

pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn record(&self, op: &str, reason: &str, retriable: bool) {
        tracing::error!(operation = op, reason, retriable, "storage operation failed");
    }
}
