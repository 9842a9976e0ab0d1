use std::path::PathBuf;

use thiserror::Error;
use vaultbase_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("record store is closed")]
    Closed,
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableExists(String),
    #[error("column already exists: {table}.{column}")]
    ColumnExists { table: String, column: String },
    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },
    #[error("record {id} not found in {table}")]
    RecordNotFound { table: String, id: i64 },
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },
    #[error("table {0} has no id column")]
    MissingIdColumn(String),
    #[error("SQLite {0} cannot rename columns in place (requires 3.25.0)")]
    RenameUnsupported(String),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
    #[error("update entry has no post-image to redo")]
    MissingPostImage,
    #[error("csv header names unknown columns: {0:?}")]
    UnknownColumns(Vec<String>),
    #[error("csv line {line}: id {value:?} is not an integer")]
    InvalidImportId { line: usize, value: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
