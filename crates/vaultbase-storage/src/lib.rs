//! Encrypted record store for vaultbase.
//!
//! The database lives on disk only as an encrypted container
//! (`<db_path>.enc`). Opening decrypts it into one private working file that a
//! SQLite session runs against; `sync` seals the working file back into the
//! container every `sync_interval` mutations and after schema changes, undo,
//! redo, and close. On top of plain tables the store keeps:
//! - special column types (`DATE`, `FILE`, `RELATION`) in the `_sys_columns`
//!   side table
//! - a bounded undo/redo journal over record mutations
//! - CSV export/import and encrypted backups

pub mod column;
mod csv_io;
mod error;
pub mod journal;
mod schema;
mod store;
pub mod value;

pub use column::{
    validate_email, validate_value, BaseType, ColumnInfo, ColumnKind, ColumnSpec, SpecialColumn,
    SpecialType, ValidationError,
};
pub use error::{Result, StoreError};
pub use journal::{EntryKind, JournalOutcome};
pub use schema::{validate_identifier, IdentifierKind, METADATA_TABLE};
pub use store::{Filter, RecordStore, StoreConfig, DEFAULT_SYNC_INTERVAL};
pub use value::{Record, Value};
