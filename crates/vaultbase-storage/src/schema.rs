use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};

/// Side table holding special column types.
pub const METADATA_TABLE: &str = "_sys_columns";

const RESERVED_PREFIXES: [&str; 2] = ["sqlite_", "_sys_"];

/// `ALTER TABLE .. RENAME COLUMN` landed in SQLite 3.25.0.
const RENAME_COLUMN_MIN_VERSION: i32 = 3_025_000;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS _sys_columns (
          table_name TEXT,
          col_name TEXT,
          special_type TEXT,
          extra_info TEXT,
          PRIMARY KEY (table_name, col_name)
        );
        "#,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Table,
    Column,
}

/// Check a user-supplied table or column name before it is spliced into SQL.
///
/// Names are always double-quoted in statements; rejecting `"` and control
/// characters keeps quoting trivial and the catalog readable.
pub fn validate_identifier(name: &str, kind: IdentifierKind) -> Result<()> {
    let reject = |reason| {
        Err(StoreError::InvalidIdentifier {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.trim() != name {
        return reject("must not start or end with whitespace");
    }
    if name.contains('"') {
        return reject("must not contain '\"'");
    }
    if name.chars().any(char::is_control) {
        return reject("must not contain control characters");
    }
    let lower = name.to_ascii_lowercase();
    if RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return reject("uses a reserved prefix");
    }
    if kind == IdentifierKind::Column && lower == "id" {
        return reject("`id` is the implicit primary key");
    }
    Ok(())
}

pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn is_user_table(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn require_table(conn: &Connection, table: &str) -> Result<()> {
    validate_identifier(table, IdentifierKind::Table)?;
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(StoreError::TableNotFound(table.to_string()))
    }
}

pub(crate) fn ensure_rename_supported() -> Result<()> {
    if rusqlite::version_number() >= RENAME_COLUMN_MIN_VERSION {
        Ok(())
    } else {
        Err(StoreError::RenameUnsupported(rusqlite::version().to_string()))
    }
}
