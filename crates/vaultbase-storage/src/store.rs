use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use vaultbase_crypto::{Envelope, DATABASE_DOMAIN};

use crate::column::{ColumnInfo, ColumnKind, ColumnSpec, SpecialColumn, SpecialType};
use crate::csv_io;
use crate::error::{Result, StoreError};
use crate::journal::{Direction, Journal, JournalOutcome, UndoEntry, DEFAULT_CAPACITY};
use crate::schema::{self, quote, IdentifierKind};
use crate::value::{Record, Value};

pub const DEFAULT_SYNC_INTERVAL: u32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const CONTAINER_SUFFIX: &str = ".enc";
const WORKING_PREFIX: &str = "vaultbase-";
const WORKING_SUFFIX: &str = ".db";
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];
const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Plain database path. The container lives at `<db_path>.enc`; a file at
    /// `db_path` itself is only read once, to migrate an unencrypted database.
    pub db_path: PathBuf,
    /// Database key file, created on first open. Once a container exists the
    /// key must be present; a missing key is an error, not a fresh start.
    pub key_path: PathBuf,
    /// Mutations between automatic syncs. `1` seals after every mutation.
    pub sync_interval: u32,
    /// Entries kept on each of the undo and redo stacks.
    pub journal_capacity: usize,
    /// Where the decrypted working file is created; the system temp dir if unset.
    pub work_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(db_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            key_path: key_path.into(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            journal_capacity: DEFAULT_CAPACITY,
            work_dir: None,
        }
    }

    pub fn container_path(&self) -> PathBuf {
        vaultbase_fs::sibling_path_with_suffix(&self.db_path, CONTAINER_SUFFIX)
    }
}

/// A `WHERE` clause with positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub clause: String,
    pub params: Vec<Value>,
}

impl Filter {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// A live session over one encrypted database.
///
/// Open until [`RecordStore::close`] (or drop); afterwards every operation
/// returns [`StoreError::Closed`].
#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    envelope: Envelope,
    container: PathBuf,
    working: PathBuf,
    conn: Option<Connection>,
    journal: Journal,
    unsynced: u32,
}

impl RecordStore {
    pub fn open(config: StoreConfig) -> Result<Self> {
        let container = config.container_path();
        // An existing container is unreadable without its key; never mint a new one for it.
        let key = if container.exists() {
            vaultbase_crypto::load_key(&config.key_path)?
        } else {
            vaultbase_crypto::load_or_create_key(&config.key_path)?
        };
        let envelope = Envelope::new(key, DATABASE_DOMAIN);

        if !container.exists() && config.db_path.exists() {
            migrate_plaintext(&envelope, &config.db_path, &container)?;
        }

        let image = if container.exists() {
            let sealed = fs::read(&container).map_err(StoreError::io(&container))?;
            envelope.open(&sealed)?
        } else {
            log::info!("no database at {}, starting empty", container.display());
            Vec::new()
        };

        let work_dir = config
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let prefix = working_file_prefix(&container);
        purge_stale_working_files(&work_dir, &prefix);
        let working = create_working_file(&work_dir, &prefix, &image)?;
        let conn = match open_session(&working) {
            Ok(conn) => conn,
            Err(err) => {
                remove_working_files(&working);
                return Err(err);
            }
        };

        let journal = Journal::new(config.journal_capacity);
        Ok(Self {
            config,
            envelope,
            container,
            working,
            conn: Some(conn),
            journal,
            unsynced: 0,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn container_path(&self) -> &Path {
        &self.container
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed)
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(StoreError::Closed)
    }

    // --- persistence ---

    /// Commit, checkpoint, and seal the working file into the container.
    pub fn sync(&mut self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        checkpoint(conn);
        self.seal_working()?;
        self.unsynced = 0;
        Ok(())
    }

    fn seal_working(&self) -> Result<()> {
        let image = fs::read(&self.working).map_err(StoreError::io(&self.working))?;
        if image.is_empty() {
            log::warn!("working database is empty, leaving {} untouched", self.container.display());
            return Ok(());
        }
        let sealed = self.envelope.seal(&image)?;
        vaultbase_fs::write_secret_file(&self.container, &sealed)
            .map_err(StoreError::io(&self.container))?;
        Ok(())
    }

    fn sync_logged(&mut self) {
        if let Err(err) = self.sync() {
            log::error!("sync to {} failed: {err}", self.container.display());
        }
    }

    fn note_mutation(&mut self) {
        self.unsynced += 1;
        if self.unsynced >= self.config.sync_interval.max(1) {
            self.sync_logged();
        }
    }

    /// Tear the session down: final seal, then delete the working file and its
    /// side files. Errors are logged; calling this again is a no-op.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("COMMIT") {
                log::error!("commit on close failed: {err}");
            }
        }
        checkpoint(&conn);
        if let Err((_conn, err)) = conn.close() {
            log::error!("closing database session failed: {err}");
        }

        if let Err(err) = self.seal_working() {
            log::error!(
                "final encryption of {} failed, recent changes may be lost: {err}",
                self.container.display()
            );
        }
        remove_working_files(&self.working);
    }

    /// Sync, then copy the encrypted container to `dest`.
    pub fn backup_to(&mut self, dest: &Path) -> Result<u64> {
        self.sync()?;
        fs::copy(&self.container, dest).map_err(StoreError::io(dest))
    }

    // --- schema ---

    pub fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for name in rows {
            let name = name?;
            if schema::is_user_table(&name) {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    /// Create `name` with an implicit `id INTEGER PRIMARY KEY AUTOINCREMENT`
    /// followed by `columns`. Table and metadata are written in one transaction.
    pub fn create_table(&mut self, name: &str, columns: &[ColumnSpec]) -> Result<()> {
        let result = self.create_table_inner(name, columns);
        logged("create table", name, result)?;
        self.sync_logged();
        Ok(())
    }

    fn create_table_inner(&mut self, name: &str, columns: &[ColumnSpec]) -> Result<()> {
        schema::validate_identifier(name, IdentifierKind::Table)?;
        for (idx, spec) in columns.iter().enumerate() {
            schema::validate_identifier(&spec.name, IdentifierKind::Column)?;
            if columns[..idx]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&spec.name))
            {
                return Err(StoreError::ColumnExists {
                    table: name.to_string(),
                    column: spec.name.clone(),
                });
            }
        }

        let conn = self.conn_mut()?;
        if schema::table_exists(conn, name)? {
            return Err(StoreError::TableExists(name.to_string()));
        }

        let mut defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        defs.extend(
            columns
                .iter()
                .map(|c| format!("{} {}", quote(&c.name), c.base.sql())),
        );

        let tx = conn.transaction()?;
        tx.execute(&format!("CREATE TABLE {} ({})", quote(name), defs.join(", ")), [])?;
        // Rows left by a table dropped outside this store must not leak into the new one.
        tx.execute(
            "DELETE FROM _sys_columns WHERE table_name = ?1 COLLATE NOCASE",
            params![name],
        )?;
        for spec in columns {
            if let Some(special) = &spec.special {
                upsert_special(&tx, name, &spec.name, special)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop a table and its special-column metadata.
    ///
    /// Attachment blobs referenced from FILE columns are not touched; callers
    /// clean them up first (see [`RecordStore::columns_with_special`]).
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let result = self.drop_table_inner(name);
        logged("drop table", name, result)?;
        self.journal.forget_table(name);
        self.sync_logged();
        Ok(())
    }

    fn drop_table_inner(&mut self, name: &str) -> Result<()> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, name)?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE {}", quote(name)), [])?;
        tx.execute(
            "DELETE FROM _sys_columns WHERE table_name = ?1 COLLATE NOCASE",
            params![name],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn add_column(&mut self, table: &str, spec: &ColumnSpec) -> Result<()> {
        let result = self.add_column_inner(table, spec);
        logged("add column", table, result)?;
        self.sync_logged();
        Ok(())
    }

    fn add_column_inner(&mut self, table: &str, spec: &ColumnSpec) -> Result<()> {
        schema::validate_identifier(&spec.name, IdentifierKind::Column)?;
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        if find_column(conn, table, &spec.name)?.is_some() {
            return Err(StoreError::ColumnExists {
                table: table.to_string(),
                column: spec.name.clone(),
            });
        }

        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote(table),
                quote(&spec.name),
                spec.base.sql()
            ),
            [],
        )?;
        if let Some(special) = &spec.special {
            upsert_special(&tx, table, &spec.name, special)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Rename a column in the schema, its metadata row, and the journal's
    /// captured images.
    pub fn rename_column(&mut self, table: &str, old: &str, new: &str) -> Result<()> {
        let result = self.rename_column_inner(table, old, new);
        logged("rename column", table, result)?;
        self.journal.rename_column(table, old, new);
        self.sync_logged();
        Ok(())
    }

    fn rename_column_inner(&mut self, table: &str, old: &str, new: &str) -> Result<()> {
        schema::ensure_rename_supported()?;
        schema::validate_identifier(old, IdentifierKind::Column)?;
        schema::validate_identifier(new, IdentifierKind::Column)?;
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        if find_column(conn, table, old)?.is_none() {
            return Err(StoreError::ColumnNotFound {
                table: table.to_string(),
                column: old.to_string(),
            });
        }
        if !new.eq_ignore_ascii_case(old) && find_column(conn, table, new)?.is_some() {
            return Err(StoreError::ColumnExists {
                table: table.to_string(),
                column: new.to_string(),
            });
        }

        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote(table),
                quote(old),
                quote(new)
            ),
            [],
        )?;
        tx.execute(
            "UPDATE _sys_columns SET col_name = ?1
             WHERE table_name = ?2 COLLATE NOCASE AND col_name = ?3 COLLATE NOCASE",
            params![new, table, old],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn special_type(&self, table: &str, column: &str) -> Result<Option<SpecialColumn>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT special_type, extra_info FROM _sys_columns
                 WHERE table_name = ?1 COLLATE NOCASE AND col_name = ?2 COLLATE NOCASE",
                params![table, column],
                |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(tag, extra)| parse_special(table, column, tag, extra)))
    }

    /// Attach (or replace) special-type metadata on an existing column.
    pub fn set_special_type(&mut self, table: &str, column: &str, special: &SpecialColumn) -> Result<()> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        match find_column(conn, table, column)? {
            Some(info) if !info.primary_key => {}
            _ => {
                return Err(StoreError::ColumnNotFound {
                    table: table.to_string(),
                    column: column.to_string(),
                })
            }
        }
        let tx = conn.transaction()?;
        upsert_special(&tx, table, column, special)?;
        tx.commit()?;
        self.sync_logged();
        Ok(())
    }

    /// Names of the columns in `table` carrying `special_type`, e.g. every FILE
    /// column whose blobs must be deleted along with a row.
    pub fn columns_with_special(&self, table: &str, special_type: SpecialType) -> Result<Vec<String>> {
        Ok(self
            .special_columns(table)?
            .into_iter()
            .filter(|(_, s)| s.special_type == special_type)
            .map(|(name, _)| name)
            .collect())
    }

    fn special_columns(&self, table: &str) -> Result<Vec<(String, SpecialColumn)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT col_name, special_type, extra_info FROM _sys_columns
             WHERE table_name = ?1 COLLATE NOCASE",
        )?;
        let rows = stmt.query_map(params![table], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (column, tag, extra) = row?;
            if let Some(special) = parse_special(table, &column, tag, extra) {
                out.push((column, special));
            }
        }
        Ok(out)
    }

    // --- records ---

    /// Physical columns of `table`, `id` included.
    pub fn get_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.conn()?;
        schema::require_table(conn, table)?;
        fetch_columns(conn, table)
    }

    /// Columns with their special types resolved.
    pub fn column_kinds(&self, table: &str) -> Result<Vec<(ColumnInfo, ColumnKind)>> {
        let columns = self.get_columns(table)?;
        let specials: HashMap<String, SpecialColumn> = self
            .special_columns(table)?
            .into_iter()
            .map(|(name, s)| (name.to_ascii_lowercase(), s))
            .collect();
        Ok(columns
            .into_iter()
            .map(|info| {
                let kind = ColumnKind::resolve(&info, specials.get(&info.name.to_ascii_lowercase()));
                (info, kind)
            })
            .collect())
    }

    pub fn get_records(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        schema::require_table(conn, table)?;
        query_records(conn, table, filter)
    }

    pub fn get_record(&self, table: &str, id: i64) -> Result<Option<Record>> {
        let conn = self.conn()?;
        schema::require_table(conn, table)?;
        fetch_record(conn, table, id)
    }

    /// Insert a row and return its id.
    pub fn insert_record<S: AsRef<str>>(&mut self, table: &str, values: &[(S, Value)]) -> Result<i64> {
        let result = self.insert_inner(table, values);
        let id = logged("insert into", table, result)?;
        self.journal.record(UndoEntry::Insert {
            table: table.to_string(),
            id,
            image: None,
        });
        self.note_mutation();
        Ok(id)
    }

    fn insert_inner<S: AsRef<str>>(&mut self, table: &str, values: &[(S, Value)]) -> Result<i64> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        require_columns(conn, table, values.iter().map(|(c, _)| c.as_ref()))?;

        let tx = conn.transaction()?;
        insert_row(&tx, table, None, values)?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Apply `values` to row `id`, journaling the full before and after images.
    pub fn update_record<S: AsRef<str>>(&mut self, table: &str, id: i64, values: &[(S, Value)]) -> Result<()> {
        let result = self.update_inner(table, id, values);
        let (before, after) = logged("update", table, result)?;
        self.journal.record(UndoEntry::Update {
            table: table.to_string(),
            before,
            after: Some(after),
        });
        self.note_mutation();
        Ok(())
    }

    fn update_inner<S: AsRef<str>>(
        &mut self,
        table: &str,
        id: i64,
        values: &[(S, Value)],
    ) -> Result<(Record, Record)> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        require_columns(conn, table, values.iter().map(|(c, _)| c.as_ref()))?;

        let tx = conn.transaction()?;
        let before = fetch_record(&tx, table, id)?.ok_or_else(|| not_found(table, id))?;
        write_values(&tx, table, id, values)?;
        let after = fetch_record(&tx, table, id)?.ok_or_else(|| not_found(table, id))?;
        tx.commit()?;
        Ok((before, after))
    }

    pub fn delete_record(&mut self, table: &str, id: i64) -> Result<()> {
        let result = self.delete_inner(table, id);
        let image = logged("delete from", table, result)?;
        self.journal.record(UndoEntry::Delete {
            table: table.to_string(),
            image,
        });
        self.note_mutation();
        Ok(())
    }

    fn delete_inner(&mut self, table: &str, id: i64) -> Result<Record> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        let tx = conn.transaction()?;
        let image = fetch_record(&tx, table, id)?.ok_or_else(|| not_found(table, id))?;
        delete_row(&tx, table, id)?;
        tx.commit()?;
        Ok(image)
    }

    // --- journal ---

    pub fn can_undo(&self) -> bool {
        self.journal.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.journal.can_redo()
    }

    /// Revert the most recent mutation. A failed revert leaves the entry on the
    /// undo stack.
    pub fn undo(&mut self) -> Result<JournalOutcome> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let mut entry = self.journal.undo_stack().pop().ok_or(StoreError::NothingToUndo)?;

        if let Err(err) = apply_in_tx(conn, &mut entry, apply_undo) {
            log::warn!("undo of {} on {} failed: {err}", entry.kind(), entry.table());
            self.journal.undo_stack().push(entry);
            return Err(err);
        }

        let outcome = Journal::outcome(&entry, Direction::Undo);
        self.journal.redo_stack().push(entry);
        self.sync_logged();
        Ok(outcome)
    }

    /// Re-apply the most recently undone mutation.
    pub fn redo(&mut self) -> Result<JournalOutcome> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let mut entry = self.journal.redo_stack().pop().ok_or(StoreError::NothingToRedo)?;

        if matches!(entry, UndoEntry::Update { after: None, .. }) {
            log::warn!("discarding update entry on {} without a post-image", entry.table());
            return Err(StoreError::MissingPostImage);
        }

        if let Err(err) = apply_in_tx(conn, &mut entry, apply_redo) {
            log::warn!("redo of {} on {} failed: {err}", entry.kind(), entry.table());
            self.journal.redo_stack().push(entry);
            return Err(err);
        }

        let outcome = Journal::outcome(&entry, Direction::Redo);
        self.journal.undo_stack().push(entry);
        self.sync_logged();
        Ok(outcome)
    }

    // --- csv ---

    /// Write `table` as CSV: header of column names, then every row.
    pub fn export_csv(&self, table: &str, dest: &Path) -> Result<usize> {
        let conn = self.conn()?;
        schema::require_table(conn, table)?;
        let columns = fetch_columns(conn, table)?;
        let records = query_records(conn, table, None)?;
        csv_io::export(&columns, &records, dest)
    }

    /// Append rows from a CSV file whose header names existing columns. The rows
    /// are inserted in one transaction and are not journaled.
    pub fn import_csv(&mut self, table: &str, source: &Path) -> Result<usize> {
        let result = self.import_inner(table, source);
        let count = logged("import into", table, result)?;
        self.sync_logged();
        Ok(count)
    }

    fn import_inner(&mut self, table: &str, source: &Path) -> Result<usize> {
        let conn = self.conn_mut()?;
        schema::require_table(conn, table)?;
        let columns = fetch_columns(conn, table)?;
        let (header, rows) = csv_io::read(source, &columns)?;

        let tx = conn.transaction()?;
        for (index, row) in rows.iter().enumerate() {
            let values: Vec<(&str, Value)> = header
                .iter()
                .map(String::as_str)
                .zip(row.iter().cloned())
                .collect();
            let id = match values.iter().find(|(c, _)| c.eq_ignore_ascii_case("id")) {
                Some((_, Value::Text(text))) => Some(text.trim().parse::<i64>().map_err(|_| {
                    StoreError::InvalidImportId {
                        // Line 1 is the header.
                        line: index + 2,
                        value: text.clone(),
                    }
                })?),
                _ => None,
            };
            let values: Vec<(&str, Value)> = values
                .into_iter()
                .filter(|(c, _)| !c.eq_ignore_ascii_case("id"))
                .collect();
            insert_row(&tx, table, id, &values)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn logged<T>(op: &str, table: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        log::warn!("{op} {table:?} failed: {err}");
    }
    result
}

fn not_found(table: &str, id: i64) -> StoreError {
    StoreError::RecordNotFound {
        table: table.to_string(),
        id,
    }
}

// --- file lifecycle ---

fn migrate_plaintext(envelope: &Envelope, plain: &Path, container: &Path) -> Result<()> {
    log::info!("encrypting legacy database {}", plain.display());
    let image = fs::read(plain).map_err(StoreError::io(plain))?;
    let sealed = envelope.seal(&image)?;
    vaultbase_fs::write_secret_file(container, &sealed).map_err(StoreError::io(container))?;
    if let Err(err) = fs::remove_file(plain) {
        log::warn!("could not remove plaintext database {}: {err}", plain.display());
    }
    Ok(())
}

/// Working files are named `vaultbase-<tag>-XXXXXX.db`, where the tag is derived
/// from the container path, so a purge only ever touches files of this container.
fn working_file_prefix(container: &Path) -> String {
    let absolute = if container.is_absolute() {
        container.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(container))
            .unwrap_or_else(|_| container.to_path_buf())
    };
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let tag: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{WORKING_PREFIX}{tag}-")
}

/// Remove decrypted working files (and their SQLite side files) left behind by
/// sessions of this container that never closed.
fn purge_stale_working_files(dir: &Path, prefix: &str) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("cannot list work directory {}: {err}", dir.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let stale = entry.file_name().to_str().is_some_and(|name| {
            name.starts_with(prefix)
                && (name.ends_with(WORKING_SUFFIX)
                    || SIDE_FILE_SUFFIXES
                        .iter()
                        .any(|side| name.ends_with(&format!("{WORKING_SUFFIX}{side}"))))
        });
        if !stale {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => log::warn!("could not remove stale working file {}: {err}", entry.path().display()),
        }
    }
    if removed > 0 {
        log::warn!("removed {removed} working file(s) left by an unclean shutdown");
    }
    removed
}

fn create_working_file(dir: &Path, prefix: &str, image: &[u8]) -> Result<PathBuf> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(WORKING_SUFFIX);

    let mut file = builder.tempfile_in(dir).map_err(StoreError::io(dir))?;
    file.write_all(image).map_err(StoreError::io(file.path()))?;
    file.as_file().sync_all().map_err(StoreError::io(file.path()))?;

    let (_, path) = file.keep().map_err(|err| StoreError::Io {
        path: dir.to_path_buf(),
        source: err.error,
    })?;
    Ok(path)
}

fn open_session(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    schema::init(&conn)?;
    Ok(conn)
}

fn checkpoint(conn: &Connection) {
    // Returns a row even outside WAL mode; only matters for databases that enabled WAL.
    if let Err(err) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
        log::debug!("wal checkpoint skipped: {err}");
    }
}

fn remove_working_files(working: &Path) {
    let side_files = SIDE_FILE_SUFFIXES
        .iter()
        .map(|suffix| vaultbase_fs::sibling_path_with_suffix(working, suffix));
    for path in std::iter::once(working.to_path_buf()).chain(side_files) {
        if let Err(err) = vaultbase_fs::remove_with_retry(&path, REMOVE_ATTEMPTS, REMOVE_DELAY) {
            log::error!("could not remove working file {}: {err}", path.display());
        }
    }
}

// --- row helpers; all take a plain connection so they work inside transactions ---

fn fetch_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let rows = stmt.query_map([], |r| {
        Ok(ColumnInfo {
            position: r.get::<_, i64>(0)? as usize,
            name: r.get(1)?,
            declared_type: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            primary_key: r.get::<_, i64>(5)? != 0,
        })
    })?;

    let mut columns = Vec::new();
    for column in rows {
        columns.push(column?);
    }
    Ok(columns)
}

fn find_column(conn: &Connection, table: &str, column: &str) -> Result<Option<ColumnInfo>> {
    Ok(fetch_columns(conn, table)?
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(column)))
}

fn require_columns<'a>(
    conn: &Connection,
    table: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let existing = fetch_columns(conn, table)?;
    for name in names {
        schema::validate_identifier(name, IdentifierKind::Column)?;
        if !existing.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
            return Err(StoreError::ColumnNotFound {
                table: table.to_string(),
                column: name.to_string(),
            });
        }
    }
    Ok(())
}

fn query_records(conn: &Connection, table: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
    let mut sql = format!("SELECT * FROM {}", quote(table));
    let params: &[Value] = match filter {
        Some(filter) => {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.clause);
            &filter.params
        }
        None => &[],
    };

    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let id_idx = names
        .iter()
        .position(|n| n.eq_ignore_ascii_case("id"))
        .ok_or_else(|| StoreError::MissingIdColumn(table.to_string()))?;

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(names.len().saturating_sub(1));
        for (idx, name) in names.iter().enumerate() {
            if idx != id_idx {
                values.push((name.clone(), row.get::<_, Value>(idx)?));
            }
        }
        records.push(Record {
            id: row.get(id_idx)?,
            values,
        });
    }
    Ok(records)
}

fn fetch_record(conn: &Connection, table: &str, id: i64) -> Result<Option<Record>> {
    let filter = Filter::new("id = ?").param(id);
    Ok(query_records(conn, table, Some(&filter))?.into_iter().next())
}

fn insert_row<S: AsRef<str>>(
    conn: &Connection,
    table: &str,
    id: Option<i64>,
    values: &[(S, Value)],
) -> Result<()> {
    let mut names: Vec<String> = Vec::with_capacity(values.len() + 1);
    let mut params: Vec<&Value> = Vec::with_capacity(values.len() + 1);
    let id_value = id.map(Value::Integer);
    if let Some(id) = &id_value {
        names.push(quote("id"));
        params.push(id);
    }
    for (name, value) in values {
        names.push(quote(name.as_ref()));
        params.push(value);
    }

    let sql = if names.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote(table))
    } else {
        let placeholders = vec!["?"; names.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(table),
            names.join(", ")
        )
    };
    conn.execute(&sql, params_from_iter(params))?;
    Ok(())
}

fn write_values<S: AsRef<str>>(conn: &Connection, table: &str, id: i64, values: &[(S, Value)]) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = values
        .iter()
        .map(|(name, _)| format!("{} = ?", quote(name.as_ref())))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        quote(table),
        assignments.join(", ")
    );
    let id_param = Value::Integer(id);
    let params = values.iter().map(|(_, v)| v).chain(std::iter::once(&id_param));
    let changed = conn.execute(&sql, params_from_iter(params))?;
    if changed == 0 {
        return Err(not_found(table, id));
    }
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, id: i64) -> Result<usize> {
    Ok(conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", quote(table)),
        params![id],
    )?)
}

/// Values from a captured image whose columns still exist.
fn surviving_values(conn: &Connection, table: &str, image: &Record) -> Result<Vec<(String, Value)>> {
    let columns = fetch_columns(conn, table)?;
    let mut kept = Vec::with_capacity(image.values.len());
    for (name, value) in &image.values {
        if columns
            .iter()
            .any(|c| !c.primary_key && c.name.eq_ignore_ascii_case(name))
        {
            kept.push((name.clone(), value.clone()));
        } else {
            log::debug!("column {table}.{name} no longer exists, skipping");
        }
    }
    Ok(kept)
}

fn reinsert(conn: &Connection, table: &str, image: &Record) -> Result<()> {
    schema::require_table(conn, table)?;
    let values = surviving_values(conn, table, image)?;
    insert_row(conn, table, Some(image.id), &values)
}

fn restore(conn: &Connection, table: &str, image: &Record) -> Result<()> {
    schema::require_table(conn, table)?;
    let values = surviving_values(conn, table, image)?;
    write_values(conn, table, image.id, &values)
}

fn apply_in_tx(
    conn: &mut Connection,
    entry: &mut UndoEntry,
    apply: fn(&Connection, &mut UndoEntry) -> Result<()>,
) -> Result<()> {
    let tx = conn.transaction()?;
    apply(&tx, entry)?;
    tx.commit()?;
    Ok(())
}

fn apply_undo(conn: &Connection, entry: &mut UndoEntry) -> Result<()> {
    match entry {
        UndoEntry::Insert { table, id, image } => {
            schema::require_table(conn, table)?;
            // A row that is already gone still counts as undone.
            *image = fetch_record(conn, table, *id)?;
            delete_row(conn, table, *id)?;
        }
        UndoEntry::Delete { table, image } => reinsert(conn, table, image)?,
        UndoEntry::Update { table, before, .. } => restore(conn, table, before)?,
    }
    Ok(())
}

fn apply_redo(conn: &Connection, entry: &mut UndoEntry) -> Result<()> {
    match entry {
        UndoEntry::Insert { table, image, .. } => {
            if let Some(image) = image {
                reinsert(conn, table, image)?;
            }
        }
        UndoEntry::Delete { table, image } => {
            schema::require_table(conn, table)?;
            delete_row(conn, table, image.id)?;
        }
        UndoEntry::Update { table, after, .. } => match after {
            Some(after) => restore(conn, table, after)?,
            None => return Err(StoreError::MissingPostImage),
        },
    }
    Ok(())
}

// --- metadata ---

fn upsert_special(conn: &Connection, table: &str, column: &str, special: &SpecialColumn) -> Result<()> {
    conn.execute(
        "DELETE FROM _sys_columns WHERE table_name = ?1 COLLATE NOCASE AND col_name = ?2 COLLATE NOCASE",
        params![table, column],
    )?;
    conn.execute(
        "INSERT INTO _sys_columns (table_name, col_name, special_type, extra_info) VALUES (?1, ?2, ?3, ?4)",
        params![table, column, special.special_type.tag(), special.extra_info],
    )?;
    Ok(())
}

fn parse_special(
    table: &str,
    column: &str,
    tag: Option<String>,
    extra: Option<String>,
) -> Option<SpecialColumn> {
    let tag = tag.filter(|t| !t.is_empty())?;
    match tag.parse::<SpecialType>() {
        Ok(special_type) => Some(SpecialColumn {
            special_type,
            extra_info: extra.unwrap_or_default(),
        }),
        Err(err) => {
            log::warn!("ignoring metadata for {table}.{column}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> RecordStore {
        let mut config = StoreConfig::new(dir.join("database.db"), dir.join("db_key.key"));
        config.work_dir = Some(dir.to_path_buf());
        RecordStore::open(config).expect("open store")
    }

    #[test]
    fn redo_refuses_update_without_post_image() {
        let dir = tempdir().expect("tempdir");
        let mut store = open(dir.path());
        store
            .create_table("T", &[ColumnSpec::text("a")])
            .expect("create");
        let id = store.insert_record("T", &[("a", Value::from("x"))]).expect("insert");
        let before = store.get_record("T", id).expect("get").expect("row");

        store.journal.redo_stack().push(UndoEntry::Update {
            table: "T".to_string(),
            before,
            after: None,
        });

        assert!(matches!(store.redo(), Err(StoreError::MissingPostImage)));
        assert!(!store.can_redo());
        assert_eq!(
            store.get_record("T", id).expect("get").and_then(|r| r.get("a").cloned()),
            Some(Value::from("x"))
        );
    }

    #[test]
    fn failed_undo_keeps_the_entry() {
        let dir = tempdir().expect("tempdir");
        let mut store = open(dir.path());
        store
            .create_table("T", &[ColumnSpec::text("a")])
            .expect("create");
        let id = store.insert_record("T", &[("a", Value::from("x"))]).expect("insert");
        store.delete_record("T", id).expect("delete");

        // Occupy the id so re-inserting the deleted row collides.
        store
            .conn()
            .expect("conn")
            .execute("INSERT INTO \"T\" (id, a) VALUES (?1, 'squatter')", params![id])
            .expect("squat");

        assert!(matches!(store.undo(), Err(StoreError::Sqlite(_))));
        assert!(store.can_undo());
        assert!(!store.can_redo());
    }

    #[test]
    fn working_files_are_removed_on_close() {
        let dir = tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let working = store.working.clone();
        assert!(working.exists());

        store.close();
        store.close();
        assert!(!working.exists());
        assert!(store.container_path().exists());
        assert!(matches!(store.list_tables(), Err(StoreError::Closed)));
    }
}
